use std::ffi::OsString;

use crate::context::Context;
use crate::error::Result;
use crate::hash::Hash;
use crate::identity::Identity;
use crate::publish::helper::run_helper;
use crate::store::LocalStore;

/// sign `h` as `id`, recording the new signature in the identity index
///
/// signing a nil hash is a no-op. The sign helper receives the identity,
/// the hash, and the previous signature when one exists.
pub fn sign(
    ctx: &Context,
    s: &LocalStore,
    id: &Identity,
    h: Option<&Hash>,
    prev_signature: Option<&Hash>,
) -> Result<Option<Hash>> {
    let h = match h {
        Some(h) => h,
        None => return Ok(None),
    };
    let mut args = vec![OsString::from(id.to_string()), OsString::from(h.to_string())];
    if let Some(prev) = prev_signature {
        args.push(OsString::from(prev.to_string()));
    }
    let signature = run_helper(ctx, "sign", id.namespace(), &args)?;
    s.update_signature(ctx, id, signature.as_ref())?;
    Ok(signature)
}
