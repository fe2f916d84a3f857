use std::ffi::OsString;

use crate::context::Context;
use crate::error::Result;
use crate::hash::Hash;
use crate::identity::Identity;
use crate::publish::helper::run_helper;

/// verify a signature, returning the hash it covers
///
/// a nil signature yields `None` (the case for a new identity). The
/// verify helper exits non-zero to reject a signature.
pub fn verify(
    ctx: &Context,
    id: &Identity,
    signature: Option<&Hash>,
) -> Result<Option<Hash>> {
    let signature = match signature {
        Some(signature) => signature,
        None => return Ok(None),
    };
    let args = [
        OsString::from(id.to_string()),
        OsString::from(signature.to_string()),
    ];
    run_helper(ctx, "verify", id.namespace(), &args)
}
