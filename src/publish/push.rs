use std::ffi::OsString;

use crate::config::{Mirror, Settings};
use crate::context::Context;
use crate::error::Result;
use crate::hash::{format_optional, Hash};
use crate::identity::Identity;
use crate::publish::helper::run_helper;
use crate::publish::verify::verify;
use crate::store::LocalStore;

fn push_to(
    ctx: &Context,
    mirror: &Mirror,
    id: &Identity,
    h: Option<&Hash>,
) -> Result<Option<Hash>> {
    let scheme = match mirror.scheme() {
        Some(scheme) => scheme.to_string(),
        None => return Ok(h.cloned()),
    };
    let mut args: Vec<OsString> = mirror.helper_flags.iter().map(OsString::from).collect();
    args.push(OsString::from(&mirror.url));
    args.push(OsString::from(id.to_string()));
    args.push(OsString::from(format_optional(h)));
    run_helper(ctx, "push", &scheme, &args)
}

/// push the latest signature for `id` to every writable mirror
///
/// a mirror may answer with a different (newer) signature hash; that hash
/// is verified before it replaces the one being pushed. The identity
/// index is updated with the final value.
pub fn push(
    ctx: &Context,
    settings: &Settings,
    s: &LocalStore,
    id: &Identity,
    h: Option<&Hash>,
) -> Result<Option<Hash>> {
    let mut latest = h.cloned();
    for identity_config in &settings.identities {
        if identity_config.name != id.to_string() {
            continue;
        }
        for mirror in &identity_config.mirrors {
            if mirror.read_only {
                continue;
            }
            ctx.check()?;
            let returned = push_to(ctx, mirror, id, latest.as_ref())?;
            if returned != latest {
                verify(ctx, id, returned.as_ref())?;
                latest = returned;
            }
        }
    }
    s.update_signature(ctx, id, latest.as_ref())?;
    Ok(latest)
}
