use std::ffi::OsString;

use crate::config::{Mirror, Settings};
use crate::context::Context;
use crate::error::Result;
use crate::hash::{format_optional, Hash};
use crate::identity::Identity;
use crate::publish::helper::run_helper;
use crate::publish::verify::verify;
use crate::store::LocalStore;

fn pull_from(
    ctx: &Context,
    mirror: &Mirror,
    id: &Identity,
    prev: Option<&Hash>,
) -> Result<Option<Hash>> {
    let scheme = match mirror.scheme() {
        Some(scheme) => scheme.to_string(),
        None => return Ok(prev.cloned()),
    };
    let mut args: Vec<OsString> = mirror.helper_flags.iter().map(OsString::from).collect();
    args.push(OsString::from(&mirror.url));
    args.push(OsString::from(id.to_string()));
    args.push(OsString::from(format_optional(prev)));
    run_helper(ctx, "pull", &scheme, &args)
}

/// pull the latest signature for `id` from every configured mirror
///
/// the local latest signature is verified first; each mirror is then
/// asked for anything newer, and a changed answer is verified before it
/// replaces the local latest. Returns the final `(signature, signed)`
/// pair.
pub fn pull(
    ctx: &Context,
    settings: &Settings,
    s: &LocalStore,
    id: &Identity,
) -> Result<(Option<Hash>, Option<Hash>)> {
    let mut latest = s.latest_signature(ctx, id)?;
    let mut signed = verify(ctx, id, latest.as_ref())?;
    for mirror in settings.mirrors_for(id) {
        ctx.check()?;
        let returned = pull_from(ctx, mirror, id, latest.as_ref())?;
        if returned != latest {
            let verified = verify(ctx, id, returned.as_ref())?;
            latest = returned;
            signed = verified;
        }
    }
    s.update_signature(ctx, id, latest.as_ref())?;
    Ok((latest, signed))
}
