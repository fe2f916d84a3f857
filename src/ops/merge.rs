use std::collections::BTreeSet;
use std::fs;

use crate::context::Context;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::ops::checkout::{checkout, remove_all};
use crate::ops::helper::merge_with_helper;
use crate::ops::log::read_log;
use crate::ops::snapshot::current;
use crate::store::LocalStore;
use crate::types::{File, FilePath, Tree};

/// merge options
#[derive(Clone, Copy, Default)]
pub struct MergeOptions {
    /// on a mode mismatch between the two sides, keep the source's mode
    /// instead of reporting a conflict
    pub force_keep_mode: bool,
}

/// whether `base` is an ancestor of `h`
///
/// every snapshot is an ancestor of itself, the nil snapshot is an
/// ancestor of everything, and ancestry is transitive through parents.
pub fn is_ancestor(
    ctx: &Context,
    s: &LocalStore,
    base: Option<&Hash>,
    h: &Hash,
) -> Result<bool> {
    let base = match base {
        Some(base) => base,
        None => return Ok(true),
    };
    let log = read_log(ctx, s, h, -1)?;
    Ok(log.iter().any(|e| &e.hash == base))
}

/// find the merge base: the most recent common ancestor of two snapshots
///
/// equal inputs are their own base, and a nil side makes the base nil.
/// Both logs are scanned in lockstep against the opposite side's ancestor
/// set; if the store is incomplete the result may under-approximate, and
/// callers treat nil as "no common ancestor beyond the nil snapshot".
pub fn base(
    ctx: &Context,
    s: &LocalStore,
    lhs: Option<&Hash>,
    rhs: Option<&Hash>,
) -> Result<Option<Hash>> {
    if lhs == rhs {
        return Ok(lhs.cloned());
    }
    let (lhs, rhs) = match (lhs, rhs) {
        (Some(lhs), Some(rhs)) => (lhs, rhs),
        _ => return Ok(None),
    };
    let lhs_log = read_log(ctx, s, lhs, -1)?;
    let rhs_log = read_log(ctx, s, rhs, -1)?;
    let lhs_ancestors: std::collections::HashSet<&Hash> =
        lhs_log.iter().map(|e| &e.hash).collect();
    let rhs_ancestors: std::collections::HashSet<&Hash> =
        rhs_log.iter().map(|e| &e.hash).collect();
    let mut i = 0;
    while i < lhs_log.len() && i < rhs_log.len() {
        if rhs_ancestors.contains(&lhs_log[i].hash) {
            return Ok(Some(lhs_log[i].hash.clone()));
        }
        if lhs_ancestors.contains(&rhs_log[i].hash) {
            return Ok(Some(rhs_log[i].hash.clone()));
        }
        i += 1;
    }
    // no common ancestor other than the nil snapshot
    Ok(None)
}

/// merge the snapshot `src` into the local filesystem at `dest`
///
/// if `dest` has no current state the source is simply checked out. If
/// the source is already merged in (the merge base equals `src`) nothing
/// happens. Otherwise the recursive three-way merge runs and, on success,
/// the merged snapshot replaces the destination. Conflicts are reported
/// without modifying the destination.
pub fn merge(
    ctx: &Context,
    s: &LocalStore,
    src: &Hash,
    dest: &FilePath,
    opts: MergeOptions,
) -> Result<()> {
    if let Some(parent) = dest.as_std().parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }
    let dest_prev = match current(ctx, s, dest)? {
        Some((h, _)) => h,
        None => {
            // the destination does not exist; just check out the source
            return checkout(ctx, s, src, dest);
        }
    };
    let merge_base = base(ctx, s, Some(src), Some(&dest_prev))?;
    if merge_base.as_ref() == Some(src) {
        // the source has already been merged in
        return Ok(());
    }
    let merged = merge_with_base(
        ctx,
        s,
        dest,
        merge_base.as_ref(),
        Some(src),
        Some(&dest_prev),
        opts,
    )?;
    let merged = match merged {
        Some(merged) => merged,
        None => return Ok(()),
    };
    remove_all(dest.as_std())?;
    checkout(ctx, s, &merged, dest)
}

/// recursive three-way merge of the snapshots at one subpath
///
/// conflicts from nested subpaths are accumulated rather than
/// short-circuiting, so the caller sees the full conflict set in one
/// pass.
pub(crate) fn merge_with_base(
    ctx: &Context,
    s: &LocalStore,
    sub_path: &FilePath,
    merge_base: Option<&Hash>,
    src: Option<&Hash>,
    dest: Option<&Hash>,
    opts: MergeOptions,
) -> Result<Option<Hash>> {
    ctx.check()?;
    // trivial cases where the result is one of the two sides
    if src == dest {
        return Ok(src.cloned());
    }
    if src == merge_base {
        return Ok(dest.cloned());
    }
    if dest == merge_base {
        return Ok(src.cloned());
    }
    let (src, dest) = match (src, dest) {
        (Some(src), Some(dest)) => (src, dest),
        _ => {
            return Err(Error::MergeConflict(vec![format!(
                "{sub_path}: deleted in one snapshot but modified in the other"
            )]))
        }
    };
    // a side that does not descend from the base rolled the base back
    if !is_ancestor(ctx, s, merge_base, src)? {
        return Err(Error::MergeConflict(vec![format!(
            "{sub_path}: changes under this path were rolled back in the source snapshot"
        )]));
    }
    if !is_ancestor(ctx, s, merge_base, dest)? {
        return Err(Error::MergeConflict(vec![format!(
            "{sub_path}: changes under this path were rolled back in the destination snapshot"
        )]));
    }

    let src_file = s.read_snapshot(ctx, src)?;
    let dest_file = s.read_snapshot(ctx, dest)?;

    if src_file.is_link() || dest_file.is_link() {
        return Err(Error::MergeConflict(vec![format!(
            "{sub_path}: one or both versions are a symbolic link"
        )]));
    }

    if !(src_file.is_dir() && dest_file.is_dir()) {
        return merge_with_helper(ctx, s, sub_path, &src_file.mode, merge_base, src, dest)
            .map(Some);
    }

    // both sides are directories: merge every nested child, using the
    // corresponding base child (or nil) as its reference point
    let src_tree = s.list_directory_contents(ctx, src, &src_file)?;
    let dest_tree = s.list_directory_contents(ctx, dest, &dest_file)?;
    let base_tree = match merge_base {
        Some(base_hash) => {
            let base_file = s.read_snapshot(ctx, base_hash)?;
            if base_file.is_dir() {
                s.list_directory_contents(ctx, base_hash, &base_file)?
            } else {
                Tree::new()
            }
        }
        None => Tree::new(),
    };

    let mut children: BTreeSet<&FilePath> = BTreeSet::new();
    children.extend(src_tree.iter().map(|(p, _)| p));
    children.extend(dest_tree.iter().map(|(p, _)| p));

    let mut merged_tree = Tree::new();
    let mut conflicts = Vec::new();
    for child in children {
        let child_sub_path = sub_path.join(child);
        let merged_child = merge_with_base(
            ctx,
            s,
            &child_sub_path,
            base_tree.get(child),
            src_tree.get(child),
            dest_tree.get(child),
            opts,
        );
        match merged_child {
            Ok(Some(h)) => merged_tree.insert(child.clone(), h),
            Ok(None) => {}
            Err(Error::MergeConflict(mut nested)) => conflicts.append(&mut nested),
            Err(e) => return Err(e),
        }
    }
    if src_file.mode != dest_file.mode && !opts.force_keep_mode {
        conflicts.push(format!(
            "{sub_path}: file modes differ between versions (source {:?}, destination {:?})",
            src_file.mode, dest_file.mode
        ));
    }
    if !conflicts.is_empty() {
        return Err(Error::MergeConflict(conflicts));
    }

    let contents = merged_tree.serialize();
    let contents_hash = s.store_object(ctx, contents.len() as u64, &mut contents.as_bytes())?;
    let merged_file = File {
        mode: src_file.mode,
        contents: Some(contents_hash),
        parents: vec![src.clone(), dest.clone()],
    };
    let encoded = merged_file.serialize();
    let h = s.store_object(ctx, encoded.len() as u64, &mut encoded.as_bytes())?;
    Ok(Some(h))
}
