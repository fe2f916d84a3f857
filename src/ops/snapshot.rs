use std::fs;
use std::io::Read;
use std::os::unix::ffi::OsStrExt;

use crate::context::Context;
use crate::error::{IoResultExt, Result};
use crate::hash::Hash;
use crate::store::Storage;
use crate::types::{mode_string, File, FilePath, Tree};

/// generate a snapshot of the current state of `p`
///
/// returns `None` when the path does not exist or is excluded by the
/// store. The returned hash names the stored `File` record; if the entry
/// is unchanged since the previous snapshot, the previous identity is
/// returned untouched.
pub fn current<S: Storage + ?Sized>(
    ctx: &Context,
    s: &S,
    p: &FilePath,
) -> Result<Option<(Hash, File)>> {
    current_with_parents(ctx, s, p, &[])
}

/// like [`current`], with operator-supplied additional parent hashes
///
/// the unchanged-snapshot shortcut is disabled whenever additional
/// parents are requested, so an otherwise identical snapshot still gets a
/// new identity recording the merge.
pub fn current_with_parents<S: Storage + ?Sized>(
    ctx: &Context,
    s: &S,
    p: &FilePath,
    additional_parents: &[Hash],
) -> Result<Option<(Hash, File)>> {
    ctx.check()?;
    if s.exclude(p) {
        // the path is part of the underlying storage; pretend it does not exist
        return Ok(None);
    }
    let lstat = match fs::symlink_metadata(p.as_std()) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_path(p.as_std()),
    };
    if lstat.file_type().is_symlink() {
        return snapshot_link(ctx, s, p, &lstat, additional_parents);
    }
    let contents = match fs::File::open(p.as_std()) {
        Ok(file) => file,
        // the file was deleted between lstat and open; treat as absent
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_path(p.as_std()),
    };
    let info = contents.metadata().with_path(p.as_std())?;
    if info.is_dir() {
        snapshot_directory(ctx, s, p, &info, additional_parents)
    } else {
        snapshot_regular_file(ctx, s, p, &info, contents, additional_parents)
    }
}

/// snapshot a symbolic link: the contents blob is the literal target path
///
/// the target is never followed, so link cycles cannot recurse.
fn snapshot_link<S: Storage + ?Sized>(
    ctx: &Context,
    s: &S,
    p: &FilePath,
    info: &fs::Metadata,
    additional_parents: &[Hash],
) -> Result<Option<(Hash, File)>> {
    let target = fs::read_link(p.as_std()).with_path(p.as_std())?;
    let target_bytes = target.as_os_str().as_bytes();
    let h = s.store_object(ctx, target_bytes.len() as u64, &mut &target_bytes[..])?;
    snapshot_file_metadata(ctx, s, p, info, Some(h), additional_parents)
}

fn snapshot_directory<S: Storage + ?Sized>(
    ctx: &Context,
    s: &S,
    p: &FilePath,
    info: &fs::Metadata,
    additional_parents: &[Hash],
) -> Result<Option<(Hash, File)>> {
    let entries = fs::read_dir(p.as_std()).with_path(p.as_std())?;
    let mut tree = Tree::new();
    for entry in entries {
        ctx.check()?;
        let entry = entry.with_path(p.as_std())?;
        let child_name = FilePath::new(entry.file_name().as_bytes().to_vec());
        let child_path = p.join(&child_name);
        if s.exclude(&child_path) {
            continue;
        }
        if let Some((child_hash, _)) = current(ctx, s, &child_path)? {
            tree.insert(child_name, child_hash);
        }
    }
    let encoded = tree.serialize();
    let contents_hash = s.store_object(ctx, encoded.len() as u64, &mut encoded.as_bytes())?;
    snapshot_file_metadata(ctx, s, p, info, Some(contents_hash), additional_parents)
}

fn snapshot_regular_file<S: Storage + ?Sized>(
    ctx: &Context,
    s: &S,
    p: &FilePath,
    info: &fs::Metadata,
    mut contents: fs::File,
    additional_parents: &[Hash],
) -> Result<Option<(Hash, File)>> {
    if additional_parents.is_empty() {
        if let Some(cached) = read_cached(ctx, s, p, info) {
            return Ok(Some(cached));
        }
    }
    let h = s.store_object(ctx, info.len(), &mut contents as &mut dyn Read)?;
    let result = snapshot_file_metadata(ctx, s, p, info, Some(h), additional_parents)?;
    s.cache_path_info(ctx, p, info)?;
    Ok(result)
}

/// reuse the previous snapshot when the cached metadata tuple still matches
fn read_cached<S: Storage + ?Sized>(
    ctx: &Context,
    s: &S,
    p: &FilePath,
    info: &fs::Metadata,
) -> Option<(Hash, File)> {
    if !s.path_info_matches_cache(ctx, p, info) {
        return None;
    }
    s.find_snapshot(ctx, p).ok().flatten()
}

fn snapshot_file_metadata<S: Storage + ?Sized>(
    ctx: &Context,
    s: &S,
    p: &FilePath,
    info: &fs::Metadata,
    contents_hash: Option<Hash>,
    additional_parents: &[Hash],
) -> Result<Option<(Hash, File)>> {
    let mode_line = mode_string(info);
    let prev = s.find_snapshot(ctx, p)?;
    if additional_parents.is_empty() {
        if let Some((prev_hash, prev_file)) = &prev {
            if prev_file.mode == mode_line && prev_file.contents == contents_hash {
                // the entry is unchanged from the last snapshot
                return Ok(Some((prev_hash.clone(), prev_file.clone())));
            }
        }
    }
    let mut parents = Vec::new();
    if let Some((prev_hash, _)) = &prev {
        parents.push(prev_hash.clone());
    }
    for extra in additional_parents {
        if !parents.contains(extra) {
            parents.push(extra.clone());
        }
    }
    let f = File {
        mode: mode_line,
        contents: contents_hash,
        parents,
    };
    let h = s.store_snapshot(ctx, p, &f)?;
    Ok(Some((h, f)))
}
