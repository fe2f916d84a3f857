use std::fs::{self, OpenOptions, Permissions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use crate::context::Context;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::store::LocalStore;
use crate::types::{File, FilePath};

/// materialize the snapshot `h` at the local path `p`
///
/// existing files at the location are overwritten, and nested entries
/// absent from the snapshot are removed. Checked-out files and
/// directories receive the snapshot's permissions; symbolic links do not.
/// On error, partial changes are not rolled back; the previous state
/// remains reachable through the log.
pub fn checkout(ctx: &Context, s: &LocalStore, h: &Hash, p: &FilePath) -> Result<()> {
    ctx.check()?;
    let f = s.read_snapshot(ctx, h)?;
    if let Some(parent) = p.as_std().parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }
    recreate_file(ctx, s, h, &f, p)?;
    // record the path as known at this hash for future operations
    s.store_snapshot(ctx, p, &f)?;
    Ok(())
}

fn recreate_file(ctx: &Context, s: &LocalStore, h: &Hash, f: &File, p: &FilePath) -> Result<()> {
    if f.is_link() {
        return recreate_link(ctx, s, h, f, p);
    }
    if f.is_dir() {
        return recreate_dir(ctx, s, h, f, p);
    }
    let perm = f.permissions();
    let contents_hash = f
        .contents
        .as_ref()
        .ok_or_else(|| Error::MalformedFile(format!("snapshot {h} has no contents")))?;
    let mut reader = s.read_object(ctx, contents_hash)?;
    let mut out = ensure_file_exists_with_permissions(p.as_std(), perm)?;
    std::io::copy(&mut reader, &mut out).with_path(p.as_std())?;
    Ok(())
}

fn recreate_link(ctx: &Context, s: &LocalStore, h: &Hash, f: &File, p: &FilePath) -> Result<()> {
    let contents_hash = f
        .contents
        .as_ref()
        .ok_or_else(|| Error::MalformedFile(format!("link snapshot {h} has no contents")))?;
    let target = s.read_object_bytes(ctx, contents_hash)?;
    if let Ok(existing) = fs::read_link(p.as_std()) {
        if existing.as_os_str().as_bytes() == target.as_slice() {
            // the link already points at the correct target
            return Ok(());
        }
    }
    remove_all(p.as_std())?;
    let target_path = FilePath::new(target);
    std::os::unix::fs::symlink(target_path.as_std(), p.as_std()).with_path(p.as_std())?;
    Ok(())
}

fn recreate_dir(ctx: &Context, s: &LocalStore, h: &Hash, f: &File, p: &FilePath) -> Result<()> {
    ensure_dir_exists_with_permissions(p.as_std(), f.permissions())?;

    let tree = s.list_directory_contents(ctx, h, f)?;

    let entries = fs::read_dir(p.as_std()).with_path(p.as_std())?;
    for entry in entries {
        ctx.check()?;
        let entry = entry.with_path(p.as_std())?;
        let child = FilePath::new(entry.file_name().as_bytes().to_vec());
        if tree.contains(&child) {
            continue;
        }
        // the child does not exist in the snapshot being checked out
        let child_path = p.join(&child);
        if s.exclude(&child_path) {
            continue;
        }
        remove_all(child_path.as_std())?;
    }
    for (child, child_hash) in &tree {
        ctx.check()?;
        let child_path = p.join(child);
        if s.exclude(&child_path) {
            continue;
        }
        checkout(ctx, s, child_hash, &child_path)?;
    }
    Ok(())
}

fn ensure_dir_exists_with_permissions(path: &Path, perm: u32) -> Result<()> {
    match fs::create_dir(path) {
        Ok(()) => {
            fs::set_permissions(path, Permissions::from_mode(perm)).with_path(path)?;
            return Ok(());
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e).with_path(path),
    }
    let meta = fs::symlink_metadata(path).with_path(path)?;
    if meta.is_dir() {
        return fs::set_permissions(path, Permissions::from_mode(perm)).with_path(path);
    }
    remove_all(path)?;
    fs::create_dir(path).with_path(path)?;
    fs::set_permissions(path, Permissions::from_mode(perm)).with_path(path)
}

fn ensure_file_exists_with_permissions(path: &Path, perm: u32) -> Result<fs::File> {
    let open = |path: &Path| {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(perm)
            .open(path)
    };
    let out = match open(path) {
        Ok(out) => out,
        Err(_) => {
            // a directory or unwritable entry is in the way
            remove_all(path)?;
            open(path).with_path(path)?
        }
    };
    out.set_permissions(Permissions::from_mode(perm))
        .with_path(path)?;
    Ok(out)
}

/// remove a file, link, or directory tree; missing paths are fine
pub(crate) fn remove_all(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_path(path),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path).with_path(path)
    } else {
        fs::remove_file(path).with_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::snapshot::current;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    fn test_store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("archive"));
        (dir, store)
    }

    #[test]
    fn test_checkout_regular_file() {
        let (dir, store) = test_store();
        let ctx = Context::new();

        let source = dir.path().join("source.txt");
        fs::write(&source, "checkout me").unwrap();
        fs::set_permissions(&source, Permissions::from_mode(0o640)).unwrap();
        let (h, _) = current(&ctx, &store, &FilePath::from_std(&source))
            .unwrap()
            .unwrap();

        let dest = dir.path().join("dest.txt");
        checkout(&ctx, &store, &h, &FilePath::from_std(&dest)).unwrap();

        assert_eq!(fs::read_to_string(&dest).unwrap(), "checkout me");
        let mode = fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn test_checkout_round_trips_through_current() {
        let (dir, store) = test_store();
        let ctx = Context::new();

        let d = dir.path().join("tree");
        fs::create_dir_all(d.join("sub")).unwrap();
        fs::write(d.join("a.txt"), "alpha").unwrap();
        fs::write(d.join("sub/b.txt"), "beta").unwrap();
        symlink("a.txt", d.join("link")).unwrap();

        let (h, _) = current(&ctx, &store, &FilePath::from_std(&d)).unwrap().unwrap();

        let dest = dir.path().join("copy");
        checkout(&ctx, &store, &h, &FilePath::from_std(&dest)).unwrap();

        // snapshotting the checkout yields the identical hash
        let (h2, _) = current(&ctx, &store, &FilePath::from_std(&dest))
            .unwrap()
            .unwrap();
        assert_eq!(h2, h);
        assert_eq!(fs::read_to_string(dest.join("sub/b.txt")).unwrap(), "beta");
        assert_eq!(fs::read_link(dest.join("link")).unwrap(), Path::new("a.txt"));
    }

    #[test]
    fn test_checkout_removes_absent_children() {
        let (dir, store) = test_store();
        let ctx = Context::new();

        let d = dir.path().join("tree");
        fs::create_dir(&d).unwrap();
        fs::write(d.join("keep.txt"), "keep").unwrap();
        let (h, _) = current(&ctx, &store, &FilePath::from_std(&d)).unwrap().unwrap();

        // extra file appears after the snapshot
        fs::write(d.join("extra.txt"), "extra").unwrap();
        checkout(&ctx, &store, &h, &FilePath::from_std(&d)).unwrap();

        assert!(d.join("keep.txt").exists());
        assert!(!d.join("extra.txt").exists());
    }

    #[test]
    fn test_checkout_link_already_correct_is_noop() {
        let (dir, store) = test_store();
        let ctx = Context::new();

        let link = dir.path().join("link");
        symlink("target.txt", &link).unwrap();
        let (h, _) = current(&ctx, &store, &FilePath::from_std(&link))
            .unwrap()
            .unwrap();

        checkout(&ctx, &store, &h, &FilePath::from_std(&link)).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("target.txt"));
    }

    #[test]
    fn test_checkout_replaces_wrong_entry_kind() {
        let (dir, store) = test_store();
        let ctx = Context::new();

        let source = dir.path().join("source.txt");
        fs::write(&source, "file contents").unwrap();
        let (h, _) = current(&ctx, &store, &FilePath::from_std(&source))
            .unwrap()
            .unwrap();

        // a directory sits where the file should go
        let dest = dir.path().join("dest");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("stale"), "stale").unwrap();

        checkout(&ctx, &store, &h, &FilePath::from_std(&dest)).unwrap();
        assert!(dest.is_file());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "file contents");
    }
}
