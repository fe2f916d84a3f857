use std::fs;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::context::Context;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::identity::Identity;
use crate::store::{LocalStore, Storage};
use crate::types::{File, FilePath, Tree};

const PATHS_DIR: &str = "paths";
const MAPPED_PATHS_DIR: &str = "mappedPaths";
const CACHE_DIR: &str = "cache";
const IDENTITIES_DIR: &str = "identities";

impl LocalStore {
    /// persist a snapshot record and point the path mapping at it
    ///
    /// for directory snapshots, any previously mapped child that is absent
    /// from the new tree has its mapping removed recursively.
    pub fn store_snapshot(&self, ctx: &Context, p: &FilePath, f: &File) -> Result<Hash> {
        ctx.check()?;
        let mapped_dir = self.mapped_paths_dir(p);
        fs::create_dir_all(&mapped_dir).with_path(&mapped_dir)?;

        let encoded = f.serialize();
        let h = self.store_object(ctx, encoded.len() as u64, &mut encoded.as_bytes())?;

        let (dir, mapping) = self.keyed_path(PATHS_DIR, p.as_bytes());
        fs::create_dir_all(&dir).with_path(&dir)?;
        write_atomic(&dir, &mapping, h.to_string().as_bytes())?;

        if f.is_dir() {
            let tree = self.list_directory_contents(ctx, &h, f)?;
            let entries = fs::read_dir(&mapped_dir).with_path(&mapped_dir)?;
            for entry in entries {
                let entry = entry.with_path(&mapped_dir)?;
                let child = FilePath::new(entry.file_name().as_bytes().to_vec());
                if tree.contains(&child) {
                    continue;
                }
                // the previous child entry was removed
                self.remove_mapping_for_path(ctx, &p.join(&child))?;
            }
        }
        Ok(h)
    }

    /// load and parse the snapshot record stored under the given hash
    pub fn read_snapshot(&self, ctx: &Context, h: &Hash) -> Result<File> {
        let contents = self.read_object_bytes(ctx, h)?;
        let contents = String::from_utf8(contents)
            .map_err(|_| Error::MalformedFile(format!("non-utf8 snapshot record for {h}")))?;
        File::parse(&contents)?
            .ok_or_else(|| Error::MalformedFile(format!("empty snapshot record for {h}")))
    }

    /// look up the latest snapshot recorded for a path
    ///
    /// an absent mapping is reported as `None`, not an error.
    pub fn find_snapshot(&self, ctx: &Context, p: &FilePath) -> Result<Option<(Hash, File)>> {
        let (_, mapping) = self.keyed_path(PATHS_DIR, p.as_bytes());
        let contents = match fs::read_to_string(&mapping) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Io {
                    path: mapping,
                    source: e,
                })
            }
        };
        let h = Hash::parse(contents.trim())?
            .ok_or_else(|| Error::MalformedHash(contents.clone()))?;
        let f = self.read_snapshot(ctx, &h)?;
        Ok(Some((h, f)))
    }

    /// parse the tree listing the children of a directory snapshot
    pub fn list_directory_contents(&self, ctx: &Context, h: &Hash, f: &File) -> Result<Tree> {
        if !f.is_dir() {
            return Err(Error::NotADirectory(h.clone()));
        }
        let contents_hash = match &f.contents {
            Some(contents_hash) => contents_hash,
            None => return Ok(Tree::new()),
        };
        let contents = self.read_object_bytes(ctx, contents_hash)?;
        let contents = String::from_utf8(contents)
            .map_err(|_| Error::MalformedTree(format!("non-utf8 tree for {h}")))?;
        Tree::parse(&contents)
    }

    /// drop the path mapping for `p`, cascading into directory children
    pub fn remove_mapping_for_path(&self, ctx: &Context, p: &FilePath) -> Result<()> {
        ctx.check()?;
        let mapped_dir = self.mapped_paths_dir(p);
        match fs::remove_dir_all(&mapped_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Io {
                    path: mapped_dir,
                    source: e,
                })
            }
        }
        // no stored snapshot means there is nothing further to clean up
        let (h, f) = match self.find_snapshot(ctx, p)? {
            Some(found) => found,
            None => return Ok(()),
        };
        let (_, mapping) = self.keyed_path(PATHS_DIR, p.as_bytes());
        match fs::remove_file(&mapping) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Io {
                    path: mapping,
                    source: e,
                })
            }
        }
        if !f.is_dir() {
            return Ok(());
        }
        let tree = self.list_directory_contents(ctx, &h, &f)?;
        for (child, _) in &tree {
            self.remove_mapping_for_path(ctx, &p.join(child))?;
        }
        Ok(())
    }

    /// record the observed metadata tuple for a path
    pub fn cache_path_info(&self, ctx: &Context, p: &FilePath, info: &fs::Metadata) -> Result<()> {
        ctx.check()?;
        let (dir, cache) = self.keyed_path(CACHE_DIR, p.as_bytes());
        fs::create_dir_all(&dir).with_path(&dir)?;
        write_atomic(&dir, &cache, cache_line(info).as_bytes())
    }

    /// whether the observed metadata tuple matches the cached one
    ///
    /// any failure to read or compare is reported as a miss.
    pub fn path_info_matches_cache(&self, _ctx: &Context, p: &FilePath, info: &fs::Metadata) -> bool {
        let (_, cache) = self.keyed_path(CACHE_DIR, p.as_bytes());
        match fs::read_to_string(&cache) {
            Ok(prev) => prev == cache_line(info),
            Err(_) => false,
        }
    }

    /// the most recently verified signature hash for an identity
    ///
    /// an unknown identity yields `None`.
    pub fn latest_signature(&self, _ctx: &Context, id: &Identity) -> Result<Option<Hash>> {
        let (_, path) = self.keyed_path(IDENTITIES_DIR, id.to_string().as_bytes());
        match fs::read_to_string(&path) {
            Ok(contents) => Hash::parse(contents.trim()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io { path, source: e }),
        }
    }

    /// update the signature hash for an identity; `None` removes the entry
    pub fn update_signature(&self, _ctx: &Context, id: &Identity, h: Option<&Hash>) -> Result<()> {
        let (dir, path) = self.keyed_path(IDENTITIES_DIR, id.to_string().as_bytes());
        match h {
            None => match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Io { path, source: e }),
            },
            Some(h) => {
                fs::create_dir_all(&dir).with_path(&dir)?;
                write_atomic(&dir, &path, h.to_string().as_bytes())
            }
        }
    }

    fn mapped_paths_dir(&self, p: &FilePath) -> PathBuf {
        FilePath::from_std(&self.archive_dir().join(MAPPED_PATHS_DIR))
            .join(p)
            .as_std()
            .to_path_buf()
    }

    /// fan-out location keyed by the hash of arbitrary bytes
    fn keyed_path(&self, subdir: &str, key: &[u8]) -> (PathBuf, PathBuf) {
        let h = Hash::of_bytes(key);
        let (buckets, name) = h.bucket_components();
        let mut dir = self.archive_dir().join(subdir).join(h.algorithm().tag());
        for bucket in buckets {
            dir.push(bucket);
        }
        let full = dir.join(name);
        (dir, full)
    }
}

impl Storage for LocalStore {
    fn store_object(&self, ctx: &Context, size_hint: u64, reader: &mut dyn std::io::Read) -> Result<Hash> {
        LocalStore::store_object(self, ctx, size_hint, reader)
    }

    fn exclude(&self, path: &FilePath) -> bool {
        LocalStore::exclude(self, path)
    }

    fn find_snapshot(&self, ctx: &Context, path: &FilePath) -> Result<Option<(Hash, File)>> {
        LocalStore::find_snapshot(self, ctx, path)
    }

    fn store_snapshot(&self, ctx: &Context, path: &FilePath, file: &File) -> Result<Hash> {
        LocalStore::store_snapshot(self, ctx, path, file)
    }

    fn cache_path_info(&self, ctx: &Context, path: &FilePath, info: &fs::Metadata) -> Result<()> {
        LocalStore::cache_path_info(self, ctx, path, info)
    }

    fn path_info_matches_cache(
        &self,
        ctx: &Context,
        path: &FilePath,
        info: &fs::Metadata,
    ) -> bool {
        LocalStore::path_info_matches_cache(self, ctx, path, info)
    }
}

/// stable text rendering of the cached metadata tuple
fn cache_line(info: &fs::Metadata) -> String {
    use std::os::unix::fs::MetadataExt;
    format!(
        "size={} mode={:o} mtime={}.{:09} ino={}",
        info.len(),
        info.mode(),
        info.mtime(),
        info.mtime_nsec(),
        info.ino()
    )
}

/// write a small index file through a temp file and atomic rename
fn write_atomic(dir: &Path, dest: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir).with_path(dir)?;
    tmp.write_all(contents).with_path(dir)?;
    tmp.persist(dest).map_err(|e| Error::Io {
        path: dest.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}
