use std::fs::{self, File as FsFile, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::iter;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use age::secrecy::ExposeSecret;
use nix::fcntl::{Flock, FlockArg};
use sha2::{Digest, Sha256};

use crate::context::Context;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::{Algorithm, Hash};
use crate::types::FilePath;

pub(crate) const SMALL_OBJECTS_DIR: &str = "objects";
pub(crate) const LARGE_OBJECTS_DIR: &str = "largeObjects";
const LOCAL_IDENTITY_FILE: &str = "x25519Identity";
const LOCK_FILE: &str = ".lock";

/// blobs whose size hint exceeds this are encrypted at rest
const LARGE_OBJECT_THRESHOLD: u64 = 1024 * 1024;

/// the persistent archive: a content-addressed blob store with path,
/// cache, and identity indexes, rooted at a single directory
///
/// small blobs are stored in plaintext under `objects/`; blobs above the
/// 1 MiB threshold are encrypted under `largeObjects/` with an X25519
/// identity owned by the archive. Content addressing is always over the
/// plaintext bytes.
pub struct LocalStore {
    archive_dir: PathBuf,
    identity: OnceLock<age::x25519::Identity>,
}

impl LocalStore {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            identity: OnceLock::new(),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// whether the given path should be excluded from snapshotting
    ///
    /// true exactly for the archive root, so snapshotting a tree that
    /// contains its own archive does not recurse into it.
    pub fn exclude(&self, p: &FilePath) -> bool {
        p.as_std() == self.archive_dir
    }

    /// persist a blob and return its plaintext content hash
    ///
    /// the blob streams through a staging file and is renamed into place;
    /// a second store of identical bytes renames over the same location.
    pub fn store_object(&self, ctx: &Context, size_hint: u64, reader: &mut dyn Read) -> Result<Hash> {
        ctx.check()?;
        let encrypted = size_hint > LARGE_OBJECT_THRESHOLD;
        let subdir = if encrypted {
            LARGE_OBJECTS_DIR
        } else {
            SMALL_OBJECTS_DIR
        };
        let mut tmp = self.staging_file(subdir)?;
        let tmp_path = tmp.path().to_path_buf();
        let hash = if encrypted {
            let recipient = self.recipient()?;
            let encryptor =
                age::Encryptor::with_recipients(iter::once(&recipient as &dyn age::Recipient))
                    .map_err(|e| Error::Encrypt(e.to_string()))?;
            let mut dest = encryptor
                .wrap_output(tmp.as_file_mut())
                .map_err(|e| Error::Encrypt(e.to_string()))?;
            let hash = tee_hash(reader, &mut dest, &tmp_path)?;
            dest.finish().with_path(&tmp_path)?;
            hash
        } else {
            tee_hash(reader, tmp.as_file_mut(), &tmp_path)?
        };
        tmp.as_file().sync_all().with_path(&tmp_path)?;
        let location = self.object_location(subdir, &hash, encrypted)?;
        tmp.persist(&location).map_err(|e| Error::Io {
            path: location.clone(),
            source: e.error,
        })?;
        Ok(hash)
    }

    /// open a blob for reading, decrypting transparently if needed
    pub fn read_object(&self, ctx: &Context, h: &Hash) -> Result<Box<dyn Read>> {
        ctx.check()?;
        let plain = self.object_path(SMALL_OBJECTS_DIR, h, false);
        match FsFile::open(&plain) {
            Ok(f) => return Ok(Box::new(f)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Io {
                    path: plain,
                    source: e,
                })
            }
        }
        let enc = self.object_path(LARGE_OBJECTS_DIR, h, true);
        let file = match FsFile::open(&enc) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ObjectNotFound(h.clone()))
            }
            Err(e) => {
                return Err(Error::Io {
                    path: enc,
                    source: e,
                })
            }
        };
        let identity = self.identity()?;
        let decryptor = age::Decryptor::new(BufReader::new(file))
            .map_err(|e| Error::Decrypt(e.to_string()))?;
        let reader = decryptor
            .decrypt(iter::once(&identity as &dyn age::Identity))
            .map_err(|e| Error::Decrypt(e.to_string()))?;
        Ok(Box::new(reader))
    }

    /// read a blob fully into memory
    pub fn read_object_bytes(&self, ctx: &Context, h: &Hash) -> Result<Vec<u8>> {
        let mut reader = self.read_object(ctx, h)?;
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).map_err(|e| Error::Io {
            path: PathBuf::from(h.to_string()),
            source: e,
        })?;
        Ok(contents)
    }

    /// whether a blob exists in either object store
    pub fn has_object(&self, h: &Hash) -> bool {
        self.object_path(SMALL_OBJECTS_DIR, h, false).exists()
            || self.object_path(LARGE_OBJECTS_DIR, h, true).exists()
    }

    /// acquire an exclusive lock on the archive
    ///
    /// returns a guard that releases the lock on drop
    pub fn lock(&self) -> Result<StoreLock> {
        fs::create_dir_all(&self.archive_dir).with_path(&self.archive_dir)?;
        let lock_path = self.archive_dir.join(LOCK_FILE);
        let file = FsFile::create(&lock_path).with_path(&lock_path)?;
        let flock =
            Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|_| Error::LockContention)?;
        Ok(StoreLock { _flock: flock })
    }

    /// try to acquire an exclusive lock, returning None if already held
    pub fn try_lock(&self) -> Result<Option<StoreLock>> {
        fs::create_dir_all(&self.archive_dir).with_path(&self.archive_dir)?;
        let lock_path = self.archive_dir.join(LOCK_FILE);
        let file = FsFile::create(&lock_path).with_path(&lock_path)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => Ok(Some(StoreLock { _flock: flock })),
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => Ok(None),
            Err(_) => Err(Error::LockContention),
        }
    }

    fn staging_file(&self, subdir: &str) -> Result<tempfile::NamedTempFile> {
        let dir = self.archive_dir.join(subdir).join("staging-dir");
        fs::create_dir_all(&dir).with_path(&dir)?;
        tempfile::Builder::new()
            .prefix("staged")
            .tempfile_in(&dir)
            .with_path(&dir)
    }

    fn object_path(&self, subdir: &str, h: &Hash, encrypted: bool) -> PathBuf {
        let (buckets, name) = h.bucket_components();
        let mut path = self.archive_dir.join(subdir).join(h.algorithm().tag());
        for bucket in buckets {
            path.push(bucket);
        }
        if encrypted {
            path.push(format!("{name}.age"));
        } else {
            path.push(name);
        }
        path
    }

    fn object_location(&self, subdir: &str, h: &Hash, encrypted: bool) -> Result<PathBuf> {
        let path = self.object_path(subdir, h, encrypted);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }
        Ok(path)
    }

    fn identity(&self) -> Result<age::x25519::Identity> {
        if let Some(id) = self.identity.get() {
            return Ok(id.clone());
        }
        let id = self.load_or_create_identity()?;
        let _ = self.identity.set(id.clone());
        Ok(id)
    }

    fn recipient(&self) -> Result<age::x25519::Recipient> {
        Ok(self.identity()?.to_public())
    }

    /// the archive-local encryption identity, created on first use and
    /// never rotated
    fn load_or_create_identity(&self) -> Result<age::x25519::Identity> {
        fs::create_dir_all(&self.archive_dir).with_path(&self.archive_dir)?;
        let path = self.archive_dir.join(LOCAL_IDENTITY_FILE);
        match fs::read_to_string(&path) {
            Ok(contents) => contents
                .trim()
                .parse::<age::x25519::Identity>()
                .map_err(|e| Error::Decrypt(format!("invalid archive identity: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let identity = age::x25519::Identity::generate();
                let mut file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o700)
                    .open(&path)
                    .with_path(&path)?;
                file.write_all(identity.to_string().expose_secret().as_bytes())
                    .with_path(&path)?;
                Ok(identity)
            }
            Err(e) => Err(Error::Io { path, source: e }),
        }
    }
}

/// guard holding the archive lock until dropped
pub struct StoreLock {
    _flock: Flock<FsFile>,
}

fn tee_hash(reader: &mut dyn Read, writer: &mut impl Write, staging: &Path) -> Result<Hash> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).with_path(staging)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).with_path(staging)?;
    }
    Ok(Hash::new(Algorithm::Sha256, hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("archive"));
        (dir, store)
    }

    fn count_files(dir: &Path) -> usize {
        let mut count = 0;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                count += count_files(&path);
            } else {
                count += 1;
            }
        }
        count
    }

    #[test]
    fn test_store_and_read_object() {
        let (_dir, store) = test_store();
        let ctx = Context::new();

        let content = b"hello, world!";
        let hash = store
            .store_object(&ctx, content.len() as u64, &mut &content[..])
            .unwrap();
        assert_eq!(hash, Hash::of_bytes(content));

        let read_back = store.read_object_bytes(&ctx, &hash).unwrap();
        assert_eq!(read_back, content);
    }

    #[test]
    fn test_store_object_deduplicates() {
        let (_dir, store) = test_store();
        let ctx = Context::new();

        let content = b"duplicate content";
        let h1 = store
            .store_object(&ctx, content.len() as u64, &mut &content[..])
            .unwrap();
        let objects = store.archive_dir().join(SMALL_OBJECTS_DIR);
        let count_before = count_files(&objects);

        let h2 = store
            .store_object(&ctx, content.len() as u64, &mut &content[..])
            .unwrap();
        assert_eq!(h1, h2);
        assert_eq!(count_files(&objects), count_before);
    }

    #[test]
    fn test_large_object_encrypted_at_rest() {
        let (_dir, store) = test_store();
        let ctx = Context::new();

        let content: Vec<u8> = (0..2 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
        let hash = store
            .store_object(&ctx, content.len() as u64, &mut content.as_slice())
            .unwrap();

        // the hash is over the plaintext
        assert_eq!(hash, Hash::of_bytes(&content));

        // the blob landed in largeObjects with the .age suffix
        let on_disk = store.object_path(LARGE_OBJECTS_DIR, &hash, true);
        assert!(on_disk.exists());
        assert!(!store.object_path(SMALL_OBJECTS_DIR, &hash, false).exists());

        // the stored bytes are not the plaintext
        let stored = fs::read(&on_disk).unwrap();
        assert_ne!(stored, content);

        // reading decrypts transparently
        let read_back = store.read_object_bytes(&ctx, &hash).unwrap();
        assert_eq!(read_back, content);
    }

    #[test]
    fn test_read_missing_object() {
        let (_dir, store) = test_store();
        let ctx = Context::new();

        let missing = Hash::of_bytes(b"never stored");
        assert!(matches!(
            store.read_object(&ctx, &missing),
            Err(Error::ObjectNotFound(_))
        ));
        assert!(!store.has_object(&missing));
    }

    #[test]
    fn test_identity_file_created_once() {
        let (_dir, store) = test_store();
        let ctx = Context::new();

        let content: Vec<u8> = vec![7u8; 2 * 1024 * 1024];
        store
            .store_object(&ctx, content.len() as u64, &mut content.as_slice())
            .unwrap();

        let identity_path = store.archive_dir().join(LOCAL_IDENTITY_FILE);
        assert!(identity_path.exists());
        let first = fs::read_to_string(&identity_path).unwrap();

        // a fresh handle over the same archive reuses the identity
        let store2 = LocalStore::new(store.archive_dir());
        let read_back = store2
            .read_object_bytes(&ctx, &Hash::of_bytes(&content))
            .unwrap();
        assert_eq!(read_back, content);
        assert_eq!(fs::read_to_string(&identity_path).unwrap(), first);
    }

    #[test]
    fn test_exclude_archive_root() {
        let (_dir, store) = test_store();
        assert!(store.exclude(&FilePath::from_std(store.archive_dir())));
        assert!(!store.exclude(&FilePath::from("/somewhere/else")));
    }

    #[test]
    fn test_lock() {
        let (_dir, store) = test_store();

        let lock = store.lock().unwrap();
        assert!(store.try_lock().unwrap().is_none());
        drop(lock);
        assert!(store.try_lock().unwrap().is_some());
    }

    #[test]
    fn test_short_digest_fan_out() {
        let (_dir, store) = test_store();
        let h = Hash::new(Algorithm::Sha256, "abcd");
        let path = store.object_path(SMALL_OBJECTS_DIR, &h, false);
        assert!(path.ends_with("objects/sha256/ab/cd"));
    }
}
