use std::path::PathBuf;

use crate::hash::Hash;

/// error type for rvcs operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed hash string: {0:?}")]
    MalformedHash(String),

    #[error("unsupported hash algorithm: {0:?}")]
    UnsupportedAlgorithm(String),

    #[error("malformed hash contents: {0:?}")]
    MalformedHashContents(String),

    #[error("malformed identity string: {0:?}")]
    MalformedIdentity(String),

    #[error("malformed tree entry: {0:?}")]
    MalformedTree(String),

    #[error("malformed file record: {0}")]
    MalformedFile(String),

    #[error("malformed path encoding: {0:?}")]
    MalformedPath(String),

    #[error("object not found: {0}")]
    ObjectNotFound(Hash),

    #[error("no snapshot recorded for path {0}")]
    SnapshotNotFound(PathBuf),

    #[error("{0} is not the snapshot of a directory")]
    NotADirectory(Hash),

    #[error("mismatched hash for bundle entry {entry}: got {actual}, want {expected}")]
    BundleIntegrity {
        entry: String,
        actual: Hash,
        expected: Hash,
    },

    #[error("helper {command} failed: {status}")]
    Helper { command: String, status: String },

    #[error("merge conflicts:\n{}", .0.join("\n"))]
    MergeConflict(Vec<String>),

    #[error("identity must not be empty")]
    MissingIdentity,

    #[error("operation cancelled")]
    Cancelled,

    #[error("lock contention on archive")]
    LockContention,

    #[error("encryption error: {0}")]
    Encrypt(String),

    #[error("decryption error: {0}")]
    Decrypt(String),

    #[error("bundle error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
