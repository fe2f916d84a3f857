//! the content-addressed store: blob persistence plus the path, cache,
//! and identity indexes layered over one archive directory

mod index;
mod local;

use std::fs;
use std::io::Read;

use crate::context::Context;
use crate::error::Result;
use crate::hash::Hash;
use crate::types::{File, FilePath};

pub use local::{LocalStore, StoreLock};

/// the narrow capability surface the snapshot engine needs
///
/// `LocalStore` is the production implementation; tests drive the engine
/// with in-memory doubles.
pub trait Storage {
    /// persist a blob, returning its content hash
    fn store_object(&self, ctx: &Context, size_hint: u64, reader: &mut dyn Read) -> Result<Hash>;

    /// whether the given path must be skipped when snapshotting
    fn exclude(&self, path: &FilePath) -> bool;

    /// look up the latest snapshot recorded for a path; absent mapping is
    /// `None`, not an error
    fn find_snapshot(&self, ctx: &Context, path: &FilePath) -> Result<Option<(Hash, File)>>;

    /// persist a snapshot record and update the path mapping
    fn store_snapshot(&self, ctx: &Context, path: &FilePath, file: &File) -> Result<Hash>;

    /// record the observed metadata tuple for a path
    fn cache_path_info(&self, ctx: &Context, path: &FilePath, info: &fs::Metadata) -> Result<()>;

    /// whether the observed metadata tuple matches the cached one
    fn path_info_matches_cache(&self, ctx: &Context, path: &FilePath, info: &fs::Metadata)
        -> bool;
}
