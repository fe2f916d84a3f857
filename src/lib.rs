//! rvcs - recursive version control system
//!
//! a content-addressed version-control engine whose unit of record is a
//! *snapshot*: an immutable, hash-named object capturing the state of one
//! filesystem entry (file, directory, or symlink) together with pointers
//! to its predecessors. Directory snapshots reference the snapshots of
//! their children, so a single hash names the full history of a subtree.
//!
//! # Core concepts
//!
//! - **Hash**: an algorithm-tagged content digest (`sha256:<hex>`)
//! - **File**: a snapshot record (mode, contents hash, parent hashes)
//! - **Tree**: the serialized listing of a directory snapshot's children
//! - **LocalStore**: the archive holding blobs plus path, cache, and
//!   identity indexes; blobs over 1 MiB are encrypted at rest
//! - **Bundle**: a self-verifying zip transporting a set of objects
//!
//! # Example usage
//!
//! ```no_run
//! use rvcs::{ops, Context, FilePath, LocalStore};
//!
//! let store = LocalStore::new("/home/user/.rvcs/archive");
//! let ctx = Context::new();
//!
//! // snapshot a directory
//! let path = FilePath::from("/home/user/project");
//! let (hash, _file) = ops::current(&ctx, &store, &path).unwrap().unwrap();
//!
//! // materialize it somewhere else
//! ops::checkout(&ctx, &store, &hash, &FilePath::from("/tmp/restored")).unwrap();
//! ```

mod config;
mod context;
mod error;
mod hash;
mod identity;

pub mod bundle;
pub mod ops;
pub mod publish;
pub mod store;
pub mod types;

pub use config::{IdentityConfig, Mirror, Settings};
pub use context::Context;
pub use error::{Error, Result};
pub use hash::{Algorithm, Hash};
pub use identity::Identity;
pub use store::{LocalStore, Storage, StoreLock};
pub use types::{File, FilePath, Tree};
