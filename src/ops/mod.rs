//! high-level operations over the object store

mod checkout;
mod helper;
mod log;
mod merge;
pub(crate) mod snapshot;

pub use checkout::checkout;
pub use helper::{HELPER_ARGS_ENV, HELPER_COMMAND_ENV};
pub use log::{read_log, summarize_log, LogEntry};
pub use merge::{base, is_ancestor, merge, MergeOptions};
pub use snapshot::{current, current_with_parents};
