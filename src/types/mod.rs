//! the snapshot object model: paths, tree listings, and file records

mod file;
mod path;
mod tree;

pub use file::{mode_string, File};
pub use path::FilePath;
pub use tree::Tree;
