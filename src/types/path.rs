use std::ffi::OsStr;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use base64::prelude::{Engine as _, BASE64_STANDARD_NO_PAD};

use crate::error::{Error, Result};

/// a filesystem path transported as bytes
///
/// paths can be absolute or relative; tree serialization encodes them as
/// unpadded base64 so entries survive whitespace-delimited formats.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilePath(Vec<u8>);

impl FilePath {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_std(path: &Path) -> Self {
        Self(path.as_os_str().as_bytes().to_vec())
    }

    pub fn as_std(&self) -> &Path {
        Path::new(OsStr::from_bytes(&self.0))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// join with a child path
    ///
    /// a leading `/` on the child is treated as redundant, so joining an
    /// absolute path under a prefix nests it instead of replacing the
    /// prefix.
    pub fn join(&self, child: &FilePath) -> FilePath {
        let mut trimmed = child.0.as_slice();
        while trimmed.first() == Some(&b'/') {
            trimmed = &trimmed[1..];
        }
        let joined: PathBuf = self.as_std().join(OsStr::from_bytes(trimmed));
        FilePath::from_std(&joined)
    }

    /// encode for tree serialization (base64, standard alphabet, no padding)
    pub fn encode(&self) -> String {
        BASE64_STANDARD_NO_PAD.encode(&self.0)
    }

    /// decode a tree-serialized path
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = BASE64_STANDARD_NO_PAD
            .decode(encoded)
            .map_err(|_| Error::MalformedPath(encoded.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FilePath({})", String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for FilePath {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<&Path> for FilePath {
    fn from(p: &Path) -> Self {
        Self::from_std(p)
    }
}
