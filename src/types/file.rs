use std::fs;

use crate::error::{Error, Result};
use crate::hash::{format_optional, Hash};

// file type bits from <sys/stat.h>
const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;
const S_IFBLK: u32 = 0o060000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;
const S_IFSOCK: u32 = 0o140000;
const S_ISUID: u32 = 0o4000;
const S_ISGID: u32 = 0o2000;
const S_ISVTX: u32 = 0o1000;

/// a snapshot record for one filesystem entry
///
/// the canonical encoding is line-based: the mode descriptor, then the
/// contents hash (an empty line when nil), then one line per parent.
/// Snapshot identity is the hash of exactly these bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct File {
    /// textual mode descriptor; the first character selects semantics
    /// (`d` directory, `L` symbolic link, otherwise regular/special)
    pub mode: String,

    /// hash of the backing blob: serialized tree for a directory, target
    /// path bytes for a symlink, file bytes otherwise. Nil only for
    /// broken links.
    pub contents: Option<Hash>,

    /// hashes of the immediately preceding snapshots; empty for initial
    /// snapshots
    pub parents: Vec<Hash>,
}

impl File {
    pub fn is_dir(&self) -> bool {
        self.mode.starts_with('d')
    }

    pub fn is_link(&self) -> bool {
        self.mode.starts_with('L')
    }

    /// permission bits encoded in the mode descriptor
    ///
    /// the last nine characters are read as `rwxrwxrwx` glyphs with `-`
    /// meaning a cleared bit; descriptors shorter than nine characters
    /// yield 0o700. No type bits are included.
    pub fn permissions(&self) -> u32 {
        if self.mode.len() < 9 {
            return 0o700;
        }
        let glyphs = &self.mode.as_bytes()[self.mode.len() - 9..];
        let mut perm = 0u32;
        for (i, b) in glyphs.iter().enumerate() {
            if *b != b'-' {
                perm |= 1 << (8 - i);
            }
        }
        perm
    }

    /// serialize to the canonical line encoding
    pub fn serialize(&self) -> String {
        let mut lines = vec![self.mode.clone(), format_optional(self.contents.as_ref())];
        for parent in &self.parents {
            lines.push(parent.to_string());
        }
        lines.join("\n")
    }

    /// parse the canonical line encoding
    ///
    /// empty input yields `None`. Trailing blank lines are tolerated and
    /// normalized away; a nil contents hash followed by any parent line is
    /// malformed.
    pub fn parse(encoded: &str) -> Result<Option<Self>> {
        if encoded.is_empty() {
            return Ok(None);
        }
        let lines: Vec<&str> = encoded.split('\n').collect();
        if lines.len() < 2 {
            return Err(Error::MalformedFile(format!(
                "missing contents line in {encoded:?}"
            )));
        }
        let mode = lines[0].to_string();
        let contents = Hash::parse(lines[1])?;
        if contents.is_none() && lines.len() > 2 {
            return Err(Error::MalformedFile(format!(
                "nil contents with parents in {encoded:?}"
            )));
        }
        let mut parents = Vec::new();
        for line in &lines[2..] {
            if let Some(parent) = Hash::parse(line)? {
                parents.push(parent);
            }
        }
        Ok(Some(Self {
            mode,
            contents,
            parents,
        }))
    }
}

/// render lstat metadata as a mode descriptor
///
/// the layout follows the `dalTLDpSugct` prefix convention: type and
/// special-bit characters first (`-` when none apply), then the nine
/// `rwxrwxrwx` permission glyphs.
pub fn mode_string(meta: &fs::Metadata) -> String {
    use std::os::unix::fs::MetadataExt;
    let mode = meta.mode();
    let mut out = String::new();
    match mode & S_IFMT {
        S_IFDIR => out.push('d'),
        S_IFLNK => out.push('L'),
        S_IFBLK | S_IFCHR => out.push('D'),
        S_IFIFO => out.push('p'),
        S_IFSOCK => out.push('S'),
        _ => {}
    }
    if mode & S_ISUID != 0 {
        out.push('u');
    }
    if mode & S_ISGID != 0 {
        out.push('g');
    }
    if mode & S_IFMT == S_IFCHR {
        out.push('c');
    }
    if mode & S_ISVTX != 0 {
        out.push('t');
    }
    if out.is_empty() {
        out.push('-');
    }
    const GLYPHS: [char; 9] = ['r', 'w', 'x', 'r', 'w', 'x', 'r', 'w', 'x'];
    for (i, glyph) in GLYPHS.iter().enumerate() {
        if mode & (1 << (8 - i)) != 0 {
            out.push(*glyph);
        } else {
            out.push('-');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hash(byte: u8) -> Hash {
        Hash::of_bytes(&[byte])
    }

    #[test]
    fn test_serialize_parse_roundtrip() {
        let f = File {
            mode: "-rw-r--r--".to_string(),
            contents: Some(sample_hash(1)),
            parents: vec![sample_hash(2), sample_hash(3)],
        };
        let encoded = f.serialize();
        let parsed = File::parse(&encoded).unwrap().unwrap();
        assert_eq!(f, parsed);
    }

    #[test]
    fn test_parse_empty_is_nil() {
        assert!(File::parse("").unwrap().is_none());
    }

    #[test]
    fn test_parse_requires_contents_line() {
        assert!(matches!(
            File::parse("-rw-r--r--"),
            Err(Error::MalformedFile(_))
        ));
    }

    #[test]
    fn test_parse_nil_contents_no_parents() {
        // a broken link has no contents and no parents
        let f = File {
            mode: "Lrwxrwxrwx".to_string(),
            contents: None,
            parents: vec![],
        };
        let parsed = File::parse(&f.serialize()).unwrap().unwrap();
        assert_eq!(f, parsed);
    }

    #[test]
    fn test_parse_nil_contents_with_parents_is_malformed() {
        let encoded = format!("-rw-r--r--\n\n{}", sample_hash(1));
        assert!(matches!(
            File::parse(&encoded),
            Err(Error::MalformedFile(_))
        ));
    }

    #[test]
    fn test_parse_tolerates_trailing_blank_lines() {
        let f = File {
            mode: "-rw-r--r--".to_string(),
            contents: Some(sample_hash(1)),
            parents: vec![sample_hash(2)],
        };
        let padded = format!("{}\n\n", f.serialize());
        let parsed = File::parse(&padded).unwrap().unwrap();
        assert_eq!(f, parsed);
        // normalized away on re-serialization
        assert_eq!(parsed.serialize(), f.serialize());
    }

    #[test]
    fn test_is_dir_is_link() {
        let dir = File {
            mode: "drwxr-xr-x".to_string(),
            contents: Some(sample_hash(1)),
            parents: vec![],
        };
        assert!(dir.is_dir());
        assert!(!dir.is_link());

        let link = File {
            mode: "Lrwxrwxrwx".to_string(),
            contents: Some(sample_hash(2)),
            parents: vec![],
        };
        assert!(link.is_link());
        assert!(!link.is_dir());
    }

    #[test]
    fn test_permissions() {
        let f = File {
            mode: "-rwxr-x--x".to_string(),
            contents: None,
            parents: vec![],
        };
        assert_eq!(f.permissions(), 0o751);

        let dir = File {
            mode: "drwxr-xr-x".to_string(),
            contents: None,
            parents: vec![],
        };
        assert_eq!(dir.permissions(), 0o755);
    }

    #[test]
    fn test_permissions_short_mode_defaults() {
        let f = File {
            mode: "drwx".to_string(),
            contents: None,
            parents: vec![],
        };
        assert_eq!(f.permissions(), 0o700);
    }

    #[test]
    fn test_mode_string_for_real_entries() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();

        let file_path = dir.path().join("f.txt");
        fs::write(&file_path, "x").unwrap();
        fs::set_permissions(&file_path, fs::Permissions::from_mode(0o644)).unwrap();
        let mode = mode_string(&fs::symlink_metadata(&file_path).unwrap());
        assert_eq!(mode, "-rw-r--r--");

        let mode = mode_string(&fs::symlink_metadata(dir.path()).unwrap());
        assert!(mode.starts_with('d'));
        assert_eq!(mode.len(), 10);

        let link_path = dir.path().join("link");
        std::os::unix::fs::symlink("f.txt", &link_path).unwrap();
        let mode = mode_string(&fs::symlink_metadata(&link_path).unwrap());
        assert!(mode.starts_with('L'));
    }

    #[test]
    fn test_identity_from_serialization() {
        // equal bytes mean equal snapshot identity
        let f = File {
            mode: "-rw-r--r--".to_string(),
            contents: Some(sample_hash(4)),
            parents: vec![],
        };
        let g = File::parse(&f.serialize()).unwrap().unwrap();
        assert_eq!(
            Hash::of_bytes(f.serialize().as_bytes()),
            Hash::of_bytes(g.serialize().as_bytes())
        );
    }
}
