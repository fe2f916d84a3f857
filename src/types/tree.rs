use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::types::FilePath;

/// the contents of a directory snapshot
///
/// keys are single-segment child paths, values are the hashes of each
/// child's latest snapshot. Serialization is deterministic: one
/// `<base64(path)> <hash>` line per child, sorted ascending over the
/// encoded lines, joined with newlines and no trailing newline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree(BTreeMap<FilePath, Hash>);

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: FilePath, hash: Hash) {
        self.0.insert(path, hash);
    }

    pub fn get(&self, path: &FilePath) -> Option<&Hash> {
        self.0.get(path)
    }

    pub fn contains(&self, path: &FilePath) -> bool {
        self.0.contains_key(path)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, FilePath, Hash> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// serialize to the canonical line encoding
    pub fn serialize(&self) -> String {
        let mut lines: Vec<String> = self
            .0
            .iter()
            .map(|(p, h)| format!("{} {}", p.encode(), h))
            .collect();
        // sort over the encoded lines, not the raw paths; base64 order and
        // byte order of the underlying paths can differ
        lines.sort();
        lines.join("\n")
    }

    /// parse the canonical line encoding
    pub fn parse(encoded: &str) -> Result<Self> {
        let mut tree = Tree::new();
        for line in encoded.split('\n') {
            if line.is_empty() {
                continue;
            }
            let (encoded_path, hash_str) = line
                .split_once(' ')
                .ok_or_else(|| Error::MalformedTree(line.to_string()))?;
            let path = FilePath::decode(encoded_path)?;
            if let Some(hash) = Hash::parse(hash_str)? {
                tree.insert(path, hash);
            }
        }
        Ok(tree)
    }
}

impl<'a> IntoIterator for &'a Tree {
    type Item = (&'a FilePath, &'a Hash);
    type IntoIter = btree_map::Iter<'a, FilePath, Hash>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hash(byte: u8) -> Hash {
        Hash::of_bytes(&[byte])
    }

    #[test]
    fn test_serialize_parse_roundtrip() {
        let mut tree = Tree::new();
        tree.insert(FilePath::from("a.txt"), sample_hash(1));
        tree.insert(FilePath::from("b.txt"), sample_hash(2));
        tree.insert(FilePath::from("sub dir"), sample_hash(3));

        let encoded = tree.serialize();
        let parsed = Tree::parse(&encoded).unwrap();
        assert_eq!(tree, parsed);
    }

    #[test]
    fn test_serialize_is_order_independent() {
        let mut t1 = Tree::new();
        t1.insert(FilePath::from("x"), sample_hash(1));
        t1.insert(FilePath::from("y"), sample_hash(2));

        let mut t2 = Tree::new();
        t2.insert(FilePath::from("y"), sample_hash(2));
        t2.insert(FilePath::from("x"), sample_hash(1));

        assert_eq!(t1.serialize(), t2.serialize());
    }

    #[test]
    fn test_serialize_no_trailing_newline() {
        let mut tree = Tree::new();
        tree.insert(FilePath::from("only"), sample_hash(9));
        assert!(!tree.serialize().ends_with('\n'));
    }

    #[test]
    fn test_parse_skips_empty_lines() {
        let mut tree = Tree::new();
        tree.insert(FilePath::from("a"), sample_hash(1));
        let padded = format!("\n{}\n\n", tree.serialize());
        let parsed = Tree::parse(&padded).unwrap();
        assert_eq!(tree, parsed);
    }

    #[test]
    fn test_parse_rejects_missing_hash_token() {
        let line = FilePath::from("a").encode();
        assert!(matches!(
            Tree::parse(&line),
            Err(Error::MalformedTree(_))
        ));
    }

    #[test]
    fn test_empty_tree_serializes_to_empty_string() {
        let tree = Tree::new();
        assert_eq!(tree.serialize(), "");
        let parsed = Tree::parse("").unwrap();
        assert!(parsed.is_empty());
    }
}
