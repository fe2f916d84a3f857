use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::context::Context;
use crate::error::Result;
use crate::hash::Hash;
use crate::store::LocalStore;
use crate::types::File;

/// one snapshot in a history traversal
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub hash: Hash,
    pub file: File,

    /// flattened subpath -> snapshot hash mapping, populated lazily for
    /// directory snapshots by `nested_contents`
    nested: Option<(Vec<String>, BTreeMap<String, Hash>)>,
}

impl LogEntry {
    pub fn new(hash: Hash, file: File) -> Self {
        Self {
            hash,
            file,
            nested: None,
        }
    }

    /// map every nested subpath of this snapshot to its file hash
    ///
    /// only defined for directory snapshots; everything else yields `None`.
    /// Subpaths are joined with `/`; intermediate directories are included
    /// only when requested. The result is cached on the entry.
    pub fn nested_contents(
        &mut self,
        ctx: &Context,
        s: &LocalStore,
        include_directories: bool,
    ) -> Result<Option<(&[String], &BTreeMap<String, Hash>)>> {
        if !self.file.is_dir() {
            return Ok(None);
        }
        if self.nested.is_none() {
            let mut contents = BTreeMap::new();
            dir_contents(ctx, s, &self.hash, &self.file, "", include_directories, &mut contents)?;
            let paths: Vec<String> = contents.keys().cloned().collect();
            self.nested = Some((paths, contents));
        }
        match &self.nested {
            Some((paths, contents)) => Ok(Some((paths.as_slice(), contents))),
            None => Ok(None),
        }
    }
}

fn dir_contents(
    ctx: &Context,
    s: &LocalStore,
    h: &Hash,
    f: &File,
    subpath: &str,
    include_directories: bool,
    contents: &mut BTreeMap<String, Hash>,
) -> Result<()> {
    ctx.check()?;
    let tree = s.list_directory_contents(ctx, h, f)?;
    for (p, ph) in &tree {
        let child = s.read_snapshot(ctx, ph)?;
        let child_path = if subpath.is_empty() {
            p.to_string()
        } else {
            format!("{subpath}/{p}")
        };
        if child.is_dir() {
            if include_directories {
                contents.insert(child_path.clone(), ph.clone());
            }
            dir_contents(ctx, s, ph, &child, &child_path, include_directories, contents)?;
        } else {
            contents.insert(child_path, ph.clone());
        }
    }
    Ok(())
}

/// read the history reachable from `h` in breadth-first order
///
/// the root comes first, then its parents in order, then their unseen
/// parents. Entries are deduplicated by hash. A depth of 0 yields nothing,
/// 1 yields only the root, and -1 means unlimited.
pub fn read_log(ctx: &Context, s: &LocalStore, h: &Hash, depth: i64) -> Result<Vec<LogEntry>> {
    let mut result = Vec::new();
    if depth == 0 {
        return Ok(result);
    }
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(h.clone());
    queue.push_back(h.clone());
    while let Some(hash) = queue.pop_front() {
        ctx.check()?;
        let file = s.read_snapshot(ctx, &hash)?;
        for parent in &file.parents {
            if visited.insert(parent.clone()) {
                queue.push_back(parent.clone());
            }
        }
        result.push(LogEntry::new(hash, file));
        if depth > 0 && result.len() as i64 >= depth {
            break;
        }
    }
    Ok(result)
}

/// describe what changed in each log entry relative to its first parent
///
/// the result maps each snapshot hash to its summary lines: the hash
/// itself first, then sorted `+path(hash)` / `-path(hash)` lines for
/// directory snapshots. Entries whose hash is unchanged are omitted.
pub fn summarize_log(
    ctx: &Context,
    s: &LocalStore,
    entries: &mut [LogEntry],
) -> Result<HashMap<Hash, Vec<String>>> {
    let mut paths_map: HashMap<Hash, Vec<String>> = HashMap::new();
    let mut contents_map: HashMap<Hash, BTreeMap<String, Hash>> = HashMap::new();
    for entry in entries.iter_mut() {
        let hash = entry.hash.clone();
        if let Some((paths, contents)) = entry.nested_contents(ctx, s, false)? {
            paths_map.insert(hash.clone(), paths.to_vec());
            contents_map.insert(hash, contents.clone());
        }
    }
    let mut result = HashMap::new();
    for entry in entries.iter() {
        let mut summary = vec![entry.hash.to_string()];
        if let (Some(paths), Some(contents)) = (
            paths_map.get(&entry.hash),
            contents_map.get(&entry.hash),
        ) {
            let (prev_paths, prev_contents) = match entry.file.parents.first() {
                Some(parent) => (
                    paths_map.get(parent).map(Vec::as_slice).unwrap_or(&[]),
                    contents_map.get(parent),
                ),
                None => (&[] as &[String], None),
            };
            summary.extend(describe_changed(paths, prev_paths, contents, prev_contents));
        }
        result.insert(entry.hash.clone(), summary);
    }
    Ok(result)
}

fn delete_line(path: &str, hash: &Hash) -> String {
    format!("  -{path}({hash})")
}

fn insert_line(path: &str, hash: &Hash) -> String {
    format!("  +{path}({hash})")
}

/// merge two sorted path lists into delete/insert lines, skipping entries
/// whose hash did not change
fn describe_changed(
    paths: &[String],
    previous_paths: &[String],
    contents: &BTreeMap<String, Hash>,
    previous_contents: Option<&BTreeMap<String, Hash>>,
) -> Vec<String> {
    let mut changes = Vec::new();
    let mut prev = previous_paths.iter().peekable();
    for p in paths {
        let h = &contents[p];
        while let Some(prev_path) = prev.peek() {
            if *prev_path >= p {
                break;
            }
            if let Some(prev_contents) = previous_contents {
                changes.push(delete_line(prev_path, &prev_contents[*prev_path]));
            }
            prev.next();
        }
        let mut previous_hash = None;
        if prev.peek() == Some(&p) {
            previous_hash = previous_contents.and_then(|m| m.get(p));
            prev.next();
        }
        if previous_hash == Some(h) {
            continue;
        }
        if let Some(previous_hash) = previous_hash {
            changes.push(delete_line(p, previous_hash));
        }
        changes.push(insert_line(p, h));
    }
    for deleted in prev {
        if let Some(prev_contents) = previous_contents {
            changes.push(delete_line(deleted, &prev_contents[deleted]));
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::snapshot::current;
    use crate::store::LocalStore;
    use crate::types::FilePath;
    use std::fs;
    use tempfile::tempdir;

    fn test_store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("archive"));
        (dir, store)
    }

    fn snapshot_versions(
        dir: &std::path::Path,
        store: &LocalStore,
        versions: &[&str],
    ) -> Vec<Hash> {
        let ctx = Context::new();
        let file_path = dir.join("f.txt");
        let p = FilePath::from_std(&file_path);
        let mut hashes = Vec::new();
        for version in versions {
            fs::write(&file_path, version).unwrap();
            let (h, _) = current(&ctx, store, &p).unwrap().unwrap();
            hashes.push(h);
        }
        hashes
    }

    #[test]
    fn test_read_log_linear_history() {
        let (dir, store) = test_store();
        let ctx = Context::new();
        let hashes = snapshot_versions(dir.path(), &store, &["v1", "v2", "v3"]);

        let log = read_log(&ctx, &store, &hashes[2], -1).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].hash, hashes[2]);
        assert_eq!(log[1].hash, hashes[1]);
        assert_eq!(log[2].hash, hashes[0]);
    }

    #[test]
    fn test_read_log_depth() {
        let (dir, store) = test_store();
        let ctx = Context::new();
        let hashes = snapshot_versions(dir.path(), &store, &["v1", "v2", "v3"]);

        assert!(read_log(&ctx, &store, &hashes[2], 0).unwrap().is_empty());

        let only_root = read_log(&ctx, &store, &hashes[2], 1).unwrap();
        assert_eq!(only_root.len(), 1);
        assert_eq!(only_root[0].hash, hashes[2]);

        let two = read_log(&ctx, &store, &hashes[2], 2).unwrap();
        assert_eq!(two.len(), 2);
    }

    #[test]
    fn test_read_log_deduplicates_shared_ancestor() {
        let (dir, store) = test_store();
        let ctx = Context::new();
        let hashes = snapshot_versions(dir.path(), &store, &["base", "tip"]);

        // a merge-like record whose two parents share an ancestor
        let merged = File {
            mode: "-rw-r--r--".to_string(),
            contents: Some(Hash::of_bytes(b"merged")),
            parents: vec![hashes[1].clone(), hashes[0].clone()],
        };
        let encoded = merged.serialize();
        let merged_hash = store
            .store_object(&ctx, encoded.len() as u64, &mut encoded.as_bytes())
            .unwrap();

        let log = read_log(&ctx, &store, &merged_hash, -1).unwrap();
        let seen: Vec<&Hash> = log.iter().map(|e| &e.hash).collect();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], &merged_hash);
        assert_eq!(seen[1], &hashes[1]);
        assert_eq!(seen[2], &hashes[0]);
    }

    #[test]
    fn test_nested_contents_for_directory() {
        let (dir, store) = test_store();
        let ctx = Context::new();

        let d = dir.path().join("d");
        fs::create_dir_all(d.join("sub")).unwrap();
        fs::write(d.join("top.txt"), "top").unwrap();
        fs::write(d.join("sub/inner.txt"), "inner").unwrap();

        let (h, f) = current(&ctx, &store, &FilePath::from_std(&d)).unwrap().unwrap();
        let mut entry = LogEntry::new(h, f);
        let (paths, contents) = entry.nested_contents(&ctx, &store, false).unwrap().unwrap();
        assert_eq!(paths, ["sub/inner.txt", "top.txt"]);
        assert!(contents.contains_key("top.txt"));

        // directories included on request
        let mut entry2 = LogEntry::new(entry.hash.clone(), entry.file.clone());
        let (paths, _) = entry2.nested_contents(&ctx, &store, true).unwrap().unwrap();
        assert_eq!(paths, ["sub", "sub/inner.txt", "top.txt"]);
    }

    #[test]
    fn test_nested_contents_for_regular_file_is_none() {
        let (dir, store) = test_store();
        let ctx = Context::new();
        let hashes = snapshot_versions(dir.path(), &store, &["only"]);
        let file = store.read_snapshot(&ctx, &hashes[0]).unwrap();
        let mut entry = LogEntry::new(hashes[0].clone(), file);
        assert!(entry.nested_contents(&ctx, &store, false).unwrap().is_none());
    }

    #[test]
    fn test_summarize_log_reports_changed_children() {
        let (dir, store) = test_store();
        let ctx = Context::new();

        let d = dir.path().join("d");
        fs::create_dir(&d).unwrap();
        fs::write(d.join("a.txt"), "one").unwrap();
        let dp = FilePath::from_std(&d);
        let (h1, _) = current(&ctx, &store, &dp).unwrap().unwrap();

        fs::write(d.join("b.txt"), "two").unwrap();
        let (h2, _) = current(&ctx, &store, &dp).unwrap().unwrap();

        let mut log = read_log(&ctx, &store, &h2, -1).unwrap();
        let summaries = summarize_log(&ctx, &store, &mut log).unwrap();

        let tip = &summaries[&h2];
        assert_eq!(tip[0], h2.to_string());
        assert!(tip.iter().any(|line| line.contains("+b.txt")));
        assert!(!tip.iter().any(|line| line.contains("a.txt")));

        let root = &summaries[&h1];
        assert!(root.iter().any(|line| line.contains("+a.txt")));
    }
}
