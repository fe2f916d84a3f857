//! self-verifying zip transport for arbitrary subsets of objects
//!
//! a bundle carries raw object bytes under `objects/<alg>/<fan-out>` and
//! uninterpreted metadata streams under `metadata/<key>`. Every object
//! entry must re-hash to the hash spelled by its entry name; import
//! verifies the whole bundle before writing anything to the store.

use std::collections::HashSet;
use std::io::{Read, Seek, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::context::Context;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::{Algorithm, Hash};
use crate::store::LocalStore;
use crate::types::File;

/// zip entry name for an object
fn entry_path(h: &Hash) -> String {
    let (buckets, name) = h.bucket_components();
    let mut path = format!("objects/{}", h.algorithm().tag());
    for bucket in buckets {
        path.push('/');
        path.push_str(bucket);
    }
    path.push('/');
    path.push_str(name);
    path
}

/// recover the hash an object entry name spells, or `None` for entries
/// outside `objects/`
fn entry_hash(name: &str) -> Result<Option<Hash>> {
    let Some(rest) = name.strip_prefix("objects/") else {
        return Ok(None);
    };
    let mut parts = rest.split('/');
    let tag = match parts.next() {
        Some(tag) if !tag.is_empty() => tag,
        _ => return Ok(None),
    };
    let Some(algorithm) = Algorithm::from_tag(tag) else {
        return Ok(None);
    };
    let hex: String = parts.collect();
    if hex.is_empty() || hex::decode(&hex).is_err() {
        return Ok(None);
    }
    Ok(Some(Hash::new(algorithm, hex)))
}

struct BundleWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    visited: HashSet<Hash>,
    exclude: HashSet<Hash>,
    recurse_parents: bool,
    included: Vec<Hash>,
}

impl<W: Write + Seek> BundleWriter<W> {
    fn add_object(&mut self, ctx: &Context, s: &LocalStore, h: &Hash) -> Result<()> {
        ctx.check()?;
        if self.exclude.contains(h) || self.visited.contains(h) {
            return Ok(());
        }
        self.visited.insert(h.clone());
        let mut reader = s.read_object(ctx, h)?;
        self.zip
            .start_file(entry_path(h), SimpleFileOptions::default())?;
        std::io::copy(&mut reader, &mut self.zip)
            .map_err(|e| Error::Io {
                path: entry_path(h).into(),
                source: e,
            })?;
        self.included.push(h.clone());
        Ok(())
    }

    /// add a snapshot, its contents, its directory children, and
    /// optionally its ancestors
    fn add_file(&mut self, ctx: &Context, s: &LocalStore, h: &Hash, f: &File) -> Result<()> {
        self.add_object(ctx, s, h)?;
        let contents = match &f.contents {
            Some(contents) => contents,
            None => return Ok(()),
        };
        self.add_object(ctx, s, contents)?;
        if f.is_dir() {
            let tree = s.list_directory_contents(ctx, h, f)?;
            for (_, child_hash) in &tree {
                if self.exclude.contains(child_hash) || self.visited.contains(child_hash) {
                    continue;
                }
                let child = s.read_snapshot(ctx, child_hash)?;
                self.add_file(ctx, s, child_hash, &child)?;
            }
        }
        if !self.recurse_parents {
            return Ok(());
        }
        for parent in &f.parents {
            if self.exclude.contains(parent) || self.visited.contains(parent) {
                continue;
            }
            // tolerate missing ancestors so incremental bundles work
            let Ok(parent_file) = s.read_snapshot(ctx, parent) else {
                continue;
            };
            self.add_file(ctx, s, parent, &parent_file)?;
        }
        Ok(())
    }
}

/// write a bundle holding the given snapshots to `out`
///
/// each snapshot is added together with its contents blob and, for
/// directories, every child snapshot; `recurse_parents` additionally
/// walks the ancestry, best-effort. Metadata entries are written first in
/// iteration order. Returns the hashes of every object added.
pub fn export<W: Write + Seek>(
    ctx: &Context,
    s: &LocalStore,
    out: W,
    snapshots: &[Hash],
    exclude: &[Hash],
    metadata: Vec<(String, Box<dyn Read>)>,
    recurse_parents: bool,
) -> Result<Vec<Hash>> {
    let mut zip = ZipWriter::new(out);
    for (key, mut reader) in metadata {
        ctx.check()?;
        let name = format!("metadata/{key}");
        zip.start_file(name.as_str(), SimpleFileOptions::default())?;
        std::io::copy(&mut reader, &mut zip).map_err(|e| Error::Io {
            path: name.into(),
            source: e,
        })?;
    }
    let mut writer = BundleWriter {
        zip,
        visited: HashSet::new(),
        exclude: exclude.iter().cloned().collect(),
        recurse_parents,
        included: Vec::new(),
    };
    for h in snapshots {
        let f = s.read_snapshot(ctx, h)?;
        writer.add_file(ctx, s, h, &f)?;
    }
    writer.zip.finish()?;
    Ok(writer.included)
}

/// import the objects of a bundle into the store
///
/// the bundle is fully verified first: every `objects/` entry must
/// re-hash to the hash its name spells, otherwise nothing is imported.
/// Entries already present in the store or listed in `exclude` are
/// skipped. Returns the hashes of every object written.
pub fn import(
    ctx: &Context,
    s: &LocalStore,
    bundle_path: &Path,
    exclude: &[Hash],
) -> Result<Vec<Hash>> {
    let file = std::fs::File::open(bundle_path).with_path(bundle_path)?;
    let mut archive = ZipArchive::new(file)?;

    // first pass: validate every object entry before any side effect
    for index in 0..archive.len() {
        ctx.check()?;
        let mut entry = archive.by_index(index)?;
        let Some(expected) = entry_hash(entry.name())? else {
            // additional non-object files are allowed in bundles
            continue;
        };
        let entry_name = entry.name().to_string();
        let actual = Hash::of_reader(&mut entry).with_path(bundle_path)?;
        if actual != expected {
            return Err(Error::BundleIntegrity {
                entry: entry_name,
                actual,
                expected,
            });
        }
    }

    let excluded: HashSet<&Hash> = exclude.iter().collect();
    let mut imported = Vec::new();
    for index in 0..archive.len() {
        ctx.check()?;
        let mut entry = archive.by_index(index)?;
        let Some(h) = entry_hash(entry.name())? else {
            continue;
        };
        if excluded.contains(&h) || s.has_object(&h) {
            continue;
        }
        let size = entry.size();
        let stored = s.store_object(ctx, size, &mut entry)?;
        imported.push(stored);
    }
    Ok(imported)
}
