//! pull helper for `file://` mirrors
//!
//! reads the mirror's bundle for an identity, imports its objects into
//! the local archive, and reports the bundle's signature through the
//! result file. Invoked by the publish machinery as
//! `rvcs-pull-file file://<PATH> <IDENTITY> <PREVIOUS_HASH> <RESULT_FILE>`.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use rvcs::{bundle, Context, Hash, LocalStore};

fn usage() -> ExitCode {
    eprintln!("Usage:");
    eprintln!("  rvcs-pull-file file://<PATH> <IDENTITY> <PREVIOUS_HASH> <RESULT_FILE>");
    ExitCode::FAILURE
}

/// the mirror stores one bundle per identity, named by the identity hash
fn bundle_location(mirror: &Path, identity: &str) -> PathBuf {
    let name = Hash::of_bytes(format!("{identity}\n").as_bytes());
    mirror.join(format!("{}-bundle.zip", name.hex()))
}

/// read the signature and the previous-bundle list from bundle metadata
fn read_metadata(bundle_path: &Path) -> std::io::Result<(String, Vec<String>)> {
    let file = fs::File::open(bundle_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let mut signature = String::new();
    archive
        .by_name("metadata/signature")
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e))?
        .read_to_string(&mut signature)?;
    let signature = signature.trim().to_string();

    let mut previous = String::new();
    match archive.by_name("metadata/previous") {
        Ok(mut entry) => {
            entry.read_to_string(&mut previous)?;
        }
        // no previous bundles
        Err(_) => return Ok((signature, vec![])),
    }
    let previous = previous
        .trim()
        .lines()
        .map(str::to_string)
        .filter(|line| !line.is_empty())
        .collect();
    Ok((signature, previous))
}

fn default_archive() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".rvcs").join("archive"))
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 5 {
        return usage();
    }
    let mirror = PathBuf::from(args[1].trim_start_matches("file://"));
    let identity = &args[2];
    // args[3] holds the previously known signature, which we do not need
    let result_file = &args[4];

    let Some(archive) = default_archive() else {
        eprintln!("failure resolving the user's home directory");
        return ExitCode::FAILURE;
    };
    let store = LocalStore::new(archive);
    let ctx = Context::new();

    let bundle_path = bundle_location(&mirror, identity);
    let (signature, previous_bundles) = match read_metadata(&bundle_path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // the mirror holds nothing for this identity yet
            eprintln!("bundle {} does not exist...", bundle_path.display());
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("failure reading the bundle metadata: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = fs::write(result_file, &signature) {
        eprintln!("failure writing the bundle signature: {e}");
        return ExitCode::FAILURE;
    }

    let mut imported = match bundle::import(&ctx, &store, &bundle_path, &[]) {
        Ok(imported) => imported,
        Err(e) => {
            eprintln!("failure importing the bundle: {e}");
            return ExitCode::FAILURE;
        }
    };
    // older bundles only need importing while newer ones brought in
    // objects we did not already have
    for previous_bundle in &previous_bundles {
        if imported.is_empty() {
            break;
        }
        imported = match bundle::import(&ctx, &store, Path::new(previous_bundle), &[]) {
            Ok(imported) => imported,
            Err(e) => {
                eprintln!("failure importing from the previous bundle {previous_bundle}: {e}");
                return ExitCode::FAILURE;
            }
        };
    }
    ExitCode::SUCCESS
}
