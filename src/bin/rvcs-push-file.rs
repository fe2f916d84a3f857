//! push helper for `file://` mirrors
//!
//! exports the object graph reachable from the latest signature into the
//! mirror's per-identity bundle, preserving the replaced bundle in a
//! `metadata/previous` chain so pullers can backfill history. Invoked by
//! the publish machinery as
//! `rvcs-push-file file://<PATH> <IDENTITY> <SIGNATURE_HASH> <RESULT_FILE>`.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use rvcs::{bundle, Context, Hash, LocalStore};

fn usage() -> ExitCode {
    eprintln!("Usage:");
    eprintln!("  rvcs-push-file file://<PATH> <IDENTITY> <SIGNATURE_HASH> <RESULT_FILE>");
    ExitCode::FAILURE
}

fn bundle_location(mirror: &Path, identity: &str) -> PathBuf {
    let name = Hash::of_bytes(format!("{identity}\n").as_bytes());
    mirror.join(format!("{}-bundle.zip", name.hex()))
}

fn default_archive() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".rvcs").join("archive"))
}

/// move the current bundle aside, returning its new path and the chain
/// of bundles it already referenced
fn retire_existing(bundle_path: &Path, signature: &str) -> std::io::Result<Vec<String>> {
    let file = match fs::File::open(bundle_path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e),
    };
    let mut previous = Vec::new();
    if let Ok(mut archive) = zip::ZipArchive::new(file) {
        if let Ok(mut entry) = archive.by_name("metadata/previous") {
            let mut chain = String::new();
            entry.read_to_string(&mut chain)?;
            previous.extend(
                chain
                    .trim()
                    .lines()
                    .map(str::to_string)
                    .filter(|line| !line.is_empty()),
            );
        }
    }
    let retired = bundle_path.with_file_name(format!(
        "{}-bundle.zip",
        Hash::of_bytes(signature.as_bytes()).hex()
    ));
    fs::rename(bundle_path, &retired)?;
    previous.insert(0, retired.to_string_lossy().into_owned());
    Ok(previous)
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 5 {
        return usage();
    }
    let mirror = PathBuf::from(args[1].trim_start_matches("file://"));
    let identity = &args[2];
    let signature = &args[3];
    let result_file = &args[4];

    let signature_hash = match Hash::parse(signature) {
        Ok(Some(signature_hash)) => signature_hash,
        _ => {
            eprintln!("failure parsing the signature hash {signature:?}");
            return ExitCode::FAILURE;
        }
    };

    let Some(archive) = default_archive() else {
        eprintln!("failure resolving the user's home directory");
        return ExitCode::FAILURE;
    };
    let store = LocalStore::new(archive);
    let ctx = Context::new();

    if let Err(e) = fs::create_dir_all(&mirror) {
        eprintln!("failure creating the mirror directory: {e}");
        return ExitCode::FAILURE;
    }
    let bundle_path = bundle_location(&mirror, identity);
    let previous = match retire_existing(&bundle_path, signature) {
        Ok(previous) => previous,
        Err(e) => {
            eprintln!("failure retiring the existing bundle: {e}");
            return ExitCode::FAILURE;
        }
    };

    let out = match fs::File::create(&bundle_path) {
        Ok(out) => out,
        Err(e) => {
            eprintln!("failure creating the bundle file: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut metadata: Vec<(String, Box<dyn Read>)> = vec![(
        "signature".to_string(),
        Box::new(std::io::Cursor::new(signature.clone().into_bytes())),
    )];
    if !previous.is_empty() {
        metadata.push((
            "previous".to_string(),
            Box::new(std::io::Cursor::new(previous.join("\n").into_bytes())),
        ));
    }
    if let Err(e) = bundle::export(
        &ctx,
        &store,
        out,
        std::slice::from_ref(&signature_hash),
        &[],
        metadata,
        true,
    ) {
        eprintln!("failure exporting the bundle: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = fs::write(result_file, signature) {
        eprintln!("failure writing the result file: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
