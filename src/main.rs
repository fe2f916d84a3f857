//! rvcs command line interface

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use rvcs::{bundle, ops, publish, Context, FilePath, Hash, Identity, LocalStore, Mirror, Settings};

#[derive(Parser)]
#[command(name = "rvcs")]
#[command(about = "recursive version control system - content-addressed snapshots of file trees")]
#[command(version)]
struct Cli {
    /// archive directory (defaults to ~/.rvcs/archive)
    #[arg(long)]
    archive: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// snapshot the current state of a path
    Snapshot {
        /// path to snapshot (defaults to the working directory)
        path: Option<PathBuf>,

        /// comma separated extra parent hashes for the generated snapshot
        #[arg(long)]
        additional_parents: Option<String>,
    },

    /// show the history of a snapshot, path, or identity
    Log {
        /// hash, previously snapshotted path, or identity
        name: String,

        /// maximum number of entries to show
        #[arg(short = 'n', long)]
        depth: Option<i64>,

        /// describe the changed subpaths of each entry
        #[arg(long)]
        summarize: bool,
    },

    /// materialize a snapshot at a local path
    Checkout {
        /// hash, previously snapshotted path, or identity
        name: String,

        /// destination path
        destination: PathBuf,
    },

    /// merge a snapshot into a local path
    Merge {
        /// hash, previously snapshotted path, or identity
        source: String,

        /// destination path
        destination: PathBuf,

        /// keep the source's file mode when the two sides disagree
        #[arg(long)]
        force_keep_mode: bool,
    },

    /// export snapshots into a bundle file
    Export {
        /// output bundle path
        out: PathBuf,

        /// snapshots to export
        #[arg(required = true)]
        snapshots: Vec<String>,

        /// file listing hashes to exclude, one per line
        #[arg(long)]
        exclude_from: Option<PathBuf>,

        /// also include ancestor snapshots, best effort
        #[arg(long)]
        recurse_parents: bool,
    },

    /// import the objects of a bundle file
    Import {
        /// bundle path
        bundle: PathBuf,
    },

    /// sign a snapshot and push it to the identity's mirrors
    Publish {
        /// hash, previously snapshotted path, or identity
        source: String,

        /// identity to publish as
        identity: String,
    },

    /// print a snapshot record
    Inspect {
        /// hash, previously snapshotted path, or identity
        name: String,
    },

    /// configure a mirror for an identity
    AddMirror {
        /// mirror URL; the scheme selects the helper
        url: String,

        /// identity the mirror serves; omitted means a shared mirror
        #[arg(long)]
        identity: Option<String>,

        /// never push to this mirror
        #[arg(long)]
        read_only: bool,

        /// extra flags passed to the mirror helper
        #[arg(long)]
        helper_flag: Vec<String>,
    },

    /// remove a configured mirror
    RemoveMirror {
        /// mirror URL
        url: String,

        /// identity the mirror serves; omitted means a shared mirror
        #[arg(long)]
        identity: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let archive = match cli.archive.or_else(default_archive) {
        Some(archive) => archive,
        None => {
            eprintln!("error: unable to determine the archive directory; pass --archive");
            return ExitCode::FAILURE;
        }
    };
    let store = LocalStore::new(archive);
    let ctx = Context::new();

    match run(&ctx, &store, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn default_archive() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".rvcs").join("archive"))
}

fn config_path() -> rvcs::Result<PathBuf> {
    Settings::default_path().ok_or_else(|| rvcs::Error::Io {
        path: PathBuf::from("config.json"),
        source: std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "unable to determine the user config directory",
        ),
    })
}

fn run(ctx: &Context, store: &LocalStore, command: Commands) -> rvcs::Result<()> {
    match command {
        Commands::Snapshot {
            path,
            additional_parents,
        } => {
            let _lock = store.lock()?;
            let path = match path {
                Some(path) => absolute(&path)?,
                None => std::env::current_dir().map_err(io_error)?,
            };
            let mut parents = Vec::new();
            if let Some(list) = additional_parents {
                for part in list.split(',') {
                    let part = part.trim();
                    if part.is_empty() {
                        continue;
                    }
                    if let Some(h) = resolve_snapshot(ctx, store, part)? {
                        parents.push(h);
                    }
                }
            }
            let p = FilePath::from_std(&path);
            match ops::current_with_parents(ctx, store, &p, &parents)? {
                Some((h, _)) => println!("snapshotted {} to {}", path.display(), h),
                None => println!("did not generate a snapshot: {} does not exist", path.display()),
            }
            Ok(())
        }

        Commands::Log {
            name,
            depth,
            summarize,
        } => {
            let h = require_snapshot(ctx, store, &name)?;
            let mut entries = ops::read_log(ctx, store, &h, depth.unwrap_or(-1))?;
            if summarize {
                let summaries = ops::summarize_log(ctx, store, &mut entries)?;
                for entry in &entries {
                    if let Some(lines) = summaries.get(&entry.hash) {
                        for line in lines {
                            println!("{line}");
                        }
                    }
                }
            } else {
                for entry in &entries {
                    println!("{}", entry.hash);
                }
            }
            Ok(())
        }

        Commands::Checkout { name, destination } => {
            let _lock = store.lock()?;
            let h = require_snapshot(ctx, store, &name)?;
            let dest = absolute(&destination)?;
            ops::checkout(ctx, store, &h, &FilePath::from_std(&dest))
        }

        Commands::Merge {
            source,
            destination,
            force_keep_mode,
        } => {
            let _lock = store.lock()?;
            let h = require_snapshot(ctx, store, &source)?;
            let dest = absolute(&destination)?;
            ops::merge(
                ctx,
                store,
                &h,
                &FilePath::from_std(&dest),
                ops::MergeOptions { force_keep_mode },
            )
        }

        Commands::Export {
            out,
            snapshots,
            exclude_from,
            recurse_parents,
        } => {
            let mut hashes = Vec::new();
            for name in &snapshots {
                hashes.push(require_snapshot(ctx, store, name)?);
            }
            let exclude = match exclude_from {
                Some(path) => read_hashes_from_file(&path)?,
                None => vec![],
            };
            let file = fs::File::create(&out).map_err(|e| rvcs::Error::Io {
                path: out.clone(),
                source: e,
            })?;
            let included =
                bundle::export(ctx, store, file, &hashes, &exclude, vec![], recurse_parents)?;
            println!("exported {} objects to {}", included.len(), out.display());
            Ok(())
        }

        Commands::Import { bundle } => {
            let _lock = store.lock()?;
            let imported = bundle::import(ctx, store, &bundle, &[])?;
            println!("imported {} objects from {}", imported.len(), bundle.display());
            Ok(())
        }

        Commands::Publish { source, identity } => {
            let _lock = store.lock()?;
            let settings = Settings::load(&config_path()?)?;
            let id = parse_identity(&identity)?;
            let h = require_snapshot(ctx, store, &source)?;
            let (signature, signed) = publish::pull(ctx, &settings, store, &id)?;
            let signature = if signed.as_ref() == Some(&h) {
                signature
            } else {
                publish::sign(ctx, store, &id, Some(&h), signature.as_ref())?
            };
            let signature = publish::push(ctx, &settings, store, &id, signature.as_ref())?;
            match signature {
                Some(signature) => println!("{signature}  {id}"),
                None => println!("nothing published for {id}"),
            }
            Ok(())
        }

        Commands::Inspect { name } => {
            let h = require_snapshot(ctx, store, &name)?;
            let f = store.read_snapshot(ctx, &h)?;
            println!("snapshot: {h}");
            println!("mode:     {}", f.mode);
            match &f.contents {
                Some(contents) => println!("contents: {contents}"),
                None => println!("contents: <none>"),
            }
            for parent in &f.parents {
                println!("parent:   {parent}");
            }
            if f.is_dir() {
                let tree = store.list_directory_contents(ctx, &h, &f)?;
                for (child, child_hash) in &tree {
                    println!("child:    {child} {child_hash}");
                }
            }
            Ok(())
        }

        Commands::AddMirror {
            url,
            identity,
            read_only,
            helper_flag,
        } => {
            let path = config_path()?;
            let mut settings = Settings::load(&path)?;
            let mirror = Mirror {
                url,
                helper_flags: helper_flag,
                read_only,
            };
            match identity {
                Some(identity) => {
                    let id = parse_identity(&identity)?;
                    settings.add_mirror_for_identity(&id.to_string(), mirror);
                }
                None => settings.add_additional_mirror(mirror),
            }
            settings.save(&path)
        }

        Commands::RemoveMirror { url, identity } => {
            let path = config_path()?;
            let mut settings = Settings::load(&path)?;
            match identity {
                Some(identity) => {
                    let id = parse_identity(&identity)?;
                    settings.remove_mirror_for_identity(&id.to_string(), &url);
                }
                None => settings.remove_additional_mirror(&url),
            }
            settings.save(&path)
        }
    }
}

fn io_error(e: std::io::Error) -> rvcs::Error {
    rvcs::Error::Io {
        path: PathBuf::from("."),
        source: e,
    }
}

fn absolute(path: &Path) -> rvcs::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(io_error)?;
    Ok(cwd.join(path))
}

fn parse_identity(s: &str) -> rvcs::Result<Identity> {
    Identity::parse(s)?.ok_or(rvcs::Error::MissingIdentity)
}

/// resolve a user-supplied name to a snapshot hash
///
/// tries, in order: a hash literal, an identity (resolved through its
/// mirrors), and a previously snapshotted local path.
fn resolve_snapshot(ctx: &Context, store: &LocalStore, name: &str) -> rvcs::Result<Option<Hash>> {
    if let Ok(h) = Hash::parse(name) {
        return Ok(h);
    }
    if let Ok(Some(id)) = Identity::parse(name) {
        let settings = Settings::load(&config_path()?)?;
        let (_, signed) = publish::pull(ctx, &settings, store, &id)?;
        return Ok(signed);
    }
    let path = absolute(Path::new(name))?;
    match store.find_snapshot(ctx, &FilePath::from_std(&path))? {
        Some((h, _)) => Ok(Some(h)),
        None => Err(rvcs::Error::SnapshotNotFound(path)),
    }
}

fn require_snapshot(ctx: &Context, store: &LocalStore, name: &str) -> rvcs::Result<Hash> {
    resolve_snapshot(ctx, store, name)?
        .ok_or_else(|| rvcs::Error::SnapshotNotFound(PathBuf::from(name)))
}

fn read_hashes_from_file(path: &Path) -> rvcs::Result<Vec<Hash>> {
    let mut contents = String::new();
    fs::File::open(path)
        .and_then(|mut f| f.read_to_string(&mut contents))
        .map_err(|e| rvcs::Error::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    let mut hashes = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(h) = Hash::parse(line)? {
            hashes.push(h);
        }
    }
    Ok(hashes)
}
