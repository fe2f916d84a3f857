use std::env;
use std::fs;
use std::io::Read;
use std::os::fd::AsRawFd;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use nix::libc;

use crate::context::Context;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::ops::checkout::checkout;
use crate::store::LocalStore;
use crate::types::{File, FilePath};

/// environment variable selecting the regular-file merge helper command
pub const HELPER_COMMAND_ENV: &str = "RVCS_MERGE_HELPER_COMMAND";

/// environment variable holding the helper's extra arguments, JSON encoded
pub const HELPER_ARGS_ENV: &str = "RVCS_MERGE_HELPER_ARGS";

const DEFAULT_HELPER_COMMAND: &str = "diff3";
const DEFAULT_HELPER_ARGS: &str = "[\"-m\"]";

/// wall-clock budget for one helper invocation
const HELPER_DEADLINE: Duration = Duration::from_secs(1);

/// merge two regular-file snapshots through the external helper
///
/// the three sides are checked out to a temporary directory (a nil base
/// becomes an empty file) and passed as the helper's trailing arguments.
/// The helper's stdout is the merged contents; it must exit zero within
/// the one-second deadline or the merge fails.
pub(crate) fn merge_with_helper(
    ctx: &Context,
    s: &LocalStore,
    p: &FilePath,
    mode: &str,
    merge_base: Option<&Hash>,
    src: &Hash,
    dest: &Hash,
) -> Result<Hash> {
    let command = match env::var(HELPER_COMMAND_ENV) {
        Ok(command) if !command.is_empty() => command,
        _ => DEFAULT_HELPER_COMMAND.to_string(),
    };
    let args_json = match env::var(HELPER_ARGS_ENV) {
        Ok(args) if !args.is_empty() => args,
        _ => DEFAULT_HELPER_ARGS.to_string(),
    };
    let args: Vec<String> = serde_json::from_str(&args_json)?;

    let tmp = tempfile::Builder::new()
        .prefix("rvcs-merge-helper")
        .tempdir()
        .with_path("/tmp")?;
    let tmp_root = FilePath::from_std(tmp.path());

    let src_path = tmp_root.join(&FilePath::from("src")).join(p);
    checkout(ctx, s, src, &src_path)?;
    let base_path = tmp_root.join(&FilePath::from("base")).join(p);
    match merge_base {
        Some(merge_base) => checkout(ctx, s, merge_base, &base_path)?,
        None => {
            // an empty file stands in for the missing base; the default
            // helper will usually report conflicts, but a smarter helper
            // gets a chance to resolve them
            if let Some(parent) = base_path.as_std().parent() {
                fs::create_dir_all(parent).with_path(parent)?;
            }
            fs::File::create(base_path.as_std()).with_path(base_path.as_std())?;
        }
    }
    let dest_path = tmp_root.join(&FilePath::from("dest")).join(p);
    checkout(ctx, s, dest, &dest_path)?;

    let mut helper = Command::new(&command);
    helper
        .args(&args)
        .arg(src_path.as_std())
        .arg(base_path.as_std())
        .arg(dest_path.as_std())
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    let output = run_with_deadline(ctx, &command, helper, HELPER_DEADLINE)?;

    let contents_hash = s.store_object(ctx, output.len() as u64, &mut output.as_slice())?;
    let merged_file = File {
        mode: mode.to_string(),
        contents: Some(contents_hash),
        parents: vec![src.clone(), dest.clone()],
    };
    let encoded = merged_file.serialize();
    s.store_object(ctx, encoded.len() as u64, &mut encoded.as_bytes())
}

/// run a command, capturing stdout, killing it on deadline or cancellation
fn run_with_deadline(
    ctx: &Context,
    command: &str,
    mut cmd: Command,
    deadline: Duration,
) -> Result<Vec<u8>> {
    let helper_error = |status: String| Error::Helper {
        command: command.to_string(),
        status,
    };
    let mut child = cmd
        .spawn()
        .map_err(|e| helper_error(format!("failed to start: {e}")))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| helper_error("stdout not available".to_string()))?;
    // non-blocking reads so the deadline can interrupt a hung child
    let fd = stdout.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        let _ = child.kill();
        let _ = child.wait();
        return Err(helper_error("failed to configure stdout".to_string()));
    }

    let started = Instant::now();
    let mut output = Vec::new();
    let mut buf = [0u8; 8 * 1024];
    loop {
        match stdout.read(&mut buf) {
            Ok(0) => {
                // EOF: the pipe closed, collect the exit status
                let status = child
                    .wait()
                    .map_err(|e| helper_error(format!("failed to wait: {e}")))?;
                if !status.success() {
                    return Err(helper_error(status.to_string()));
                }
                return Ok(output);
            }
            Ok(n) => output.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(helper_error(format!("failed reading stdout: {e}")));
            }
        }
        if ctx.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Cancelled);
        }
        if started.elapsed() > deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(helper_error(format!(
                "timed out after {}s",
                deadline.as_secs()
            )));
        }
    }
}
