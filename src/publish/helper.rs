use std::ffi::OsString;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::hash::Hash;

/// invoke the helper `rvcs-<op>-<qualifier>` and parse its result file
///
/// the helper runs with inherited stdio; the path of a fresh result file
/// is appended as the final argument. Success means exit code zero and a
/// readable result file holding one canonical hash (trailing whitespace
/// tolerated).
pub(crate) fn run_helper(
    ctx: &Context,
    op: &str,
    qualifier: &str,
    args: &[OsString],
) -> Result<Option<Hash>> {
    let command = format!("rvcs-{op}-{qualifier}");
    let helper_error = |status: String| Error::Helper {
        command: command.clone(),
        status,
    };

    let result_file = tempfile::NamedTempFile::new()
        .map_err(|e| helper_error(format!("failed to create the result file: {e}")))?;

    let mut child = Command::new(&command)
        .args(args)
        .arg(result_file.path())
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| helper_error(format!("failed to start: {e}")))?;

    let status = loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| helper_error(format!("failed to poll: {e}")))?
        {
            break status;
        }
        if ctx.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Cancelled);
        }
        std::thread::sleep(Duration::from_millis(20));
    };
    if !status.success() {
        return Err(helper_error(status.to_string()));
    }

    let contents = std::fs::read_to_string(result_file.path())
        .map_err(|e| helper_error(format!("unreadable result file: {e}")))?;
    Hash::parse(contents.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// install a fake helper script on PATH and run the closure
    fn with_fake_helper<T>(name: &str, script: &str, f: impl FnOnce() -> T) -> T {
        let dir = tempfile::tempdir().unwrap();
        let helper_path = dir.path().join(name);
        fs::write(&helper_path, script).unwrap();
        fs::set_permissions(&helper_path, fs::Permissions::from_mode(0o755)).unwrap();

        let old_path = std::env::var_os("PATH").unwrap_or_default();
        let mut paths: Vec<_> = std::env::split_paths(&old_path).collect();
        paths.insert(0, dir.path().to_path_buf());
        std::env::set_var("PATH", std::env::join_paths(paths).unwrap());
        let result = f();
        std::env::set_var("PATH", old_path);
        result
    }

    #[test]
    fn test_run_helper_reads_result_file() {
        let hash = Hash::of_bytes(b"signed payload");
        let script = format!("#!/bin/sh\necho ignored-stdout-noise\necho '{hash} ' > \"$2\"\n");
        let result = with_fake_helper("rvcs-sign-fake", &script, || {
            run_helper(
                &Context::new(),
                "sign",
                "fake",
                &[OsString::from("arg-one")],
            )
        })
        .unwrap();
        assert_eq!(result, Some(hash));
    }

    #[test]
    fn test_run_helper_nonzero_exit_fails() {
        let script = "#!/bin/sh\nexit 3\n";
        let err = with_fake_helper("rvcs-verify-fake", script, || {
            run_helper(&Context::new(), "verify", "fake", &[])
        })
        .unwrap_err();
        match err {
            Error::Helper { command, .. } => assert_eq!(command, "rvcs-verify-fake"),
            other => panic!("expected a helper error, got {other}"),
        }
    }

    #[test]
    fn test_run_helper_garbage_result_fails() {
        let script = "#!/bin/sh\necho 'not a hash' > \"$1\"\n";
        let err = with_fake_helper("rvcs-pull-fake", script, || {
            run_helper(&Context::new(), "pull", "fake", &[])
        })
        .unwrap_err();
        assert!(matches!(err, Error::MalformedHash(_)));
    }

    #[test]
    fn test_run_helper_missing_command_fails() {
        assert!(!Path::new("/usr/bin/rvcs-sign-no-such-helper").exists());
        let err = run_helper(&Context::new(), "sign", "no-such-helper", &[]).unwrap_err();
        assert!(matches!(err, Error::Helper { .. }));
    }
}
