use anyhow::Result;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::{StageError, StageResult};

/// Return the current Unix epoch in seconds.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Resolve `path` against the current directory and fold `.`/`..` lexically.
///
/// Symlinks are not followed, so two spellings of the same directory only
/// compare equal when they are equal after this folding.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Render a relative path with `/` separators regardless of platform.
pub fn to_posix(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Accept a folder or file name only when it cannot escape its parent.
pub fn validate_component(name: &str) -> StageResult<&str> {
    let trimmed = name.trim();
    let mut components = Path::new(trimmed).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !trimmed.contains(['/', '\\']) => Ok(trimmed),
        _ => Err(StageError::InvalidName(name.to_string())),
    }
}

/// Accept a relative path made only of normal components.
pub fn validate_relative(rel: &str) -> StageResult<PathBuf> {
    let path = Path::new(rel.trim());
    if path.as_os_str().is_empty() {
        return Err(StageError::InvalidName(rel.to_string()));
    }
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(StageError::InvalidName(rel.to_string())),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(StageError::InvalidName(rel.to_string()));
    }
    Ok(out)
}

pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Run `cmd` to completion, killing it once `timeout_secs` elapses. Output
/// pipes are drained while waiting so a chatty child cannot stall.
pub fn run_command_with_optional_timeout(
    cmd: &mut Command,
    timeout_secs: Option<u64>,
) -> Result<Output> {
    let Some(timeout_secs) = timeout_secs else {
        return Ok(cmd.output()?);
    };
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= Duration::from_secs(timeout_secs) {
            let _ = child.kill();
            let _ = child.wait();
            anyhow::bail!("command timed out after {}s", timeout_secs);
        }
        thread::sleep(Duration::from_millis(50));
    };
    Ok(Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_parent_components() {
        let got = normalize_path(Path::new("/srv/data/01_DataDump/../02_Archive/./P1"));
        assert_eq!(got, PathBuf::from("/srv/data/02_Archive/P1"));
    }

    #[test]
    fn component_rejects_separators_and_dots() {
        assert_eq!(validate_component(" P100_2024-01-01_JD ").expect("ok"), "P100_2024-01-01_JD");
        assert!(validate_component("").is_err());
        assert!(validate_component("..").is_err());
        assert!(validate_component(".").is_err());
        assert!(validate_component("a/b").is_err());
        assert!(validate_component("a\\b").is_err());
        assert!(validate_component("/abs").is_err());
    }

    #[test]
    fn relative_rejects_escapes() {
        assert_eq!(
            validate_relative("P1/S1/img.jpg").expect("ok"),
            PathBuf::from("P1/S1/img.jpg")
        );
        assert!(validate_relative("../etc/passwd").is_err());
        assert!(validate_relative("/etc/passwd").is_err());
        assert!(validate_relative("P1/../../x").is_err());
        assert!(validate_relative("  ").is_err());
    }

    #[test]
    fn posix_rendering_drops_non_normal_components() {
        assert_eq!(to_posix(Path::new("01_DataDump/P/S/a.jpg")), "01_DataDump/P/S/a.jpg");
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_slow_child_and_keeps_large_output() {
        let err = run_command_with_optional_timeout(
            Command::new("/bin/sh").args(["-c", "sleep 5"]),
            Some(1),
        )
        .expect_err("timed out");
        assert!(err.to_string().contains("timed out"));

        let out = run_command_with_optional_timeout(
            Command::new("/bin/sh").args(["-c", "head -c 200000 /dev/zero"]),
            Some(30),
        )
        .expect("run");
        assert!(out.status.success());
        assert_eq!(out.stdout.len(), 200_000);
    }
}
