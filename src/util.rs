use std::env;
use std::fs::{self, OpenOptions};
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

// Recursively constructs a directory tree
pub fn mkdir(path: &Path) -> io::Result<()> {
    let parent = path.parent();
    match parent {
        Some(parent) => {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                mkdir(parent)?
            }
            if !path.is_dir() {
                fs::create_dir(path)
            } else {
                Ok(())
            }
        }
        None => Ok(()),
    }
}

pub fn write_proc<P: AsRef<Path>>(path: P, value: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.write_all(value.as_bytes())?;
    file.write_all(b"\n")
}

pub fn drop_cache() -> io::Result<()> {
    // 'echo 3 >/proc/sys/vm/drop_caches'
    sync_all();
    write_proc("/proc/sys/vm/drop_caches", "3")
}

// Wrapper around unsafe libc::sync
pub fn sync_all() {
    unsafe {
        libc::sync();
    }
}

/// Directory holding the running binary. Relative tool paths resolve here.
pub fn bin_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn resolve<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        bin_dir().join(path)
    }
}

pub fn describe(cmd: &Command) -> String {
    format!("{:?}", cmd).replace('"', "")
}

/// Runs a command with its output discarded and reports whether it succeeded.
pub fn run_quiet(cmd: &mut Command) -> io::Result<bool> {
    debug!("exec: {}", describe(cmd));
    let status = cmd.stdout(Stdio::null()).stderr(Stdio::null()).status()?;
    Ok(status.success())
}

/// Like `run_quiet` but a non-zero exit is an error.
pub fn run_checked(cmd: &mut Command) -> Result<()> {
    debug!("exec: {}", describe(cmd));
    let status = cmd.stdout(Stdio::null()).stderr(Stdio::null()).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(Error::CommandFailed {
            command: describe(cmd),
            status,
        })
    }
}

/// Runs a command line through `sh -c`, used for operator-supplied hooks.
pub fn run_shell(line: &str, envs: &[(&str, String)]) -> io::Result<bool> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    for (key, value) in envs {
        cmd.env(key, value);
    }
    debug!("exec: {}", line);
    Ok(cmd.status()?.success())
}

/// Formats a core list the way fio and taskset expect it, collapsing
/// consecutive ids into ranges: `[0, 1, 2, 5]` becomes `0-2,5`.
pub fn cpu_list(cores: &[usize]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut iter = cores.iter().cloned().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
    }
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_list_collapses_runs() {
        assert_eq!(cpu_list(&[0, 1, 2, 3]), "0-3");
        assert_eq!(cpu_list(&[0, 1, 2, 5, 7, 8]), "0-2,5,7-8");
        assert_eq!(cpu_list(&[4]), "4");
        assert_eq!(cpu_list(&[]), "");
    }

    #[test]
    fn cpu_list_keeps_given_order() {
        assert_eq!(cpu_list(&[3, 4, 0, 1]), "3-4,0-1");
    }

    #[test]
    fn mkdir_builds_nested_tree() {
        let tmp = tempdir::TempDir::new("fxrunner-util").expect("failed to create tempdir");
        let nested = tmp.path().join("a").join("b").join("c");
        mkdir(&nested).expect("failed to construct directory tree");
        assert!(nested.is_dir());
        mkdir(&nested).expect("mkdir on an existing tree should succeed");
    }
}
