//! External command execution and discovery.
//!
//! Commands report success through their exit status only; their output is
//! discarded. That is a known limitation carried over on purpose, so callers
//! never depend on parsing command output.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Runs external commands on behalf of providers
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, returning whether it exited successfully
    fn run(&self, program: &Path, args: &[&str]) -> Result<bool>;
}

/// Runs commands on the local host with `std::process::Command`
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill commands that run longer than `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[&str]) -> Result<bool> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::io(program, e))?;

        let Some(timeout) = self.timeout else {
            let status = child.wait().map_err(|e| Error::io(program, e))?;
            return Ok(status.success());
        };

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait().map_err(|e| Error::io(program, e))? {
                return Ok(status.success());
            }
            if started.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::CommandTimeout {
                    command: command_line(program, args),
                    seconds: timeout.as_secs(),
                });
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

/// Render a command for log messages
pub fn command_line(program: &Path, args: &[&str]) -> String {
    if args.is_empty() {
        program.display().to_string()
    } else {
        format!("{} {}", program.display(), args.join(" "))
    }
}

/// Check whether `path` is a regular file with an executable bit set
pub fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = path.metadata() else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// Find `name` in the given search directories.
///
/// Absolute names are tested as-is. With no search directories the
/// process `PATH` is used.
pub fn locate_command(name: &str, paths: &[PathBuf]) -> Result<PathBuf> {
    let candidate = Path::new(name);
    if candidate.is_absolute() {
        return if is_executable(candidate) {
            Ok(candidate.to_path_buf())
        } else {
            Err(Error::CommandNotFound {
                name: name.to_string(),
                paths: Vec::new(),
            })
        };
    }

    if paths.is_empty() {
        return which::which(name).map_err(|_| Error::CommandNotFound {
            name: name.to_string(),
            paths: std::env::var_os("PATH")
                .map(|p| std::env::split_paths(&p).collect())
                .unwrap_or_default(),
        });
    }

    for dir in paths {
        let full = dir.join(name);
        if is_executable(&full) {
            return Ok(full);
        }
        log::debug!("Could not find {} in {}", name, dir.display());
    }

    Err(Error::CommandNotFound {
        name: name.to_string(),
        paths: paths.to_vec(),
    })
}
