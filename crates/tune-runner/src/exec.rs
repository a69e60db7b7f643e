use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ExecError;

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    /// `None` when the child was terminated by a signal.
    pub code: Option<i32>,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvMode {
    Inherit,
    Clean,
}

/// Synchronous `sh -c` runner. One child at a time, always waited on.
#[derive(Debug, Clone)]
pub struct Shell {
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
    env_mode: EnvMode,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    pub fn new() -> Self {
        Self {
            cwd: None,
            timeout: None,
            env_mode: EnvMode::Inherit,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Same shell with a cleared environment: only PATH, HOME and LC_ALL=C survive.
    pub fn clean(&self) -> Self {
        Self {
            env_mode: EnvMode::Clean,
            ..self.clone()
        }
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
        let start = Instant::now();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        if self.env_mode == EnvMode::Clean {
            let path = std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());
            cmd.env_clear().env("PATH", path);
            if let Ok(home) = std::env::var("HOME") {
                cmd.env("HOME", home);
            }
        }
        cmd.env("LC_ALL", "C");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            command: command.to_string(),
            source,
        })?;
        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        let status = match self.timeout {
            None => child.wait().map_err(|source| ExecError::Wait {
                command: command.to_string(),
                source,
            })?,
            Some(limit) => wait_with_deadline(&mut child, command, limit)?,
        };

        let output = CommandOutput {
            command: command.to_string(),
            stdout: stdout_reader.join().unwrap_or_default(),
            stderr: stderr_reader.join().unwrap_or_default(),
            code: status.code(),
            duration: start.elapsed(),
        };
        if !output.success() {
            debug!(
                command = %output.command,
                code = ?output.code,
                stdout = %output.stdout,
                stderr = %output.stderr,
                "command failed"
            );
        }
        Ok(output)
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn wait_with_deadline(
    child: &mut Child,
    command: &str,
    limit: Duration,
) -> Result<std::process::ExitStatus, ExecError> {
    let deadline = Instant::now() + limit;
    loop {
        let polled = child.try_wait().map_err(|source| ExecError::Wait {
            command: command.to_string(),
            source,
        })?;
        if let Some(status) = polled {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExecError::Timeout {
                command: command.to_string(),
                after: limit,
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}
