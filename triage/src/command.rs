use std::env;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use wait_timeout::ChildExt;

use crate::error::{Error, Result};

/// Argument that is replaced by the path of the input file. Without it the input is piped to
/// the process on stdin.
pub const INPUT_PLACEHOLDER: &str = "@@";

/// Which output streams of a process end up in [`Execution::output`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Capture {
    Stdout,
    Combined,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ExecutionStatus {
    Exited(i32),
    Signaled(Signal),
    Timeout,
}

impl ExecutionStatus {
    fn from_exit_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExecutionStatus::Exited(code);
        }

        match status.signal().map(Signal::try_from) {
            Some(Ok(signal)) => ExecutionStatus::Signaled(signal),
            // unknown realtime signals are reported like a shell would
            Some(Err(_)) => ExecutionStatus::Exited(128 + status.signal().unwrap_or_default()),
            None => ExecutionStatus::Exited(-1),
        }
    }

    /// Exit code in shell convention: `128 + signal` for a process killed by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionStatus::Exited(code) => Some(*code),
            ExecutionStatus::Signaled(signal) => Some(128 + *signal as i32),
            ExecutionStatus::Timeout => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionStatus::Timeout)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Exited(code) => write!(f, "exit code {code}"),
            ExecutionStatus::Signaled(signal) => write!(f, "signal {signal}"),
            ExecutionStatus::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Execution {
    pub status: ExecutionStatus,
    pub output: String,
}

/// An external program that is run once per input file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(String, OsString)>,
}

impl TargetCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            envs: vec![],
        }
    }

    /// Splits a command line on whitespace, e.g. `./monitor --dump human @@`.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).args(parts))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        self.program.as_path()
    }

    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// The full command line, program first.
    pub fn command_line(&self) -> Vec<OsString> {
        std::iter::once(self.program.clone().into_os_string())
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn takes_file_argument(&self) -> bool {
        self.args.iter().any(|arg| arg == INPUT_PLACEHOLDER)
    }

    pub fn ensure_available(&self) -> Result<()> {
        which(&self.program).map(|_| ()).ok_or(Error::ToolMissing {
            tool: self.program_name(),
        })
    }

    /// Runs the program on `input` and waits at most `timeout` for it to finish. A process that
    /// exceeds the budget is killed and reported as [`ExecutionStatus::Timeout`] together with
    /// whatever it printed until then.
    pub fn run(&self, input: &Path, timeout: Duration, capture: Capture) -> Result<Execution> {
        let spawn_error = |reason: io::Error| Error::Spawn {
            program: self.program_name(),
            reason,
        };

        // a file instead of a pipe: a chatty child cannot block on a full pipe while we wait
        let mut output = tempfile::tempfile().map_err(spawn_error)?;

        let mut cmd = Command::new(&self.program);
        for arg in self.args.iter() {
            if arg == INPUT_PLACEHOLDER {
                cmd.arg(input);
            } else {
                cmd.arg(arg);
            }
        }
        for (key, value) in self.envs.iter() {
            cmd.env(key, value);
        }

        if self.takes_file_argument() {
            cmd.stdin(Stdio::null());
        } else {
            cmd.stdin(File::open(input).map_err(spawn_error)?);
        }

        cmd.stdout(output.try_clone().map_err(spawn_error)?);
        match capture {
            Capture::Stdout => cmd.stderr(Stdio::null()),
            Capture::Combined => cmd.stderr(output.try_clone().map_err(spawn_error)?),
        };

        // own process group, so a timeout also reaches the processes it forked
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(spawn_error)?;

        let status = match child.wait_timeout(timeout).map_err(spawn_error)? {
            Some(status) => ExecutionStatus::from_exit_status(status),
            None => {
                let group = Pid::from_raw(child.id() as i32);
                if let Err(errno) = signal::killpg(group, Signal::SIGKILL) {
                    log::debug!("killing process group {group} failed: {errno}");
                    // if this fails the process most likely finished in the meantime
                    child.kill().ok();
                }
                child.wait().ok();
                ExecutionStatus::Timeout
            }
        };

        let mut bytes = Vec::new();
        output
            .seek(SeekFrom::Start(0))
            .and_then(|_| output.read_to_end(&mut bytes))
            .map_err(spawn_error)?;

        Ok(Execution {
            status,
            output: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

/// Resolves `program` like a shell would: paths are checked directly, bare names are looked up
/// in `PATH`.
pub fn which(program: impl AsRef<Path>) -> Option<PathBuf> {
    let program = program.as_ref();

    if program.components().count() > 1 {
        return is_executable(program).then(|| program.to_path_buf());
    }

    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
    })
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
