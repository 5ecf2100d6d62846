use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// One external command of a build pipeline.
#[derive(Clone, Debug)]
pub struct Step {
    pub name: String,
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: PathBuf,
    pub envs: Vec<(String, OsString)>,
}

impl Step {
    pub fn new(name: impl Into<String>, program: impl AsRef<OsStr>, cwd: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            program: program.as_ref().to_os_string(),
            args: vec![],
            cwd: cwd.as_ref().to_path_buf(),
            envs: vec![],
        }
    }

    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    pub fn env(&mut self, key: impl Into<String>, value: impl AsRef<OsStr>) -> &mut Self {
        self.envs.push((key.into(), value.as_ref().to_os_string()));
        self
    }

    pub fn run(&self) -> io::Result<()> {
        log::info!("running step '{}' in {}", self.name, self.cwd.display());

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&self.cwd);
        for (key, value) in self.envs.iter() {
            cmd.env(key, value);
        }

        let status = cmd.status()?;

        status.success().then_some(()).ok_or(io::Error::new(
            io::ErrorKind::Other,
            format!("failed step '{}' ({status}): {:?}", self.name, self),
        ))
    }
}
