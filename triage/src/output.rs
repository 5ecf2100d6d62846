use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use crate::error::{Error, Result};

const LOCK_FILE: &str = ".lock";

/// A per-fuzzer output directory, held under an exclusive lock for as long as the value lives.
#[derive(Debug)]
pub struct OutputDir {
    path: PathBuf,

    #[allow(dead_code)]
    lock: Flock<File>,
}

impl fmt::Display for OutputDir {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl OutputDir {
    /// Creates `path` if needed and locks it. Blocks while another run holds the lock.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let unavailable = |reason: io::Error| Error::OutputUnavailable {
            path: path.clone(),
            reason,
        };

        fs::create_dir_all(&path).map_err(unavailable)?;
        let file = File::create(path.join(LOCK_FILE)).map_err(unavailable)?;

        let lock = Flock::lock(file, FlockArg::LockExclusiveNonblock)
            .or_else(|(file, _)| {
                log::info!("waiting for lock on output directory {}", path.display());
                Flock::lock(file, FlockArg::LockExclusive)
            })
            .map_err(|(_, errno)| unavailable(io::Error::from(errno)))?;

        Ok(Self { path, lock })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    /// Creates (or truncates) a log file inside the directory.
    pub fn create_log(&self, name: &str) -> Result<LogFile> {
        LogFile::create(self.join(name))
    }

    /// Creates (or truncates) a subdirectory.
    pub fn fresh_subdir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.join(name);
        let unavailable = |reason: io::Error| Error::OutputUnavailable {
            path: dir.clone(),
            reason,
        };

        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(unavailable)?;
        }
        fs::create_dir_all(&dir).map_err(unavailable)?;
        Ok(dir)
    }
}

/// A line oriented log file owned by the collector.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LogFile {
    pub fn create(path: PathBuf) -> Result<Self> {
        let file = File::create(&path).map_err(|reason| Error::OutputUnavailable {
            path: path.clone(),
            reason,
        })?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn line(&mut self, line: impl fmt::Display) -> Result<()> {
        writeln!(self.writer, "{line}").map_err(|reason| Error::OutputUnavailable {
            path: self.path.clone(),
            reason,
        })
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush().map_err(|reason| Error::OutputUnavailable {
            path: self.path.clone(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_open_creates_and_locks() {
        let root = tempfile::tempdir().unwrap();
        let dir = OutputDir::open(root.path().join("trial0").join("aflplusplus")).unwrap();

        assert!(dir.path().is_dir());
        assert!(dir.join(LOCK_FILE).is_file());

        // a second lock on the same directory cannot be taken while the first one is held
        let file = File::open(dir.join(LOCK_FILE)).unwrap();
        assert!(Flock::lock(file, FlockArg::LockExclusiveNonblock).is_err());

        drop(dir);
        let file = File::open(root.path().join("trial0/aflplusplus").join(LOCK_FILE)).unwrap();
        assert!(Flock::lock(file, FlockArg::LockExclusiveNonblock).is_ok());
    }

    #[test_log::test]
    fn test_log_file_lines() {
        let root = tempfile::tempdir().unwrap();
        let dir = OutputDir::open(root.path()).unwrap();

        let mut log = dir.create_log("results.log").unwrap();
        log.line("queue/id:000000\texit_code 0 bug - reached").unwrap();
        log.line(format_args!("{}\t{}", "crashes/id:000001", "error boom"))
            .unwrap();
        log.finish().unwrap();

        assert_eq!(
            fs::read_to_string(dir.join("results.log")).unwrap(),
            "queue/id:000000\texit_code 0 bug - reached\ncrashes/id:000001\terror boom\n"
        );
    }

    #[test_log::test]
    fn test_fresh_subdir() {
        let root = tempfile::tempdir().unwrap();
        let dir = OutputDir::open(root.path()).unwrap();

        let sub = dir.fresh_subdir("original_analysis").unwrap();
        fs::write(sub.join("stale"), "").unwrap();
        let sub = dir.fresh_subdir("original_analysis").unwrap();

        assert!(sub.is_dir());
        assert!(!sub.join("stale").exists());
    }
}
