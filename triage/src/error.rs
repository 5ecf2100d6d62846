use std::path::PathBuf;
use std::time::Duration;
use std::{fmt, fmt::Formatter, io};

use derive_more::From;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    // -- Environment
    /// A required external tool could not be found or is not executable.
    #[from(ignore)]
    ToolMissing { tool: String },
    /// A required top-level directory does not exist.
    #[from(ignore)]
    DirectoryMissing { path: PathBuf },
    /// The configuration is unusable, e.g. a concurrency limit of zero.
    #[from(ignore)]
    InvalidConfig(String),
    /// An output location could not be created, locked or written.
    #[from(ignore)]
    OutputUnavailable { path: PathBuf, reason: io::Error },

    // -- Artifact
    /// The private copy of an artifact could not be created or removed.
    #[from(ignore)]
    TempCopy { artifact: PathBuf, reason: io::Error },
    /// An external process could not be started or waited for.
    #[from(ignore)]
    Spawn { program: String, reason: io::Error },
    /// An external process exceeded its wall-clock budget and was killed.
    #[from(ignore)]
    Timeout { program: String, after: Duration },

    // -- Other
    #[from]
    IO(io::Error),
    #[from]
    Json(serde_json::Error),
    #[from]
    Build(triage_build::Error),
}

impl Error {
    /// Environment-fatal errors abort a run before any work is scheduled. Every other error is
    /// attributed to a single artifact and the batch continues.
    pub fn is_environment_fatal(&self) -> bool {
        matches!(
            self,
            Error::ToolMissing { .. }
                | Error::DirectoryMissing { .. }
                | Error::InvalidConfig(_)
                | Error::OutputUnavailable { .. }
                | Error::Build(_)
        )
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::ToolMissing { tool } => write!(f, "required tool not found: {tool}"),
            Error::DirectoryMissing { path } => {
                write!(f, "required directory not found: {}", path.display())
            }
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Error::OutputUnavailable { path, reason } => {
                write!(f, "output unavailable at {}: {reason}", path.display())
            }
            Error::TempCopy { artifact, reason } => write!(
                f,
                "failed to manage private copy of {}: {reason}",
                artifact.display()
            ),
            Error::Spawn { program, reason } => write!(f, "failed to run {program}: {reason}"),
            Error::Timeout { program, after } => {
                write!(f, "{program} timed out after {}s", after.as_secs_f32())
            }
            Error::IO(err) => write!(f, "io error: {err}"),
            Error::Json(err) => write!(f, "serialization error: {err}"),
            Error::Build(err) => write!(f, "variant build failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_classification() {
        assert!(Error::ToolMissing {
            tool: "afl-showmap".into()
        }
        .is_environment_fatal());
        assert!(!Error::Timeout {
            program: "monitor".into(),
            after: Duration::from_secs(1),
        }
        .is_environment_fatal());
        assert!(!Error::from(io::Error::new(io::ErrorKind::Other, "disk")).is_environment_fatal());
    }
}
