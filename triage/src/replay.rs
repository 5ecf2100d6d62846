use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use itertools::Itertools;
use serde::Serialize;

use crate::command::{Capture, TargetCommand};
use crate::conventions::Conventions;
use crate::error::{Error, Result};
use crate::monitor::MonitorReport;

/// Outcome of replaying one artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayResult {
    pub exit_code: i32,
    pub triggered_bug: Option<String>,
    pub reached_bugs: BTreeSet<String>,
    pub annotations: Vec<String>,
}

impl ReplayResult {
    /// An artifact is interesting if the monitored run failed or a bug was triggered. Neither
    /// signal implies the other.
    pub fn is_interesting(&self) -> bool {
        self.exit_code != 0 || self.triggered_bug.is_some()
    }

    /// Single line summary, e.g. `exit_code 0 bug PDF010 reached PDF010 PDF011`.
    pub fn summary(&self) -> String {
        format!(
            "exit_code {} bug {} reached {}",
            self.exit_code,
            self.triggered_bug.as_deref().unwrap_or("-"),
            self.reached_bugs.iter().join(" ")
        )
        .trim_end()
        .to_string()
    }
}

/// Replays artifacts against the monitor and, optionally, the raw target.
#[derive(Debug, Clone)]
pub struct Replayer {
    monitor: TargetCommand,
    target: Option<TargetCommand>,
    timeout: Duration,
    annotation_marker: &'static str,
}

impl Replayer {
    /// Annotations are recognized by the campaign's `annotation_marker`.
    pub fn new(monitor: TargetCommand, timeout: Duration, conventions: &Conventions) -> Self {
        Self {
            monitor,
            target: None,
            timeout,
            annotation_marker: conventions.annotation_marker,
        }
    }

    pub fn with_target(mut self, target: TargetCommand) -> Self {
        self.target = Some(target);
        self
    }

    /// Checks that every external program is available.
    pub fn ensure_available(&self) -> Result<()> {
        self.monitor.ensure_available()?;
        if let Some(target) = &self.target {
            target.ensure_available()?;
        }
        Ok(())
    }

    /// Replays `artifact` on a private copy.
    ///
    /// The copy lives in its own temporary directory, which is removed on every path out of this
    /// function. A failure to remove it on the success path is reported as an error.
    pub fn replay(&self, artifact: &Path) -> Result<ReplayResult> {
        let temp_error = |reason: io::Error| Error::TempCopy {
            artifact: artifact.to_path_buf(),
            reason,
        };

        let work_dir = tempfile::Builder::new()
            .prefix("triage-replay-")
            .tempdir()
            .map_err(temp_error)?;
        let copy: PathBuf = work_dir
            .path()
            .join(artifact.file_name().unwrap_or(artifact.as_os_str()));
        fs::copy(artifact, &copy).map_err(temp_error)?;

        let result = self.replay_copy(&copy)?;

        work_dir.close().map_err(temp_error)?;
        Ok(result)
    }

    fn replay_copy(&self, copy: &Path) -> Result<ReplayResult> {
        let monitored = self.monitor.run(copy, self.timeout, Capture::Stdout)?;

        let Some(exit_code) = monitored.status.exit_code() else {
            return Err(Error::Timeout {
                program: self.monitor.program_name(),
                after: self.timeout,
            });
        };

        let MonitorReport {
            triggered_bug,
            reached_bugs,
        } = MonitorReport::parse(&monitored.output);

        let annotations = match &self.target {
            Some(target) => {
                // the raw run only contributes annotations, so a hanging target is not fatal
                let raw = target.run(copy, self.timeout, Capture::Combined)?;
                if raw.status.is_timeout() {
                    log::debug!("raw replay of {} timed out", copy.display());
                }
                extract_annotations(&raw.output, self.annotation_marker)
            }
            None => vec![],
        };

        Ok(ReplayResult {
            exit_code,
            triggered_bug,
            reached_bugs,
            annotations,
        })
    }
}

/// Returns the trimmed lines of `output` that contain `marker`.
pub fn extract_annotations(output: &str, marker: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.contains(marker))
        .map(|line| line.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_extract_annotations() {
        let output = "start\n  PATCHID: 12 visited\nother\nPATCHID: 3\n";
        assert_eq!(
            extract_annotations(output, "PATCHID"),
            vec!["PATCHID: 12 visited", "PATCHID: 3"]
        );
        assert!(extract_annotations(output, "IJON").is_empty());
    }

    #[test_log::test]
    fn test_annotations_use_campaign_marker() {
        static IJON: Conventions = Conventions {
            annotation_marker: "IJON",
            ..Conventions::afl("ijon")
        };

        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("id:000000,orig:seed");
        fs::write(&artifact, "IJON: 1\nPATCHID: 2\n").unwrap();

        let result = Replayer::new(TargetCommand::new("true"), Duration::from_secs(5), &IJON)
            .with_target(TargetCommand::new("cat"))
            .replay(&artifact)
            .unwrap();

        assert_eq!(result.annotations, vec!["IJON: 1"]);
        assert!(artifact.exists());
    }

    #[test_log::test]
    fn test_summary_and_interest() {
        let mut result = ReplayResult::default();
        assert_eq!(result.summary(), "exit_code 0 bug - reached");
        assert!(!result.is_interesting());

        result.exit_code = 139;
        assert!(result.is_interesting());

        result.exit_code = 0;
        result.triggered_bug = Some("PNG003".into());
        result.reached_bugs = ["PNG003", "PNG001"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            result.summary(),
            "exit_code 0 bug PNG003 reached PNG001 PNG003"
        );
        assert!(result.is_interesting());
    }
}
