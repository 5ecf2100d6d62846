//! Differential edge coverage of the original and the patched variant of a harness.
//!
//! Every queue artifact is run through the map tool once per variant. Each variant works in its
//! own temporary directory and its results are copied out once its map is complete. A variant
//! that fails leaves only its own map missing:
//!
//! ```text
//! <output>/original_analysis/<artifact>
//! <output>/patched_analysis/<artifact>
//! <output>/patched_stdout/<artifact>
//! <output>/errors.jsonl
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use triage_build::Variant;

use crate::artifact::{self, Artifact, SourceType};
use crate::command::{Capture, TargetCommand};
use crate::conventions::Conventions;
use crate::error::{Error, Result};
use crate::output::OutputDir;
use crate::pool::WorkerPool;

pub const ORIGINAL_ANALYSIS: &str = "original_analysis";
pub const PATCHED_ANALYSIS: &str = "patched_analysis";
pub const PATCHED_STDOUT: &str = "patched_stdout";
pub const ERRORS_LOG: &str = "errors.jsonl";

const MAP_FILE: &str = "map";

pub fn analysis_dir(variant: Variant) -> &'static str {
    match variant {
        Variant::Original => ORIGINAL_ANALYSIS,
        Variant::Patched => PATCHED_ANALYSIS,
    }
}

/// A failed step of the per-artifact pipeline, one JSON object per line in `errors.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub artifact: String,
    pub step: String,
    /// `None` if the step did not run to completion, e.g. on timeout.
    pub return_code: Option<i32>,
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct CoverageConfig {
    pub queue_dir: PathBuf,
    pub output_dir: PathBuf,
    pub jobs: usize,
    pub timeout: Duration,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageReport {
    pub artifacts: usize,
    pub original_maps: usize,
    pub patched_maps: usize,
    /// Artifacts for which both maps were stored.
    pub pairs: usize,
    pub errors: usize,
}

impl CoverageReport {
    fn count(&mut self, variant: Variant) {
        match variant {
            Variant::Original => self.original_maps += 1,
            Variant::Patched => self.patched_maps += 1,
        }
    }
}

/// What one artifact contributed to the output.
#[derive(Debug, Default)]
struct Processed {
    stored: Vec<Variant>,
    errors: Vec<ErrorRecord>,
}

pub struct CoverageRunner<'a> {
    config: CoverageConfig,
    showmap: TargetCommand,
    original: TargetCommand,
    patched: TargetCommand,
    conventions: &'a Conventions,
    pool: WorkerPool,
}

/// The files one variant produced for one artifact, still inside its working area.
struct VariantRun {
    work_dir: TempDir,
    stdout: String,
}

impl VariantRun {
    fn map(&self) -> PathBuf {
        self.work_dir.path().join(MAP_FILE)
    }
}

impl<'a> CoverageRunner<'a> {
    pub fn new(
        config: CoverageConfig,
        showmap: TargetCommand,
        original: TargetCommand,
        patched: TargetCommand,
        conventions: &'a Conventions,
    ) -> Result<Self> {
        let pool = WorkerPool::new(config.jobs)?;

        Ok(Self {
            config,
            showmap,
            original,
            patched,
            conventions,
            pool,
        })
    }

    pub fn target(&self, variant: Variant) -> &TargetCommand {
        match variant {
            Variant::Original => &self.original,
            Variant::Patched => &self.patched,
        }
    }

    /// `<showmap> -r -o <map> -- <target...>`
    pub fn showmap_command(&self, variant: Variant, map: &Path) -> TargetCommand {
        self.showmap
            .clone()
            .args(["-r", "-o"])
            .arg(map)
            .arg("--")
            .args(self.target(variant).command_line())
    }

    pub fn ensure_available(&self) -> Result<()> {
        self.showmap.ensure_available()?;
        for variant in Variant::ALL {
            self.target(variant).ensure_available()?;
        }
        Ok(())
    }

    pub fn run(&self) -> Result<CoverageReport> {
        if !self.config.queue_dir.is_dir() {
            return Err(Error::DirectoryMissing {
                path: self.config.queue_dir.clone(),
            });
        }
        self.ensure_available()?;

        let artifacts = artifact::collect(&self.config.queue_dir, SourceType::Queue, self.conventions)?;
        let mut report = CoverageReport {
            artifacts: artifacts.len(),
            ..CoverageReport::default()
        };

        if self.config.dry_run {
            log::info!(
                "[dry run] would collect coverage of {} artifacts into {}",
                artifacts.len(),
                self.config.output_dir.display()
            );
            return Ok(report);
        }

        let output = OutputDir::open(&self.config.output_dir)?;
        for dir in [ORIGINAL_ANALYSIS, PATCHED_ANALYSIS, PATCHED_STDOUT] {
            output.fresh_subdir(dir)?;
        }
        let mut errors_log = output.create_log(ERRORS_LOG)?;
        let mut write_error: Option<Error> = None;
        let output_path = output.path();

        log::info!(
            "collecting coverage of {} artifacts with {} workers",
            artifacts.len(),
            self.pool.jobs()
        );

        self.pool.run(
            artifacts,
            |_| (),
            |_, artifact| self.process(&artifact, output_path),
            |Processed { stored, errors }| {
                for variant in stored.iter() {
                    report.count(*variant);
                }
                if stored.len() == Variant::ALL.len() {
                    report.pairs += 1;
                }
                report.errors += errors.len();

                for error in errors {
                    log::warn!(
                        "{} failed for {} (return code {:?})",
                        error.step,
                        error.artifact,
                        error.return_code
                    );
                    let written = serde_json::to_string(&error)
                        .map_err(Error::from)
                        .and_then(|line| errors_log.line(line));
                    if let Err(e) = written {
                        write_error.get_or_insert(e);
                    }
                }
            },
        );

        if let Some(e) = write_error {
            return Err(e);
        }
        errors_log.finish()?;

        log::info!(
            "stored {} original and {} patched maps of {} artifacts ({} pairs), {} errors",
            report.original_maps,
            report.patched_maps,
            report.artifacts,
            report.pairs,
            report.errors
        );
        Ok(report)
    }

    /// Runs both variants on `artifact` and stores the map of every variant that succeeded.
    fn process(&self, artifact: &Artifact, output_dir: &Path) -> Processed {
        let mut processed = Processed::default();
        let name = artifact.name();

        for variant in Variant::ALL {
            let run = match self.run_variant(artifact, variant) {
                Ok(run) => run,
                Err(error) => {
                    processed.errors.push(error);
                    continue;
                }
            };

            match store(&run, variant, output_dir, &name) {
                Ok(()) => processed.stored.push(variant),
                Err(e) => processed.errors.push(ErrorRecord {
                    artifact: name.clone(),
                    step: format!("store-{variant}"),
                    return_code: None,
                    output: e.to_string(),
                }),
            }
            // the working area is removed here, before the next variant runs
        }

        processed
    }

    fn run_variant(
        &self,
        artifact: &Artifact,
        variant: Variant,
    ) -> std::result::Result<VariantRun, ErrorRecord> {
        let step = format!("showmap-{variant}");
        let failure = |return_code: Option<i32>, output: String| ErrorRecord {
            artifact: artifact.name(),
            step: step.clone(),
            return_code,
            output,
        };

        let work_dir = tempfile::Builder::new()
            .prefix(&format!("triage-{variant}-"))
            .tempdir()
            .map_err(|e| failure(None, e.to_string()))?;
        let input = work_dir.path().join(artifact.name());
        fs::copy(&artifact.path, &input).map_err(|e| failure(None, e.to_string()))?;

        let map = work_dir.path().join(MAP_FILE);
        let execution = self
            .showmap_command(variant, &map)
            .run(&input, self.config.timeout, Capture::Stdout)
            .map_err(|e| failure(None, e.to_string()))?;

        if execution.status.is_timeout() {
            return Err(failure(None, execution.output));
        }
        if !map.is_file() {
            return Err(failure(execution.status.exit_code(), execution.output));
        }
        if let Some(code) = execution.status.exit_code().filter(|code| *code != 0) {
            log::debug!("{step} exited with {code} for {}", artifact.name());
        }

        Ok(VariantRun {
            work_dir,
            stdout: execution.output,
        })
    }
}

/// Copies the map, and for the patched variant its stdout, out of the working area.
fn store(run: &VariantRun, variant: Variant, output_dir: &Path, name: &str) -> io::Result<()> {
    fs::copy(run.map(), output_dir.join(analysis_dir(variant)).join(name))?;
    if variant.is_patched() {
        fs::write(output_dir.join(PATCHED_STDOUT).join(name), &run.stdout)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    static CONVENTIONS: Conventions = Conventions::afl("test");

    fn runner(root: &Path) -> CoverageRunner<'static> {
        CoverageRunner::new(
            CoverageConfig {
                queue_dir: root.join("queue"),
                output_dir: root.join("out"),
                jobs: 1,
                timeout: Duration::from_secs(1),
                dry_run: false,
            },
            TargetCommand::new("afl-showmap"),
            TargetCommand::new("/build/original/out/harness").arg("@@"),
            TargetCommand::new("/build/patched/out/harness").arg("@@"),
            &CONVENTIONS,
        )
        .unwrap()
    }

    #[test_log::test]
    fn test_showmap_command() {
        let root = tempfile::tempdir().unwrap();
        let command = runner(root.path()).showmap_command(Variant::Patched, Path::new("/tmp/map"));

        assert_eq!(
            command.command_line(),
            ["afl-showmap", "-r", "-o", "/tmp/map", "--", "/build/patched/out/harness", "@@"]
                .iter()
                .map(std::ffi::OsString::from)
                .collect::<Vec<_>>()
        );
        assert!(command.takes_file_argument());
    }

    #[test_log::test]
    fn test_missing_queue_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let err = runner(root.path()).run().unwrap_err();
        assert!(err.is_environment_fatal());
    }

    #[test_log::test]
    fn test_error_record_json() {
        let record = ErrorRecord {
            artifact: "id:000004,op:havoc".into(),
            step: "showmap-patched".into(),
            return_code: None,
            output: String::new(),
        };

        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"artifact":"id:000004,op:havoc","step":"showmap-patched","return_code":null,"output":""}"#
        );
    }
}
