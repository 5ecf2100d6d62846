//! Replays every artifact of a campaign and maintains the first-seen tables.
//!
//! A campaign root holds `trial<N>/<fuzzer>/{queue,crashes}`. Each `(trial, fuzzer)` pair is a
//! unit: its artifacts are replayed on the worker pool, workers write their bug records to
//! private files, and after the join a single reducer merges those records into the unit's
//! first-seen table. The collector thread owns the result logs.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::artifact::{self, Artifact, SourceType};
use crate::conventions::Conventions;
use crate::error::{Error, Result};
use crate::first_seen::{BugRecord, FirstSeenTable};
use crate::output::OutputDir;
use crate::pool::WorkerPool;
use crate::records::{self, RecordWriter};
use crate::replay::{ReplayResult, Replayer};

pub const RESULTS_LOG: &str = "results.log";
pub const ANNOTATIONS_LOG: &str = "annotations.log";

const PROGRESS_INTERVAL: usize = 1000;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub campaign_root: PathBuf,
    pub output_root: PathBuf,
    /// Trial ids to process, e.g. `0` or `trial0`. Empty selects every trial.
    pub trials: Vec<String>,
    pub jobs: usize,
    pub dry_run: bool,
}

/// One `(trial, fuzzer)` pair of a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// `None` if the campaign root is itself a single trial.
    pub trial: Option<String>,
    pub fuzzer: String,
    pub input_dir: PathBuf,
}

impl Unit {
    pub fn output_dir(&self, output_root: &Path) -> PathBuf {
        match &self.trial {
            Some(trial) => output_root.join(trial).join(&self.fuzzer),
            None => output_root.join(&self.fuzzer),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.trial {
            Some(trial) => write!(f, "{trial}/{}", self.fuzzer),
            None => write!(f, "{}", self.fuzzer),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitReport {
    pub unit: Unit,
    pub artifacts: usize,
    pub failures: usize,
    pub interesting: usize,
    /// Bug records merged into the table, including leftovers of interrupted runs.
    pub records: usize,
    pub table: FirstSeenTable,
}

impl UnitReport {
    fn new(unit: Unit, artifacts: usize) -> Self {
        Self {
            unit,
            artifacts,
            failures: 0,
            interesting: 0,
            records: 0,
            table: FirstSeenTable::new(),
        }
    }
}

pub struct Dispatcher<'a> {
    config: DispatchConfig,
    replayer: Replayer,
    conventions: &'a Conventions,
    pool: WorkerPool,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        config: DispatchConfig,
        replayer: Replayer,
        conventions: &'a Conventions,
    ) -> Result<Self> {
        let pool = WorkerPool::new(config.jobs)?;

        Ok(Self {
            config,
            replayer,
            conventions,
            pool,
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Processes every selected unit.
    pub fn run(&self) -> Result<Vec<UnitReport>> {
        let units = self.check()?;
        self.run_units(&units)
    }

    /// Checks everything that would make the whole run pointless (missing tools, missing
    /// directories) and returns the units to process. Nothing is written.
    pub fn check(&self) -> Result<Vec<Unit>> {
        if !self.config.campaign_root.is_dir() {
            return Err(Error::DirectoryMissing {
                path: self.config.campaign_root.clone(),
            });
        }
        self.replayer.ensure_available()?;

        let units = self.discover()?;
        if units.is_empty() {
            log::warn!(
                "no fuzzer directories found below {}",
                self.config.campaign_root.display()
            );
        }

        Ok(units)
    }

    pub fn run_units(&self, units: &[Unit]) -> Result<Vec<UnitReport>> {
        units.iter().map(|unit| self.dispatch_unit(unit)).collect()
    }

    /// Lists the units of the selected trials, ordered by trial and fuzzer name.
    pub fn discover(&self) -> Result<Vec<Unit>> {
        let mut units = Vec::new();

        for (trial, trial_dir) in self.trial_dirs()? {
            for fuzzer_dir in sorted_subdirs(&trial_dir)? {
                let has_artifacts = SourceType::ALL
                    .iter()
                    .any(|source_type| fuzzer_dir.join(source_type.dir_name()).is_dir());
                if !has_artifacts {
                    continue;
                }

                units.push(Unit {
                    trial: trial.clone(),
                    fuzzer: dir_name(&fuzzer_dir),
                    input_dir: fuzzer_dir,
                });
            }
        }

        Ok(units)
    }

    fn trial_dirs(&self) -> Result<Vec<(Option<String>, PathBuf)>> {
        let root = &self.config.campaign_root;
        let prefix = self.conventions.trial_prefix;

        if !self.config.trials.is_empty() {
            return self
                .config
                .trials
                .iter()
                .map(|id| {
                    let name = if id.starts_with(prefix) {
                        id.clone()
                    } else {
                        format!("{prefix}{id}")
                    };
                    let path = root.join(&name);

                    if path.is_dir() {
                        Ok((Some(name), path))
                    } else {
                        Err(Error::DirectoryMissing { path })
                    }
                })
                .collect();
        }

        let mut trials: Vec<(u64, String, PathBuf)> = sorted_subdirs(root)?
            .into_iter()
            .filter_map(|path| {
                let name = dir_name(&path);
                let number = name.strip_prefix(prefix)?.parse().ok()?;
                Some((number, name, path))
            })
            .collect();
        trials.sort();

        if trials.is_empty() {
            log::info!(
                "no {prefix}* directories in {}, treating it as a single trial",
                root.display()
            );
            return Ok(vec![(None, root.clone())]);
        }

        Ok(trials
            .into_iter()
            .map(|(_, name, path)| (Some(name), path))
            .collect())
    }

    pub fn dispatch_unit(&self, unit: &Unit) -> Result<UnitReport> {
        let mut artifacts: Vec<Artifact> = Vec::new();
        for source_type in SourceType::ALL {
            artifacts.extend(artifact::collect(
                unit.input_dir.join(source_type.dir_name()),
                source_type,
                self.conventions,
            )?);
        }

        let output_path = unit.output_dir(&self.config.output_root);
        let mut report = UnitReport::new(unit.clone(), artifacts.len());

        if self.config.dry_run {
            log::info!(
                "[dry run] {unit}: would replay {} artifacts into {}",
                artifacts.len(),
                output_path.display()
            );
            return Ok(report);
        }

        let output = OutputDir::open(output_path)?;
        let unavailable = |reason: io::Error| Error::OutputUnavailable {
            path: output.path().to_path_buf(),
            reason,
        };

        let mut table = FirstSeenTable::load(output.path()).map_err(unavailable)?;
        let leftovers = records::load_pending(output.path()).map_err(unavailable)?;
        if !leftovers.is_empty() {
            log::info!(
                "{unit}: merging {} records left behind by an interrupted run",
                leftovers.len()
            );
        }

        log::info!(
            "{unit}: replaying {} artifacts with {} workers",
            artifacts.len(),
            self.pool.jobs()
        );

        let mut results_log = output.create_log(RESULTS_LOG)?;
        let mut annotations_log = output.create_log(ANNOTATIONS_LOG)?;
        let mut write_error: Option<Error> = None;
        let mut processed = 0;
        let total = artifacts.len();
        let output_path = output.path();

        self.pool.run(
            artifacts,
            |index| Worker::new(output_path, index),
            |worker, artifact| {
                let outcome = worker.process(&self.replayer, &artifact);
                (artifact, outcome)
            },
            |(artifact, outcome): (Artifact, Result<ReplayResult>)| {
                processed += 1;

                let written = match &outcome {
                    Ok(result) => {
                        if result.is_interesting() {
                            report.interesting += 1;
                        }
                        if result.triggered_bug.is_some() && artifact.seed_id.is_none() {
                            log::debug!(
                                "{unit}: {} has no seed id, not deduplicated",
                                artifact.display_name()
                            );
                        }

                        results_log
                            .line(format_args!("{}\t{}", artifact.display_name(), result.summary()))
                            .and_then(|_| {
                                result.annotations.iter().try_for_each(|annotation| {
                                    annotations_log.line(format_args!(
                                        "{}\t{annotation}",
                                        artifact.display_name()
                                    ))
                                })
                            })
                    }
                    Err(e) => {
                        report.failures += 1;
                        log::warn!("{unit}: replay of {} failed: {e}", artifact.display_name());
                        results_log.line(format_args!("{}\terror {e}", artifact.display_name()))
                    }
                };

                if let Err(e) = written {
                    write_error.get_or_insert(e);
                }

                if processed % PROGRESS_INTERVAL == 0 {
                    log::info!("{unit}: {processed}/{total} artifacts replayed");
                }
            },
        );

        if let Some(e) = write_error {
            return Err(e);
        }
        results_log.finish()?;
        annotations_log.finish()?;

        let pending = records::load_pending(output.path()).map_err(unavailable)?;
        let changed = table.merge(pending.iter());
        table.persist(output.path()).map_err(unavailable)?;
        records::clear_pending(output.path()).map_err(unavailable)?;

        report.records = pending.len();
        report.table = table;

        log::info!(
            "{unit}: {} artifacts, {} interesting, {} failed, {} records, {} first-seen entries ({} updated)",
            report.artifacts,
            report.interesting,
            report.failures,
            report.records,
            report.table.len(),
            changed
        );

        Ok(report)
    }
}

/// State private to one pool worker.
struct Worker<'a> {
    index: usize,
    output_dir: &'a Path,
    records: Option<RecordWriter>,
}

impl<'a> Worker<'a> {
    fn new(output_dir: &'a Path, index: usize) -> Self {
        Self {
            index,
            output_dir,
            records: None,
        }
    }

    fn process(&mut self, replayer: &Replayer, artifact: &Artifact) -> Result<ReplayResult> {
        let result = replayer.replay(&artifact.path)?;

        if let Some(record) = BugRecord::from_replay(artifact, &result) {
            self.record(&record)?;
        }

        Ok(result)
    }

    fn record(&mut self, record: &BugRecord) -> Result<()> {
        if self.records.is_none() {
            self.records = Some(RecordWriter::create(self.output_dir, self.index)?);
        }

        if let Some(writer) = &mut self.records {
            writer.write(record)?;
        }
        Ok(())
    }
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() && !dir_name(&path).starts_with('.') {
            dirs.push(path);
        }
    }

    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
