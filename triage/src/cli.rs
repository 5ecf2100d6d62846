use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use log4rs::Handle;
use triage_build::{Variant, VariantBuild, VariantDir};

use crate::command::TargetCommand;
use crate::conventions::Conventions;
use crate::coverage::{CoverageConfig, CoverageRunner};
use crate::dispatch::{DispatchConfig, Dispatcher};
use crate::error::{Error, Result};
use crate::experiment::write_experiment_markdown;
use crate::replay::Replayer;
use crate::{diff, summary};

pub const LOG_FILE: &str = "triage.log";

#[derive(Debug, Parser)]
#[command(
    about = "Replays, classifies, deduplicates and diffs the artifacts of fuzzing campaigns",
    version = crate::MAYBE_GIT_REF.unwrap_or(env!("CARGO_PKG_VERSION")),
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Maximum number of replays in flight
    #[arg(short, long, env = "TRIAGE_JOBS", default_value_t = 10)]
    #[arg(value_parser = parse_jobs)]
    jobs: usize,

    /// Wall-clock budget of a single replay, in seconds
    #[arg(short, long, env = "TRIAGE_TIMEOUT", default_value_t = 10)]
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Only enumerate the work, do not replay or write anything
    #[arg(long, env = "TRIAGE_DRY_RUN")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ReplayArgs {
    /// Monitor command line; `@@` is replaced by the input path, otherwise the input is piped
    #[arg(short, long, env = "TRIAGE_MONITOR")]
    monitor: String,

    /// Raw target command line, re-run to collect annotations
    #[arg(long, env = "TRIAGE_TARGET")]
    target: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replay every queue and crash artifact of a campaign and update the first-seen tables
    #[command(arg_required_else_help = true)]
    Triage {
        /// Campaign root holding `trial<N>/<fuzzer>/{queue,crashes}`
        #[arg(value_name = "CAMPAIGN_ROOT")]
        campaign_root: PathBuf,

        /// Output root, mirrors the campaign layout
        #[arg(short, long, env = "TRIAGE_OUTPUT")]
        output: PathBuf,

        /// Trial ids to process (e.g. `0,3` or `trial0 trial3`), all trials if omitted
        #[arg(long, env = "TRIAGE_TRIALS", value_delimiter = ',')]
        trials: Vec<String>,

        #[command(flatten)]
        replay: ReplayArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Replay a single artifact and print the result
    #[command(arg_required_else_help = true)]
    Replay {
        #[arg(value_name = "ARTIFACT")]
        artifact: PathBuf,

        #[command(flatten)]
        replay: ReplayArgs,

        /// Wall-clock budget of the replay, in seconds
        #[arg(short, long, env = "TRIAGE_TIMEOUT", default_value_t = 10)]
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        timeout: u64,
    },

    /// Build the original and the patched variant of a harness
    #[command(arg_required_else_help = true)]
    BuildVariants {
        /// Source tree of the target
        #[arg(short, long)]
        sources: PathBuf,

        /// Instrumentation patch, applied with `patch -p1`
        #[arg(short, long)]
        patch: PathBuf,

        /// Allow-list exported as ALLOW_LIST to the patched build
        #[arg(short, long)]
        allow_list: Option<PathBuf>,

        /// Directory receiving `original/` and `patched/`
        #[arg(short, long)]
        out: PathBuf,

        /// Build command, run in the copied sources with SRC and OUT set
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Collect edge coverage maps of every queue artifact from both variants
    #[command(arg_required_else_help = true)]
    Coverage {
        /// Queue directory of one fuzzer
        #[arg(value_name = "QUEUE_DIR")]
        queue: PathBuf,

        /// Output directory for the maps
        #[arg(short, long, env = "TRIAGE_OUTPUT")]
        output: PathBuf,

        /// Directory produced by `build-variants`
        #[arg(long)]
        variants: PathBuf,

        /// Harness binary name inside each variant's `out/`
        #[arg(long)]
        harness: String,

        /// Map tool command line
        #[arg(long, env = "TRIAGE_SHOWMAP", default_value = "afl-showmap")]
        showmap: String,

        #[command(flatten)]
        run: RunArgs,

        /// Harness arguments, `@@` is replaced by the input path
        #[arg(last = true)]
        harness_args: Vec<String>,
    },

    /// Compare the maps of a coverage run and write `coverage_diff.json`
    #[command(arg_required_else_help = true)]
    Diff {
        #[arg(value_name = "COVERAGE_DIR")]
        dir: PathBuf,
    },

    /// Count triggered and reached bugs over all result logs and write `bug_frequency.json`
    #[command(arg_required_else_help = true)]
    Summarize {
        #[arg(value_name = "OUTPUT_ROOT")]
        output: PathBuf,
    },
}

pub fn main(conventions: &'static Conventions) -> ExitCode {
    let handle = match crate::log::config_default()
        .and_then(|config| log4rs::init_config(config).map_err(Into::into))
    {
        Ok(handle) => handle,
        Err(err) => {
            error!("Failed to init logging: {:?}", err);
            return ExitCode::FAILURE;
        }
    };

    let Cli { command } = Cli::parse();

    info!("Git Version: {}", crate::GIT_REF);

    let result = match command {
        Commands::Triage {
            campaign_root,
            output,
            trials,
            replay,
            run,
        } => triage(
            conventions,
            &handle,
            campaign_root,
            output,
            trials,
            replay,
            run,
        ),
        Commands::Replay {
            artifact,
            replay,
            timeout,
        } => replay_one(conventions, &artifact, replay, timeout),
        Commands::BuildVariants {
            sources,
            patch,
            allow_list,
            out,
            command,
        } => build_variants(sources, patch, allow_list, &out, command),
        Commands::Coverage {
            queue,
            output,
            variants,
            harness,
            showmap,
            run,
            harness_args,
        } => coverage(
            conventions,
            &handle,
            queue,
            output,
            VariantDir::new(variants),
            &harness,
            showmap,
            run,
            harness_args,
        ),
        Commands::Diff { dir } => diff::diff(&dir, conventions).and_then(|result| {
            let path = diff::write(&dir, &result)?;
            info!(
                "{} paired artifacts, {} unpaired, {} edges, {} annotations, written to {}",
                result.artifacts.len(),
                result.unpaired.len(),
                result.total_edges,
                result.total_annotations,
                path.display()
            );
            Ok(())
        }),
        Commands::Summarize { output } => {
            summary::summarize(&output, conventions).and_then(|result| {
                let path = summary::write(&output, &result)?;
                info!("bug frequencies written to {}", path.display());
                Ok(())
            })
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_environment_fatal() => {
            error!("Aborting: {err}");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn parse_jobs(s: &str) -> std::result::Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(0) => Err(String::from("must be at least 1")),
        Ok(jobs) => Ok(jobs),
        Err(e) => Err(e.to_string()),
    }
}

/// Trial ids may be given comma or whitespace separated, e.g. through `TRIAGE_TRIALS="0 1"`.
fn split_trials(trials: Vec<String>) -> Vec<String> {
    trials
        .iter()
        .flat_map(|trial| trial.split_whitespace())
        .map(str::to_owned)
        .collect()
}

fn parse_command(command_line: &str, what: &str) -> Result<TargetCommand> {
    TargetCommand::parse(command_line)
        .ok_or_else(|| Error::InvalidConfig(format!("empty {what} command")))
}

fn replayer(conventions: &Conventions, args: &ReplayArgs, timeout: u64) -> Result<Replayer> {
    let mut replayer = Replayer::new(
        parse_command(&args.monitor, "monitor")?,
        Duration::from_secs(timeout),
        conventions,
    );

    if let Some(target) = &args.target {
        replayer = replayer.with_target(parse_command(target, "target")?);
    }

    Ok(replayer)
}

/// Creates the output root, adds the file appender and writes the run record.
fn start_run_log(
    output: &Path,
    handle: &Handle,
    conventions: &Conventions,
    details: &[(&str, String)],
) -> Result<()> {
    fs::create_dir_all(output).map_err(|reason| Error::OutputUnavailable {
        path: output.to_path_buf(),
        reason,
    })?;

    match crate::log::config_run(output.join(LOG_FILE)) {
        Ok(config) => handle.set_config(config),
        Err(err) => warn!("Logging to {} disabled: {err}", output.display()),
    }

    let command_line: Vec<String> = env::args().collect();
    write_experiment_markdown(output, conventions.name, &command_line, details).map_err(
        |reason| Error::OutputUnavailable {
            path: output.to_path_buf(),
            reason,
        },
    )?;

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn triage(
    conventions: &'static Conventions,
    handle: &Handle,
    campaign_root: PathBuf,
    output: PathBuf,
    trials: Vec<String>,
    replay: ReplayArgs,
    run: RunArgs,
) -> Result<()> {
    let config = DispatchConfig {
        campaign_root,
        output_root: output,
        trials: split_trials(trials),
        jobs: run.jobs,
        dry_run: run.dry_run,
    };
    let dispatcher = Dispatcher::new(config, replayer(conventions, &replay, run.timeout)?, conventions)?;

    let units = dispatcher.check()?;

    if !run.dry_run {
        let config = dispatcher.config();
        let trials = if config.trials.is_empty() {
            String::from("all")
        } else {
            config.trials.join(", ")
        };
        start_run_log(
            &config.output_root,
            handle,
            conventions,
            &[
                ("Campaign", config.campaign_root.display().to_string()),
                ("Jobs", config.jobs.to_string()),
                ("Timeout", format!("{}s", run.timeout)),
                ("Trials", trials),
                ("Monitor", replay.monitor.clone()),
            ],
        )?;
    }

    let reports = dispatcher.run_units(&units)?;

    let artifacts: usize = reports.iter().map(|report| report.artifacts).sum();
    let failures: usize = reports.iter().map(|report| report.failures).sum();
    let bugs: usize = reports.iter().map(|report| report.table.len()).sum();
    info!(
        "Triaged {} units: {artifacts} artifacts, {failures} failed replays, {bugs} first-seen entries",
        reports.len()
    );

    Ok(())
}

fn replay_one(
    conventions: &Conventions,
    artifact: &Path,
    args: ReplayArgs,
    timeout: u64,
) -> Result<()> {
    let replayer = replayer(conventions, &args, timeout)?;
    replayer.ensure_available()?;

    let result = replayer.replay(artifact)?;
    info!("{}: {}", artifact.display(), result.summary());
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}

fn build_variants(
    sources: PathBuf,
    patch: PathBuf,
    allow_list: Option<PathBuf>,
    out: &Path,
    command: Vec<String>,
) -> Result<()> {
    let mut build = VariantBuild::new(sources, patch, command);
    if let Some(allow_list) = allow_list {
        build = build.with_allow_list(allow_list);
    }

    let variants = build.build_all(out)?;
    for variant in Variant::ALL {
        info!("{variant}: {}", variants.out(variant).display());
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn coverage(
    conventions: &'static Conventions,
    handle: &Handle,
    queue: PathBuf,
    output: PathBuf,
    variants: VariantDir,
    harness: &str,
    showmap: String,
    run: RunArgs,
    harness_args: Vec<String>,
) -> Result<()> {
    let target = |variant: Variant| {
        TargetCommand::new(variants.binary(variant, harness)).args(harness_args.iter())
    };

    let runner = CoverageRunner::new(
        CoverageConfig {
            queue_dir: queue.clone(),
            output_dir: output.clone(),
            jobs: run.jobs,
            timeout: Duration::from_secs(run.timeout),
            dry_run: run.dry_run,
        },
        parse_command(&showmap, "showmap")?,
        target(Variant::Original),
        target(Variant::Patched),
        conventions,
    )?;

    if !queue.is_dir() {
        return Err(Error::DirectoryMissing { path: queue });
    }
    runner.ensure_available()?;

    if !run.dry_run {
        start_run_log(
            &output,
            handle,
            conventions,
            &[
                ("Queue", queue.display().to_string()),
                ("Variants", variants.path().display().to_string()),
                ("Harness", harness.to_owned()),
                ("Jobs", run.jobs.to_string()),
                ("Timeout", format!("{}s", run.timeout)),
            ],
        )?;
    }

    let report = runner.run()?;
    info!(
        "Coverage of {} artifacts: {} original and {} patched maps ({} pairs), {} errors",
        report.artifacts,
        report.original_maps,
        report.patched_maps,
        report.pairs,
        report.errors
    );

    Ok(())
}
