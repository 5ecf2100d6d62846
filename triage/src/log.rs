use std::env;
use std::error::Error;
use std::path::Path;
use std::str::FromStr;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::{self, Config};

pub type ConfigResult = Result<Config, Box<dyn Error + Send + Sync>>;

/// Logs to stderr only.
pub fn config_default() -> ConfigResult {
    Ok(Config::builder()
        .appender(appender_stderr("stderr"))
        .build(Root::builder().appender("stderr").build(log_level()))?)
}

/// Logs to stderr and to `path`, used once the output root of a run is known.
pub fn config_run<P>(path: P) -> ConfigResult
where
    P: AsRef<Path>,
{
    Ok(Config::builder()
        .appender(appender_stderr("stderr"))
        .appender(appender_tofile("tofile", path)?)
        .build(
            Root::builder()
                .appender("stderr")
                .appender("tofile")
                .build(log_level()),
        )?)
}

fn appender_stderr<S>(name: S) -> Appender
where
    S: AsRef<str>,
{
    Appender::builder().build(
        name.as_ref(),
        Box::new(
            ConsoleAppender::builder()
                .target(Target::Stderr)
                .encoder(Box::new(PatternEncoder::new(
                    "{h({d(%Y-%m-%dT%H:%M:%S%Z)}\t{m}{n})}",
                )))
                .build(),
        ),
    )
}

fn appender_tofile<S, P>(name: S, log_path: P) -> std::io::Result<Appender>
where
    S: AsRef<str>,
    P: AsRef<Path>,
{
    Ok(Appender::builder().build(
        name.as_ref(),
        Box::new(
            FileAppender::builder()
                .encoder(Box::new(PatternEncoder::new("{d}\t{l}\t{m}{n}")))
                .build(log_path)?,
        ),
    ))
}

/// `RUST_LOG` as a single level, `Info` if unset or not a level name.
pub fn log_level() -> LevelFilter {
    env::var("RUST_LOG")
        .ok()
        .and_then(|level| LevelFilter::from_str(&level).ok())
        .unwrap_or(LevelFilter::Info)
}
