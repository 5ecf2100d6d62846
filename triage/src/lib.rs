pub mod artifact;
pub mod cli;
pub mod command;
pub mod conventions;
pub mod coverage;
pub mod diff;
pub mod dispatch;
pub mod error;
pub mod experiment;
pub mod first_seen;
pub mod log;
pub mod monitor;
pub mod output;
pub mod pool;
pub mod records;
pub mod replay;
pub mod summary;

pub use triage_build;

pub const GIT_REF: &str = match option_env!("GIT_REF") {
    Some(env) => env,
    None => "undefined",
};

pub const MAYBE_GIT_REF: Option<&str> = option_env!("GIT_REF");
