use std::fmt::Display;
use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;

use chrono::Local;
use itertools::Itertools;

/// Runs `git <args>` in the workspace and returns its trimmed stdout, if any.
fn git(args: &[&str]) -> Option<String> {
    let workspace = Path::new(env!("CARGO_MANIFEST_DIR")).parent()?;
    let output = Command::new("git")
        .arg("-C")
        .arg(workspace)
        .args(args)
        .output()
        .ok()?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    (output.status.success() && !stdout.is_empty()).then_some(stdout)
}

/// The commit the binary was built from: `GIT_REF` at compile time, else the checkout.
fn commit() -> Option<String> {
    crate::MAYBE_GIT_REF
        .map(str::to_owned)
        .or_else(|| git(&["rev-parse", "HEAD"]))
}

/// Crate version with a short commit suffix, e.g. `0.1.0+git.3f2a9c1d07be`.
pub fn version() -> String {
    match commit() {
        Some(commit) => format!("{}+git.{commit:.12}", env!("CARGO_PKG_VERSION")),
        None => String::from(env!("CARGO_PKG_VERSION")),
    }
}

/// Writes `README.md` into `directory`, describing how and when a run was started.
///
/// `details` are rendered as additional bullet points, e.g. `("Jobs", "10")`.
pub fn write_experiment_markdown(
    directory: &Path,
    title: impl Display,
    command_line: &[String],
    details: &[(&str, String)],
) -> Result<String, io::Error> {
    let full_description = format!(
        "# Triage: {title}\n\
                * Date: {date}\n\
                * Version: {version}\n\
                * Git Ref: {git_ref}\n\
                * Git Commit: {git_msg}\n\
                * Launched with: `{command}`\n\
                {details}\
                * Log: [triage.log](./triage.log)\n",
        title = &title,
        date = Local::now().to_rfc3339(),
        version = version(),
        git_ref = commit().as_deref().unwrap_or("unknown"),
        git_msg = git(&["log", "-1", "--pretty=%s"]).as_deref().unwrap_or("unknown"),
        command = command_line.iter().join(" "),
        details = details
            .iter()
            .map(|(key, value)| format!("* {key}: {value}\n"))
            .join(""),
    );

    fs::create_dir_all(directory)?;
    fs::write(directory.join("README.md"), &full_description)?;

    Ok(full_description)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_readme_contents() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("run");

        let written = write_experiment_markdown(
            &out,
            "magma",
            &["magma-triage".into(), "triage".into(), "campaign".into()],
            &[("Jobs", "4".into()), ("Trials", "trial0, trial1".into())],
        )
        .unwrap();

        assert_eq!(fs::read_to_string(out.join("README.md")).unwrap(), written);
        assert!(written.starts_with("# Triage: magma\n"));
        assert!(written.contains("* Launched with: `magma-triage triage campaign`\n"));
        assert!(written.contains("* Jobs: 4\n* Trials: trial0, trial1\n"));
        assert!(written.contains(&format!("* Version: {}\n", version())));
    }

    #[test_log::test]
    fn test_version_starts_with_crate_version() {
        let version = version();
        assert!(version.starts_with(env!("CARGO_PKG_VERSION")));
        if let Some((_, commit)) = version.split_once("+git.") {
            assert!(!commit.is_empty() && commit.len() <= 12);
        }
    }
}
