//! Counts how often each bug was triggered or reached, from the result logs of a triage run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::conventions::Conventions;
use crate::dispatch::RESULTS_LOG;
use crate::error::{Error, Result};

pub const SUMMARY_FILE: &str = "bug_frequency.json";

/// One line of a result log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry<'a> {
    Replayed {
        artifact: &'a str,
        exit_code: i32,
        triggered: Option<&'a str>,
        reached: Vec<&'a str>,
    },
    Failed {
        artifact: &'a str,
        message: &'a str,
    },
}

/// Parses `<artifact>\texit_code <c> bug <id|-> reached <ids...>` or
/// `<artifact>\terror <message>`.
pub fn parse_entry(line: &str) -> Option<LogEntry<'_>> {
    let (artifact, rest) = line.split_once('\t')?;

    if let Some(message) = rest.strip_prefix("error ") {
        return Some(LogEntry::Failed { artifact, message });
    }

    let mut tokens = rest.split_whitespace();
    if tokens.next()? != "exit_code" {
        return None;
    }
    let exit_code = tokens.next()?.parse().ok()?;
    if tokens.next()? != "bug" {
        return None;
    }
    let triggered = match tokens.next()? {
        "-" => None,
        bug_id => Some(bug_id),
    };
    if tokens.next()? != "reached" {
        return None;
    }

    Some(LogEntry::Replayed {
        artifact,
        exit_code,
        triggered,
        reached: tokens.collect(),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugCount {
    pub triggered: u64,
    pub reached: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFrequency {
    pub trial: Option<String>,
    pub fuzzer: String,
    pub replays: u64,
    pub failures: u64,
    pub bugs: BTreeMap<String, BugCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugFrequency {
    pub bugs: BTreeMap<String, BugCount>,
    pub units: Vec<UnitFrequency>,
}

struct BugFilter(Option<Regex>);

impl BugFilter {
    fn new(conventions: &Conventions) -> Result<Self> {
        conventions
            .bug_id_pattern
            .map(|pattern| Regex::new(&format!("^(?:{pattern})$")))
            .transpose()
            .map(BugFilter)
            .map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    fn accepts(&self, bug_id: &str) -> bool {
        self.0.as_ref().map_or(true, |re| re.is_match(bug_id))
    }
}

fn count_log(content: &str, filter: &BugFilter, unit: &mut UnitFrequency) {
    for line in content.lines() {
        match parse_entry(line) {
            Some(LogEntry::Replayed {
                triggered, reached, ..
            }) => {
                unit.replays += 1;
                if let Some(bug_id) = triggered.filter(|id| filter.accepts(id)) {
                    unit.bugs.entry(bug_id.to_owned()).or_default().triggered += 1;
                }
                for bug_id in reached.into_iter().filter(|id| filter.accepts(id)) {
                    unit.bugs.entry(bug_id.to_owned()).or_default().reached += 1;
                }
            }
            Some(LogEntry::Failed { .. }) => unit.failures += 1,
            None if line.trim().is_empty() => {}
            None => log::debug!("unrecognized result line: {line}"),
        }
    }
}

/// Result logs below `root`, sorted by path.
fn find_logs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut logs = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() && entry.file_name() == RESULTS_LOG {
                logs.push(entry.path());
            }
        }
    }

    logs.sort();
    Ok(logs)
}

/// Summarizes every result log below `output_root`.
pub fn summarize(output_root: &Path, conventions: &Conventions) -> Result<BugFrequency> {
    if !output_root.is_dir() {
        return Err(Error::DirectoryMissing {
            path: output_root.to_path_buf(),
        });
    }

    let filter = BugFilter::new(conventions)?;
    let mut summary = BugFrequency::default();

    for log_path in find_logs(output_root)? {
        let fuzzer_dir = log_path.parent().unwrap_or(output_root);
        let fuzzer = fuzzer_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let trial = fuzzer_dir
            .parent()
            .filter(|parent| *parent != output_root && parent.starts_with(output_root))
            .and_then(|parent| parent.file_name())
            .map(|name| name.to_string_lossy().into_owned());

        let mut unit = UnitFrequency {
            trial,
            fuzzer,
            ..UnitFrequency::default()
        };
        count_log(&fs::read_to_string(&log_path)?, &filter, &mut unit);

        for (bug_id, count) in unit.bugs.iter() {
            let total = summary.bugs.entry(bug_id.clone()).or_default();
            total.triggered += count.triggered;
            total.reached += count.reached;
        }
        summary.units.push(unit);
    }

    log::info!(
        "summarized {} result logs, {} distinct bugs",
        summary.units.len(),
        summary.bugs.len()
    );
    Ok(summary)
}

/// Writes `bug_frequency.json` into `output_root`.
pub fn write(output_root: &Path, summary: &BugFrequency) -> Result<PathBuf> {
    let path = output_root.join(SUMMARY_FILE);
    fs::write(&path, serde_json::to_string_pretty(summary)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_parse_entries() {
        assert_eq!(
            parse_entry("queue/id:000001\texit_code 0 bug PDF010 reached PDF010 PDF011"),
            Some(LogEntry::Replayed {
                artifact: "queue/id:000001",
                exit_code: 0,
                triggered: Some("PDF010"),
                reached: vec!["PDF010", "PDF011"],
            })
        );
        assert_eq!(
            parse_entry("crashes/id:000002,sig:11\texit_code 139 bug - reached"),
            Some(LogEntry::Replayed {
                artifact: "crashes/id:000002,sig:11",
                exit_code: 139,
                triggered: None,
                reached: vec![],
            })
        );
        assert_eq!(
            parse_entry("queue/slow\terror monitor timed out after 10s"),
            Some(LogEntry::Failed {
                artifact: "queue/slow",
                message: "monitor timed out after 10s",
            })
        );
        assert_eq!(parse_entry("queue/x\texit_code zero bug - reached"), None);
        assert_eq!(parse_entry("no tab here"), None);
    }

    #[test_log::test]
    fn test_summarize_per_unit_and_total() {
        let root = tempfile::tempdir().unwrap();
        let write_log = |dir: &str, content: &str| {
            let dir = root.path().join(dir);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(RESULTS_LOG), content).unwrap();
        };

        write_log(
            "trial0/afl",
            "queue/a\texit_code 0 bug - reached PNG001\n\
             crashes/b\texit_code 134 bug PNG001 reached PNG001 PNG002\n\
             crashes/c\terror boom\n",
        );
        write_log(
            "trial1/afl",
            "queue/a\texit_code 0 bug PNG002 reached PNG002 noise\n",
        );

        let conventions = Conventions {
            bug_id_pattern: Some(r"[A-Z]{3,4}\d{3}"),
            ..Conventions::default()
        };
        let summary = summarize(root.path(), &conventions).unwrap();

        assert_eq!(summary.units.len(), 2);
        assert_eq!(summary.units[0].trial.as_deref(), Some("trial0"));
        assert_eq!(summary.units[0].fuzzer, "afl");
        assert_eq!(summary.units[0].replays, 2);
        assert_eq!(summary.units[0].failures, 1);

        assert_eq!(
            summary.bugs["PNG001"],
            BugCount {
                triggered: 1,
                reached: 2
            }
        );
        assert_eq!(
            summary.bugs["PNG002"],
            BugCount {
                triggered: 1,
                reached: 2
            }
        );
        assert!(!summary.bugs.contains_key("noise"));

        let path = write(root.path(), &summary).unwrap();
        assert!(path.ends_with(SUMMARY_FILE));
    }

    #[test_log::test]
    fn test_single_trial_layout() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("afl")).unwrap();
        fs::write(
            root.path().join("afl").join(RESULTS_LOG),
            "queue/a\texit_code 0 bug - reached\n",
        )
        .unwrap();

        let summary = summarize(root.path(), &Conventions::default()).unwrap();
        assert_eq!(summary.units[0].trial, None);
        assert!(summary.bugs.is_empty());
    }
}
