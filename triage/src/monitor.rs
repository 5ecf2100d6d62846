//! Decoder for the human-readable dump of the bug monitor.
//!
//! Every line of the dump consists of one or more groups of exactly five whitespace separated
//! tokens:
//!
//! ```text
//! offset:  +0      +1       +2    +3         +4
//!          BUG_ID  reached  <N>   triggered  <M>
//! ```
//!
//! The two signals are decoded differently:
//!
//! * **reached** is group-scoped: every group of every line whose count at offset `+2` is
//!   non-zero adds its bug id to the reached set.
//! * **triggered** is a single-bug signal: the first group (in line order, then group order)
//!   whose count at offset `+4` is non-zero designates *the* triggered bug and decoding of the
//!   triggered signal stops there. Later non-zero triggered counts are ignored.
//!
//! Consumers of the triage output depend on exactly this asymmetry, so it is preserved as is.
//!
//! A line that does not follow the grammar (token count not a multiple of five, unexpected
//! keywords, counts that are not unsigned integers) contributes nothing. Decoding never fails.

use std::collections::BTreeSet;

const GROUP_LEN: usize = 5;
const OFFSET_REACHED_KEYWORD: usize = 1;
const OFFSET_REACHED_COUNT: usize = 2;
const OFFSET_TRIGGERED_KEYWORD: usize = 3;
const OFFSET_TRIGGERED_COUNT: usize = 4;

const REACHED: &str = "reached";
const TRIGGERED: &str = "triggered";

/// One `BUG_ID reached <N> triggered <M>` group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BugCounter<'a> {
    pub bug_id: &'a str,
    pub reached: u64,
    pub triggered: u64,
}

/// The bug-related part of a replay as reported by the monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub triggered_bug: Option<String>,
    pub reached_bugs: BTreeSet<String>,
}

impl MonitorReport {
    pub fn parse(dump: &str) -> Self {
        let mut report = MonitorReport::default();

        for counters in dump.lines().filter_map(parse_line) {
            for counter in counters {
                if counter.reached != 0 {
                    report.reached_bugs.insert(counter.bug_id.to_owned());
                }

                if report.triggered_bug.is_none() && counter.triggered != 0 {
                    report.triggered_bug = Some(counter.bug_id.to_owned());
                }
            }
        }

        report
    }
}

/// Decodes one line into its groups, or `None` if the line is malformed.
pub fn parse_line(line: &str) -> Option<Vec<BugCounter<'_>>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    if tokens.is_empty() || tokens.len() % GROUP_LEN != 0 {
        return None;
    }

    tokens.chunks_exact(GROUP_LEN).map(parse_group).collect()
}

fn parse_group<'a>(group: &[&'a str]) -> Option<BugCounter<'a>> {
    if group[OFFSET_REACHED_KEYWORD] != REACHED || group[OFFSET_TRIGGERED_KEYWORD] != TRIGGERED {
        return None;
    }

    Some(BugCounter {
        bug_id: group[0],
        reached: group[OFFSET_REACHED_COUNT].parse().ok()?,
        triggered: group[OFFSET_TRIGGERED_COUNT].parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reached(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test_log::test]
    fn test_single_line_first_group_triggered() {
        let report = MonitorReport::parse("B1 reached 3 triggered 1 B2 reached 0 triggered 0");

        assert_eq!(report.triggered_bug.as_deref(), Some("B1"));
        assert_eq!(report.reached_bugs, reached(&["B1"]));
    }

    #[test_log::test]
    fn test_reached_is_grouped_triggered_is_single() {
        let report = MonitorReport::parse("B1 reached 2 triggered 0 B2 reached 5 triggered 7");

        assert_eq!(report.triggered_bug.as_deref(), Some("B2"));
        assert_eq!(report.reached_bugs, reached(&["B1", "B2"]));
    }

    #[test_log::test]
    fn test_first_triggered_group_wins() {
        let report = MonitorReport::parse(
            "B1 reached 1 triggered 0 B2 reached 1 triggered 4 B3 reached 1 triggered 9\n\
             B4 reached 1 triggered 1",
        );

        assert_eq!(report.triggered_bug.as_deref(), Some("B2"));
        assert_eq!(report.reached_bugs, reached(&["B1", "B2", "B3", "B4"]));
    }

    #[test_log::test]
    fn test_first_triggered_line_wins() {
        let report = MonitorReport::parse(
            "AAH001 reached 0 triggered 0\nAAH002 reached 1 triggered 2\nAAH003 reached 1 triggered 1\n",
        );

        assert_eq!(report.triggered_bug.as_deref(), Some("AAH002"));
        assert_eq!(report.reached_bugs, reached(&["AAH002", "AAH003"]));
    }

    #[test_log::test]
    fn test_malformed_lines_are_skipped() {
        let report = MonitorReport::parse(
            "B1 reached 1 triggered 1 B2\n\
             B3 reached x triggered 1\n\
             B4 touched 1 triggered 1\n\
             B5 reached -1 triggered 0\n\
             \n\
             monitor: done\n\
             B6 reached 1 triggered 0",
        );

        assert_eq!(report.triggered_bug, None);
        assert_eq!(report.reached_bugs, reached(&["B6"]));
    }

    #[test_log::test]
    fn test_malformed_group_discards_whole_line() {
        let report = MonitorReport::parse("B1 reached 1 triggered 1 B2 reached ? triggered 0");

        assert_eq!(report, MonitorReport::default());
    }

    #[test_log::test]
    fn test_empty_dump() {
        assert_eq!(MonitorReport::parse(""), MonitorReport::default());
    }

    #[test_log::test]
    fn test_parse_line_offsets() {
        let counters = parse_line("  PDF010 reached 12 triggered 0  ").unwrap();

        assert_eq!(
            counters,
            vec![BugCounter {
                bug_id: "PDF010",
                reached: 12,
                triggered: 0,
            }]
        );
    }
}
