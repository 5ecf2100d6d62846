//! Persisted table of the earliest seed that triggered each bug.
//!
//! The table only ever moves towards smaller seed ids, so merging the same records twice or in a
//! different order always yields the same table. On disk there is one plain text file per source
//! type with one `<bug_id> <seed_id>` line per bug, sorted by bug id.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use tempfile::NamedTempFile;

use crate::artifact::{Artifact, SourceType};
use crate::replay::ReplayResult;

/// A triggered bug attributed to the artifact that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BugRecord {
    pub bug_id: String,
    pub seed_id: u64,
    pub source_type: SourceType,
    pub source_file: String,
}

impl BugRecord {
    /// Only replays that triggered a bug on an artifact with a seed id produce a record.
    pub fn from_replay(artifact: &Artifact, result: &ReplayResult) -> Option<Self> {
        Some(BugRecord {
            bug_id: result.triggered_bug.clone()?,
            seed_id: artifact.seed_id?,
            source_type: artifact.source_type,
            source_file: artifact.name(),
        })
    }
}

pub fn table_file(dir: &Path, source_type: SourceType) -> PathBuf {
    dir.join(format!("first_seen_{source_type}.txt"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirstSeenTable {
    entries: BTreeMap<(SourceType, String), u64>,
}

impl FirstSeenTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `seed_id` for the bug unless an equal or smaller one is already known. Returns
    /// whether the table changed.
    pub fn observe(&mut self, source_type: SourceType, bug_id: &str, seed_id: u64) -> bool {
        match self.entries.get_mut(&(source_type, bug_id.to_owned())) {
            Some(known) if *known <= seed_id => false,
            Some(known) => {
                *known = seed_id;
                true
            }
            None => {
                self.entries
                    .insert((source_type, bug_id.to_owned()), seed_id);
                true
            }
        }
    }

    /// Merges records with the minimum rule. Returns the number of entries that changed.
    pub fn merge<'a>(&mut self, records: impl IntoIterator<Item = &'a BugRecord>) -> usize {
        records
            .into_iter()
            .filter(|record| self.observe(record.source_type, &record.bug_id, record.seed_id))
            .count()
    }

    pub fn get(&self, source_type: SourceType, bug_id: &str) -> Option<u64> {
        self.entries
            .get(&(source_type, bug_id.to_owned()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SourceType, &str, u64)> {
        self.entries
            .iter()
            .map(|((source_type, bug_id), seed_id)| (*source_type, bug_id.as_str(), *seed_id))
    }

    /// Loads the tables of every source type from `dir`. Missing files are treated as empty and
    /// lines that do not parse, e.g. from an interrupted write, are skipped.
    pub fn load(dir: &Path) -> io::Result<Self> {
        let mut table = Self::new();

        for source_type in SourceType::ALL {
            let path = table_file(dir, source_type);
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    log::debug!("no first-seen table at {}", path.display());
                    continue;
                }
                Err(e) => return Err(e),
            };

            for line in content.lines() {
                match parse_line(line) {
                    Some((bug_id, seed_id)) => {
                        table.observe(source_type, bug_id, seed_id);
                    }
                    None if line.trim().is_empty() => {}
                    None => log::warn!("skipping malformed line in {}: {line}", path.display()),
                }
            }
        }

        Ok(table)
    }

    /// The file content for one source type.
    pub fn render(&self, source_type: SourceType) -> String {
        self.iter()
            .filter(|(st, _, _)| *st == source_type)
            .map(|(_, bug_id, seed_id)| format!("{bug_id} {seed_id}\n"))
            .join("")
    }

    /// Writes one file per source type into `dir`. Each file is replaced atomically, so a reader
    /// sees either the previous or the new table.
    pub fn persist(&self, dir: &Path) -> io::Result<()> {
        for source_type in SourceType::ALL {
            let mut file = NamedTempFile::new_in(dir)?;
            file.write_all(self.render(source_type).as_bytes())?;
            file.as_file().sync_all()?;
            file.persist(table_file(dir, source_type))
                .map_err(|e| e.error)?;
        }

        Ok(())
    }
}

fn parse_line(line: &str) -> Option<(&str, u64)> {
    let mut tokens = line.split_whitespace();
    let bug_id = tokens.next()?;
    let seed_id = tokens.next()?.parse().ok()?;

    tokens.next().is_none().then_some((bug_id, seed_id))
}
