//! Intermediate bug records written by replay workers.
//!
//! Every worker appends to its own file below `pending/` in the fuzzer output directory. Files
//! survive an interrupted run and are merged by the next one, after which they are removed.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use crate::first_seen::BugRecord;

pub const PENDING_DIR: &str = "pending";
const RECORD_EXTENSION: &str = "rec";

pub fn pending_dir(output_dir: &Path) -> PathBuf {
    output_dir.join(PENDING_DIR)
}

#[derive(Debug)]
pub struct RecordWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl RecordWriter {
    /// Opens the record file of `worker`. The process id keeps the name unique across runs.
    pub fn create(output_dir: &Path, worker: usize) -> io::Result<Self> {
        let dir = pending_dir(output_dir);
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}-{worker}.{RECORD_EXTENSION}", process::id()));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Appends a record and flushes it, so a killed run loses at most the record in flight.
    pub fn write(&mut self, record: &BugRecord) -> io::Result<()> {
        writeln!(self.file, "{}", encode(record))?;
        self.file.flush()
    }
}

/// `<source_type>\t<bug_id>\t<seed_id>\t<source_file>`
pub fn encode(record: &BugRecord) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        record.source_type, record.bug_id, record.seed_id, record.source_file
    )
}

pub fn decode(line: &str) -> Option<BugRecord> {
    let mut fields = line.splitn(4, '\t');

    Some(BugRecord {
        source_type: fields.next()?.parse().ok()?,
        bug_id: fields.next().filter(|id| !id.is_empty())?.to_owned(),
        seed_id: fields.next()?.parse().ok()?,
        source_file: fields.next()?.to_owned(),
    })
}

fn record_files(output_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let dir = pending_dir(output_dir);
    let read_dir = match fs::read_dir(&dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in read_dir {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == RECORD_EXTENSION) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Reads every pending record, including those left behind by interrupted runs.
pub fn load_pending(output_dir: &Path) -> io::Result<Vec<BugRecord>> {
    let mut records = Vec::new();

    for path in record_files(output_dir)? {
        let content = fs::read_to_string(&path)?;
        for line in content.lines().filter(|line| !line.is_empty()) {
            match decode(line) {
                Some(record) => records.push(record),
                None => log::warn!("skipping malformed record in {}: {line}", path.display()),
            }
        }
    }

    Ok(records)
}

/// Removes all pending record files. Call only after the merged table has been persisted.
pub fn clear_pending(output_dir: &Path) -> io::Result<()> {
    for path in record_files(output_dir)? {
        fs::remove_file(path)?;
    }

    match fs::remove_dir(pending_dir(output_dir)) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            log::debug!("keeping {}: {e}", pending_dir(output_dir).display());
            Ok(())
        }
        _ => Ok(()),
    }
}
