use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::conventions::Conventions;

/// The fuzzer output directory an artifact was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Queue,
    Crashes,
}

impl SourceType {
    pub const ALL: [SourceType; 2] = [SourceType::Queue, SourceType::Crashes];

    pub fn dir_name(&self) -> &'static str {
        match self {
            SourceType::Queue => "queue",
            SourceType::Crashes => "crashes",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queue" => Ok(SourceType::Queue),
            "crashes" => Ok(SourceType::Crashes),
            other => Err(format!("unknown source type '{other}'")),
        }
    }
}

/// One input generated by a fuzzer. Artifacts are never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub source_type: SourceType,
    pub seed_id: Option<u64>,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, source_type: SourceType, conventions: &Conventions) -> Self {
        let path = path.into();
        let seed_id = seed_id_from_name(&file_name(&path), conventions.seed_marker);

        Self {
            path,
            source_type,
            seed_id,
        }
    }

    pub fn name(&self) -> String {
        file_name(&self.path)
    }

    /// Name relative to the fuzzer directory, e.g. `crashes/id:000001,sig:11`.
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.source_type, self.name())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Extracts the decimal seed id that follows `marker` in an artifact filename.
///
/// `id:000010,src:000003,op:havoc` yields `Some(10)`; a filename without the marker, or with no
/// digits after it, yields `None`.
pub fn seed_id_from_name(name: &str, marker: &str) -> Option<u64> {
    if marker.is_empty() {
        return None;
    }

    let rest = &name[name.find(marker)? + marker.len()..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());

    rest[..end].parse().ok()
}

/// Lists the artifacts of one fuzzer output directory, sorted by name.
///
/// Only regular files are returned; the informational file of the fuzzer and hidden files are
/// skipped. A missing directory yields an empty list.
pub fn collect(
    dir: impl AsRef<Path>,
    source_type: SourceType,
    conventions: &Conventions,
) -> io::Result<Vec<Artifact>> {
    let dir = dir.as_ref();

    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::info!("no {source_type} directory at {}", dir.display());
            return Ok(vec![]);
        }
        Err(e) => return Err(e),
    };

    let mut artifacts = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if name.starts_with('.') || name == conventions.info_file {
            continue;
        }

        if !entry.file_type()?.is_file() {
            continue;
        }

        artifacts.push(Artifact::new(entry.path(), source_type, conventions));
    }

    artifacts.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(artifacts)
}
