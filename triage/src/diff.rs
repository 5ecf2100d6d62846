//! Compares the coverage maps stored by the coverage runner.
//!
//! For every artifact with both maps, the edges that only the patched variant reports are
//! attributed to the instrumentation. Walking the queue in seed order then shows which artifacts
//! discovered edges or annotations that no earlier artifact had.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::artifact::seed_id_from_name;
use crate::conventions::Conventions;
use crate::coverage::{ORIGINAL_ANALYSIS, PATCHED_ANALYSIS, PATCHED_STDOUT};
use crate::error::{Error, Result};

pub const DIFF_FILE: &str = "coverage_diff.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDiff {
    pub name: String,
    pub seed_id: Option<u64>,
    /// Lines of the patched map that remain after removing one occurrence of every line of the
    /// original map.
    pub annotation_edges: Vec<String>,
    /// Annotation ids printed by the patched run, in output order.
    pub annotations: Vec<String>,
    /// Edges of the original map not seen in any earlier artifact.
    pub new_edges: usize,
    pub new_annotations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageDiff {
    pub artifacts: Vec<ArtifactDiff>,
    /// Artifacts with a map from only one variant.
    pub unpaired: Vec<String>,
    pub total_edges: usize,
    pub total_annotations: usize,
}

/// Patched lines minus original lines, with multiset semantics.
pub fn annotation_edges(original: &str, patched: &str) -> Vec<String> {
    let mut remaining: BTreeMap<&str, usize> = BTreeMap::new();
    for line in map_lines(original) {
        *remaining.entry(line).or_default() += 1;
    }

    map_lines(patched)
        .filter(|line| match remaining.get_mut(line) {
            Some(count) if *count > 0 => {
                *count -= 1;
                false
            }
            _ => true,
        })
        .map(str::to_owned)
        .collect()
}

fn map_lines(map: &str) -> impl Iterator<Item = &str> {
    map.lines().map(str::trim).filter(|line| !line.is_empty())
}

pub fn annotation_pattern(marker: &str) -> Result<Regex> {
    Regex::new(&format!(r"{}: ([0-9]+)", regex::escape(marker)))
        .map_err(|e| Error::InvalidConfig(e.to_string()))
}

pub fn annotation_ids(stdout: &str, pattern: &Regex) -> Vec<String> {
    pattern
        .captures_iter(stdout)
        .map(|captures| captures[1].to_owned())
        .collect()
}

fn file_names(dir: &Path) -> io::Result<BTreeSet<String>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::warn!("no maps at {}", dir.display());
            return Ok(BTreeSet::new());
        }
        Err(e) => return Err(e),
    };

    let mut names = BTreeSet::new();
    for entry in read_dir {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

fn read_optional(path: &Path) -> io::Result<String> {
    match fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

/// Diffs the maps below `dir`, the output directory of a coverage run.
pub fn diff(dir: &Path, conventions: &Conventions) -> Result<CoverageDiff> {
    if !dir.is_dir() {
        return Err(Error::DirectoryMissing {
            path: dir.to_path_buf(),
        });
    }

    let pattern = annotation_pattern(conventions.annotation_marker)?;
    let original = file_names(&dir.join(ORIGINAL_ANALYSIS))?;
    let patched = file_names(&dir.join(PATCHED_ANALYSIS))?;

    let mut result = CoverageDiff {
        unpaired: original.symmetric_difference(&patched).cloned().collect(),
        ..CoverageDiff::default()
    };

    // seed order first, artifacts without a seed id last
    let mut paired: Vec<(Option<u64>, &String)> = original
        .intersection(&patched)
        .map(|name| (seed_id_from_name(name, conventions.seed_marker), name))
        .collect();
    paired.sort_by(|(a_id, a_name), (b_id, b_name)| {
        (a_id.is_none(), a_id, a_name).cmp(&(b_id.is_none(), b_id, b_name))
    });

    let mut seen_edges: BTreeSet<String> = BTreeSet::new();
    let mut seen_annotations: BTreeSet<String> = BTreeSet::new();

    for (seed_id, name) in paired {
        let original_map = read_optional(&dir.join(ORIGINAL_ANALYSIS).join(name))?;
        let patched_map = read_optional(&dir.join(PATCHED_ANALYSIS).join(name))?;
        let stdout = read_optional(&dir.join(PATCHED_STDOUT).join(name))?;

        let annotations = annotation_ids(&stdout, &pattern);

        let mut new_edges = 0;
        for edge in map_lines(&original_map) {
            if seen_edges.insert(edge.to_owned()) {
                new_edges += 1;
            }
        }

        let mut new_annotations = Vec::new();
        for annotation in annotations.iter() {
            if seen_annotations.insert(annotation.clone()) {
                new_annotations.push(annotation.clone());
            }
        }

        result.artifacts.push(ArtifactDiff {
            name: name.clone(),
            seed_id,
            annotation_edges: annotation_edges(&original_map, &patched_map),
            annotations,
            new_edges,
            new_annotations,
        });
    }

    result.total_edges = seen_edges.len();
    result.total_annotations = seen_annotations.len();

    Ok(result)
}

/// Writes `coverage_diff.json` into `dir`.
pub fn write(dir: &Path, diff: &CoverageDiff) -> Result<PathBuf> {
    let path = dir.join(DIFF_FILE);
    fs::write(&path, serde_json::to_string_pretty(diff)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_annotation_edges_multiset() {
        let original = "000001:1\n000002:1\n000002:1\n";
        let patched = "000001:1\n000002:1\n000002:1\n000002:1\n000009:3\n";

        assert_eq!(
            annotation_edges(original, patched),
            vec!["000002:1", "000009:3"]
        );
        assert!(annotation_edges(patched, original).is_empty());
    }

    #[test_log::test]
    fn test_annotation_ids() {
        let pattern = annotation_pattern("PATCHID").unwrap();
        let stdout = "PATCHID: 4\nnoise PATCHID: 12 trailing\nPATCHID: x\nPATCHID:7\n";

        assert_eq!(annotation_ids(stdout, &pattern), vec!["4", "12"]);
    }

    #[test_log::test]
    fn test_diff_in_seed_order() {
        let dir = tempfile::tempdir().unwrap();
        let write = |sub: &str, name: &str, content: &str| {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
            fs::write(dir.path().join(sub).join(name), content).unwrap();
        };

        write(ORIGINAL_ANALYSIS, "id:000002,op:havoc", "a:1\nb:1\nc:1\n");
        write(PATCHED_ANALYSIS, "id:000002,op:havoc", "a:1\nb:1\nc:1\nx:1\n");
        write(PATCHED_STDOUT, "id:000002,op:havoc", "PATCHID: 1\nPATCHID: 2\n");

        write(ORIGINAL_ANALYSIS, "id:000000,orig:seed", "a:1\n");
        write(PATCHED_ANALYSIS, "id:000000,orig:seed", "a:1\nx:1\n");
        write(PATCHED_STDOUT, "id:000000,orig:seed", "PATCHID: 1\n");

        write(ORIGINAL_ANALYSIS, "id:000005,op:flip1", "a:1\n");

        let result = diff(dir.path(), &Conventions::default()).unwrap();

        let names: Vec<_> = result.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["id:000000,orig:seed", "id:000002,op:havoc"]);
        assert_eq!(result.unpaired, vec!["id:000005,op:flip1"]);

        assert_eq!(result.artifacts[0].new_edges, 1);
        assert_eq!(result.artifacts[0].new_annotations, vec!["1"]);
        assert_eq!(result.artifacts[0].annotation_edges, vec!["x:1"]);

        assert_eq!(result.artifacts[1].new_edges, 2);
        assert_eq!(result.artifacts[1].annotations, vec!["1", "2"]);
        assert_eq!(result.artifacts[1].new_annotations, vec!["2"]);

        assert_eq!(result.total_edges, 3);
        assert_eq!(result.total_annotations, 2);

        let path = super::write(dir.path(), &result).unwrap();
        let read: CoverageDiff = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(read, result);
    }
}
