#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Prints the artifact as its dump and exits with the code of an `exit <n>` line. Artifacts
/// containing a `slow` line hang.
pub const FAKE_MONITOR: &str = r#"#!/bin/sh
if grep -q '^slow' "$1"; then exec sleep 30; fi
cat "$1"
code=$(sed -n 's/^exit \([0-9]*\)$/\1/p' "$1")
exit "${code:-0}"
"#;

/// Prints the annotation lines of the artifact, mixed with noise on both streams.
pub const FAKE_TARGET: &str = r#"#!/bin/sh
echo "target starting"
grep 'PATCHID' "$1"
echo "target done" >&2
"#;

/// `<showmap> -r -o <map> -- <binary> <args...>`; the binary writes its map to fd 3.
pub const FAKE_SHOWMAP: &str = r#"#!/bin/sh
map="$3"
shift 4
exec "$@" 3> "$map"
"#;

/// Reports `edge` lines as its map. Artifacts containing `slow` hang.
pub const FAKE_ORIGINAL_HARNESS: &str = r#"#!/bin/sh
if grep -q '^slow' "$1"; then exec sleep 30; fi
sed -n 's/^edge //p' "$1" >&3
"#;

/// Like the original harness, plus `patched` edges and the annotations on stdout. Artifacts
/// containing a `patched-slow` line hang only here.
pub const FAKE_PATCHED_HARNESS: &str = r#"#!/bin/sh
if grep -q '^slow' "$1"; then exec sleep 30; fi
if grep -q '^patched-slow' "$1"; then exec sleep 30; fi
sed -n 's/^edge //p' "$1" >&3
sed -n 's/^patched //p' "$1" >&3
grep 'PATCHID' "$1"
"#;

pub fn write_script(dir: &Path, name: &str, content: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn write_artifact(dir: &Path, name: &str, content: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}
