/// Naming conventions of a fuzzing campaign's on-disk layout.
///
/// The generic engine never hard-codes these; the campaign binary provides them, the same way a
/// protocol crate provides its registry to the generic command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conventions {
    /// Short campaign name, used in log messages and run records.
    pub name: &'static str,
    /// Informational file the fuzzer drops into its output directories.
    pub info_file: &'static str,
    /// Substring of an artifact filename that is followed by its decimal seed id.
    pub seed_marker: &'static str,
    /// Token that identifies annotation lines printed by instrumented code.
    pub annotation_marker: &'static str,
    /// Prefix of trial directories below a campaign root, e.g. `trial` for `trial0`.
    pub trial_prefix: &'static str,
    /// Optional regex that every bug id must match. Used to filter tokens when summarizing logs.
    pub bug_id_pattern: Option<&'static str>,
}

impl Conventions {
    /// Layout produced by AFL-style fuzzers.
    pub const fn afl(name: &'static str) -> Self {
        Self {
            name,
            info_file: "README.txt",
            seed_marker: "id:",
            annotation_marker: "PATCHID",
            trial_prefix: "trial",
            bug_id_pattern: None,
        }
    }
}

impl Default for Conventions {
    fn default() -> Self {
        Self::afl("afl")
    }
}
