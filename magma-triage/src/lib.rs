use triage::conventions::Conventions;

/// Layout of a Magma campaign: AFL-style artifact names and bug ids like `PDF010` or `SQL002`.
pub const MAGMA: Conventions = Conventions {
    bug_id_pattern: Some(r"[A-Z]{3,4}\d{3}"),
    ..Conventions::afl("magma")
};

#[cfg(test)]
mod tests {
    use std::fs;

    use triage::dispatch::RESULTS_LOG;
    use triage::summary;

    use super::*;

    #[test_log::test]
    fn test_only_magma_bug_ids_are_counted() {
        let root = tempfile::tempdir().unwrap();
        let fuzzer = root.path().join("trial0").join("aflplusplus");
        fs::create_dir_all(&fuzzer).unwrap();
        fs::write(
            fuzzer.join(RESULTS_LOG),
            "crashes/id:000000,sig:06\texit_code 134 bug LUA004 reached LUA004 SQL0021 B1\n\
             queue/id:000003,op:havoc\texit_code 0 bug - reached PDF010 pdf010\n",
        )
        .unwrap();

        let result = summary::summarize(root.path(), &MAGMA).unwrap();

        assert_eq!(
            result.bugs.keys().collect::<Vec<_>>(),
            vec!["LUA004", "PDF010"]
        );
        assert_eq!(result.bugs["LUA004"].triggered, 1);
    }

    #[test_log::test]
    fn test_afl_layout() {
        assert_eq!(MAGMA.name, "magma");
        assert_eq!(MAGMA.seed_marker, "id:");
        assert_eq!(MAGMA.info_file, "README.txt");
        assert_eq!(MAGMA.annotation_marker, "PATCHID");
    }
}
