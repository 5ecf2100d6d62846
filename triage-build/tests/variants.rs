use std::fs;
use std::path::Path;
use std::process::Command;

use triage_build::{Variant, VariantBuild, VariantDir};

const PATCH: &str = "\
--- a/harness.c
+++ b/harness.c
@@ -1 +1,2 @@
 int main() { return 0; }
+// IJON annotation
";

fn has_patch_tool() -> bool {
    Command::new("patch")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn setup(root: &Path) -> VariantBuild {
    let sources = root.join("sources");
    fs::create_dir_all(&sources).unwrap();
    fs::write(sources.join("harness.c"), "int main() { return 0; }\n").unwrap();
    fs::write(root.join("annotation.patch"), PATCH).unwrap();
    fs::write(root.join("allow_list.txt"), "fun: main\n").unwrap();

    let counter = root.join("builds.count");
    let script = format!(
        "cp harness.c \"$OUT/harness.c\"; \
         if [ -n \"$ALLOW_LIST\" ]; then cp \"$ALLOW_LIST\" \"$OUT/allow_list.txt\"; fi; \
         echo \"$VARIANT\" >> {}",
        counter.display()
    );

    VariantBuild::new(&sources, root.join("annotation.patch"), ["sh", "-c", script.as_str()])
        .with_allow_list(root.join("allow_list.txt"))
}

fn build_count(root: &Path) -> usize {
    fs::read_to_string(root.join("builds.count"))
        .map(|content| content.lines().count())
        .unwrap_or(0)
}

#[test_log::test]
fn test_original_is_built_unmodified() {
    let root = tempfile::tempdir().unwrap();
    let build = setup(root.path());
    let variants = VariantDir::new(root.path().join("variants"));

    let out = variants.make(&build, Variant::Original).unwrap();

    assert_eq!(
        fs::read_to_string(out.join("harness.c")).unwrap(),
        "int main() { return 0; }\n"
    );
    assert!(!out.join("allow_list.txt").exists());
}

#[test_log::test]
fn test_original_build_is_reused() {
    let root = tempfile::tempdir().unwrap();
    let build = setup(root.path());
    let variants = VariantDir::new(root.path().join("variants"));

    variants.make(&build, Variant::Original).unwrap();
    variants.make(&build, Variant::Original).unwrap();

    assert_eq!(build_count(root.path()), 1);
}

#[test_log::test]
fn test_patched_build_applies_patch_and_allow_list() {
    if !has_patch_tool() {
        log::warn!("skipping: `patch` is not installed");
        return;
    }

    let root = tempfile::tempdir().unwrap();
    let build = setup(root.path());

    let variants = build.build_all(root.path().join("variants")).unwrap();
    let patched = variants.out(Variant::Patched);

    assert!(fs::read_to_string(patched.join("harness.c"))
        .unwrap()
        .contains("IJON annotation"));
    assert_eq!(
        fs::read_to_string(patched.join("allow_list.txt")).unwrap(),
        "fun: main\n"
    );
    assert!(!fs::read_to_string(variants.out(Variant::Original).join("harness.c"))
        .unwrap()
        .contains("IJON annotation"));

    // a changed patch invalidates only the patched build
    fs::write(
        root.path().join("annotation.patch"),
        PATCH.replace("IJON annotation", "IJON annotation v2"),
    )
    .unwrap();
    build.build_all(root.path().join("variants")).unwrap();
    assert_eq!(build_count(root.path()), 3);
}

#[test_log::test]
fn test_missing_sources() {
    let root = tempfile::tempdir().unwrap();
    let build = VariantBuild::new(root.path().join("nope"), root.path().join("p"), ["true"]);

    assert!(matches!(
        build.build_all(root.path().join("variants")),
        Err(triage_build::Error::InputMissing { .. })
    ));
}
