pub mod command;

use std::fs;
use std::io;
use std::path::Path;

pub use command::Step;

/// Recursively copies `from` into `to`, preserving symlinks.
pub fn copy_dir(from: impl AsRef<Path>, to: impl AsRef<Path>) -> io::Result<()> {
    let (from, to) = (from.as_ref(), to.as_ref());
    fs::create_dir_all(to)?;

    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = to.join(entry.file_name());

        if file_type.is_dir() {
            copy_dir(entry.path(), &target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_copy_dir_nested() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("a/b")).unwrap();
        fs::write(src.path().join("a/b/file.c"), "int main;").unwrap();
        fs::write(src.path().join("top.txt"), "top").unwrap();

        let dst = tempfile::tempdir().unwrap();
        copy_dir(src.path(), dst.path().join("copy")).unwrap();

        assert_eq!(
            fs::read_to_string(dst.path().join("copy/a/b/file.c")).unwrap(),
            "int main;"
        );
        assert_eq!(
            fs::read_to_string(dst.path().join("copy/top.txt")).unwrap(),
            "top"
        );
    }
}
