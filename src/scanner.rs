//! Directory enumeration for the packer.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::logging::LogSink;

/// Recursively collects every regular file under `root`, including files
/// sitting directly in `root` itself.
///
/// Directories and other non-file entries contribute nothing of their own;
/// a directory exists in the archive only through the names of the files
/// inside it. Unreadable entries and subtrees are reported through the sink
/// and skipped, so one bad permission bit does not abort the run. Symbolic
/// links are not followed, which also rules out cycles.
///
/// Entries come back sorted by file name at every level, so the same tree
/// always enumerates in the same order.
pub fn scan_files(root: &Path, sink: &LogSink) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        match entry {
            Ok(e) if e.file_type().is_file() => files.push(e.into_path()),
            Ok(_) => {}
            Err(err) => {
                let at = err
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                sink.log_from_worker(&format!("scan: skipping '{at}': {err}"));
            }
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn finds_root_and_nested_files_in_sorted_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("c.txt"), b"c").unwrap();

        let sink = LogSink::discard();
        let files = scan_files(dir.path(), &sink);

        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.txt"),
                PathBuf::from("b.txt"),
                PathBuf::from("sub/c.txt"),
            ]
        );
    }

    #[test]
    fn ignores_empty_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("only").join("dirs")).unwrap();

        let sink = LogSink::discard();
        assert!(scan_files(dir.path(), &sink).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn does_not_follow_symlinks() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir(&real).unwrap();
        fs::write(real.join("inside.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(&real, dir.path().join("link")).unwrap();

        let sink = LogSink::discard();
        let files = scan_files(dir.path(), &sink);

        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("real/inside.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn logs_and_skips_an_unreadable_subdirectory() {
        use std::os::unix::fs::PermissionsExt;

        // The locked directory sorts between the two files, so the scan must
        // carry on past the failure to find the second one.
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("aa.txt"), b"a").unwrap();
        fs::write(dir.path().join("zz.txt"), b"z").unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("hidden.txt"), b"h").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // Permission bits do not bind root, so the failure cannot be staged
        // there.
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let log_dir = tempdir().unwrap();
        let log_path = log_dir.path().join("scan.log");
        let sink = LogSink::to_file(&log_path, false).unwrap();
        let files = scan_files(dir.path(), &sink);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(names, vec![PathBuf::from("aa.txt"), PathBuf::from("zz.txt")]);

        sink.pump_until(|| true);
        let text = fs::read_to_string(&log_path).unwrap();
        assert!(text.contains("scan: skipping"));
        assert!(text.contains("locked"));
    }
}
