use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_cli_pack_list_unpack_cycle() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Setup: Create a temporary directory and some test files
    let source_dir = tempdir()?;
    let file1_path = source_dir.path().join("file1.txt");
    let file2_path = source_dir.path().join("file2.log");
    let nested_dir = source_dir.path().join("nested");
    fs::create_dir(&nested_dir)?;
    let nested_file_path = nested_dir.join("nested_file.dat");

    let mut file1 = fs::File::create(&file1_path)?;
    writeln!(file1, "Hello, this is the first file.")?;

    let mut file2 = fs::File::create(&file2_path)?;
    writeln!(file2, "Some log data here.")?;

    let mut nested_file = fs::File::create(&nested_file_path)?;
    nested_file.write_all(&[0, 1, 2, 3, 4, 5])?;

    let archive_dir = tempdir()?;
    let archive_path = archive_dir.path().join("test_archive.vfs");

    // 2. Pack the directory
    let mut cmd = Command::cargo_bin("vfspack")?;
    cmd.arg("pack")
        .arg(source_dir.path())
        .arg("--output")
        .arg(&archive_path);
    cmd.assert().success();

    assert!(archive_path.exists());

    // 3. List contents of the archive
    let mut cmd = Command::cargo_bin("vfspack")?;
    cmd.arg("list").arg(&archive_path);
    cmd.assert().success().stdout(
        predicate::str::contains("file1.txt")
            .and(predicate::str::contains("file2.log"))
            .and(predicate::str::contains("nested/nested_file.dat"))
            .and(predicate::str::contains("3 entries")),
    );

    // 4. Unpack the archive into a new directory
    let unpack_dir = tempdir()?;
    let mut cmd = Command::cargo_bin("vfspack")?;
    cmd.arg("unpack")
        .arg(&archive_path)
        .arg("-o")
        .arg(unpack_dir.path());
    cmd.assert().success();

    // 5. Verify the unpacked files
    let unpacked_file1 = fs::read(unpack_dir.path().join("file1.txt"))?;
    let original_file1 = fs::read(&file1_path)?;
    assert_eq!(unpacked_file1, original_file1);

    let unpacked_file2 = fs::read(unpack_dir.path().join("file2.log"))?;
    let original_file2 = fs::read(&file2_path)?;
    assert_eq!(unpacked_file2, original_file2);

    let unpacked_nested_file = fs::read(unpack_dir.path().join("nested/nested_file.dat"))?;
    let original_nested_file = fs::read(&nested_file_path)?;
    assert_eq!(unpacked_nested_file, original_nested_file);

    Ok(())
}

#[test]
fn test_cli_pack_writes_the_log_file() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = tempdir()?;
    fs::write(source_dir.path().join("only.txt"), b"payload")?;

    let archive_dir = tempdir()?;
    let archive_path = archive_dir.path().join("logged.vfs");
    let log_path = archive_dir.path().join("pack.log");

    let mut cmd = Command::cargo_bin("vfspack")?;
    cmd.arg("pack")
        .arg(source_dir.path())
        .arg("--output")
        .arg(&archive_path)
        .arg("--log-file")
        .arg(&log_path);
    cmd.assert().success();

    let log = fs::read_to_string(&log_path)?;
    assert!(log.contains("--- logging session started"));
    assert!(log.contains("VFS table entry"));
    assert!(log.contains("packed 1 files"));

    Ok(())
}

#[test]
fn test_cli_pack_missing_base_fails() -> Result<(), Box<dyn std::error::Error>> {
    let archive_dir = tempdir()?;
    let archive_path = archive_dir.path().join("never.vfs");

    let mut cmd = Command::cargo_bin("vfspack")?;
    cmd.arg("pack")
        .arg(archive_dir.path().join("does-not-exist"))
        .arg("--output")
        .arg(&archive_path);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));

    assert!(!archive_path.exists());
    Ok(())
}

#[test]
fn test_cli_list_rejects_a_non_archive() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let not_an_archive = dir.path().join("junk.vfs");
    fs::write(&not_an_archive, vec![0x5A; 4096])?;

    let mut cmd = Command::cargo_bin("vfspack")?;
    cmd.arg("list").arg(&not_an_archive);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("not a valid archive"));

    Ok(())
}
