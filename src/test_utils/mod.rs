//! Test utilities for rs-dumper
//!
//! Scratch directory trees shared by unit tests across modules.

#![cfg(test)]

use anyhow::Result;
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use tempfile::TempDir;

/// Creates a temporary directory that is automatically cleaned up
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file structure in a temporary directory
pub fn create_test_file_structure() -> Result<TempDir> {
    let temp_dir = create_temp_dir()?;
    let base_path = temp_dir.path();

    // Create directory structure
    fs::create_dir_all(base_path.join("dir1/subdir1"))?;
    fs::create_dir_all(base_path.join("dir2"))?;

    // Create test files
    fs::write(base_path.join("file1.txt"), b"Test content 1")?;
    fs::write(base_path.join("file2.log"), b"Test log content")?;
    fs::write(base_path.join("dir1/file3.txt"), b"Test content 3")?;
    fs::write(base_path.join("dir1/subdir1/file4.txt"), b"Test content 4")?;
    fs::write(base_path.join("dir2/file5.log"), b"Another log file")?;

    for file in [
        "file1.txt",
        "file2.log",
        "dir1/file3.txt",
        "dir1/subdir1/file4.txt",
        "dir2/file5.log",
    ] {
        fs::set_permissions(base_path.join(file), fs::Permissions::from_mode(0o644))?;
    }

    Ok(temp_dir)
}

/// Creates a root-like tree: a readable file, a virtual `sys` tree and a
/// symlink pointing at the file
pub fn create_root_like_structure() -> Result<TempDir> {
    let temp_dir = create_temp_dir()?;
    let base_path = temp_dir.path();

    fs::write(base_path.join("a.txt"), b"0123456789")?;
    fs::set_permissions(base_path.join("a.txt"), fs::Permissions::from_mode(0o644))?;
    fs::create_dir_all(base_path.join("sys/x"))?;
    fs::write(base_path.join("sys/x/inside"), b"kernel")?;
    symlink("a.txt", base_path.join("link"))?;

    Ok(temp_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_file_structure() {
        let temp_dir = create_test_file_structure().unwrap();
        let base_path = temp_dir.path();

        assert!(base_path.join("dir1/subdir1").is_dir());
        assert!(base_path.join("dir2/file5.log").is_file());
    }

    #[test]
    fn test_create_root_like_structure() {
        let temp_dir = create_root_like_structure().unwrap();
        let link = fs::read_link(temp_dir.path().join("link")).unwrap();
        assert_eq!(link.to_str(), Some("a.txt"));
    }
}
