//! The best-effort "latest" pointer.

use std::fs;
use std::io;
use std::path::Path;

/// How the latest pointer was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// A symbolic link.
    Symlink,
    /// A full copy of the artifacts directory.
    Copy,
}

/// Makes `link` point at `target`, by linking or copying.
#[cfg_attr(test, mockall::automock)]
pub trait LinkOrCopy: Send + Sync {
    /// Creates or replaces the pointer.
    ///
    /// # Errors
    ///
    /// Returns an IO error if neither linking nor copying worked.
    fn link_or_copy(&self, target: &Path, link: &Path) -> io::Result<LinkKind>;
}

/// Filesystem implementation: symlink first, recursive copy as fallback.
///
/// An existing pointer is replaced only if it is a symlink or a previous
/// artifacts copy (a directory holding `manifest.json`). Anything else at
/// that path is left alone and reported as an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLinker;

impl LinkOrCopy for FsLinker {
    fn link_or_copy(&self, target: &Path, link: &Path) -> io::Result<LinkKind> {
        remove_previous(link)?;
        match symlink_dir(target, link) {
            Ok(()) => Ok(LinkKind::Symlink),
            Err(err) => {
                tracing::debug!(error = %err, "Symlink failed, copying instead");
                copy_dir(target, link)?;
                Ok(LinkKind::Copy)
            }
        }
    }
}

fn remove_previous(link: &Path) -> io::Result<()> {
    let Ok(meta) = fs::symlink_metadata(link) else {
        return Ok(());
    };
    if meta.file_type().is_symlink() {
        // directory symlinks on Windows are removed as directories
        fs::remove_file(link).or_else(|_| fs::remove_dir(link))
    } else if meta.is_dir() && link.join("manifest.json").is_file() {
        fs::remove_dir_all(link)
    } else {
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a previous artifacts link", link.display()),
        ))
    }
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(not(any(unix, windows)))]
fn symlink_dir(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks not supported"))
}

fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts(root: &Path, name: &str) -> std::path::PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("structure")).unwrap();
        fs::write(dir.join("manifest.json"), "{}").unwrap();
        fs::write(dir.join("structure").join("summary.txt"), name).unwrap();
        dir
    }

    #[test]
    fn test_link_then_replace() {
        let tmp = tempfile::tempdir().unwrap();
        let first = artifacts(tmp.path(), "run-1");
        let second = artifacts(tmp.path(), "run-2");
        let latest = tmp.path().join("latest");

        FsLinker.link_or_copy(&first, &latest).unwrap();
        FsLinker.link_or_copy(&second, &latest).unwrap();

        let summary = fs::read_to_string(latest.join("structure").join("summary.txt")).unwrap();
        assert_eq!(summary, "run-2");
    }

    #[test]
    fn test_copy_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let source = artifacts(tmp.path(), "run-1");
        let dest = tmp.path().join("copy");

        copy_dir(&source, &dest).unwrap();

        assert!(dest.join("manifest.json").is_file());
        assert!(dest.join("structure").join("summary.txt").is_file());
    }

    #[test]
    fn test_foreign_data_is_not_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let run = artifacts(tmp.path(), "run-1");
        let latest = tmp.path().join("latest");
        fs::create_dir_all(&latest).unwrap();
        fs::write(latest.join("notes.txt"), "keep me").unwrap();

        let err = FsLinker.link_or_copy(&run, &latest).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert!(latest.join("notes.txt").is_file());
    }
}
