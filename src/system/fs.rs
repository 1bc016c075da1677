use crate::error::NetworkError;
use anyhow::{Context, Result};
use log::debug;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{
    fs::{self, Permissions},
    io::{ErrorKind, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

/// Access to the configuration files
///
/// The stores read the whole file on every call and write it back in one go.
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait FileSystem {
    fn exists(&self, path: &Path) -> bool;

    /// Returns `None` if the file does not exist
    fn read_to_string(&self, path: &Path) -> Result<Option<String>>;

    /// Replace `path` with `contents` so readers see either the old or the new file
    fn write_atomic(&self, path: &Path, contents: &str, mode: u32) -> Result<()>;

    /// Returns `false` if there was nothing to remove
    fn remove(&self, path: &Path) -> Result<bool>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_to_string(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(NetworkError::io(path, e)).context("failed to read config file"),
        }
    }

    fn write_atomic(&self, path: &Path, contents: &str, mode: u32) -> Result<()> {
        debug!("write {}", path.display());

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        fs::create_dir_all(&dir)
            .map_err(|e| NetworkError::io(&dir, e))
            .context("failed to create config directory")?;

        let mut file = NamedTempFile::new_in(&dir)
            .map_err(|e| NetworkError::io(&dir, e))
            .context("failed to create temp file")?;

        file.write_all(contents.as_bytes())
            .and_then(|_| file.as_file().sync_all())
            .map_err(|e| NetworkError::io(file.path(), e))
            .context("failed to write temp file")?;

        file.as_file()
            .set_permissions(Permissions::from_mode(mode))
            .map_err(|e| NetworkError::io(file.path(), e))
            .context("failed to set permissions")?;

        file.persist(path)
            .map_err(|e| NetworkError::io(path, e.error))
            .context("failed to replace config file")?;

        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(NetworkError::io(path, e)).context("failed to remove config file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_reads_as_none() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let content = LocalFileSystem
            .read_to_string(&dir.path().join("dhcpcd.conf"))
            .expect("read should not fail");

        assert_eq!(content, None);
    }

    #[test]
    fn write_atomic_creates_parent_and_sets_mode() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("wpa_supplicant").join("wpa_supplicant.conf");

        LocalFileSystem
            .write_atomic(&path, "country=CH\n", 0o600)
            .expect("write should succeed");

        assert_eq!(
            fs::read_to_string(&path).expect("file should exist"),
            "country=CH\n"
        );
        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn write_atomic_replaces_existing_content() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("dhcpcd.conf");
        fs::write(&path, "old content that is longer\n").expect("seed file");

        LocalFileSystem
            .write_atomic(&path, "new\n", 0o644)
            .expect("write should succeed");

        assert_eq!(fs::read_to_string(&path).expect("read back"), "new\n");
    }

    #[test]
    fn remove_reports_whether_file_existed() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("hostapd.conf");
        fs::write(&path, "ssid=test\n").expect("seed file");

        assert!(LocalFileSystem.remove(&path).expect("remove"));
        assert!(!LocalFileSystem.remove(&path).expect("second remove"));
        assert!(!LocalFileSystem.exists(&path));
    }
}
