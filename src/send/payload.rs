//! What a send session serves, and its cleanup.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::archive;

/// A file ready to be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Name offered to the client in `Content-Disposition`
    pub filename: String,
    pub path: PathBuf,
    /// Set for temporary archives; removed once the session has stopped
    pub delete_after_transfer: bool,
}

impl Payload {
    /// Serve an existing file as is.
    pub fn file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let filename = base_name(&path)?;
        Ok(Self {
            filename,
            path,
            delete_after_transfer: false,
        })
    }

    /// Resolve CLI paths: a lone regular file is served directly, anything else
    /// (a directory, several paths, or `zip`) becomes a temporary zip archive.
    pub fn resolve(paths: &[PathBuf], zip: bool) -> Result<Self> {
        if paths.is_empty() {
            bail!("Nothing to send: no paths given");
        }
        for path in paths {
            if !path.exists() {
                bail!("No such file or directory: {}", path.display());
            }
        }

        if let [single] = paths {
            if single.is_file() && !zip {
                return Self::file(single.clone());
            }
        }

        let filename = match paths {
            [single] => format!("{}.zip", base_name(single)?),
            _ => format!("qrdrop-{}.zip", &Uuid::new_v4().simple().to_string()[..8]),
        };
        let archive_path = std::env::temp_dir().join(format!("qrdrop-{}.zip", Uuid::new_v4()));

        tracing::info!(files = paths.len(), "Zipping payload into {filename}");
        if let Err(err) = archive::write_archive(paths, &archive_path) {
            let _ = std::fs::remove_file(&archive_path);
            return Err(err);
        }

        Ok(Self {
            filename,
            path: archive_path,
            delete_after_transfer: true,
        })
    }

    /// Remove the payload from disk (file or directory).
    pub fn delete(&self) -> Result<()> {
        let meta = std::fs::symlink_metadata(&self.path)
            .with_context(|| format!("Failed to stat {}", self.path.display()))?;
        if meta.is_dir() {
            std::fs::remove_dir_all(&self.path)
        } else {
            std::fs::remove_file(&self.path)
        }
        .with_context(|| format!("Failed to delete {}", self.path.display()))?;
        tracing::info!(path = %self.path.display(), "Deleted payload");
        Ok(())
    }
}

fn base_name(path: &Path) -> Result<String> {
    let canonical;
    let named = match path.file_name() {
        Some(_) => path,
        // `.` or `..` have no file name of their own
        None => {
            canonical = path
                .canonicalize()
                .with_context(|| format!("Failed to resolve {}", path.display()))?;
            canonical.as_path()
        }
    };
    named
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Cannot derive a file name from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn single_file_is_served_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        fs::write(&path, b"%PDF").unwrap();

        let payload = Payload::resolve(&[path.clone()], false).unwrap();
        assert_eq!(payload.filename, "report.pdf");
        assert_eq!(payload.path, path);
        assert!(!payload.delete_after_transfer);
    }

    #[test]
    fn directory_becomes_temp_archive() {
        let dir = tempfile::tempdir().unwrap();
        let album = dir.path().join("album");
        fs::create_dir(&album).unwrap();
        fs::write(album.join("one.jpg"), b"1").unwrap();

        let payload = Payload::resolve(&[album], false).unwrap();
        assert_eq!(payload.filename, "album.zip");
        assert!(payload.delete_after_transfer);
        assert!(payload.path.starts_with(std::env::temp_dir()));
        assert!(payload.path.exists());

        payload.delete().unwrap();
        assert!(!payload.path.exists());
    }

    #[test]
    fn zip_flag_archives_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"hi").unwrap();

        let payload = Payload::resolve(&[path], true).unwrap();
        assert_eq!(payload.filename, "notes.txt.zip");
        assert!(payload.delete_after_transfer);
        payload.delete().unwrap();
    }

    #[test]
    fn several_paths_get_generated_name() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let payload = Payload::resolve(&[a, b], false).unwrap();
        assert!(payload.filename.starts_with("qrdrop-"));
        assert!(payload.filename.ends_with(".zip"));
        payload.delete().unwrap();
    }

    #[test]
    fn missing_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = Payload::resolve(&[dir.path().join("ghost.bin")], false).unwrap_err();
        assert!(err.to_string().contains("ghost.bin"));
        assert!(Payload::resolve(&[], false).is_err());
    }

    #[test]
    fn deleting_twice_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmp.bin");
        fs::write(&path, b"x").unwrap();
        let payload = Payload {
            filename: "tmp.bin".into(),
            path,
            delete_after_transfer: true,
        };
        payload.delete().unwrap();
        assert!(payload.delete().is_err());
    }
}
