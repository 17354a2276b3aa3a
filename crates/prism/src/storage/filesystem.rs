use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::debug;

use crate::error::StorageError;
use crate::sanitize::sanitize_filename;

/// Sub-folder (next to the source) for successfully processed files.
pub const ARCHIVE_DIR: &str = "archive";
/// Sub-folder (next to the source) for files that need manual review.
pub const ERRORS_DIR: &str = "errors";

/// Move a file from `src` to `dst`. Uses `rename` first and falls back to
/// copy + delete for cross-device moves.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

fn split_extension(filename: &str) -> (&str, Option<&str>) {
    match filename.rfind('.') {
        Some(dot_pos) if dot_pos > 0 => (&filename[..dot_pos], Some(&filename[dot_pos..])),
        _ => (filename, None),
    }
}

fn numbered(filename: &str, counter: u32) -> String {
    match split_extension(filename) {
        (base, Some(ext)) => format!("{}_{}{}", base, counter, ext),
        (base, None) => format!("{}_{}", base, counter),
    }
}

/// Staging for uploaded bytes plus archive / error moves for processed
/// sources.
#[derive(Debug, Clone)]
pub struct IntakeStorage {
    staging_directory: PathBuf,
}

impl IntakeStorage {
    pub fn new<P: AsRef<Path>>(staging_directory: P) -> Self {
        Self {
            staging_directory: staging_directory.as_ref().to_path_buf(),
        }
    }

    pub fn staging_directory(&self) -> &Path {
        &self.staging_directory
    }

    /// Writes attachment bytes to `<staging>/<report id>_<sanitized name>`.
    /// Never overwrites an existing file.
    pub fn stage(&self, report_id: &str, filename: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
        self.ensure_directory(&self.staging_directory)?;
        let name = format!("{}_{}", report_id, sanitize_filename(filename));

        for counter in 1..=1000 {
            let candidate = if counter == 1 {
                name.clone()
            } else {
                numbered(&name, counter)
            };
            let path = self.staging_directory.join(&candidate);

            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    file.write_all(content).map_err(|e| StorageError::WriteFile {
                        path: path.clone(),
                        source: e,
                    })?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StorageError::WriteFile { path, source: e }),
            }
        }

        Err(StorageError::FileExists(self.staging_directory.join(name)))
    }

    /// Moves a processed source to `<parent>/archive/<timestamp>_<name>`.
    pub fn archive(&self, source: &Path) -> Result<PathBuf, StorageError> {
        let prefix = Utc::now().format("%Y%m%dT%H%M%S");
        let name = format!("{}_{}", prefix, Self::file_name(source));
        self.move_into(source, ARCHIVE_DIR, &name)
    }

    /// Moves a failed source to `<parent>/errors/<name>` for manual review.
    pub fn quarantine(&self, source: &Path) -> Result<PathBuf, StorageError> {
        let name = Self::file_name(source);
        self.move_into(source, ERRORS_DIR, &name)
    }

    fn file_name(source: &Path) -> String {
        source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string()
    }

    fn move_into(&self, source: &Path, folder: &str, name: &str) -> Result<PathBuf, StorageError> {
        let parent = source.parent().unwrap_or_else(|| Path::new("."));
        let target_dir = parent.join(folder);
        self.ensure_directory(&target_dir)?;
        let target = self.resolve_conflict(&target_dir, name)?;
        move_file(source, &target)?;
        debug!(
            "Moved {} to {}/",
            crate::sanitize::redact_path(source),
            folder
        );
        Ok(target)
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// First free name among `name`, `name_2`, `name_3`, ...
    fn resolve_conflict(&self, directory: &Path, filename: &str) -> Result<PathBuf, StorageError> {
        let path = directory.join(filename);
        if std::fs::symlink_metadata(&path).is_err() {
            return Ok(path);
        }

        for counter in 2..=1000 {
            let candidate = directory.join(numbered(filename, counter));
            if std::fs::symlink_metadata(&candidate).is_err() {
                return Ok(candidate);
            }
        }

        Err(StorageError::FileExists(path))
    }
}
