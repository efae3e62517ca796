use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::Error;

/// The picture root and its named sub-directories.
#[derive(Debug, Clone)]
pub struct PictureLibrary {
    root: PathBuf,
}

impl PictureLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Names of the directories directly under the root, sorted.
    pub fn sub_directories(&self) -> Vec<String> {
        WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(root = %self.root.display(), error = %err, "failed to list picture directory");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect()
    }

    pub fn create_sub_directory(&self, name: &str) -> Result<PathBuf, Error> {
        let name = checked_name(name).ok_or_else(|| Error::InvalidDirectoryName(name.into()))?;
        let path = self.root.join(name);
        fs::create_dir_all(&path)?;
        info!(path = %path.display(), "created picture directory");
        Ok(path)
    }

    /// Writes `bytes` as `file_name` inside `directory`, creating the
    /// directory when needed. Existing files are never replaced.
    pub fn upload(
        &self,
        directory: &str,
        file_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<PathBuf, Error> {
        ensure_image(file_name, content_type)?;
        let dir_name =
            checked_name(directory).ok_or_else(|| Error::InvalidDirectoryName(directory.into()))?;
        let file = checked_name(file_name).ok_or_else(|| Error::InvalidFileName(file_name.into()))?;

        let dir = self.root.join(dir_name);
        fs::create_dir_all(&dir)?;
        let path = dir.join(file);

        let mut out = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(out) => out,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::DuplicateFile {
                    directory: dir_name.to_string(),
                    file: file.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        out.write_all(bytes)?;
        out.sync_all()?;
        info!(path = %path.display(), bytes = bytes.len(), "picture uploaded");
        Ok(path)
    }
}

/// Rejects uploads whose declared content type is not `image/*`.
pub fn ensure_image(file_name: &str, content_type: Option<&str>) -> Result<(), Error> {
    match content_type {
        Some(kind) if kind.trim().to_ascii_lowercase().starts_with("image/") => Ok(()),
        _ => Err(Error::NotAnImage(file_name.to_string())),
    }
}

fn checked_name(name: &str) -> Option<&str> {
    let name = name.trim();
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    (!bad).then_some(name)
}
