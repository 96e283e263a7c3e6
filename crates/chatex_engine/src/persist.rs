use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("cannot use {path:?} as output directory: {reason}")]
    OutputDir { path: PathBuf, reason: String },
    #[error("file name {0:?} must be a single path component")]
    NotAFileName(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

fn output_dir_error(path: &Path, reason: impl ToString) -> PersistError {
    PersistError::OutputDir {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Creates `dir` when missing and fails early when it is a file.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(output_dir_error(dir, "path is not a directory")),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).map_err(|e| output_dir_error(dir, e))
        }
        Err(err) => Err(output_dir_error(dir, err)),
    }
}

/// Delivers artifacts into one directory. Each write lands in a sibling temp
/// file first, so a reader never sees a half-written export.
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `content` to `{dir}/{filename}`, replacing an earlier export of
    /// the same name.
    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        let mut components = Path::new(filename).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Err(PersistError::NotAFileName(filename.to_string())),
        }
        ensure_output_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut staged = tempfile::Builder::new()
            .prefix(".chatex-")
            .suffix(".part")
            .tempfile_in(&self.dir)?;
        staged.write_all(content)?;
        staged.as_file_mut().sync_all()?;
        persist_over(staged, &target)?;
        Ok(target)
    }
}

fn persist_over(staged: NamedTempFile, target: &Path) -> Result<(), PersistError> {
    // Rename does not replace existing files on every platform.
    if target.is_file() {
        fs::remove_file(target)?;
    }
    staged.persist(target).map_err(|e| PersistError::Io(e.error))?;
    Ok(())
}
