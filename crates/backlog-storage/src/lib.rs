use backlog_core::BacklogDocument;
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backlog store not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("backlog store {} is not valid JSON: {message}", .path.display())]
    Malformed { path: PathBuf, message: String },
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("backlog store is locked by another process ({})", .0.display())]
    Locked(PathBuf),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// The single JSON document holding every story record.
#[derive(Debug, Clone)]
pub struct BacklogStore {
    path: PathBuf,
}

impl BacklogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<BacklogDocument, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(self.path.clone()))
            }
            Err(err) => return Err(io_error(&self.path)(err)),
        };
        let doc: BacklogDocument =
            serde_json::from_str(&raw).map_err(|err| StorageError::Malformed {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        debug!(
            path = %self.path.display(),
            stories = doc.backlog.len(),
            "loaded backlog store"
        );
        Ok(doc)
    }

    /// Load the store, or start an empty document when it does not exist
    /// yet. A malformed store is still an error.
    pub fn load_or_default(&self) -> Result<BacklogDocument, StorageError> {
        match self.load() {
            Err(StorageError::NotFound(_)) => {
                debug!(path = %self.path.display(), "starting a new backlog store");
                Ok(BacklogDocument::default())
            }
            other => other,
        }
    }

    /// Stamp the metadata and replace the file atomically: the document is
    /// written next to the store and renamed over it.
    pub fn save(&self, doc: &mut BacklogDocument, today: &str) -> Result<(), StorageError> {
        doc.metadata.last_updated = Some(today.to_string());
        doc.metadata.total_backlog_stories = Some(doc.backlog.len());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let mut payload = serde_json::to_string_pretty(doc)?;
        payload.push('\n');

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, payload).map_err(io_error(&tmp_path))?;
        if let Err(err) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_error(&self.path)(err));
        }
        debug!(
            path = %self.path.display(),
            stories = doc.backlog.len(),
            "saved backlog store"
        );
        Ok(())
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| OsString::from("backlog"));
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Take the single-writer lock for a load, mutate, save cycle. Fails
    /// fast instead of waiting when another process holds it.
    pub fn lock(&self) -> Result<StoreLock, StorageError> {
        StoreLock::try_acquire(&self.lock_path())
    }
}

/// Advisory exclusive lock next to the store, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    fn try_acquire(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_error(path))?;

        if file.try_lock_exclusive().is_err() {
            warn!(path = %path.display(), "backlog store lock is held elsewhere");
            return Err(StorageError::Locked(path.to_path_buf()));
        }

        let owner = format!("pid={}\n", std::process::id());
        file.set_len(0).map_err(io_error(path))?;
        file.write_all(owner.as_bytes()).map_err(io_error(path))?;
        file.flush().map_err(io_error(path))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
