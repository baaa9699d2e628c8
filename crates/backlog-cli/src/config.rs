use anyhow::{Context as _, Result};
use backlog_core::report::DEFAULT_STALE_AFTER_DAYS;
use backlog_core::{BacklogDocument, DEFAULT_AUTHOR};
use backlog_storage::BacklogStore;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CONFIG_RELATIVE: &str = ".backlog/config.json";
const DEFAULT_STORE: &str = "backlog/PRIORITIZATION.json";
const DEFAULT_BACKLOG_DIR: &str = "backlog";
const DEFAULT_STAGING_DIR: &str = "staging";
const DEFAULT_REPORTS_DIR: &str = "reports";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogConfig {
    store_path: Option<String>,
    backlog_dir: Option<String>,
    staging_dir: Option<String>,
    reports_dir: Option<String>,
    author: Option<String>,
    stale_after_days: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub store: PathBuf,
    pub backlog_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub reports_dir: PathBuf,
}

impl Paths {
    pub fn staging_new(&self) -> PathBuf {
        self.staging_dir.join("new")
    }

    pub fn staging_bulk(&self) -> PathBuf {
        self.staging_dir.join("bulk")
    }

    pub fn staging_processed(&self) -> PathBuf {
        self.staging_dir.join("processed")
    }

    /// Record `file_path` values are relative to the project root.
    pub fn resolve_record_path(&self, file_path: &str) -> PathBuf {
        let path = Path::new(file_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn relative_to_root(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Everything a command needs: resolved paths, the store handle and the
/// clock used for record dates.
pub struct AppContext {
    pub paths: Paths,
    pub store: BacklogStore,
    pub author: String,
    pub stale_after_days: i64,
    pub today: String,
}

impl AppContext {
    pub fn new(root: Option<PathBuf>, file: Option<PathBuf>) -> Result<Self> {
        let root = match root {
            Some(root) => root,
            None => std::env::current_dir().context("Failed to resolve current directory")?,
        };
        let config = load_config(&root).unwrap_or_default();

        let store = file
            .or_else(|| env_value("BACKLOG_FILE").map(PathBuf::from))
            .or_else(|| config.store_path.as_deref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE));
        let under_root = |path: PathBuf| {
            if path.is_absolute() {
                path
            } else {
                root.join(path)
            }
        };
        let paths = Paths {
            store: under_root(store),
            backlog_dir: under_root(PathBuf::from(
                config.backlog_dir.as_deref().unwrap_or(DEFAULT_BACKLOG_DIR),
            )),
            staging_dir: under_root(PathBuf::from(
                config.staging_dir.as_deref().unwrap_or(DEFAULT_STAGING_DIR),
            )),
            reports_dir: under_root(PathBuf::from(
                config.reports_dir.as_deref().unwrap_or(DEFAULT_REPORTS_DIR),
            )),
            root: root.clone(),
        };
        let author = env_value("BACKLOG_AUTHOR")
            .or(config.author)
            .unwrap_or_else(|| DEFAULT_AUTHOR.to_string());
        debug!(store = %paths.store.display(), "resolved backlog paths");

        Ok(Self {
            store: BacklogStore::new(&paths.store),
            paths,
            author,
            stale_after_days: config.stale_after_days.unwrap_or(DEFAULT_STALE_AFTER_DAYS),
            today: backlog_core::today_string(),
        })
    }

    pub fn load(&self) -> Result<BacklogDocument> {
        self.store
            .load()
            .with_context(|| format!("Failed to load {}", self.store.path().display()))
    }

    /// Run one locked load, mutate, save cycle. The document is only saved
    /// when `mutate` reports a change.
    pub fn update_store<T>(
        &self,
        create_missing: bool,
        mutate: impl FnOnce(&mut BacklogDocument) -> Result<(T, bool)>,
    ) -> Result<T> {
        let _lock = self.store.lock()?;
        let mut doc = if create_missing {
            self.store.load_or_default()
        } else {
            self.store.load()
        }
        .with_context(|| format!("Failed to load {}", self.store.path().display()))?;

        let (value, changed) = mutate(&mut doc)?;
        if changed {
            self.store
                .save(&mut doc, &self.today)
                .with_context(|| format!("Failed to save {}", self.store.path().display()))?;
        }
        Ok(value)
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn load_config(root: &Path) -> Option<BacklogConfig> {
    let local = root.join(CONFIG_RELATIVE);
    let path = if local.exists() {
        local
    } else {
        dirs::home_dir()?.join(CONFIG_RELATIVE)
    };
    let content = fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<BacklogConfig>(&content) {
        Ok(config) => {
            debug!(path = %path.display(), "loaded config");
            Some(config)
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to parse config, using defaults");
            None
        }
    }
}

pub fn write_text(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// A context rooted at `root` whose store already holds `stories`.
#[cfg(test)]
pub(crate) fn seeded_context(root: &Path, stories: Vec<backlog_core::Story>) -> AppContext {
    let ctx = AppContext::new(Some(root.to_path_buf()), Some(PathBuf::from("store.json")))
        .expect("context");
    let mut doc = BacklogDocument {
        backlog: stories,
        ..BacklogDocument::default()
    };
    ctx.store.save(&mut doc, "2020-01-01").expect("seed store");
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_text(
            &dir.path().join(CONFIG_RELATIVE),
            r#"{"storePath": "data/store.json", "reportsDir": "out", "staleAfterDays": 30}"#,
        )
        .expect("write config");
        let ctx = AppContext::new(Some(dir.path().to_path_buf()), None).expect("context");
        assert_eq!(ctx.paths.store, dir.path().join("data/store.json"));
        assert_eq!(ctx.paths.reports_dir, dir.path().join("out"));
        assert_eq!(ctx.paths.backlog_dir, dir.path().join("backlog"));
        assert_eq!(ctx.stale_after_days, 30);
    }

    #[test]
    fn explicit_file_wins_over_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_text(
            &dir.path().join(CONFIG_RELATIVE),
            r#"{"storePath": "data/store.json"}"#,
        )
        .expect("write config");
        let ctx = AppContext::new(
            Some(dir.path().to_path_buf()),
            Some(PathBuf::from("custom.json")),
        )
        .expect("context");
        assert_eq!(ctx.paths.store, dir.path().join("custom.json"));
    }

    #[test]
    fn update_store_saves_only_on_change() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = AppContext::new(
            Some(dir.path().to_path_buf()),
            Some(PathBuf::from("store.json")),
        )
        .expect("context");
        ctx.update_store(true, |_| Ok(((), false))).expect("no-op");
        assert!(!ctx.paths.store.exists());
        ctx.update_store(true, |_| Ok(((), true))).expect("save");
        assert!(ctx.paths.store.exists());
        assert!(ctx.update_store(false, |_| Ok(((), true))).is_ok());
    }
}
