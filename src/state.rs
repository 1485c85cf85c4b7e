use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Lifecycle phase the worker last reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    Idle,
    Fetching,
    Translating,
    Saving,
    Error,
    Completed,
}

/// Durable record of crawl progress for one book. Mutated only by the worker
/// while a run is active; the control surface flips `running` and seeds
/// `current_url` between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlState {
    pub running: bool,
    /// Frontier: the next chapter page to fetch.
    pub current_url: Option<String>,
    pub chapter_count: u64,
    /// Every successfully processed chapter URL, for cycle detection.
    pub visited: BTreeSet<String>,
    pub last_action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    /// Chapter number the failed iteration was trying to produce.
    pub chapter: u64,
    pub url: String,
    pub message: String,
}

/// Owns `state.json` and `errors.json` under the book data directory. Each
/// file is loaded with safe defaults and rewritten whole on every mutation.
#[derive(Debug, Clone)]
pub struct StateStore {
    base_dir: PathBuf,
}

impl StateStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn state_path(&self) -> PathBuf {
        self.base_dir.join("state.json")
    }

    fn errors_path(&self) -> PathBuf {
        self.base_dir.join("errors.json")
    }

    /// A missing state file is a fresh start; one that no longer parses is
    /// reported and replaced with defaults instead of aborting startup.
    pub async fn load_state(&self) -> anyhow::Result<CrawlState> {
        let path = self.state_path();
        match read_json(&path).await? {
            Loaded::Value(state) => Ok(state),
            Loaded::Missing => {
                tracing::info!("no prior crawl state; starting fresh");
                Ok(CrawlState::default())
            }
            Loaded::Corrupt(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "crawl state file is corrupt; starting from defaults"
                );
                Ok(CrawlState::default())
            }
        }
    }

    pub async fn save_state(&self, state: &CrawlState) -> anyhow::Result<()> {
        write_json_atomic(&self.state_path(), state)
            .await
            .context("write state.json")
    }

    pub async fn load_errors(&self) -> anyhow::Result<Vec<ErrorRecord>> {
        let path = self.errors_path();
        match read_json(&path).await? {
            Loaded::Value(errors) => Ok(errors),
            Loaded::Missing => Ok(Vec::new()),
            Loaded::Corrupt(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "error log file is corrupt; starting from an empty log"
                );
                Ok(Vec::new())
            }
        }
    }

    pub async fn append_error(&self, record: ErrorRecord) -> anyhow::Result<()> {
        let mut errors = self.load_errors().await?;
        errors.push(record);
        write_json_atomic(&self.errors_path(), &errors)
            .await
            .context("write errors.json")
    }

    pub async fn clear_errors(&self) -> anyhow::Result<()> {
        match fs::remove_file(self.errors_path()).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).context("remove errors.json"),
        }
    }
}

pub(crate) enum Loaded<T> {
    Value(T),
    Missing,
    Corrupt(serde_json::Error),
}

pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> anyhow::Result<Loaded<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Loaded::Missing),
        Err(err) => {
            return Err(err).with_context(|| format!("read: {}", path.display()));
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Loaded::Value(value)),
        Err(err) => Ok(Loaded::Corrupt(err)),
    }
}

pub(crate) async fn write_json_atomic<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
