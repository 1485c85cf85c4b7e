use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::state::{Loaded, read_json, write_json_atomic};

/// Index entry for one saved chapter. Written once, never mutated; removed
/// only by a full reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub number: u64,
    /// Storage key of the rendered chapter body.
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[async_trait]
pub trait ChapterStore: Send + Sync {
    /// Renders `body` into an HTML fragment, persists it as chapter `number`,
    /// and appends the index record. Numbers must be contiguous from 1.
    async fn save(&self, number: u64, title: Option<&str>, body: &str) -> anyhow::Result<String>;

    /// All saved chapters, ordered by number.
    async fn list(&self) -> anyhow::Result<Vec<ChapterRecord>>;

    /// The stored fragment, or `None` when the chapter does not exist.
    async fn get(&self, number: u64) -> anyhow::Result<Option<String>>;

    /// Removes every stored chapter and the index. Not transactional.
    async fn delete_all(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct LocalFsChapterStore {
    base_dir: PathBuf,
}

impl LocalFsChapterStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.base_dir.join("index.json")
    }

    fn chapters_dir(&self) -> PathBuf {
        self.base_dir.join("chapters")
    }

    fn chapter_path(&self, key: &str) -> PathBuf {
        self.chapters_dir().join(format!("{key}.html"))
    }

    async fn read_index(&self) -> anyhow::Result<Vec<ChapterRecord>> {
        let path = self.index_path();
        match read_json(&path).await? {
            Loaded::Value(index) => Ok(index),
            Loaded::Missing => Ok(Vec::new()),
            Loaded::Corrupt(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "chapter index is corrupt; treating it as empty"
                );
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl ChapterStore for LocalFsChapterStore {
    async fn save(&self, number: u64, title: Option<&str>, body: &str) -> anyhow::Result<String> {
        let mut index = self.read_index().await?;
        let expected = index.last().map(|r| r.number + 1).unwrap_or(1);
        if number != expected {
            anyhow::bail!("chapter numbers must be contiguous: expected {expected}, got {number}");
        }

        let key = chapter_key(number);
        let path = self.chapter_path(&key);
        fs::create_dir_all(self.chapters_dir())
            .await
            .with_context(|| format!("create chapters dir: {}", self.chapters_dir().display()))?;
        fs::write(&path, render_fragment(title, body))
            .await
            .with_context(|| format!("write chapter: {}", path.display()))?;

        index.push(ChapterRecord {
            number,
            key: key.clone(),
            title: title.map(str::to_owned),
        });
        write_json_atomic(&self.index_path(), &index)
            .await
            .context("write index.json")?;

        Ok(key)
    }

    async fn list(&self) -> anyhow::Result<Vec<ChapterRecord>> {
        self.read_index().await
    }

    async fn get(&self, number: u64) -> anyhow::Result<Option<String>> {
        if number == 0 {
            return Ok(None);
        }
        let path = self.chapter_path(&chapter_key(number));
        match fs::read_to_string(&path).await {
            Ok(fragment) => Ok(Some(fragment)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read chapter: {}", path.display())),
        }
    }

    async fn delete_all(&self) -> anyhow::Result<()> {
        match fs::remove_dir_all(self.chapters_dir()).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("remove chapters dir: {}", self.chapters_dir().display())
                });
            }
        }
        match fs::remove_file(self.index_path()).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).context("remove index.json"),
        }
    }
}

fn chapter_key(number: u64) -> String {
    format!("{number:04}")
}

/// Minimal readable document fragment: optional heading, one `<p>` per
/// blank-line-separated paragraph.
fn render_fragment(title: Option<&str>, body: &str) -> String {
    let mut out = String::with_capacity(body.len() + 64);
    if let Some(title) = title {
        out.push_str("<h1>");
        push_escaped(&mut out, title);
        out.push_str("</h1>\n");
    }
    for paragraph in body.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        out.push_str("<p>");
        push_escaped(&mut out, paragraph);
        out.push_str("</p>\n");
    }
    out
}

fn push_escaped(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}
