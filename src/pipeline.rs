use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::extract::Extractor;
use crate::state::{Action, CrawlState, ErrorRecord, StateStore};
use crate::store::{ChapterRecord, ChapterStore, LocalFsChapterStore};
use crate::translate::Translator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    pub running: bool,
    pub action: Action,
    pub chapter_count: u64,
    pub error_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// One book's crawl-translate-persist pipeline plus its control surface.
///
/// The worker task is the sole writer of progress fields while a run is
/// active; `start`/`stop`/`reset` only flip the running flag and seed the
/// frontier between runs. Every mutation is persisted immediately, so a crash
/// loses at most the in-flight chapter.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<CrawlState>,
    state_store: StateStore,
    chapters: Arc<dyn ChapterStore>,
    extractor: Extractor,
    translator: Arc<dyn Translator>,
    delay: Duration,
    run: Mutex<Run>,
}

#[derive(Default)]
struct Run {
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Opens (or initializes) the persisted book data under `data_dir`.
    pub async fn open(
        data_dir: &Path,
        extractor: Extractor,
        translator: Arc<dyn Translator>,
        delay: Duration,
    ) -> anyhow::Result<Self> {
        let state_store = StateStore::new(data_dir);
        let mut state = state_store.load_state().await.context("load crawl state")?;
        if state.running {
            // The flag survived a crash or hard kill; no worker exists now.
            tracing::warn!("crawl state was marked running at startup; clearing the stale flag");
            state.running = false;
            state.last_action = Action::Idle;
            state_store
                .save_state(&state)
                .await
                .context("save crawl state")?;
        }

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                state_store,
                chapters: Arc::new(LocalFsChapterStore::new(data_dir)),
                extractor,
                translator,
                delay,
                run: Mutex::new(Run::default()),
            }),
        })
    }

    /// Begins or resumes the crawl. A seed URL replaces the frontier; it is
    /// only applied while stopped, since the worker owns the frontier during
    /// a run. Calling start while running is a no-op.
    pub async fn start(&self, seed_url: Option<Url>) -> anyhow::Result<StartOutcome> {
        let mut run = self.inner.run.lock().await;
        let mut state = self.inner.state.lock().await;
        if state.running {
            return Ok(StartOutcome::AlreadyRunning);
        }

        if let Some(url) = seed_url {
            state.current_url = Some(url.to_string());
        }
        if state.current_url.is_none() {
            anyhow::bail!("no chapter url to crawl: pass a start url or resume existing state");
        }

        state.running = true;
        state.last_action = Action::Idle;
        self.inner
            .state_store
            .save_state(&state)
            .await
            .context("save crawl state")?;
        tracing::info!(url = state.current_url.as_deref().unwrap_or(""), "crawl started");
        drop(state);

        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        run.cancel = Some(cancel.clone());
        run.handle = Some(tokio::spawn(run_loop(inner, cancel)));
        Ok(StartOutcome::Started)
    }

    /// Requests a graceful halt. The in-flight chapter finishes; the worker
    /// observes the cleared flag at the top of its next iteration. Stopping
    /// an idle pipeline is a no-op.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let run = self.inner.run.lock().await;
        let mut state = self.inner.state.lock().await;
        if !state.running {
            return Ok(());
        }

        state.running = false;
        self.inner
            .state_store
            .save_state(&state)
            .await
            .context("save crawl state")?;
        drop(state);

        // Wake the politeness sleep so the stop is observed promptly.
        if let Some(cancel) = &run.cancel {
            cancel.cancel();
        }
        tracing::info!("crawl stop requested");
        Ok(())
    }

    /// Waits for the background worker to finish its current run.
    pub async fn wait(&self) -> anyhow::Result<()> {
        let handle = self.inner.run.lock().await.handle.take();
        if let Some(handle) = handle {
            handle.await.context("join crawl worker")?;
        }
        Ok(())
    }

    /// Wipes all persisted book data. Rejected while a run is active.
    pub async fn reset(&self) -> anyhow::Result<()> {
        let _run = self.inner.run.lock().await;
        let mut state = self.inner.state.lock().await;
        if state.running {
            anyhow::bail!("crawl is running; stop it before resetting");
        }

        self.inner
            .chapters
            .delete_all()
            .await
            .context("delete stored chapters")?;
        self.inner
            .state_store
            .clear_errors()
            .await
            .context("clear error log")?;
        *state = CrawlState::default();
        self.inner
            .state_store
            .save_state(&state)
            .await
            .context("save crawl state")?;
        tracing::info!("book data reset");
        Ok(())
    }

    pub async fn status(&self) -> anyhow::Result<PipelineStatus> {
        let state = self.inner.state.lock().await;
        let errors = self
            .inner
            .state_store
            .load_errors()
            .await
            .context("load error log")?;
        Ok(PipelineStatus {
            running: state.running,
            action: state.last_action,
            chapter_count: state.chapter_count,
            error_count: errors.len(),
        })
    }

    pub async fn list_chapters(&self) -> anyhow::Result<Vec<ChapterRecord>> {
        self.inner.chapters.list().await
    }

    pub async fn get_chapter(&self, number: u64) -> anyhow::Result<Option<String>> {
        self.inner.chapters.get(number).await
    }

    pub async fn list_errors(&self) -> anyhow::Result<Vec<ErrorRecord>> {
        self.inner.state_store.load_errors().await
    }
}

enum Iteration {
    Continue,
    Finished,
}

async fn run_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    loop {
        match run_iteration(&inner).await {
            Ok(Iteration::Continue) => {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(inner.delay) => {}
                }
            }
            Ok(Iteration::Finished) => break,
            Err(err) => {
                // Persisting the failure itself failed; nothing left to do
                // but log and bail out of the run.
                tracing::error!(error = %format!("{err:#}"), "crawl worker could not persist its state");
                break;
            }
        }
    }
}

/// Advances the crawl by at most one chapter. Chapter-level failures are
/// recorded and end the run; the returned `Err` is reserved for persistence
/// failures while doing that bookkeeping.
async fn run_iteration(inner: &Inner) -> anyhow::Result<Iteration> {
    // Dequeue the frontier, or finish.
    let (url, attempted) = {
        let mut state = inner.state.lock().await;
        if !state.running {
            state.last_action = Action::Idle;
            inner.state_store.save_state(&state).await?;
            tracing::info!(chapters = state.chapter_count, "crawl stopped");
            return Ok(Iteration::Finished);
        }
        let Some(url) = state.current_url.clone() else {
            state.running = false;
            state.last_action = Action::Completed;
            inner.state_store.save_state(&state).await?;
            tracing::info!(chapters = state.chapter_count, "crawl completed");
            return Ok(Iteration::Finished);
        };
        if state.visited.contains(&url) {
            // A "next" link pointing back into the chain would loop forever.
            state.running = false;
            state.last_action = Action::Idle;
            inner.state_store.save_state(&state).await?;
            tracing::warn!(url = %url, "next link points at an already processed chapter; stopping");
            return Ok(Iteration::Finished);
        }
        state.last_action = Action::Fetching;
        inner.state_store.save_state(&state).await?;
        (url, state.chapter_count + 1)
    };

    match crawl_one(inner, &url, attempted).await {
        Ok(next_url) => {
            let mut state = inner.state.lock().await;
            state.visited.insert(url);
            state.chapter_count = attempted;
            state.current_url = next_url.map(|u| u.to_string());
            if state.current_url.is_none() {
                state.running = false;
                state.last_action = Action::Completed;
                inner.state_store.save_state(&state).await?;
                tracing::info!(chapters = state.chapter_count, "crawl completed");
                return Ok(Iteration::Finished);
            }
            inner.state_store.save_state(&state).await?;
            tracing::info!(chapter = attempted, next = state.current_url.as_deref().unwrap_or(""), "chapter saved");
            Ok(Iteration::Continue)
        }
        Err(err) => {
            let message = format!("{err:#}");
            tracing::error!(chapter = attempted, url = %url, error = %message, "chapter failed; aborting run");
            inner
                .state_store
                .append_error(ErrorRecord {
                    timestamp: Utc::now(),
                    chapter: attempted,
                    url,
                    message,
                })
                .await?;

            let mut state = inner.state.lock().await;
            state.running = false;
            state.last_action = Action::Error;
            inner.state_store.save_state(&state).await?;
            Ok(Iteration::Finished)
        }
    }
}

/// Fetch → translate → save for a single chapter. Returns the discovered
/// next-chapter URL; `None` means the chain ended.
async fn crawl_one(inner: &Inner, raw_url: &str, number: u64) -> anyhow::Result<Option<Url>> {
    let url = Url::parse(raw_url).with_context(|| format!("parse chapter url: {raw_url}"))?;

    let page = inner.extractor.fetch_chapter(&url).await?;

    set_action(inner, Action::Translating).await?;
    let translated = inner.translator.translate(&page.text).await?;
    if page.text.contains("\n\n") && !translated.contains("\n\n") {
        // The renderer splits on blank lines; without them the chapter
        // collapses into a single paragraph.
        tracing::warn!(chapter = number, "translation lost its paragraph breaks");
    }

    set_action(inner, Action::Saving).await?;
    inner
        .chapters
        .save(number, page.title.as_deref(), &translated)
        .await
        .context("save chapter")?;

    Ok(page.next_url)
}

async fn set_action(inner: &Inner, action: Action) -> anyhow::Result<()> {
    let mut state = inner.state.lock().await;
    state.last_action = action;
    inner.state_store.save_state(&state).await
}
