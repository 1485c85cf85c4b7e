use std::time::Duration;

use anyhow::Context as _;
use encoding_rs::Encoding;
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

use crate::cli::SiteArgs;

const USER_AGENT: &str = "Mozilla/5.0";

/// How chapter pages on the source site are located and decoded.
///
/// The defaults match the legacy novel mirrors this tool was written for:
/// GBK bytes regardless of what the headers claim, the chapter body in
/// `#content`, and a pagination bar whose second link is "next chapter".
#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub charset: String,
    pub content_selector: String,
    pub nav_selector: String,
    pub skip_lines: Vec<String>,
    pub fetch_timeout: Duration,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            charset: "gbk".to_owned(),
            content_selector: "#content".to_owned(),
            nav_selector: ".bottem".to_owned(),
            skip_lines: Vec::new(),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

impl SiteProfile {
    pub fn from_args(args: &SiteArgs) -> Self {
        Self {
            charset: args.charset.clone(),
            content_selector: args.content_selector.clone(),
            nav_selector: args.nav_selector.clone(),
            skip_lines: args.skip_lines.clone(),
            fetch_timeout: Duration::from_secs(args.fetch_timeout_secs),
        }
    }
}

/// One scraped chapter page.
#[derive(Debug, Clone)]
pub struct ChapterPage {
    pub title: Option<String>,
    /// Clean text: trimmed paragraphs separated by blank lines.
    pub text: String,
    pub next_url: Option<Url>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("fetch {url}")]
    Fetch {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("chapter content container not found at {url}")]
    ContentNotFound { url: Url },
}

struct Selectors {
    heading: Selector,
    content: Selector,
    nav: Selector,
    anchor: Selector,
}

impl Selectors {
    fn new(profile: &SiteProfile) -> anyhow::Result<Self> {
        Ok(Self {
            heading: parse_selector("h1")?,
            content: parse_selector(&profile.content_selector)?,
            nav: parse_selector(&profile.nav_selector)?,
            anchor: parse_selector("a")?,
        })
    }
}

fn parse_selector(raw: &str) -> anyhow::Result<Selector> {
    Selector::parse(raw).map_err(|err| anyhow::anyhow!("parse selector {raw:?}: {err}"))
}

pub struct Extractor {
    client: reqwest::Client,
    encoding: &'static Encoding,
    selectors: Selectors,
    skip_lines: Vec<String>,
}

impl Extractor {
    pub fn new(profile: &SiteProfile) -> anyhow::Result<Self> {
        let encoding = Encoding::for_label(profile.charset.as_bytes())
            .ok_or_else(|| anyhow::anyhow!("unknown charset label: {}", profile.charset))?;
        let client = reqwest::Client::builder()
            .timeout(profile.fetch_timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("build chapter http client")?;

        Ok(Self {
            client,
            encoding,
            selectors: Selectors::new(profile)?,
            skip_lines: profile.skip_lines.clone(),
        })
    }

    /// Fetches one chapter page and extracts its text and "next chapter"
    /// link. A missing next link is the normal end-of-book signal, not an
    /// error.
    pub async fn fetch_chapter(&self, url: &Url) -> Result<ChapterPage, ExtractError> {
        let fetch_err = |source| ExtractError::Fetch {
            url: url.clone(),
            source,
        };

        let response = self.client.get(url.clone()).send().await.map_err(fetch_err)?;
        let response = response.error_for_status().map_err(fetch_err)?;
        let bytes = response.bytes().await.map_err(fetch_err)?;

        // The mirrors routinely omit or misstate the charset header, so the
        // configured encoding always wins over whatever the response says.
        let (html, _, _) = self.encoding.decode(&bytes);
        self.parse_chapter(&html, url)
    }

    fn parse_chapter(&self, html: &str, url: &Url) -> Result<ChapterPage, ExtractError> {
        let doc = Html::parse_document(html);

        let title = doc
            .select(&self.selectors.heading)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_owned())
            .filter(|t| !t.is_empty());

        let Some(container) = doc.select(&self.selectors.content).next() else {
            return Err(ExtractError::ContentNotFound { url: url.clone() });
        };
        let raw = container.text().collect::<Vec<_>>().join("\n");
        let text = clean_text(&raw, &self.skip_lines);
        if text.is_empty() {
            // An empty container is as much a layout mismatch as a missing one.
            return Err(ExtractError::ContentNotFound { url: url.clone() });
        }

        Ok(ChapterPage {
            title,
            text,
            next_url: self.next_chapter_url(&doc, url),
        })
    }

    /// The first anchor in the navigation block is conventionally "previous"
    /// or the table of contents; the second is "next".
    fn next_chapter_url(&self, doc: &Html, base: &Url) -> Option<Url> {
        let nav = doc.select(&self.selectors.nav).next()?;
        let mut anchors = nav.select(&self.selectors.anchor);
        let _prev = anchors.next()?;
        let href = anchors.next()?.value().attr("href")?;
        let resolved = base.join(href.trim()).ok()?;
        matches!(resolved.scheme(), "http" | "https").then_some(resolved)
    }
}

/// Canonical clean-text normalization: trim every line, drop empty and
/// denylisted lines, join the survivors with blank lines.
fn clean_text(raw: &str, skip_lines: &[String]) -> String {
    let mut paragraphs: Vec<&str> = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if skip_lines
            .iter()
            .any(|pat| !pat.is_empty() && line.contains(pat.as_str()))
        {
            continue;
        }
        paragraphs.push(line);
    }
    paragraphs.join("\n\n")
}
