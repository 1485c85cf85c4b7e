use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Crawl, translate, and save chapters until the chain ends.
    Crawl(CrawlArgs),
    /// Print crawl progress for a book directory.
    Status(DataArgs),
    /// List saved chapters.
    Chapters(DataArgs),
    /// Print one saved chapter as an HTML fragment.
    Show(ShowArgs),
    /// List recorded crawl errors.
    Errors(DataArgs),
    /// Delete all saved chapters, the error log, and the crawl state.
    Reset(DataArgs),
}

#[derive(Debug, Args)]
pub struct DataArgs {
    /// Book data directory.
    #[arg(long, default_value = "novel-data")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Chapter number (1-based).
    #[arg(long)]
    pub number: u64,
}

#[derive(Debug, Args)]
pub struct CrawlArgs {
    /// First chapter URL. Omit to resume from saved state.
    #[arg(long)]
    pub url: Option<String>,

    #[command(flatten)]
    pub data: DataArgs,

    /// Pause between chapters (politeness).
    #[arg(long, default_value_t = 2000)]
    pub delay_ms: u64,

    #[command(flatten)]
    pub site: SiteArgs,

    #[command(flatten)]
    pub translator: TranslatorArgs,
}

#[derive(Debug, Args)]
pub struct SiteArgs {
    /// Charset the source site actually serves, regardless of its headers.
    #[arg(long, default_value = "gbk")]
    pub charset: String,

    /// CSS selector for the chapter content container.
    #[arg(long, default_value = "#content")]
    pub content_selector: String,

    /// CSS selector for the pagination block holding the next-chapter link.
    #[arg(long, default_value = ".bottem")]
    pub nav_selector: String,

    /// Drop content lines containing this text (repeatable).
    #[arg(long = "skip-line")]
    pub skip_lines: Vec<String>,

    /// HTTP timeout for chapter fetches, in seconds.
    #[arg(long, default_value_t = 10)]
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Args)]
pub struct TranslatorArgs {
    /// Translation engine.
    #[arg(long, value_enum, default_value = "openai")]
    pub engine: TranslateEngine,

    /// Model used by the openai engine.
    #[arg(long, default_value = "gpt-4o-mini")]
    pub openai_model: String,

    /// OpenAI-compatible API base URL.
    #[arg(long, default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TranslateEngine {
    /// Pass chapter text through unchanged.
    Noop,
    /// Translate via an OpenAI-compatible API (requires OPENAI_API_KEY).
    Openai,
}
