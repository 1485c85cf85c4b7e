use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser as _;
use url::Url;

use novelify::cli::{Cli, Command, CrawlArgs, DataArgs, ShowArgs};
use novelify::extract::{Extractor, SiteProfile};
use novelify::pipeline::Pipeline;
use novelify::state::Action;
use novelify::translate::NoopTranslator;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    novelify::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        Command::Crawl(args) => crawl(args).await.context("crawl")?,
        Command::Status(args) => {
            let status = open_for_inspection(&args).await?.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Chapters(args) => {
            let chapters = open_for_inspection(&args).await?.list_chapters().await?;
            println!("{}", serde_json::to_string_pretty(&chapters)?);
        }
        Command::Show(args) => show(args).await?,
        Command::Errors(args) => {
            let errors = open_for_inspection(&args).await?.list_errors().await?;
            println!("{}", serde_json::to_string_pretty(&errors)?);
        }
        Command::Reset(args) => {
            open_for_inspection(&args).await?.reset().await.context("reset")?;
            tracing::info!(data_dir = %args.data_dir.display(), "book data reset");
        }
    }

    Ok(())
}

async fn crawl(args: CrawlArgs) -> anyhow::Result<()> {
    let url = args
        .url
        .as_deref()
        .map(|raw| Url::parse(raw).context("parse --url"))
        .transpose()?;
    if let Some(url) = &url
        && url.scheme() != "http"
        && url.scheme() != "https"
    {
        anyhow::bail!("--url must be http/https: {url}");
    }

    let extractor = Extractor::new(&SiteProfile::from_args(&args.site))?;
    let translator = novelify::translate::from_args(&args.translator)?;
    let pipeline = Pipeline::open(
        &args.data.data_dir,
        extractor,
        translator,
        Duration::from_millis(args.delay_ms),
    )
    .await?;

    pipeline.start(url).await?;
    pipeline.wait().await?;

    let status = pipeline.status().await?;
    if status.action == Action::Error {
        let errors = pipeline.list_errors().await?;
        let detail = errors
            .last()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "unknown error".to_owned());
        anyhow::bail!("crawl aborted after {} chapter(s): {detail}", status.chapter_count);
    }
    tracing::info!(chapters = status.chapter_count, "crawl finished");
    Ok(())
}

async fn show(args: ShowArgs) -> anyhow::Result<()> {
    let pipeline = open_for_inspection(&args.data).await?;
    let Some(fragment) = pipeline.get_chapter(args.number).await? else {
        anyhow::bail!("chapter {} not found", args.number);
    };
    print!("{fragment}");
    Ok(())
}

/// Opens the book data for read-only or reset commands; no crawl runs, so
/// the extractor defaults and the noop translator are never exercised.
async fn open_for_inspection(args: &DataArgs) -> anyhow::Result<Pipeline> {
    let extractor = Extractor::new(&SiteProfile::default())?;
    Pipeline::open(
        &args.data_dir,
        extractor,
        Arc::new(NoopTranslator),
        Duration::ZERO,
    )
    .await
}
