use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use axum::extract::{Form, Path, State};
use axum::http::StatusCode;
use axum::response::{Html, Json, Redirect};
use axum::routing::{get, post};
use clap::Parser;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use url::Url;

use novelify::cli::{SiteArgs, TranslatorArgs};
use novelify::extract::{Extractor, SiteProfile};
use novelify::pipeline::{Pipeline, PipelineStatus};
use novelify::state::ErrorRecord;
use novelify::store::ChapterRecord;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Book data directory.
    #[arg(long, default_value = "novel-data")]
    data_dir: PathBuf,

    /// Pause between chapters (politeness).
    #[arg(long, default_value_t = 2000)]
    delay_ms: u64,

    #[command(flatten)]
    site: SiteArgs,

    #[command(flatten)]
    translator: TranslatorArgs,
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    novelify::logging::init()?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting novelify-app");

    let extractor = Extractor::new(&SiteProfile::from_args(&args.site))?;
    let translator = novelify::translate::from_args(&args.translator)?;
    let pipeline = Pipeline::open(
        &args.data_dir,
        extractor,
        translator,
        Duration::from_millis(args.delay_ms),
    )
    .await?;

    let app = Router::new()
        .route("/", get(home))
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/start", post(start_crawl))
        .route("/stop", post(stop_crawl))
        .route("/reset", post(reset_book))
        .route("/read", get(read_index))
        .route("/read/:number", get(read_chapter))
        .route("/errors", get(errors_page))
        .route("/api/status", get(api_status))
        .route("/api/chapters", get(api_chapters))
        .route("/api/errors", get(api_errors))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { pipeline });

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn internal(err: anyhow::Error) -> StatusCode {
    tracing::error!(error = %format!("{err:#}"), "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn home(State(state): State<AppState>) -> Result<Html<String>, StatusCode> {
    let status = state.pipeline.status().await.map_err(internal)?;
    let label = if status.running { "Running" } else { "Stopped" };
    Ok(Html(page(
        "novelify",
        &format!(
            r#"<p>Status: {label} ({action:?}) · {chapters} chapter(s) saved · {errors} error(s)</p>
<form action="/start" method="post">
  <input name="url" placeholder="First chapter URL" size="60">
  <button type="submit">Start</button>
</form>
<form action="/stop" method="post"><button type="submit">Stop</button></form>
<form action="/reset" method="post"><button type="submit">Reset</button></form>
<p><a href="/read">Read chapters</a> · <a href="/errors">Errors</a></p>"#,
            action = status.action,
            chapters = status.chapter_count,
            errors = status.error_count,
        ),
    )))
}

#[derive(Debug, Deserialize)]
struct StartForm {
    url: Option<String>,
}

async fn start_crawl(
    State(state): State<AppState>,
    Form(form): Form<StartForm>,
) -> Result<Redirect, (StatusCode, String)> {
    let seed = match form.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(raw) => {
            let url = Url::parse(raw)
                .map_err(|err| (StatusCode::BAD_REQUEST, format!("invalid url: {err}")))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err((StatusCode::BAD_REQUEST, "url must be http/https".to_owned()));
            }
            Some(url)
        }
        None => None,
    };

    state
        .pipeline
        .start(seed)
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("{err:#}")))?;
    Ok(Redirect::to("/"))
}

async fn stop_crawl(State(state): State<AppState>) -> Result<Redirect, StatusCode> {
    state.pipeline.stop().await.map_err(internal)?;
    Ok(Redirect::to("/"))
}

async fn reset_book(State(state): State<AppState>) -> Result<Redirect, (StatusCode, String)> {
    state
        .pipeline
        .reset()
        .await
        .map_err(|err| (StatusCode::CONFLICT, format!("{err:#}")))?;
    Ok(Redirect::to("/"))
}

async fn read_index(State(state): State<AppState>) -> Result<Html<String>, StatusCode> {
    let chapters = state.pipeline.list_chapters().await.map_err(internal)?;
    let mut items = String::new();
    for record in &chapters {
        let label = match &record.title {
            Some(title) => format!("Chapter {}: {}", record.number, escape(title)),
            None => format!("Chapter {}", record.number),
        };
        items.push_str(&format!(
            "<li><a href=\"/read/{}\">{label}</a></li>\n",
            record.number
        ));
    }
    if items.is_empty() {
        items.push_str("<li>No chapters saved yet.</li>\n");
    }
    Ok(Html(page(
        "Chapters",
        &format!("<ul>\n{items}</ul>\n<p><a href=\"/\">Back</a></p>"),
    )))
}

async fn read_chapter(
    State(state): State<AppState>,
    Path(number): Path<u64>,
) -> Result<Html<String>, StatusCode> {
    let Some(fragment) = state.pipeline.get_chapter(number).await.map_err(internal)? else {
        return Err(StatusCode::NOT_FOUND);
    };
    let count = state.pipeline.status().await.map_err(internal)?.chapter_count;

    let mut nav = String::new();
    if number > 1 {
        nav.push_str(&format!("<a href=\"/read/{}\">Previous</a> · ", number - 1));
    }
    nav.push_str("<a href=\"/read\">Chapters</a>");
    if number < count {
        nav.push_str(&format!(" · <a href=\"/read/{}\">Next</a>", number + 1));
    }

    Ok(Html(page(
        &format!("Chapter {number}"),
        &format!("{fragment}<hr>\n<p>{nav}</p>"),
    )))
}

async fn errors_page(State(state): State<AppState>) -> Result<Html<String>, StatusCode> {
    let errors = state.pipeline.list_errors().await.map_err(internal)?;
    let mut items = String::new();
    for record in &errors {
        items.push_str(&format!(
            "<li>{} · chapter {} · {} · {}</li>\n",
            record.timestamp.to_rfc3339(),
            record.chapter,
            escape(&record.url),
            escape(&record.message),
        ));
    }
    if items.is_empty() {
        items.push_str("<li>No errors recorded.</li>\n");
    }
    Ok(Html(page(
        "Errors",
        &format!("<ul>\n{items}</ul>\n<p><a href=\"/\">Back</a></p>"),
    )))
}

async fn api_status(State(state): State<AppState>) -> Result<Json<PipelineStatus>, StatusCode> {
    Ok(Json(state.pipeline.status().await.map_err(internal)?))
}

async fn api_chapters(
    State(state): State<AppState>,
) -> Result<Json<Vec<ChapterRecord>>, StatusCode> {
    Ok(Json(state.pipeline.list_chapters().await.map_err(internal)?))
}

async fn api_errors(State(state): State<AppState>) -> Result<Json<Vec<ErrorRecord>>, StatusCode> {
    Ok(Json(state.pipeline.list_errors().await.map_err(internal)?))
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!doctype html>
<html>
  <head><meta charset="utf-8"><title>{title}</title></head>
  <body>
    <h2>{title}</h2>
{body}
  </body>
</html>
"#,
        title = escape(title),
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
