//! Streams one search answer to the terminal.
//!
//! Answer text is printed as it arrives; sources and related questions are
//! listed once the stream ends. Ctrl-C cancels the query.

use std::io::Write as _;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Parser;
use search_stream::http::{HttpBackendConfig, HttpSearchBackend};
use search_stream::prelude::*;
use search_stream::{SessionState, init_observability};

#[derive(Parser, Debug)]
#[command(name = "search-stream", about = "Ask the search service and stream the answer")]
struct Args {
    /// Question to ask.
    query: String,

    /// Correlation id sent to the backend. Defaults to a random UUID.
    #[arg(long)]
    session_id: Option<String>,

    /// Backend base URL. Defaults to `SEARCH_BACKEND_URL`.
    #[arg(long)]
    base_url: Option<String>,

    /// Response framing: `ndjson` or `marked`. Defaults to `SEARCH_WIRE_FORMAT`.
    #[arg(long)]
    format: Option<WireFormat>,

    /// Do not ask for related questions.
    #[arg(long)]
    no_related: bool,
}

/// Prints each new piece of answer text and reports errors on stderr.
#[derive(Default)]
struct TerminalObserver {
    printed: AtomicUsize,
}

impl IngestObserver for TerminalObserver {
    fn on_answer_text(&self, text: Arc<String>) {
        let printed = self.printed.swap(text.len(), Ordering::SeqCst);
        if let Some(fresh) = text.get(printed..) {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(fresh.as_bytes());
            let _ = out.flush();
        }
    }

    fn on_error(&self, code: ErrorCode) {
        eprintln!("\n{}", user_message(code));
    }
}

fn user_message(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::RateLimited => {
            "The search service is handling too many requests. Please wait a moment and try again."
        }
        ErrorCode::InvalidRequest => "The search service rejected this query.",
        ErrorCode::Unavailable => "The answer model is unavailable right now. Please try again later.",
        ErrorCode::Generic => "Something went wrong while streaming the answer.",
    }
}

fn print_summary(report: &SessionReport) {
    if !report.sources.is_empty() {
        println!("\n\nSources:");
        for (n, source) in report.sources.iter().enumerate() {
            println!("  [{}] {} - {}", n + 1, source.name, source.url);
        }
    }
    if !report.related.is_empty() {
        println!("\nRelated:");
        for question in report.related.iter() {
            println!("  - {}", question.text);
        }
    }
}

async fn run(args: Args) -> Result<SessionReport, IngestError> {
    let backend_config = match args.base_url {
        Some(url) => HttpBackendConfig::new(url),
        None => HttpBackendConfig::from_env()?,
    };
    let mut config = IngestConfig::from_env()?;
    if let Some(format) = args.format {
        config = config.wire_format(format);
    }

    let controller = StreamController::new(Arc::new(HttpSearchBackend::new(backend_config)?), config)?;
    let session_id = args
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let request = QueryRequest::new(args.query, session_id).related_questions(!args.no_related);

    let handle = controller.start(request, Arc::new(TerminalObserver::default()))?;
    tracing::debug!(session_id = handle.session_id(), "query started");

    let abort = handle.abort_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });
    let report = handle.finish().await;
    ctrl_c.abort();
    report
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_observability();

    match run(Args::parse()).await {
        Ok(report) => {
            print_summary(&report);
            match report.state {
                SessionState::Completed => ExitCode::SUCCESS,
                SessionState::Cancelled => {
                    eprintln!("\nCancelled.");
                    ExitCode::from(130)
                }
                _ => ExitCode::FAILURE,
            }
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
