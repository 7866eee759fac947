//! pdfdesk server
//!
//! Serves in-place document translation over HTTP:
//!
//! - `GET /health`
//! - `POST /api/translate` (multipart `file` + optional `targetLang`)
//!
//! The translator is Gemini when `GEMINI_API_KEY` is set and an echo
//! fallback otherwise. The substitute font for translated text is read once
//! at startup.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::Parser;
use pdfdesk_core::{EchoTranslator, TextTranslator, TrueTypeFont};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod error;
mod gemini;
#[cfg(test)]
mod tests;

use api::{handle_health, handle_translate};
use gemini::GeminiTranslator;

/// Command-line arguments for the pdfdesk server
#[derive(Parser, Debug)]
#[command(name = "pdfdesk-server")]
#[command(about = "pdfdesk server for in-place PDF translation")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Largest accepted upload in megabytes
    #[arg(long, default_value = "50")]
    max_upload_mb: usize,

    /// TrueType font used to draw translated text
    #[arg(long, env = "PDFDESK_FONT", default_value = "assets/NotoSansDevanagari-Regular.ttf")]
    font_path: PathBuf,

    /// Gemini model name
    #[arg(long, default_value = "gemini-1.5-flash")]
    model: String,

    /// Per-request timeout for the translation backend
    #[arg(long, default_value = "60")]
    translate_timeout_secs: u64,

    /// Rate limit: requests per second per IP
    #[arg(long, default_value = "10")]
    rate_limit: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub translator: Arc<dyn TextTranslator>,
    /// `None` when the font could not be loaded; translated runs are then
    /// erased without redrawing
    pub font: Option<Arc<TrueTypeFont>>,
    pub max_upload_bytes: usize,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/translate", post(handle_translate))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn load_font(path: &Path) -> Option<Arc<TrueTypeFont>> {
    match TrueTypeFont::from_file(path) {
        Ok(font) => {
            info!("Loaded substitute font {}", path.display());
            Some(Arc::new(font))
        }
        Err(e) => {
            warn!("{}; translated text will not be drawn", e);
            None
        }
    }
}

fn select_translator(args: &Args) -> anyhow::Result<Arc<dyn TextTranslator>> {
    match std::env::var("GEMINI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => {
            info!("Translating with {}", args.model);
            Ok(Arc::new(GeminiTranslator::new(
                key,
                args.model.clone(),
                Duration::from_secs(args.translate_timeout_secs),
            )?))
        }
        _ => {
            warn!("GEMINI_API_KEY is missing; responses will keep the original text");
            Ok(Arc::new(EchoTranslator))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting pdfdesk server on {}:{}", args.host, args.port);

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(args.rate_limit.into())
            .burst_size(args.rate_limit * 2)
            .finish()
            .ok_or_else(|| anyhow!("Invalid rate limit: {}", args.rate_limit))?,
    );

    let state = AppState {
        translator: select_translator(&args)?,
        font: load_font(&args.font_path),
        max_upload_bytes: args.max_upload_mb * 1024 * 1024,
    };

    let app = build_router(state).layer(GovernorLayer {
        config: governor_conf,
    });

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Rate limit: {} requests/second per IP", args.rate_limit);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
