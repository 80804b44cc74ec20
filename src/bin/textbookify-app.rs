use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;

use textbookify::app::artifact_store::{ArtifactStore, LocalFsArtifactStore};
use textbookify::app::document_store::{DocumentStore, LocalFsDocumentStore};
use textbookify::app::http;
use textbookify::app::service::TextbookService;
use textbookify::cli::ProseEngineKind;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    #[arg(long, default_value = "workspace-app")]
    data_dir: PathBuf,

    /// Pipeline configuration file (YAML).
    #[arg(long)]
    config: Option<String>,

    #[arg(long, value_enum, default_value_t = ProseEngineKind::Template)]
    engine: ProseEngineKind,

    /// Skip reference lookups.
    #[arg(long)]
    offline: bool,
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
    textbookify::logging::init()?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting textbookify-app");

    let config = textbookify::build::load_config(args.config.as_deref())?;
    let synthesizer = textbookify::build::synthesizer(args.engine, &config, args.offline)?;
    let document_store: Arc<dyn DocumentStore> =
        Arc::new(LocalFsDocumentStore::new(args.data_dir.clone()));
    let artifact_store: Arc<dyn ArtifactStore> =
        Arc::new(LocalFsArtifactStore::new(args.data_dir.clone()));
    tracing::info!(
        data_dir = %args.data_dir.display(),
        engine = synthesizer.engine_name(),
        max_concurrency = config.generation.max_concurrency,
        "using local filesystem stores"
    );

    let service = Arc::new(TextbookService::new(
        &config,
        synthesizer,
        document_store,
        artifact_store,
    ));
    let app = http::router(service);

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("bind: {}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
