use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use env_logger::Env;
use log::{info, warn};
use std::sync::Arc;

use invoice_rag::config::Settings;
use invoice_rag::database::{create_store, VectorStore};
use invoice_rag::embeddings::{Embedder, EmbeddingTask};
use invoice_rag::gemini::GeminiClient;
use invoice_rag::server::{router, AppState};

/// Invoice reimbursement analysis with Gemini and a vector store
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to bind, overrides API_HOST
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overrides API_PORT
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Create the collection and check the embedding model against it
    Setup,
    /// Delete every stored invoice
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    let args = Args::parse();

    let mut settings = Settings::from_env().context("Invalid configuration")?;
    env_logger::Builder::from_env(Env::default().default_filter_or(settings.server.log_level.as_str()))
        .init();

    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let store = create_store(&settings.store).context("Failed to initialize vector store")?;
    info!(
        "Using {:?} vector store, collection {}",
        settings.store.backend,
        store.collection()
    );

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings, store).await,
        Command::Setup => setup(settings, store).await,
        Command::Reset => {
            store.clear().await.context("Failed to reset collection")?;
            info!("Collection {} reset", store.collection());
            Ok(())
        }
    }
}

async fn serve(settings: Settings, store: Arc<dyn VectorStore>) -> Result<()> {
    store
        .ensure_collection()
        .await
        .context("Failed to prepare collection")?;

    let gemini = Arc::new(
        GeminiClient::new(settings.gemini.clone()).context("Failed to initialize Gemini client")?,
    );

    let state = AppState::new(store, gemini.clone(), gemini, &settings.server);
    let app = router(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn setup(settings: Settings, store: Arc<dyn VectorStore>) -> Result<()> {
    if !store.health_check().await.context("Vector store is unreachable")? {
        bail!("Vector store reported unhealthy");
    }
    store
        .ensure_collection()
        .await
        .context("Failed to create collection")?;

    let gemini = GeminiClient::new(settings.gemini.clone()).context("Failed to initialize Gemini client")?;
    let probe = gemini
        .embed("Invoice setup probe", EmbeddingTask::RetrievalDocument)
        .await
        .context("Failed to generate probe embedding")?;

    if probe.dimension() != settings.store.embedding_dimension {
        bail!(
            "{} produces {}-dimensional embeddings but EMBEDDING_DIMENSION is {}",
            Embedder::model_name(&gemini),
            probe.dimension(),
            settings.store.embedding_dimension
        );
    }

    if !gemini.test_connection().await {
        warn!("Generation model {} did not answer the probe", settings.gemini.chat_model);
    }

    let stats = store.stats().await.context("Failed to read collection stats")?;
    info!(
        "Collection {} ready: {} invoices, {} chunks",
        stats.collection_name, stats.invoice_count, stats.chunk_count
    );
    Ok(())
}
