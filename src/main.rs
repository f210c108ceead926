//! corpusd command-line entry point.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use corpusd::config::{load_config, Config};
use corpusd::convert::HttpConverter;
use corpusd::llm::ServicePool;
use corpusd::pipeline;
use corpusd::search::{SearchEngine, SearchMode, SearchParams};
use corpusd::server::{run_server, AppState};
use corpusd::store::Store;
use corpusd::strategies::Strategies;

#[derive(Parser)]
#[command(
    name = "corpusd",
    about = "corpusd — a retrieval-augmented generation backend",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/corpusd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// Start the HTTP API server and ingestion workers
    Serve,

    /// List pool providers and their registered models
    Models,

    /// Search indexed libraries
    Search {
        /// Search query
        query: String,

        /// Library UUID to search (repeatable)
        #[arg(long = "library", required = true)]
        libraries: Vec<uuid::Uuid>,

        /// Search mode: hybrid, semantic, or textual
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<i64>,

        /// Include embeddings of inactive documents
        #[arg(long)]
        include_inactive: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("corpusd=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = corpusd::db::connect(&config).await?;
            corpusd::migrate::run_migrations(&pool).await?;
            println!("database initialized");
            Ok(())
        }
        Commands::Serve => serve(config).await,
        Commands::Models => {
            let pool = ServicePool::from_config(&config.llm)?;
            let catalog = pool.list_models();
            for provider in &catalog.by_provider {
                let status = if provider.online { "online" } else { "offline" };
                println!("{} ({})", provider.provider, status);
                for model in &provider.completion_models {
                    println!("  completion: {}", model);
                }
                if let Some(em) = &provider.embedding_model {
                    println!("  embedding:  {}", em);
                }
            }
            println!();
            println!("all models: {}", catalog.all.join(", "));
            Ok(())
        }
        Commands::Search {
            query,
            libraries,
            mode,
            limit,
            include_inactive,
        } => {
            let mode = match mode.as_str() {
                "hybrid" => SearchMode::Hybrid,
                "semantic" => SearchMode::Semantic,
                "textual" => SearchMode::Textual,
                other => anyhow::bail!(
                    "Unknown search mode: {}. Use hybrid, semantic, or textual.",
                    other
                ),
            };

            let (_, engine) = build_engine(&config).await?;
            let params = SearchParams {
                query,
                library_uuids: libraries,
                limit,
                semantic_weight: None,
                textual_weight: None,
                active_only: !include_inactive,
                embedding_model: None,
            };
            let hits = engine.search(&params, mode).await?;

            if hits.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {} (doc {}, sem {:.4}, txt {:.4})",
                    i + 1,
                    hit.score,
                    hit.kind.as_str(),
                    hit.document_id,
                    hit.score_semantic,
                    hit.score_textual
                );
                println!(
                    "    excerpt: \"{}\"",
                    hit.text.chars().take(160).collect::<String>().replace('\n', " ")
                );
                println!("    id: {}", hit.embedding_id);
                println!();
            }
            Ok(())
        }
    }
}

async fn build_engine(config: &Config) -> Result<(Arc<Store>, Arc<SearchEngine>)> {
    let db = corpusd::db::connect(config).await?;
    let store = Arc::new(Store::new(db));

    let pool = Arc::new(ServicePool::from_config(&config.llm)?);
    let strategies = Arc::new(Strategies::new(
        pool,
        config.chunking.clone(),
        config.rag.clone(),
        &config.llm,
    ));

    let engine = Arc::new(SearchEngine::new(store.clone(), strategies));
    Ok((store, engine))
}

/// Explicit wiring: pool → strategies → store/search/pipeline → server.
async fn serve(config: Config) -> Result<()> {
    let db = corpusd::db::connect(&config).await?;
    corpusd::migrate::run_migrations(&db).await?;

    let store = Arc::new(Store::new(db));
    let pool = Arc::new(ServicePool::from_config(&config.llm)?);
    let strategies = Arc::new(Strategies::new(
        pool,
        config.chunking.clone(),
        config.rag.clone(),
        &config.llm,
    ));
    let search = Arc::new(SearchEngine::new(store.clone(), strategies.clone()));
    let converter = Arc::new(HttpConverter::new(&config.converter)?);
    let ingestion = pipeline::spawn_workers(&config, store.clone(), strategies);

    let state = AppState {
        store,
        search,
        ingestion,
        converter,
    };

    run_server(&config, state).await
}
