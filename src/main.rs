mod init;

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use tome_core::{
    Config, DocumentInput, IngestionCoordinator, ProviderKind, RetrievalEngine, answer,
};
use tome_index::{FlatIndex, VectorIndex};
use tome_llm::LlmProvider;
use tome_llm::any::AnyProvider;
use tome_llm::compatible::CompatibleProvider;
use tome_llm::ollama::OllamaProvider;
use tome_store::{DocumentId, SqliteStore};

#[derive(Parser)]
#[command(
    name = "tome",
    version,
    about = "Local-first knowledge base with semantic retrieval"
)]
struct Cli {
    /// Path to the config file (default: ./tome.toml or $TOME_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a document from a file, or stdin when no file is given.
    Add {
        /// Document title.
        #[arg(long)]
        title: String,
        /// Source locator stored alongside the document.
        #[arg(long)]
        url: Option<String>,
        /// File to read the content from.
        file: Option<PathBuf>,
    },
    /// Retrieve context for a question and generate an answer.
    Ask {
        query: String,
        /// How many documents to retrieve for context.
        #[arg(long)]
        top: Option<usize>,
        /// Stream the answer as it is generated.
        #[arg(long)]
        stream: bool,
    },
    /// Semantic search without answer generation.
    Search {
        query: String,
        /// How many documents to return.
        #[arg(long)]
        top: Option<usize>,
    },
    /// List stored documents, newest first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Delete a document and drop its vectors.
    Delete { id: String },
    /// Rebuild the vector index from the stored documents.
    Rebuild,
    /// Show store and index counters.
    Stats,
    /// Write a default config file.
    Init {
        /// Output path (default: ./tome.toml).
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    if let Command::Init { output } = &cli.command {
        return init::run(output.clone());
    }

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)?;

    if let Some(parent) = PathBuf::from(&config.store.sqlite_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let store = SqliteStore::new(&config.store.sqlite_path).await?;
    let index: Arc<dyn VectorIndex> = Arc::new(FlatIndex::open(&config.index.path).await?);
    let provider = Arc::new(create_provider(&config));

    if let AnyProvider::Ollama(ollama) = provider.as_ref() {
        match ollama.health_check().await {
            Ok(()) => tracing::info!("ollama health check passed"),
            Err(e) => tracing::warn!("ollama health check failed: {e:#}"),
        }
    }

    let coordinator = IngestionCoordinator::new(
        store.clone(),
        Arc::clone(&index),
        Arc::clone(&provider),
        config.chunker.clone(),
    );
    let engine = RetrievalEngine::new(
        store.clone(),
        Arc::clone(&index),
        Arc::clone(&provider),
        config.retrieval.clone(),
    );

    match cli.command {
        Command::Add { title, url, file } => {
            let content = read_content(file.as_deref())?;
            let document = coordinator
                .ingest(DocumentInput { title, content, url })
                .await?;
            println!("{}", document.id);
        }
        Command::Ask { query, top, stream } => {
            let chunks = engine.retrieve(&query, top).await?;
            if chunks.is_empty() {
                println!("No relevant documents.");
                return Ok(());
            }

            if stream && provider.supports_streaming() {
                let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
                let printer = tokio::spawn(async move {
                    let mut stdout = std::io::stdout();
                    while let Some(fragment) = rx.recv().await {
                        let _ = write!(stdout, "{fragment}");
                        let _ = stdout.flush();
                    }
                });
                answer::generate_stream(provider.as_ref(), &query, &chunks, &tx).await?;
                drop(tx);
                printer.await.context("printer task failed")?;
                println!();
                print_sources(&chunks);
            } else {
                let result = answer::generate(provider.as_ref(), &query, chunks).await?;
                println!("{}", result.text);
                print_sources(&result.sources);
            }
        }
        Command::Search { query, top } => {
            let chunks = engine.retrieve(&query, top).await?;
            if chunks.is_empty() {
                println!("No relevant documents.");
                return Ok(());
            }
            for chunk in &chunks {
                println!(
                    "{:.3}  {}  {}",
                    chunk.distance, chunk.document_id, chunk.title
                );
            }
        }
        Command::List { limit, offset } => {
            let documents = store.recent_documents(limit, offset).await?;
            if documents.is_empty() {
                println!("No documents.");
                return Ok(());
            }
            for document in &documents {
                println!(
                    "{}  {}  {}",
                    document.created_at.format("%Y-%m-%d %H:%M"),
                    document.id,
                    document.title
                );
            }
        }
        Command::Delete { id } => {
            let existed = coordinator.delete(&DocumentId(id.clone())).await?;
            if existed {
                println!("Deleted {id}.");
            } else {
                println!("No document with id {id}.");
            }
        }
        Command::Rebuild => {
            let report = coordinator.rebuild().await?;
            println!(
                "Rebuilt index: {} documents, {} vectors, {} unsearchable.",
                report.documents, report.vectors, report.unsearchable
            );
        }
        Command::Stats => {
            let documents = store.count_documents().await?;
            let mappings = store.count_vector_mappings().await?;
            let issued = index.count().await?;
            println!("documents:         {documents}");
            println!("vector mappings:   {mappings}");
            println!("vector ids issued: {issued}");
        }
        Command::Init { .. } => unreachable!("handled before setup"),
    }

    Ok(())
}

fn print_sources(chunks: &[tome_core::RetrievedChunk]) {
    println!("\nSources:");
    for chunk in chunks {
        match &chunk.url {
            Some(url) => println!("  - {} ({url}, distance {:.3})", chunk.title, chunk.distance),
            None => println!("  - {} (distance {:.3})", chunk.title, chunk.distance),
        }
    }
}

fn read_content(file: Option<&std::path::Path>) -> anyhow::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => std::io::read_to_string(std::io::stdin()).context("failed to read stdin"),
    }
}

/// Priority: CLI `--config` > `TOME_CONFIG` env > `./tome.toml`.
fn resolve_config_path(flag: Option<&std::path::Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("TOME_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("tome.toml")
}

fn create_provider(config: &Config) -> AnyProvider {
    match config.llm.provider {
        ProviderKind::Ollama => AnyProvider::Ollama(OllamaProvider::new(
            &config.llm.base_url,
            config.llm.model.clone(),
            config.llm.embedding_model.clone(),
        )),
        ProviderKind::Compatible => AnyProvider::Compatible(CompatibleProvider::new(
            "compatible".into(),
            std::env::var("TOME_API_KEY").ok(),
            config.llm.base_url.clone(),
            config.llm.model.clone(),
            config.llm.max_tokens,
            Some(config.llm.embedding_model.clone()),
        )),
    }
}
