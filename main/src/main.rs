use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, indexes::ensure_indexes},
    utils::{config::get_config, embedding::Embedder},
};
use ingestion_pipeline::{
    chunker::ChunkerConfig, delete_document, ingest_document, list_documents, structural::StructuralTree,
    IngestionRequest,
};
use retrieval_pipeline::{
    analyzer::{DomainVocabulary, QueryAnalyzer},
    cache::ResultCache,
    rerank::LlmVerifier,
    QueryPipeline, RetrievalTuning,
};

#[derive(Parser)]
#[command(name = "corpusqa", about = "Question answering over a private document corpus")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and index a document
    Ingest {
        #[arg(long)]
        tenant: String,
        /// Path to the extracted document text
        #[arg(long)]
        file: PathBuf,
        /// Stable document id override
        #[arg(long)]
        document_id: Option<String>,
        /// Path to a JSON structural tree for structured formats
        #[arg(long)]
        structure: Option<PathBuf>,
        #[arg(long, default_value = "txt")]
        format: String,
    },
    /// Ask a question over the tenant's corpus
    Query {
        #[arg(long)]
        tenant: String,
        question: String,
        #[arg(long, default_value_t = 5)]
        breadth: usize,
    },
    /// List the tenant's documents
    Documents {
        #[arg(long)]
        tenant: String,
    },
    /// Delete a document and all its chunks
    Delete {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        document: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    ensure_indexes(&db, config.embedding_dimensions as usize).await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedder = Arc::new(Embedder::new(
        Arc::clone(&openai_client),
        config.embedding_model.clone(),
        config.embedding_dimensions,
    ));

    match cli.command {
        Command::Ingest {
            tenant,
            file,
            document_id,
            structure,
            format,
        } => {
            let text = std::fs::read_to_string(&file)?;
            let structure: Option<StructuralTree> = match structure {
                Some(path) => Some(serde_json::from_str(&std::fs::read_to_string(path)?)?),
                None => None,
            };

            let chunker_config = ChunkerConfig {
                window: config.chunk_window,
                overlap: config.chunk_overlap,
                ..ChunkerConfig::default()
            };

            let report = ingest_document(
                &db,
                &embedder,
                IngestionRequest {
                    tenant_id: tenant,
                    document_id,
                    filename: file
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| file.display().to_string()),
                    format,
                    text,
                    structure,
                },
                &chunker_config,
            )
            .await?;

            println!(
                "Ingested document {} ({} chunks)",
                report.document_id, report.chunks_created
            );
        }
        Command::Query {
            tenant,
            question,
            breadth,
        } => {
            let cache = Arc::new(ResultCache::new(
                config.cache_max_size,
                Duration::from_secs(config.cache_ttl_secs),
            ));
            let analyzer = QueryAnalyzer::new(
                Arc::clone(&openai_client),
                config.analyzer_model.clone(),
                DomainVocabulary::default(),
            );
            let verifier = Arc::new(LlmVerifier::new(
                Arc::clone(&openai_client),
                config.analyzer_model.clone(),
            ));

            let pipeline = QueryPipeline::new(
                Arc::clone(&db),
                Arc::clone(&openai_client),
                embedder,
                cache,
                analyzer,
                RetrievalTuning::default(),
                config.query_model.clone(),
            )
            .with_verifier(verifier);

            match pipeline.answer_query(&tenant, &question, breadth).await {
                Ok(result) => {
                    println!("{}\n", result.answer);
                    for source in &result.sources {
                        let label = source
                            .section_label
                            .as_deref()
                            .map(|label| format!(" ({label})"))
                            .unwrap_or_default();
                        println!(
                            "[{}] {}{} score {:.3}",
                            source.citation_number, source.filename, label, source.score
                        );
                    }
                }
                Err(AppError::NoRelevantResults) => {
                    println!("No relevant information found.");
                }
                Err(AppError::NotFound(_)) => {
                    println!("No documents available for this tenant.");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Command::Documents { tenant } => {
            let summaries = list_documents(&db, &tenant).await?;
            if summaries.is_empty() {
                println!("No documents.");
            }
            for summary in summaries {
                println!(
                    "{}  {}  {} chunks",
                    summary.document.id, summary.document.filename, summary.chunk_count
                );
            }
        }
        Command::Delete { tenant, document } => {
            delete_document(&db, &tenant, &document).await?;
            println!("Deleted document {document}");
        }
    }

    Ok(())
}
