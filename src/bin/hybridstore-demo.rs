//! Thin CLI demo surface over the [`hybridstore::Api`] facade (spec §6).
//! Not part of the public library surface; exists so the engine can be
//! exercised from a shell without embedding it in another program.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use hybridstore::config::{CollectionConfig, ProviderKind};
use hybridstore::store::documents::NewDocument;
use hybridstore::search::SearchOptions;
use hybridstore::Api;

#[derive(Parser)]
#[command(name = "hybridstore-demo")]
#[command(about = "Hybrid BM25 + vector search engine, CLI demo")]
#[command(version)]
struct Cli {
    /// Path to the database file (':memory:' for an ephemeral store)
    #[arg(long, default_value = ":memory:")]
    db: String,

    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a collection
    CreateCollection {
        name: String,
        #[arg(long, default_value_t = 384)]
        dimensions: u32,
        #[arg(long, action = clap::ArgAction::SetTrue)]
        auto_generate: bool,
    },
    /// Insert a document (enqueues for embedding unless the collection auto-generates)
    Insert {
        collection: String,
        title: String,
        content: String,
    },
    /// Run a hybrid/FTS/LIKE search
    Search {
        collection: String,
        query: String,
        #[arg(long, action = clap::ArgAction::SetTrue)]
        like: bool,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Drain the embedding queue
    ProcessQueue {
        #[arg(long)]
        collection: Option<String>,
        #[arg(long, default_value_t = 50)]
        batch_size: usize,
    },
    /// Print engine call/error/cache metrics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let api = if cli.db == ":memory:" {
        Api::open_in_memory()
    } else {
        Api::open(&PathBuf::from(&cli.db), &std::env::current_dir()?)
    }
    .map_err(|e| anyhow::anyhow!(e.message))
    .context("failed to open store")?;

    match cli.command {
        Commands::CreateCollection { name, dimensions, auto_generate } => {
            api.create_collection(CollectionConfig {
                name: name.clone(),
                provider: ProviderKind::Local,
                dimensions,
                auto_generate,
                ..Default::default()
            })
            .map_err(|e| anyhow::anyhow!(e.message))?;
            println!("{} collection '{name}'", "created".green());
        }
        Commands::Insert { collection, title, content } => {
            let doc = api
                .insert_document_with_embedding(NewDocument {
                    collection: &collection,
                    title: Some(&title),
                    content: Some(&content),
                    metadata: serde_json::Value::Null,
                })
                .map_err(|e| anyhow::anyhow!(e.message))?;
            println!("{} document {}", "inserted".green(), doc.rowid);
        }
        Commands::Search { collection, query, like, limit } => {
            let mut options = SearchOptions { limit: Some(limit), ..Default::default() };
            if like {
                options.enable_like_search = true;
            }
            let response = api
                .search(&collection, &query, options)
                .map_err(|e| anyhow::anyhow!(e.message))?;
            println!(
                "{} results in {:.1}ms (strategy {:?}, fusion {:?})",
                response.total_results,
                response.search_time_ms,
                response.strategy,
                response.fusion
            );
            for r in response.results {
                println!("  {} {} — {:.4}", r.rank.to_string().dimmed(), r.title.unwrap_or_default(), r.score);
            }
        }
        Commands::ProcessQueue { collection, batch_size } => {
            let report = api
                .process_embedding_queue(batch_size, collection.as_deref())
                .map_err(|e| anyhow::anyhow!(e.message))?;
            println!(
                "processed {} ({} ok, {} failed)",
                report.processed, report.succeeded, report.failed
            );
        }
        Commands::Stats => {
            let stats = api.get_stats();
            println!("{stats:#?}");
        }
    }

    Ok(())
}
