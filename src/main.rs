//! # vibe CLI
//!
//! Entry point for the vibe-mcp context server. Configuration comes from the
//! environment (`VIBE_ROOT`, `VIBE_DB`, `VIBE_PORT`, ...); the subcommands
//! cover serving, index maintenance, and quick searches from the terminal.
//!
//! ```bash
//! VIBE_ROOT=~/.vibe vibe serve          # start the HTTP server
//! vibe reindex                          # rebuild the index from disk
//! vibe sync                             # reconcile out-of-band edits
//! vibe search "rate limiting" -p demo   # ranked search
//! vibe projects                         # list indexed projects
//! vibe init-project demo                # scaffold a project
//! ```

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use vibe_mcp::config::Config;
use vibe_mcp::indexer::Indexer;
use vibe_mcp::search;
use vibe_mcp::server::Server;
use vibe_mcp::store::IndexStore;
use vibe_mcp::writer::Writer;

/// vibe-mcp — a filesystem-backed markdown context server.
#[derive(Parser)]
#[command(
    name = "vibe",
    version,
    about = "vibeMCP — markdown workspace context server with full-text search and webhooks"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Rebuilds the index first when it is empty, then serves the tool,
    /// resource, and prompt endpoints until interrupted.
    Serve,

    /// Rebuild the whole index from the workspace.
    Reindex,

    /// Reconcile the index with filesystem changes made outside the server.
    Sync,

    /// Search the index from the terminal.
    Search {
        /// FTS5 query (phrases, `term*`, AND/OR/NOT, `heading:`/`content:`).
        query: String,

        /// Restrict results to one project.
        #[arg(long, short)]
        project: Option<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// List indexed projects.
    Projects,

    /// Create a project directory with the standard folder set.
    InitProject {
        /// Project name (single path component).
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve => {
            let server = Server::build(config).await?;
            server.run().await?;
        }
        Commands::Reindex => {
            let store = Arc::new(IndexStore::open(&config.db_path).await?);
            let indexer = Indexer::new(config.root.clone(), store);
            let count = indexer.reindex().await?;
            println!("reindexed {} documents", count);
        }
        Commands::Sync => {
            let store = Arc::new(IndexStore::open(&config.db_path).await?);
            let indexer = Indexer::new(config.root.clone(), store);
            let stats = indexer.sync().await?;
            println!(
                "sync complete: {} added, {} updated, {} deleted",
                stats.added, stats.updated, stats.deleted
            );
        }
        Commands::Search {
            query,
            project,
            limit,
        } => {
            let store = Arc::new(IndexStore::open(&config.db_path).await?);
            let results = search::search(&store, &query, project.as_deref(), limit).await?;
            if results.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for (i, result) in results.iter().enumerate() {
                println!("{}. [{:.2}] {}", i + 1, result.score, result.path);
                if let Some(heading) = &result.heading {
                    println!("    heading: {}", heading);
                }
                println!(
                    "    excerpt: \"{}\"",
                    result.snippet.replace('\n', " ").trim()
                );
                println!();
            }
        }
        Commands::Projects => {
            let store = Arc::new(IndexStore::open(&config.db_path).await?);
            let projects = store.list_projects().await?;
            if projects.is_empty() {
                println!("No projects indexed. Run `vibe reindex` first.");
                return Ok(());
            }
            for project in projects {
                println!("{}  {}", project.name, project.path);
            }
        }
        Commands::InitProject { name } => {
            let config = Arc::new(config);
            let store = Arc::new(IndexStore::open(&config.db_path).await?);
            let indexer = Arc::new(Indexer::new(config.root.clone(), Arc::clone(&store)));
            let writer = Writer::new(Arc::clone(&config), indexer, None);
            let result = writer.init_project(&name).await?;
            println!(
                "initialized project '{}' with folders: {}",
                result.project,
                result.folders.join(", ")
            );
        }
    }

    Ok(())
}
