//! # repo-scout CLI (`scout`)
//!
//! The `scout` binary is the external trigger for the indexing batch and a
//! local adaptor for ranked queries.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scout init` | Create the chunks schema for the provider's embedding dimension |
//! | `scout index` | One-shot batch index of a local tree |
//! | `scout search "<query>"` | Hybrid-ranked search over indexed chunks |
//! | `scout repos` | List indexed repository labels |
//! | `scout refs <repository>` | List indexed refs of one repository |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the schema
//! scout init --config ./repo-scout.toml
//!
//! # Index a checkout under a logical label
//! scout index --root ~/src/platform --repository platform --ref main
//!
//! # Ask a question
//! scout search "script that rotates the signing keys" --k 5
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use repo_scout::ai;
use repo_scout::config;
use repo_scout::db;
use repo_scout::indexer::Indexer;
use repo_scout::search::SearchService;
use repo_scout::store::postgres::PgStore;
use repo_scout::store::{ChunkStore, QueryOpts};

/// Deadline for a single ranked query.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for metadata listings.
const LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// repo-scout — natural-language search over source-code repositories.
#[derive(Parser)]
#[command(
    name = "scout",
    about = "Natural-language search over source-code repositories",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// Defaults to `./repo-scout.toml`, then `config/repo-scout.toml`;
    /// missing files fall back to built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; fails if the schema already exists with a different
    /// embedding dimension.
    Init,

    /// Index a local repository tree (one-shot batch).
    Index {
        /// Root of the tree to index; overrides `[index] root`.
        #[arg(long)]
        root: Option<PathBuf>,

        /// Logical repository label; overrides `[index] repository`.
        #[arg(long)]
        repository: Option<String>,

        /// Symbolic ref label; overrides `[index] ref`. For local trees the
        /// default is the root directory name.
        #[arg(long = "ref")]
        refname: Option<String>,
    },

    /// Search indexed chunks with the hybrid ranking query.
    Search {
        /// The search query.
        query: String,

        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        k: i64,

        /// Filter by repository label.
        #[arg(long)]
        repository: Option<String>,

        /// Filter by ref label.
        #[arg(long = "ref")]
        refname: Option<String>,

        /// Filter by language tag (e.g. `shell`, `python`, `go`).
        #[arg(long)]
        language: Option<String>,

        /// Filter to paths containing this substring.
        #[arg(long)]
        path_contains: Option<String>,
    },

    /// List indexed repository labels.
    Repos,

    /// List indexed refs of one repository.
    Refs {
        /// Repository label.
        repository: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let client = ai::create_client(&cfg.provider)?;
    if client.dim() == 0 {
        bail!("embedding dimension must be set");
    }

    let pool = db::connect(&cfg.db.url)
        .await
        .context("failed to connect to the database")?;
    let store = Arc::new(PgStore::new(pool));

    match cli.command {
        Commands::Init => {
            store.init_schema(client.dim()).await?;
            println!("schema initialized (dim {})", client.dim());
        }
        Commands::Index {
            root,
            repository,
            refname,
        } => {
            let root = root.unwrap_or(cfg.index.root.clone());
            let root = root
                .canonicalize()
                .with_context(|| format!("index root not found: {}", root.display()))?;
            let repository = repository.unwrap_or(cfg.index.repository.clone());
            let refname = match refname.or_else(|| {
                (!cfg.index.refname.is_empty()).then(|| cfg.index.refname.clone())
            }) {
                Some(r) => r,
                // Local trees default to the directory name as their ref.
                None => root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            };

            store.ping().await?;
            store.init_schema(client.dim()).await?;

            let indexer = Indexer::new(store, client, root, repository, refname);
            let cancel = CancellationToken::new();
            let ctrl_c_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c_cancel.cancel();
                }
            });
            indexer.run(cancel).await?;
            println!("ok");
        }
        Commands::Search {
            query,
            k,
            repository,
            refname,
            language,
            path_contains,
        } => {
            let service = SearchService::new(client, store);
            let opts = QueryOpts {
                repository,
                refname,
                language,
                path_contains,
                query_text: String::new(),
            };
            let results = tokio::time::timeout(SEARCH_TIMEOUT, service.query(&query, k, opts))
                .await
                .context("search timed out")??;

            if results.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for (i, result) in results.iter().enumerate() {
                let c = &result.chunk;
                println!(
                    "{}. [{:.3}] {}:{}-{} ({})",
                    i + 1,
                    result.score,
                    c.path,
                    c.line_start,
                    c.line_end,
                    if c.language.is_empty() { "?" } else { &c.language },
                );
                println!("    repo: {} ref: {}", c.repository, c.refname);
                println!("    {}", c.summary);
                println!();
            }
        }
        Commands::Repos => {
            let repos = tokio::time::timeout(LIST_TIMEOUT, store.list_repositories())
                .await
                .context("listing timed out")??;
            for repo in repos {
                println!("{repo}");
            }
        }
        Commands::Refs { repository } => {
            let refs = tokio::time::timeout(LIST_TIMEOUT, store.list_refs(&repository))
                .await
                .context("listing timed out")??;
            for r in refs {
                println!("{r}");
            }
        }
    }

    Ok(())
}
