//! # Sectioned RAG CLI (`srag`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `srag init` | Create the SQLite database and schema |
//! | `srag ingest <paths..>` | Index PDF, DOCX and Markdown files or directories |
//! | `srag ask "<question>"` | Answer a question from one workspace |
//! | `srag headings <file.pdf>` | Print the titles detected in a PDF's table of contents |
//! | `srag sources` | List indexed documents |
//! | `srag forget <source>` | Remove a document from a workspace |
//!
//! Per-document ingestion failures are reported and do not change the exit
//! status; configuration and database errors do.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sectioned_rag::config;
use sectioned_rag::ingest::{self, IngestMeta};
use sectioned_rag::{migrate, query, sources};
use sectioned_rag_core::models::Confidentiality;

#[derive(Parser)]
#[command(
    name = "srag",
    about = "Section-aware retrieval and question answering over tender documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/srag.toml")]
    config: PathBuf,

    /// Log pipeline progress (info level) to stderr. `RUST_LOG` overrides.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest documents.
    ///
    /// Directories are walked recursively for `.pdf`, `.docx` and `.md`
    /// files. A document already indexed (same content hash) is skipped.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Workspace the documents belong to.
        #[arg(long)]
        workspace: String,

        /// Confidentiality level: `public` or `privé` (`prive`).
        #[arg(long, default_value = "public")]
        confidentiality: Confidentiality,
    },

    /// Ask a question.
    Ask {
        question: String,

        /// Workspace to search.
        #[arg(long)]
        workspace: String,

        /// Readable confidentiality level. Repeat for several; defaults to all.
        #[arg(long = "allow")]
        allow: Vec<Confidentiality>,

        /// Print the answer as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the titles detected in a PDF's table of contents.
    Headings { path: PathBuf },

    /// List indexed documents.
    Sources {
        /// Only list this workspace.
        #[arg(long)]
        workspace: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Remove every chunk of a document from a workspace.
    Forget {
        /// Source name as shown by `srag sources`.
        source: String,

        #[arg(long)]
        workspace: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("info")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            paths,
            workspace,
            confidentiality,
        } => {
            let meta = IngestMeta {
                workspace_id: workspace,
                confidentiality,
            };
            ingest::run_ingest(&cfg, &paths, &meta).await?;
        }
        Commands::Ask {
            question,
            workspace,
            allow,
            json,
        } => {
            query::run_ask(&cfg, &question, &workspace, &allow, json).await?;
        }
        Commands::Headings { path } => {
            let titles = ingest::detect_headings_from_path(&path, &cfg.headings.params()).await?;
            if titles.is_empty() {
                println!("No table of contents detected.");
            }
            for title in titles {
                println!("{}", title.replace('\n', " / "));
            }
        }
        Commands::Sources { workspace, json } => {
            sources::run_sources(&cfg, workspace.as_deref(), json).await?;
        }
        Commands::Forget { source, workspace } => {
            sources::run_forget(&cfg, &workspace, &source).await?;
        }
    }

    Ok(())
}
