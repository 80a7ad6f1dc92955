//! # Policy Harness CLI (`policy`)
//!
//! ## Usage
//!
//! ```bash
//! policy --config ./config/policy.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `policy init` | Create the SQLite database and run schema migrations |
//! | `policy ingest <path>` | Ingest a policy document for a company |
//! | `policy ask "<question>"` | Answer a question from a company's policies |
//! | `policy evidence "<question>"` | Show reranked evidence without calling the LLM |
//! | `policy documents` | List a company's ingested documents |
//! | `policy serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! policy init
//! policy ingest ./handbook.pdf --company-id acme --doc-name "Employee Handbook"
//! policy ask "How many sick days do I get?" --company-id acme
//! policy serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use policy_harness::{commands, config, migrate, server};

/// Policy Harness: grounded question answering over company policy documents.
#[derive(Parser)]
#[command(
    name = "policy",
    about = "Policy Harness: grounded question answering over company policy documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/policy.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest a PDF, text or Markdown policy document.
    Ingest {
        /// Path to the document.
        path: PathBuf,

        #[arg(long)]
        company_id: String,

        /// Human-readable document name used in citations.
        #[arg(long)]
        doc_name: String,

        /// Content type; inferred from the file extension when omitted.
        #[arg(long)]
        content_type: Option<String>,

        /// Override `[chunking].chunk_size` for this document.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override `[chunking].overlap` for this document.
        #[arg(long)]
        overlap: Option<usize>,
    },

    /// Ask a question against one company's documents.
    Ask {
        question: String,

        #[arg(long)]
        company_id: String,

        /// Evidence passages passed to the model.
        #[arg(long)]
        top_k: Option<usize>,

        /// Candidates fetched from the index before reranking.
        #[arg(long)]
        retrieve_n: Option<usize>,

        /// Print the full answer as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Retrieve and rerank evidence for a question, without generation.
    Evidence {
        question: String,

        #[arg(long)]
        company_id: String,
    },

    /// List documents ingested for a company.
    Documents {
        #[arg(long)]
        company_id: String,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("policy_harness=info,policy=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            company_id,
            doc_name,
            content_type,
            chunk_size,
            overlap,
        } => {
            commands::run_ingest(
                &cfg,
                &path,
                &company_id,
                &doc_name,
                content_type,
                chunk_size,
                overlap,
            )
            .await?;
        }
        Commands::Ask {
            question,
            company_id,
            top_k,
            retrieve_n,
            json,
        } => {
            commands::run_ask(&cfg, &company_id, &question, top_k, retrieve_n, json).await?;
        }
        Commands::Evidence {
            question,
            company_id,
        } => {
            commands::run_evidence(&cfg, &company_id, &question).await?;
        }
        Commands::Documents { company_id } => {
            commands::run_documents(&cfg, &company_id).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
