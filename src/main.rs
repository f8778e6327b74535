//! # Registry Index CLI (`regidx`)
//!
//! Converts external MCP registry data into canonical records and prints
//! them as JSON, which makes it easy to check what an import would write.
//!
//! ## Usage
//!
//! ```bash
//! regidx [--config ./regidx.toml] [--verbose] adapt --type <file|json|url> --data <TEXT|@FILE>
//! ```
//!
//! ## Examples
//!
//! ```bash
//! # Normalize a seed file
//! regidx adapt --type file --data @./seed/servers.json
//!
//! # One page of a remote registry
//! regidx adapt --type url --data https://registry.example.com/v0/servers --limit 10
//!
//! # Every page (bounded by adaptor.max_pages)
//! regidx adapt --type url --data https://registry.example.com/v0/servers --limit -1
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use registry_index::adaptor::{AdaptRequest, ExternalAdaptor, ImportType};
use registry_index::config::{self, Config};
use registry_index::fetch::ReqwestFetcher;

/// Registry index tooling.
#[derive(Parser)]
#[command(
    name = "regidx",
    about = "Normalize external MCP registry data into canonical server records",
    version
)]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Adapt external data and print the canonical records.
    Adapt {
        /// Input kind: `file` (JSON array), `json` (one object) or `url`
        /// (registry list API).
        #[arg(long = "type")]
        import_type: String,

        /// Inline text, a URL, or `@path` to read the input from a file.
        #[arg(long)]
        data: String,

        /// Remote cursor to start from (url only).
        #[arg(long)]
        cursor: Option<String>,

        /// Page size for url imports; `-1` fetches every page.
        #[arg(long, allow_hyphen_values = true)]
        limit: Option<i64>,

        /// Remote search filter (url only).
        #[arg(long)]
        search: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Adapt {
            import_type,
            data,
            cursor,
            limit,
            search,
        } => {
            let import_type = ImportType::parse(&import_type)?;
            let data = read_data_arg(&data)?;
            let fetcher = Arc::new(ReqwestFetcher::new(cfg.adaptor.connect_timeout())?);
            let adaptor = ExternalAdaptor::new(fetcher, cfg.adaptor.clone());

            let request = AdaptRequest {
                import_type,
                data: &data,
                cursor: cursor.as_deref(),
                limit,
                search: search.as_deref(),
            };
            let records = adaptor.adapt(&request).await?;
            info!(
                import_type = import_type.as_str(),
                records = records.len(),
                "Adapted external data"
            );
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }

    Ok(())
}

/// `@path` reads the file; anything else is taken literally.
fn read_data_arg(data: &str) -> anyhow::Result<String> {
    match data.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path)),
        None => Ok(data.to_string()),
    }
}
