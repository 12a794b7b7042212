//! CLI entry point for the trellis-import row importer.
//!
//! Reads a JSON array of string arrays (header row first) from a file or
//! stdin and imports it as one new framework document.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use trellis_core::events::LogSink;
use trellis_core::{OrganizationId, TrellisConfig};
use trellis_graph::{GraphClient, GraphConfig};

use trellis_import::records::{read_rows, rows_from_json};
use trellis_import::{FrameworkImporter, ImportOptions};

#[derive(Parser)]
#[command(name = "trellis-import")]
#[command(about = "Import framework rows into the Trellis graph")]
struct Cli {
    /// JSON rows file. Reads stdin when omitted.
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Document title (otherwise import.default_title).
    #[arg(long)]
    title: Option<String>,

    /// Document creator (otherwise import.default_creator).
    #[arg(long)]
    creator: Option<String>,

    /// Owning organization id (otherwise import.organization).
    #[arg(long)]
    organization: Option<i64>,

    /// Config file prefix (default: trellis).
    #[arg(short, long, default_value = "trellis")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let config = TrellisConfig::load(&cli.config)?;

    let rows = match &cli.file {
        Some(path) => read_rows(path)?,
        None => rows_from_json(&std::io::read_to_string(std::io::stdin())?)?,
    };
    tracing::info!(rows = rows.len(), "Read import rows");

    let graph = GraphClient::connect(&GraphConfig::from(&config.neo4j)).await?;
    graph.ensure_schema().await?;
    tracing::info!("Connected to Neo4j");

    let importer = FrameworkImporter::new(Arc::new(graph), config.import.clone())
        .with_events(Arc::new(LogSink));
    let summary = importer
        .import(
            &rows,
            ImportOptions {
                title: cli.title,
                creator: cli.creator,
                organization: cli.organization.map(OrganizationId),
            },
        )
        .await?;

    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
