//! CLI entry point for the trellis association graph engine.
//!
//! Commands that take a body read JSON from stdin; every command writes a
//! JSON result to stdout. Logs go to stderr.

use std::collections::BTreeMap;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

use trellis_core::events::LogSink;
use trellis_core::{
    AssociationType, DocumentId, GroupingId, ItemId, LockTarget, OrganizationId, TrellisConfig,
    User, UserId,
};
use trellis_engine::{EndpointSpec, FrameworkEngine, Identity, StaticIdentity, TreeItemUpdate};
use trellis_graph::{GraphClient, GraphConfig};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Association graph engine for competency frameworks")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Acting user id.
    #[arg(long, global = true)]
    user_id: Option<i64>,

    /// Acting user name.
    #[arg(long, global = true, default_value = "cli")]
    username: String,

    /// Organization of the acting user.
    #[arg(long, global = true)]
    organization: Option<i64>,

    /// Config file prefix (default: trellis).
    #[arg(short, long, default_value = "trellis", global = true)]
    config: String,
}

#[derive(Subcommand)]
enum Command {
    /// Print the full tree of a document.
    Tree {
        #[arg(long)]
        document: i64,
    },
    /// Print the direct children of an item.
    Children {
        #[arg(long)]
        item: i64,
    },
    /// Apply a batch of tree edits (JSON object of key to update on stdin).
    UpdateTree {
        #[arg(long)]
        document: i64,
    },
    /// Record an association (JSON with origin and destination on stdin).
    Associate {
        #[arg(long)]
        document: i64,
        /// Association type, e.g. IS_RELATED_TO.
        #[arg(long = "type")]
        assoc_type: String,
    },
    /// Derive a new draft document from an existing one.
    Derive {
        #[arg(long)]
        document: i64,
        #[arg(long)]
        title: Option<String>,
    },
    /// Delete a document and everything in it.
    Delete {
        #[arg(long)]
        document: i64,
    },
    /// Release a document lock. Without --user-id the release is forced.
    Unlock {
        #[arg(long)]
        document: i64,
    },
}

#[derive(serde::Deserialize)]
struct AssociateRequest {
    origin: EndpointSpec,
    destination: EndpointSpec,
    #[serde(default)]
    group: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = TrellisConfig::load(&cli.config)?;

    let graph = GraphClient::connect(&GraphConfig::from(&config.neo4j)).await?;
    graph.ensure_schema().await?;

    let user = cli.user_id.map(|id| User {
        id: UserId(id),
        username: cli.username.clone(),
        organization: cli.organization.map(OrganizationId),
    });
    let identity: Arc<dyn Identity> = match &user {
        Some(u) => Arc::new(StaticIdentity::new(u.clone())),
        None => Arc::new(StaticIdentity::anonymous()),
    };
    let engine = FrameworkEngine::new(Arc::new(graph))
        .with_identity(identity)
        .with_events(Arc::new(LogSink))
        .with_config(config);

    match cli.command {
        Command::Tree { document } => {
            let tree = engine.build_tree(DocumentId(document)).await?;
            println!("{}", serde_json::to_string(&tree)?);
        }
        Command::Children { item } => {
            let children = engine.children_of(ItemId(item)).await?;
            println!("{}", serde_json::to_string(&children)?);
        }
        Command::UpdateTree { document } => {
            let user = require_user(user)?;
            let input = std::io::read_to_string(std::io::stdin())?;
            let updates: BTreeMap<String, TreeItemUpdate> = serde_json::from_str(&input)?;

            let mut session = engine.begin_edit(DocumentId(document), &user).await?;
            let outcome = session.update_tree_items(updates).await;
            session.end().await?;
            let outcome = outcome?;

            let results: BTreeMap<&String, serde_json::Value> = outcome
                .results
                .iter()
                .map(|(key, r)| {
                    let value = match r {
                        Ok(result) => serde_json::to_value(result),
                        Err(e) => Ok(json!({ "error": e.to_string() })),
                    };
                    value.map(|v| (key, v))
                })
                .collect::<Result<_, _>>()?;
            println!(
                "{}",
                serde_json::to_string(&json!({ "return": results, "changes": outcome.changes }))?
            );
        }
        Command::Associate {
            document,
            ref assoc_type,
        } => {
            let user = require_user(user)?;
            let assoc_type: AssociationType = assoc_type.parse()?;
            let input = std::io::read_to_string(std::io::stdin())?;
            let request: AssociateRequest = serde_json::from_str(&input)?;

            let mut session = engine.begin_edit(DocumentId(document), &user).await?;
            let assoc = session
                .add_cross_doc_association(
                    assoc_type,
                    request.origin,
                    request.destination,
                    request.group.map(GroupingId),
                )
                .await;
            session.end().await?;
            println!("{}", serde_json::to_string(&assoc?)?);
        }
        Command::Derive { document, ref title } => {
            let doc = engine
                .derive_document(DocumentId(document), title.as_deref())
                .await?;
            println!("{}", serde_json::to_string(&doc)?);
        }
        Command::Delete { document } => {
            let doc = engine.delete_document(DocumentId(document)).await?;
            println!("{}", json!({ "deleted": doc.id, "identifier": doc.identifier }));
        }
        Command::Unlock { document } => {
            let released = engine
                .locks()
                .release(LockTarget::Document(DocumentId(document)), cli.user_id.map(UserId))
                .await?;
            println!("{}", json!({ "released": released }));
        }
    }

    Ok(())
}

fn require_user(user: Option<User>) -> anyhow::Result<User> {
    user.ok_or_else(|| anyhow::anyhow!("--user-id is required for editing commands"))
}
