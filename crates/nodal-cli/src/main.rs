//! CLI entry point for operating a Nodal graph database.
//!
//! Every command prints one JSON document to stdout; logs go to stderr.

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

use nodal_core::{EntityKind, Identity, Settings};
use nodal_graph::{GraphDatabase, IndexSpec};

#[derive(Parser)]
#[command(name = "nodal")]
#[command(about = "Inspect and maintain a Nodal graph database")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file prefix (default: nodal).
    #[arg(short, long, default_value = "nodal", global = true)]
    config: String,

    /// Log every statement to the `nodal::query` target.
    #[arg(long, global = true)]
    log_queries: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Check connectivity.
    Ping,
    /// Print the negotiated server capabilities.
    Capabilities,
    /// Reconcile the configured indexes.
    Indexes {
        /// Never drop indexes, only create missing ones.
        #[arg(long)]
        create_only: bool,
    },
    /// Count nodes, optionally restricted to one label.
    Count {
        #[arg(long)]
        label: Option<String>,
    },
    /// Delete every node with a label, together with its relationships.
    Purge {
        #[arg(long)]
        label: String,
    },
    /// Print one entity and its properties.
    Show {
        #[arg(long)]
        id: i64,
        /// Look up a relationship instead of a node.
        #[arg(long)]
        relationship: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(&cli.config)?;
    if cli.log_queries {
        settings.query_log.enabled = true;
    }

    let db = GraphDatabase::connect(&settings).await?;

    let output = match cli.command {
        Command::Ping => {
            db.ping().await?;
            json!({ "ok": true })
        }
        Command::Capabilities => serde_json::to_value(db.capabilities())?,
        Command::Indexes { create_only } => {
            let desired: Vec<IndexSpec> = settings.index.desired.iter().map(IndexSpec::from).collect();
            let report = db
                .reconcile_indexes(&desired, create_only || settings.index.create_only)
                .await?;
            if !report.is_clean() {
                tracing::warn!(failed = report.failed.len(), "Index reconciliation incomplete");
            }
            serde_json::to_value(&report)?
        }
        Command::Count { label } => {
            let mut tx = db.begin_tx().await?;
            let count = db.count_nodes(&mut tx, label.as_deref()).await?;
            tx.close().await?;
            json!({ "label": label, "count": count })
        }
        Command::Purge { label } => {
            let mut tx = db.begin_tx().await?;
            let deleted = db.delete_nodes_by_label(&mut tx, &label).await?;
            tx.mark_successful();
            tx.close().await?;
            json!({ "label": label, "deleted": deleted })
        }
        Command::Show { id, relationship } => {
            let kind = if relationship {
                EntityKind::Relationship
            } else {
                EntityKind::Node
            };
            let mut tx = db.begin_tx().await?;
            let entity = match kind {
                EntityKind::Node => db.node(&mut tx, Identity(id)).await?,
                EntityKind::Relationship => db.relationship(&mut tx, Identity(id)).await?,
            };
            let properties = entity.properties(&mut tx).await?;
            tx.close().await?;
            json!({
                "kind": kind,
                "id": entity.identity(),
                "labels": entity.labels(),
                "type": entity.relationship_type(),
                "start": entity.start(),
                "end": entity.end(),
                "properties": properties,
            })
        }
    };

    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}
