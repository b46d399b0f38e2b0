//! CLI entry point for flexdb administration.

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use flexdb_core::types::TenantId;
use flexdb_core::{FlexConfig, PageRequest};
use flexdb_service::Flexdb;

#[derive(Parser)]
#[command(name = "flexdb")]
#[command(about = "Administration for the flexdb multi-tenant data service")]
struct Cli {
    /// Config file prefix (default: flexdb).
    #[arg(short, long, global = true, default_value = "flexdb")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the control database if needed and apply control migrations.
    Migrate,

    /// Create and migrate the database of an existing tenant.
    Provision {
        #[arg(long)]
        tenant_id: String,
    },

    /// Print one page of tenants as JSON.
    Tenants {
        #[arg(long, default_value_t = 0)]
        page_size: i32,

        #[arg(long, default_value = "")]
        page_token: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let config = FlexConfig::load(&cli.config)?;

    // Connecting creates and migrates the control database.
    let db = Flexdb::connect(&config).await?;

    let outcome = run(&db, cli.command).await;
    db.close().await;
    outcome
}

async fn run(db: &Flexdb, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Migrate => {
            let report = db.control().migrate().await?;
            tracing::info!(
                set = report.set,
                applied = ?report.applied,
                schema_version = report.current_version,
                "Control store up to date"
            );
        }
        Command::Provision { tenant_id } => {
            let tenant_id = TenantId::parse(&tenant_id)?;
            db.tenants().get(tenant_id).await?;
            db.tenant_databases().acquire(&tenant_id).await?;
            tracing::info!(tenant_id = %tenant_id, "Tenant database provisioned");
        }
        Command::Tenants {
            page_size,
            page_token,
        } => {
            let page = db
                .tenants()
                .list(&PageRequest::new(page_size, page_token))
                .await?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
    }
    Ok(())
}
