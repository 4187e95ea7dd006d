use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wp_s3_migrator::db::{Db, Tables};
use wp_s3_migrator::orchestrator::{self, MigrateTarget, RunConfig};
use wp_s3_migrator::progress::LogProgress;
use wp_s3_migrator::store::MySqlStore;
use wp_s3_migrator::util::env as env_util;

#[derive(Parser, Debug)]
#[command(
    name = "wps3",
    version,
    about = "One-time migration of self-hosted WordPress uploads references to an S3 bucket"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Rewrite uploads URLs across attachments, posts, post meta and options
    Migrate {
        /// Bucket domain to point images at, e.g. s3-eu-west-1.amazonaws.com/testbucket
        #[arg(long)]
        domain: String,
        /// Records per batch
        #[arg(long, default_value_t = 1000)]
        batch: u64,
        /// Record set to migrate: all, images, posts, postmeta or options
        #[arg(long = "type", default_value = "all")]
        migrate_type: String,
        /// Comma-separated meta keys that must not be rewritten
        #[arg(long, value_delimiter = ',')]
        ignore_meta_keys: Vec<String>,
        /// Multisite blog id; non-primary blogs get a sites/<id>/ key prefix
        #[arg(long, default_value_t = 1)]
        blog_id: u64,
        /// Physical table prefix
        #[arg(long, default_value = "wp_")]
        table_prefix: String,
        /// Database URL override (falls back to WORDPRESS_DB_URL / DATABASE_URL / DB_* vars)
        #[arg(long)]
        db_url: Option<String>,
        /// Max pool connections
        #[arg(long, default_value_t = 5)]
        max_connections: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Migrate {
            domain,
            batch,
            migrate_type,
            ignore_meta_keys,
            blog_id,
            table_prefix,
            db_url,
            max_connections,
        } => {
            let target: MigrateTarget = migrate_type.parse()?;
            let database_url = resolve_database_url(db_url)?;
            info!(url = %env_util::redact_db_url(&database_url), "migrate: connecting");
            let db = Db::connect(&database_url, max_connections).await?;
            let store = MySqlStore::new(db, Tables::new(&table_prefix));

            let config = RunConfig {
                domain,
                batch,
                target,
                ignore_meta_keys: ignore_meta_keys
                    .into_iter()
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect::<HashSet<_>>(),
                blog_id,
            };

            let progress = LogProgress {
                interval: env_util::env_parse("PROGRESS_LOG_INTERVAL", 1000),
            };
            let summary = orchestrator::run(&store, &config, &progress).await?;
            info!(warnings = summary.warnings(), "migrate: finished");
        }
    }
    Ok(())
}

fn resolve_database_url(db_url: Option<String>) -> Result<String> {
    if let Some(url) = db_url {
        let trimmed = url.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
    let env_url = env_util::db_url()
        .context("no database URL: set WORDPRESS_DB_URL / DATABASE_URL or pass --db-url")?;
    let trimmed = env_url.trim();
    if trimmed.is_empty() {
        bail!("database URL is empty; set WORDPRESS_DB_URL or pass --db-url");
    }
    Ok(trimmed.to_string())
}
