use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use park_cli::commands::{self, replay};
use park_daemon::{bootstrap, IngestContext, Ingestor};
use park_db::PgStore;

#[derive(Parser)]
#[command(name = "park")]
#[command(about = "Parking occupancy ingest CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> site...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Feed captured payloads (JSON lines) through the ingest pipeline into Postgres
    Replay {
        /// Topic the payloads were captured from
        #[arg(long)]
        topic: String,

        /// Layered config paths in merge order (defaults + env when omitted)
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// JSON-lines file, one payload per line
        file: String,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    /// Connectivity, schema presence and outstanding legacy rows
    Status,

    /// Apply SQL migrations
    Migrate,

    /// Rewrite slot-state rows still keyed by their raw label to canonical slot ids
    CanonicalizeLegacy,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = park_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = park_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_slot_tables={} legacy_rows={}",
                        s.ok, s.has_slot_tables, s.legacy_rows
                    );
                }
                DbCmd::Migrate => {
                    park_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
                DbCmd::CanonicalizeLegacy => {
                    let r = park_db::canonicalize_legacy_rows(&pool).await?;
                    println!("rekeyed={}", r.rekeyed);
                    println!("superseded={}", r.superseded);
                    println!("unparseable={}", r.unparseable.len());
                    for label in &r.unparseable {
                        println!("unparseable_label={label:?}");
                    }
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = park_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Replay {
            topic,
            config_paths,
            file,
        } => {
            let text = commands::read_text(&file)?;
            let settings = bootstrap::load_settings(&config_paths)?;
            if topic != settings.topics.status && topic != settings.topics.illegal {
                anyhow::bail!(
                    "--topic {topic:?} is neither the status topic {:?} nor the illegal topic {:?}",
                    settings.topics.status,
                    settings.topics.illegal
                );
            }
            let secrets = park_config::resolve_secrets(&settings)?;
            let pool = park_db::connect(&secrets.database_url, settings.db.max_connections).await?;

            let ctx = Arc::new(IngestContext::new(
                Arc::new(PgStore::new(pool.clone())),
                settings,
            ));
            let report = replay::replay_lines(&Ingestor::new(ctx), &topic, &text).await;
            pool.close().await;

            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("serialize replay report")?
            );
        }
    }

    Ok(())
}
