//! kb-backup - CLI front end for the backup engine.

use anyhow::Result;
use clap::{Parser, Subcommand};
use kb_backup_engine::{
    logging, BackupConfig, BackupEngine, BackupOptions, BackupScheduler, EventBus, RecordFilter,
    RestoreOptions,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Backup and restore for the knowledge-base database", long_about = None)]
struct Args {
    /// Backup directory (overrides BACKUP_PATH)
    #[arg(short, long)]
    backup_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Snapshot a database into the backup directory
    Create {
        source: PathBuf,
        #[arg(long)]
        description: Option<String>,
        /// May be given multiple times
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        no_compress: bool,
        #[arg(long)]
        no_verify: bool,
    },
    /// Restore a backup to a target path
    Restore {
        backup_id: String,
        target: PathBuf,
        #[arg(long)]
        overwrite: bool,
    },
    /// List catalog records, newest first
    List {
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one record
    Info { backup_id: String },
    /// Delete a backup and its artifact
    Delete { backup_id: String },
    /// Catalog aggregates
    Stats,
    /// Apply the retention policy now
    Cleanup,
    /// Run the periodic scheduler until interrupted
    Run {
        source: PathBuf,
        #[arg(long)]
        interval_hours: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = BackupConfig::from_env();
    if let Some(dir) = args.backup_dir {
        config.backup_path = dir;
    }

    logging::init(args.log_level.as_deref().unwrap_or("info"));

    let events = EventBus::new();
    let engine = BackupEngine::open(config, events.clone()).await?;

    match args.command {
        Command::Create {
            source,
            description,
            tags,
            no_compress,
            no_verify,
        } => {
            let options = BackupOptions {
                compression: no_compress.then_some(false),
                verify: no_verify.then_some(false),
                description,
                tags,
            };
            let result = engine.create_backup(&source, &options).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Restore {
            backup_id,
            target,
            overwrite,
        } => {
            let options = RestoreOptions {
                overwrite,
                ..Default::default()
            };
            let result = engine.restore(&backup_id, &target, &options).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::List { tag, limit } => {
            let filter = RecordFilter {
                tag,
                limit,
                ..Default::default()
            };
            let records = engine.list_backups(&filter).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Command::Info { backup_id } => match engine.get_backup(&backup_id).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => anyhow::bail!("backup not found: {backup_id}"),
        },
        Command::Delete { backup_id } => {
            engine.delete_backup(&backup_id).await?;
            println!("deleted {backup_id}");
        }
        Command::Stats => {
            let stats = engine.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Cleanup => {
            let report = engine.run_cleanup().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Run {
            source,
            interval_hours,
        } => {
            let scheduler = BackupScheduler::new(engine.clone());
            let interval =
                interval_hours.map(|h| std::time::Duration::from_secs_f64(h * 3600.0));
            scheduler.start(Some(source), interval).await?;

            // Signal handling stays in the binary; the engine never
            // registers OS-level handlers itself.
            tokio::signal::ctrl_c().await?;
            tracing::info!("Received SIGINT, stopping scheduler");
            scheduler.stop().await;
        }
    }

    engine.shutdown();
    Ok(())
}
