use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use library::{store::schema, tasks, Ffmpeg, Settings};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Track and transcode a media library
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new, empty library database
    Create {
        /// Path to the database to create
        #[arg(short, long)]
        database: Option<PathBuf>,
    },
    /// Walk a media library, recording new and renamed files
    Update {
        /// Path to the library database
        #[arg(short, long)]
        database: Option<PathBuf>,
        /// Root of the media library
        #[arg(short, long)]
        path: Option<PathBuf>,
        /// Number of worker threads, defaults to the number of CPUs
        #[arg(short, long)]
        threads: Option<usize>,
    },
    /// Concurrently transcode a number of pending entries
    Transcode {
        /// Path to the library database
        #[arg(short, long)]
        database: Option<PathBuf>,
        /// Number of entries to transcode, defaults to the number of CPUs
        #[arg(short, long)]
        entries: Option<usize>,
        /// Number of worker threads, defaults to the number of CPUs
        #[arg(short, long)]
        threads: Option<usize>,
    },
    /// Build a new database from a legacy JSON or TOML library listing
    Convert {
        /// Listing with `transcoded` and `untranscoded` path lists
        #[arg(short, long)]
        source: PathBuf,
        /// Path to the database to create
        #[arg(short, long)]
        database: Option<PathBuf>,
        /// Number of worker threads, defaults to the number of CPUs
        #[arg(short, long)]
        threads: Option<usize>,
    },
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Use RUST_LOG if set, otherwise info (or debug with --verbose)
    let mut logger = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        logger.filter_level(if args.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info });
    }
    logger.format_timestamp_secs().init();

    let settings = Settings::load(args.config.as_deref()).context("Failed to load configuration")?;

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing in-flight entries before exiting");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    tokio::task::spawn_blocking(move || run(args.command, settings, cancel))
        .await
        .context("Command panicked")?
}

fn run(command: Command, settings: Settings, cancel: Arc<AtomicBool>) -> Result<()> {
    let database = |flag: Option<PathBuf>| {
        flag.or_else(|| settings.database.clone())
            .context("No database given (use --database or set `database` in the config file)")
    };

    match command {
        Command::Create { database: flag } => {
            let database = database(flag)?;
            tasks::create(&database)?;
            info!("Created {}", database.display());
        }
        Command::Update { database: flag, path, threads } => {
            let database = database(flag)?;
            let root = path
                .or_else(|| settings.library_root.clone())
                .context("No library given (use --path or set `library_root` in the config file)")?;
            tasks::update(&database, &root, threads.unwrap_or(settings.threads), &cancel)?;
        }
        Command::Transcode { database: flag, entries, threads } => {
            let database = database(flag)?;
            let transcoder = Arc::new(Ffmpeg::new(settings.ffmpeg_bin.clone()));
            tasks::transcode(
                &database,
                entries.unwrap_or(settings.entries),
                threads.unwrap_or(settings.threads),
                transcoder,
                &cancel,
            )?;
        }
        Command::Convert { source, database: flag, threads } => {
            let database = database(flag)?;
            tasks::convert(&source, &database, threads.unwrap_or(settings.threads), &cancel)?;
        }
        Command::Version => {
            println!("amt {}", env!("CARGO_PKG_VERSION"));
            println!("database version {}", schema::SCHEMA_VERSION_CURRENT);
        }
    }

    Ok(())
}
