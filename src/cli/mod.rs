pub mod records;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use records::{clear_record, print_history, print_totals, repair_log};
use tracing::level_filters::LevelFilter;

use crate::{
    tracker::{start_tracking, storage::HistoryBound},
    utils::{
        dir::{create_application_default_path, ensure_dir, LOG_FILE_NAME},
        display::DisplayMode,
        logging::{enable_logging, LOG_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "doctime", version, long_about = None)]
#[command(about = "Tracks open and active time of documents", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(long = "log-console", global = true, help = "Mirror logs to stdout")]
    log_console: bool,
    #[arg(long = "log-filter", global = true, help = "Log level, overrides RUST_LOG")]
    log: Option<LevelFilter>,
    #[arg(long, global = true, default_value_t = DisplayMode::Days, help = "How durations are printed")]
    mode: DisplayMode,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(
        about = "Track documents announced on stdin. One command per line: open <path>, save, close, focus, blur, move <x> <y>, press, bound <n>, clear"
    )]
    Track {
        #[arg(
            long = "max-entries",
            default_value_t = 5,
            allow_negative_numbers = true,
            help = "Checkpoints kept per document, clamped to [3, 100]"
        )]
        max_entries: i64,
    },
    #[command(about = "Show stored totals of one document, or of every document")]
    Totals { path: Option<String> },
    #[command(about = "Show the stored save history of a document, newest first")]
    History { path: String },
    #[command(about = "Reset totals and history of a document")]
    Clear { path: String },
    #[command(about = "Move an unreadable log aside so tracking can start over")]
    Repair {},
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = match args.dir {
        Some(dir) => ensure_dir(dir)?,
        None => create_application_default_path()?,
    };
    enable_logging(LOG_PREFIX, &app_dir.join("logs"), args.log, args.log_console)?;
    let log_path = app_dir.join(LOG_FILE_NAME);

    match args.commands {
        Commands::Track { max_entries } => {
            let bound = HistoryBound::new(max_entries).unwrap_or_else(|e| {
                eprintln!("warning: {e}, clamping");
                HistoryBound::clamped(max_entries)
            });
            start_tracking(log_path, bound, tokio::io::BufReader::new(tokio::io::stdin())).await
        }
        Commands::Totals { path } => print_totals(&log_path, path.as_deref(), args.mode).await,
        Commands::History { path } => print_history(&log_path, &path, args.mode).await,
        Commands::Clear { path } => clear_record(&log_path, &path).await,
        Commands::Repair {} => repair_log(&log_path).await,
    }
}
