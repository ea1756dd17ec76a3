use std::path::Path;

use anyhow::{bail, Result};
use tracing::info;

use crate::{
    tracker::storage::{
        history_store::clear, HistoryStore, JsonHistoryStore, LogStore, SubjectKey, SubjectRecord,
    },
    utils::display::{format_duration, DisplayMode},
};

fn totals_line(key: &SubjectKey, record: &SubjectRecord, mode: DisplayMode) -> String {
    format!(
        "{}\topen {}\tactive {}",
        key,
        format_duration(record.total_open_time, mode),
        format_duration(record.total_active_time, mode)
    )
}

fn history_lines(record: &SubjectRecord, mode: DisplayMode) -> Vec<String> {
    record
        .history
        .iter()
        .rev()
        .map(|entry| {
            format!(
                "{}\t{}\t{}\t{}",
                entry.date_label,
                entry.time_label,
                format_duration(entry.open_delta, mode),
                format_duration(entry.active_delta, mode)
            )
        })
        .collect()
}

fn find<'a>(log: &'a LogStore, path: &str) -> Result<(SubjectKey, &'a SubjectRecord)> {
    let key = SubjectKey::from_path(path);
    match log.get(&key) {
        Some(record) => Ok((key, record)),
        None => bail!("No history for {path}"),
    }
}

pub async fn print_totals(log_path: &Path, path: Option<&str>, mode: DisplayMode) -> Result<()> {
    let log = JsonHistoryStore::new(log_path.to_path_buf()).load().await?;
    match path {
        Some(path) => {
            let (key, record) = find(&log, path)?;
            println!("{}", totals_line(&key, record, mode));
        }
        None => {
            for (key, record) in &log {
                println!("{}", totals_line(key, record, mode));
            }
        }
    }
    Ok(())
}

pub async fn print_history(log_path: &Path, path: &str, mode: DisplayMode) -> Result<()> {
    let log = JsonHistoryStore::new(log_path.to_path_buf()).load().await?;
    let (_, record) = find(&log, path)?;
    println!("Date\tTime\tOpen\tActive");
    for line in history_lines(record, mode) {
        println!("{line}");
    }
    Ok(())
}

pub async fn clear_record(log_path: &Path, path: &str) -> Result<()> {
    let store = JsonHistoryStore::new(log_path.to_path_buf());
    let mut log = store.load().await?;
    let key = SubjectKey::from_path(path);
    let Some(record) = log.get_mut(&key) else {
        bail!("No history for {path}");
    };
    clear(record);
    store.save(&log).await?;
    info!("Cleared {key} from the command line");
    println!("Cleared {key}");
    Ok(())
}

pub async fn repair_log(log_path: &Path) -> Result<()> {
    let store = JsonHistoryStore::new(log_path.to_path_buf());
    match store.quarantine().await? {
        Some(moved) => println!("Log was unreadable, moved it to {}", moved.display()),
        None => println!("Log is readable, nothing to repair"),
    }
    Ok(())
}
