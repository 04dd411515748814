use crate::domain::ports::{ActivityEntry, ActivitySink};
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Serialize)]
struct ActivityRow<'a> {
    timestamp: String,
    brand: &'a str,
    customer: &'a str,
    action: &'a str,
    details: &'a str,
}

/// Appends activity entries to a CSV file.
///
/// The header row is written only when the file is new or empty, so the log
/// survives restarts as one continuous table.
pub struct CsvActivityLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvActivityLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn append(path: &Path, entry: &ActivityEntry) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let needs_header = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file);
    writer
        .serialize(ActivityRow {
            timestamp: entry.timestamp.to_rfc3339(),
            brand: entry.brand.as_str(),
            customer: &entry.customer,
            action: &entry.action,
            details: &entry.details,
        })
        .map_err(|e| CommerceError::Storage(Box::new(e)))?;
    writer.flush()?;
    Ok(())
}

#[async_trait]
impl ActivitySink for CsvActivityLog {
    async fn record(&self, entry: ActivityEntry) -> Result<()> {
        // The guard keeps rows from interleaving; file IO runs off the executor.
        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append(&path, &entry))
            .await
            .map_err(|e| CommerceError::storage(format!("activity log writer panicked: {e}")))?
    }
}
