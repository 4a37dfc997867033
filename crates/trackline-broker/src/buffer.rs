//! Offline publish buffer.
//!
//! Holds messages the publisher could not send while the broker was
//! unreachable. Entries replay oldest-first. With a spool path the buffer is
//! mirrored to a JSON-lines file and reloaded on startup.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::BrokerResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub queue: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Default)]
pub struct OfflineBuffer {
    entries: VecDeque<BufferedMessage>,
    spool: Option<PathBuf>,
}

impl OfflineBuffer {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a spooled buffer, loading entries left over from a previous run.
    ///
    /// Unreadable lines are skipped with a warning.
    pub async fn open(path: impl Into<PathBuf>) -> BrokerResult<Self> {
        let path = path.into();
        let mut entries = VecDeque::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for (line_no, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<BufferedMessage>(line) {
                        Ok(entry) => entries.push_back(entry),
                        Err(e) => tracing::warn!(
                            error = %e,
                            line = line_no + 1,
                            spool = %path.display(),
                            "Skipping unreadable spool entry"
                        ),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            Err(e) => return Err(e.into()),
        }

        if !entries.is_empty() {
            tracing::info!(
                count = entries.len(),
                spool = %path.display(),
                "Loaded buffered messages from spool"
            );
        }

        Ok(Self {
            entries,
            spool: Some(path),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn front(&self) -> Option<&BufferedMessage> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedMessage> {
        self.entries.iter()
    }

    /// Append an entry. A spool write failure is logged; the entry stays buffered in memory.
    pub async fn push(&mut self, entry: BufferedMessage) {
        if let Some(path) = &self.spool {
            if let Err(e) = append_line(path, &entry).await {
                tracing::warn!(
                    error = %e,
                    spool = %path.display(),
                    "Failed to append to publish spool"
                );
            }
        }
        self.entries.push_back(entry);
    }

    /// Remove the oldest entry. Call [`OfflineBuffer::sync`] to update the spool.
    pub fn pop_front(&mut self) -> Option<BufferedMessage> {
        self.entries.pop_front()
    }

    /// Rewrite the spool to match the in-memory entries.
    pub async fn sync(&self) -> BrokerResult<()> {
        let Some(path) = &self.spool else {
            return Ok(());
        };

        let mut contents = String::new();
        for entry in &self.entries {
            contents.push_str(&serde_json::to_string(entry)?);
            contents.push('\n');
        }

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

async fn append_line(path: &Path, entry: &BufferedMessage) -> BrokerResult<()> {
    let mut line = serde_json::to_vec(entry)?;
    line.push(b'\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}
