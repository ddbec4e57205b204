//! Print history file: one JSON object per completed print

use printgate_core::{PrintRecord, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Append-only print history
#[derive(Debug, Clone)]
pub struct PrintHistory {
    path: PathBuf,
}

impl PrintHistory {
    /// History stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record
    pub async fn append(&self, record: &PrintRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| printgate_core::Error::other(e.to_string()))?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read every record, skipping lines that do not parse
    pub async fn load(&self) -> Result<Vec<PrintRecord>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(text
            .lines()
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!("skipping history line: {}", e);
                    None
                }
            })
            .collect())
    }
}
