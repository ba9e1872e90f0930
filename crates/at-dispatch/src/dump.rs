//! Write-once dump of raw batch results for later inspection.

use at_types::{AtResult, TaskResult};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes one JSON file per completed batch into a directory.
#[derive(Debug, Clone)]
pub struct ResultDump {
    dir: PathBuf,
}

impl ResultDump {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{timestamp}_{execution_id}.json`, with the id reduced to file-safe characters.
    pub fn file_name(execution_id: &str, finished_at: DateTime<Utc>) -> String {
        let id: String = execution_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}_{id}.json", finished_at.format("%Y%m%d-%H%M%S"))
    }

    pub fn write(
        &self,
        execution_id: &str,
        finished_at: DateTime<Utc>,
        results: &[TaskResult],
    ) -> AtResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::file_name(execution_id, finished_at));
        let body = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, body)?;
        debug!(path = %path.display(), results = results.len(), "raw results dumped");
        Ok(path)
    }
}
