//! Download-task bookkeeping: the runtime core only reads/writes rows for
//! dictionary acquisition (§3, §6). The actual network transfer is an
//! external collaborator; this module is persistence-only.
//!
//! Grounded on `userdict.rs`'s thin typed-row-over-redb-table pattern — the
//! teacher has no downloader of its own, so there is no prior `DownloadTask`
//! shape to generalize from, only the storage idiom.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a dictionary acquisition task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
}

impl DownloadStatus {
    /// `Completed`/`Failed` are terminal; `list_non_terminal` filters these out.
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Failed)
    }
}

/// A dictionary acquisition task, keyed by `dict_id` in C1's `download_task`
/// table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub dict_id: String,
    pub version: String,
    pub url: String,
    pub total_size: u64,
    pub downloaded_size: u64,
    pub temp_path: String,
    pub status: DownloadStatus,
    pub error: Option<String>,
}

impl DownloadTask {
    pub fn new(dict_id: impl Into<String>, version: impl Into<String>, url: impl Into<String>) -> Self {
        DownloadTask {
            dict_id: dict_id.into(),
            version: version.into(),
            url: url.into(),
            total_size: 0,
            downloaded_size: 0,
            temp_path: String::new(),
            status: DownloadStatus::Pending,
            error: None,
        }
    }
}
