//! Wire types exchanged with callers: run requests, progress events and
//! report intake.

use serde::{Deserialize, Serialize};

/// A request to archive a site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub root_url: String,
    #[serde(default)]
    pub consent: bool,
    #[serde(default)]
    pub timestamp: String,
}

/// Figures reported once a run completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub total_pages: usize,
    /// Human readable, e.g. `"12.4 KB"`
    pub archive_size: String,
}

/// One record of the newline-delimited progress stream.
///
/// A stream is any number of `Progress` events with non-decreasing
/// values, ended by exactly one `Complete` or `Error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Progress {
        value: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Complete { download_id: String, stats: RunStats },
    Error { message: String },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }

    /// Serialize as a single NDJSON line, newline included.
    pub fn to_ndjson(&self) -> crate::error::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// A takedown report as submitted by the intake form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub vault_url: String,
    pub email: String,
    pub reason_code: String,
    pub details: String,
    #[serde(default)]
    pub verification_url: Option<String>,
}
