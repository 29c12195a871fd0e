//! One-time archive delivery.

use chrono::Utc;

use crate::error::Result;
use crate::pipeline::ArchivePipeline;

pub const CONTENT_TYPE: &str = "application/zip";

/// An archive ready to hand to the requester.
#[derive(Debug, Clone)]
pub struct Download {
    pub filename: String,
    /// Exact byte length of `bytes`
    pub content_length: u64,
    pub bytes: Vec<u8>,
}

impl Download {
    /// `Content-Disposition` header value.
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.filename.replace(['"', '\\'], "_"))
    }
}

impl ArchivePipeline {
    /// Retrieve an archive. Succeeds at most once per `download_id`;
    /// consumed, expired and unknown ids all yield `NotFound`.
    pub async fn retrieve(&self, download_id: &str) -> Result<Download> {
        let stored = self.artifacts.take_once(download_id.trim()).await?;
        log::info!(
            "Delivered {} ({} bytes)",
            stored.meta.filename,
            stored.bytes.len()
        );
        Ok(Download {
            filename: stored.meta.filename,
            content_length: stored.bytes.len() as u64,
            bytes: stored.bytes,
        })
    }

    /// Drop archives whose retrieval window has passed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let removed = self.artifacts.purge_expired(Utc::now()).await?;
        if removed > 0 {
            log::info!("Purged {} expired archives", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition() {
        let download = Download {
            filename: "vault-a-archive-20260101-090000.zip".into(),
            content_length: 3,
            bytes: vec![1, 2, 3],
        };
        assert_eq!(
            download.content_disposition(),
            "attachment; filename=\"vault-a-archive-20260101-090000.zip\""
        );
    }
}
