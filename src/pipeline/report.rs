//! Takedown report intake.

use crate::error::Result;
use crate::models::{ReportRequest, ReportTicket};
use crate::pipeline::ArchivePipeline;

impl ArchivePipeline {
    /// Validate and file a report. Owner claims block the site at once,
    /// so runs started afterwards fail with `Blocked`.
    pub async fn file_report(&self, request: &ReportRequest) -> Result<ReportTicket> {
        self.moderation().file_report(request).await
    }
}
