//! Pipeline entry points.
//!
//! - `ArchivePipeline::run`: validate, gate, crawl, package and store
//! - `ArchivePipeline::retrieve`: one-time archive delivery
//! - `ArchivePipeline::file_report`: takedown report intake

mod progress;
mod report;
mod retrieve;
mod run;

pub use progress::ProgressSink;
pub use retrieve::{CONTENT_TYPE, Download};
pub use run::{ArchivePipeline, RunOutcome, Stores};
