//! Progress stream producer.

use tokio::sync::mpsc;

use crate::models::ProgressEvent;

/// Share of the progress bar covered by the crawl itself.
const CRAWL_START: u8 = 5;
const CRAWL_END: u8 = 85;

/// Producer side of one run's progress stream.
///
/// Keeps the stream well formed: progress values never decrease and at
/// most one terminal event is sent. A dropped receiver is how the caller
/// cancels the run.
#[derive(Debug)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
    last: u8,
    finished: bool,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self {
            tx: Some(tx),
            last: 0,
            finished: false,
        }
    }

    /// A sink nobody listens to; never reports cancellation.
    pub fn detached() -> Self {
        Self {
            tx: None,
            last: 0,
            finished: false,
        }
    }

    /// Whether the consumer has gone away.
    pub fn is_cancelled(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.is_closed())
    }

    /// Resolves once the consumer has gone away; never for a detached sink.
    pub async fn closed(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => std::future::pending().await,
        }
    }

    /// Last progress value sent.
    pub fn value(&self) -> u8 {
        self.last
    }

    /// Report progress. Values below the last one are raised to it.
    pub async fn progress(&mut self, value: u8, message: impl Into<String>) {
        if self.finished {
            return;
        }
        let value = value.min(100).max(self.last);
        self.last = value;
        self.send(ProgressEvent::Progress {
            value,
            message: Some(message.into()),
        })
        .await;
    }

    /// Map crawl state onto the crawl band of the progress bar.
    pub async fn crawl_progress(&mut self, visited: usize, pending: usize, pages: usize) {
        let seen = visited + pending;
        let ratio = if seen == 0 {
            1.0
        } else {
            visited as f64 / seen as f64
        };
        let span = f64::from(CRAWL_END - CRAWL_START);
        let value = CRAWL_START + (ratio * span).round() as u8;
        self.progress(
            value,
            format!("Archived {pages} pages ({visited} visited, {pending} queued)"),
        )
        .await;
    }

    /// Send the terminal event; later calls are ignored.
    pub async fn finish(&mut self, event: ProgressEvent) {
        if self.finished {
            return;
        }
        debug_assert!(event.is_terminal());
        self.finished = true;
        self.send(event).await;
    }

    async fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                log::debug!("Progress receiver dropped");
            }
        }
    }
}
