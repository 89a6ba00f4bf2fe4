//! The enumeration producer.
//!
//! Runs on its own thread, turning paths into opened documents and queueing
//! them in order. Dropping the queue sender is the completion signal.

use crate::decision::{Decision, DecisionBroker};
use crate::document::{Document, DocumentTypes};
use crossbeam_channel::Sender;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A document waiting for conversion.
#[derive(Debug)]
pub struct QueuedDocument {
    pub document: Document,
    /// Page count captured at enumeration time.
    pub page_count: usize,
    /// Position in the input list.
    pub index: usize,
}

/// An input that was dropped instead of converted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub path: PathBuf,
    pub error: String,
}

/// What the producer did.
#[derive(Debug, Default)]
pub struct EnumerationSummary {
    pub queued: usize,
    pub skipped: Vec<SkippedItem>,
    /// The producer stopped because of an abort.
    pub aborted: bool,
}

/// Opens inputs and feeds the conversion queue.
pub struct Enumerator {
    allowed: DocumentTypes,
    queue: Sender<QueuedDocument>,
    broker: DecisionBroker,
    abort: Arc<AtomicBool>,
    grand_total: Arc<AtomicUsize>,
}

impl Enumerator {
    pub fn new(
        allowed: DocumentTypes,
        queue: Sender<QueuedDocument>,
        broker: DecisionBroker,
        abort: Arc<AtomicBool>,
        grand_total: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            allowed,
            queue,
            broker,
            abort,
            grand_total,
        }
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Enumerate `paths` in order. Consumes the enumerator so the queue
    /// closes when this returns.
    pub fn run(self, paths: &[PathBuf]) -> EnumerationSummary {
        let mut summary = EnumerationSummary::default();
        info!("Enumerating {} inputs", paths.len());

        'paths: for (index, path) in paths.iter().enumerate() {
            let (document, page_count) = loop {
                if self.aborted() {
                    summary.aborted = true;
                    break 'paths;
                }
                let opened = Document::open(path, self.allowed)
                    .and_then(|document| document.page_count().map(|pages| (document, pages)));
                match opened {
                    Ok(opened) => break opened,
                    Err(e) => {
                        warn!("Failed to open {:?}: {}", path, e);
                        match self.broker.ask(format!("{}: {}", path.display(), e)) {
                            Decision::Retry => {
                                debug!("Retrying {:?}", path);
                                continue;
                            }
                            Decision::Ignore => {
                                summary.skipped.push(SkippedItem {
                                    path: path.clone(),
                                    error: e.to_string(),
                                });
                                continue 'paths;
                            }
                            Decision::Abort => {
                                self.abort.store(true, Ordering::SeqCst);
                                summary.aborted = true;
                                break 'paths;
                            }
                        }
                    }
                }
            };

            // The total must cover the item before the consumer can see it.
            self.grand_total.fetch_add(page_count, Ordering::SeqCst);
            let entry = QueuedDocument {
                document,
                page_count,
                index,
            };
            if self.queue.send(entry).is_err() {
                debug!("Conversion queue closed, stopping enumeration");
                summary.aborted = self.aborted();
                break;
            }
            summary.queued += 1;
        }

        info!(
            "Enumeration done: {} queued, {} skipped",
            summary.queued,
            summary.skipped.len()
        );
        summary
    }
}
