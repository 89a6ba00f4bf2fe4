//! Page-based job progress.
//!
//! The grand total grows while enumeration runs, so the raw ratio can shrink
//! when a new item is discovered. The tracker only ever reports a higher
//! percentage than the last one it reported.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Progress counters for one job.
#[derive(Debug)]
pub struct ProgressTracker {
    grand_total: Arc<AtomicUsize>,
    dequeued_before: usize,
    item_pages: usize,
    done_in_item: usize,
    completed_pages: usize,
    last_percent: Option<u32>,
}

/// A percentage worth pushing to the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u32,
    pub completed: usize,
    pub total: usize,
}

impl ProgressTracker {
    /// `grand_total` is shared with the producer, which adds each item's
    /// pages before publishing it.
    pub fn new(grand_total: Arc<AtomicUsize>) -> Self {
        Self {
            grand_total,
            dequeued_before: 0,
            item_pages: 0,
            done_in_item: 0,
            completed_pages: 0,
            last_percent: None,
        }
    }

    pub fn grand_total(&self) -> usize {
        self.grand_total.load(Ordering::SeqCst)
    }

    /// Pages of successfully converted items.
    pub fn completed_pages(&self) -> usize {
        self.completed_pages
    }

    pub fn done_in_item(&self) -> usize {
        self.done_in_item
    }

    /// Begin (or restart) an item with `pages` pages.
    pub fn start_item(&mut self, pages: usize) {
        self.item_pages = pages;
        self.done_in_item = 0;
    }

    /// Record pages finished in the current item. Never moves backwards.
    pub fn set_done_in_item(&mut self, done: usize) {
        self.done_in_item = self.done_in_item.max(done.min(self.item_pages));
    }

    /// The current item converted; its pages count as completed.
    pub fn finish_item(&mut self) {
        self.dequeued_before += self.item_pages;
        self.completed_pages += self.item_pages;
        self.item_pages = 0;
        self.done_in_item = 0;
    }

    /// The current item was skipped; its pages leave the remaining work but
    /// are not completed.
    pub fn skip_item(&mut self) {
        self.dequeued_before += self.item_pages;
        self.item_pages = 0;
        self.done_in_item = 0;
    }

    /// Pages accounted for so far, including the current item.
    pub fn position(&self) -> usize {
        self.dequeued_before + self.done_in_item.min(self.item_pages)
    }

    fn percent(&self) -> u32 {
        let total = self.grand_total();
        if total == 0 {
            return 0;
        }
        let ratio = self.position() as f64 / total as f64;
        (100.0 * ratio).round().clamp(0.0, 100.0) as u32
    }

    /// The update to push, if the rounded percentage rose.
    pub fn update(&mut self) -> Option<ProgressUpdate> {
        let percent = self.percent();
        if self.last_percent.is_some_and(|last| percent <= last) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(ProgressUpdate {
            percent,
            completed: self.position(),
            total: self.grand_total(),
        })
    }
}
