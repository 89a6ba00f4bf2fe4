//! The progress/status surface a job reports to.
//!
//! Surfaces are driven from the thread running the job. Methods take `&self`
//! because the engine's cancel predicate and its progress observer both hold
//! the surface at the same time; implementations use interior mutability.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::info;

/// Status line showing the current input.
pub const LINE_ITEM: usize = 0;
/// Status line showing page progress.
pub const LINE_PAGES: usize = 1;

pub trait StatusSurface {
    /// Replace the text of one status line.
    fn set_line(&self, index: usize, text: &str);

    /// Report overall progress in pages.
    fn set_percentage(&self, completed: usize, total: usize);

    /// Whether the operator asked to cancel.
    fn has_user_cancelled(&self) -> bool;

    /// Stop the elapsed-time clock while the operator is being asked.
    fn pause_timer(&self);

    fn resume_timer(&self);

    /// The job ended; release the surface and stop the clock.
    fn finish(&self);
}

/// Surface that shows nothing and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatus;

impl StatusSurface for NullStatus {
    fn set_line(&self, _index: usize, _text: &str) {}
    fn set_percentage(&self, _completed: usize, _total: usize) {}
    fn has_user_cancelled(&self) -> bool {
        false
    }
    fn pause_timer(&self) {}
    fn resume_timer(&self) {}
    fn finish(&self) {}
}

/// Elapsed-time clock that can be paused.
#[derive(Debug, Clone, Default)]
pub struct JobTimer {
    running_since: Option<Instant>,
    accumulated: Duration,
    started: bool,
}

impl JobTimer {
    /// A timer that is already running.
    pub fn started() -> Self {
        Self {
            running_since: Some(Instant::now()),
            accumulated: Duration::ZERO,
            started: true,
        }
    }

    pub fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    pub fn resume(&mut self) {
        if self.started && self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    /// Stop for good; `resume` has no effect afterwards.
    pub fn stop(&mut self) {
        self.pause();
        self.started = false;
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.accumulated
            + self
                .running_since
                .map(|since| since.elapsed())
                .unwrap_or_default()
    }
}

/// Surface that reports through `tracing`. Cancellation is requested through
/// a shared flag, for example from a signal handler.
#[derive(Debug)]
pub struct LogStatus {
    cancel: Arc<AtomicBool>,
    timer: Mutex<JobTimer>,
    last_percent: Mutex<Option<usize>>,
}

impl Default for LogStatus {
    fn default() -> Self {
        Self::new(Arc::new(AtomicBool::new(false)))
    }
}

impl LogStatus {
    pub fn new(cancel: Arc<AtomicBool>) -> Self {
        Self {
            cancel,
            timer: Mutex::new(JobTimer::started()),
            last_percent: Mutex::new(None),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }
}

impl StatusSurface for LogStatus {
    fn set_line(&self, index: usize, text: &str) {
        info!(line = index, "{}", text);
    }

    fn set_percentage(&self, completed: usize, total: usize) {
        let percent = if total == 0 { 0 } else { completed * 100 / total };
        let mut last = self.last_percent.lock().unwrap_or_else(PoisonError::into_inner);
        if *last != Some(percent) {
            info!("Progress: {}% ({}/{} pages)", percent, completed, total);
            *last = Some(percent);
        }
    }

    fn has_user_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn pause_timer(&self) {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner).pause();
    }

    fn resume_timer(&self) {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner).resume();
    }

    fn finish(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        timer.stop();
        info!("Job finished after {:?}", timer.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_pause_excludes_time() {
        let mut timer = JobTimer::started();
        std::thread::sleep(Duration::from_millis(5));
        timer.pause();
        let paused_at = timer.elapsed();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(timer.elapsed(), paused_at);
        assert!(!timer.is_running());

        timer.resume();
        assert!(timer.is_running());
        assert!(timer.elapsed() >= paused_at);
    }

    #[test]
    fn test_timer_stop_is_final() {
        let mut timer = JobTimer::started();
        timer.stop();
        timer.resume();
        assert!(!timer.is_running());

        let mut never = JobTimer::default();
        never.resume();
        assert!(!never.is_running());
        assert_eq!(never.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_log_status_cancel_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let status = LogStatus::new(Arc::clone(&flag));
        assert!(!status.has_user_cancelled());
        flag.store(true, Ordering::SeqCst);
        assert!(status.has_user_cancelled());

        status.set_percentage(1, 3);
        status.pause_timer();
        status.resume_timer();
        status.finish();
    }

    #[test]
    fn test_null_status_never_cancels() {
        let status = NullStatus;
        status.set_line(LINE_ITEM, "a.pdf");
        assert!(!status.has_user_cancelled());
    }
}
