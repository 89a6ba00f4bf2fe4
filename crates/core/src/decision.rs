//! Operator decisions for failing items.
//!
//! The prompt is owned by the thread that owns the status surface. The
//! enumeration thread asks through a [`DecisionBroker`]: it sends a
//! [`DecisionRequest`] carrying a reply channel and waits for the answer,
//! re-checking the job's abort flag while it waits.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Answer to "this item failed, what now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Stop the whole job.
    Abort,
    /// Try the same item again.
    Retry,
    /// Skip the item and continue.
    Ignore,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decision::Abort => "abort",
            Decision::Retry => "retry",
            Decision::Ignore => "ignore",
        })
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" | "abort" => Ok(Decision::Abort),
            "r" | "retry" => Ok(Decision::Retry),
            "i" | "ignore" | "skip" => Ok(Decision::Ignore),
            other => Err(format!("unknown decision '{}'", other)),
        }
    }
}

/// Asks the operator to triage a failure.
pub trait DecisionPrompt {
    fn ask(&mut self, message: &str) -> Decision;
}

impl<F> DecisionPrompt for F
where
    F: FnMut(&str) -> Decision,
{
    fn ask(&mut self, message: &str) -> Decision {
        self(message)
    }
}

/// Prompt that always gives the same answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedDecision(pub Decision);

impl DecisionPrompt for FixedDecision {
    fn ask(&mut self, message: &str) -> Decision {
        debug!("Answering '{}' with {}", message, self.0);
        self.0
    }
}

/// A question from the enumeration thread.
#[derive(Debug)]
pub struct DecisionRequest {
    message: String,
    reply: Sender<Decision>,
}

impl DecisionRequest {
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Send the answer back to the waiting thread.
    pub fn answer(self, decision: Decision) {
        if self.reply.send(decision).is_err() {
            debug!("Decision {} arrived after the asker stopped waiting", decision);
        }
    }
}

/// Producer-side handle for asking the operator from another thread.
#[derive(Debug, Clone)]
pub struct DecisionBroker {
    requests: Sender<DecisionRequest>,
    abort: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl DecisionBroker {
    /// Create a broker and the receiver the prompt owner serves.
    pub fn channel(
        abort: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> (Self, Receiver<DecisionRequest>) {
        let (requests, receiver) = unbounded();
        (
            Self {
                requests,
                abort,
                poll_interval,
            },
            receiver,
        )
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Ask and block until answered. Answers `Abort` once the job is aborted
    /// or when nobody serves the request.
    pub fn ask(&self, message: impl Into<String>) -> Decision {
        if self.aborted() {
            return Decision::Abort;
        }

        let (reply, answers) = bounded(1);
        let request = DecisionRequest {
            message: message.into(),
            reply,
        };
        if self.requests.send(request).is_err() {
            warn!("Decision requested with no prompt attached");
            return Decision::Abort;
        }

        loop {
            match answers.recv_timeout(self.poll_interval) {
                Ok(decision) => return decision,
                Err(RecvTimeoutError::Timeout) => {
                    if self.aborted() {
                        debug!("Job aborted while waiting for a decision");
                        return Decision::Abort;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Decision::Abort,
            }
        }
    }
}
