//! Terminal renditions of the status surface and the decision prompt.

use docbatch_core::status::{JobTimer, LINE_ITEM, LINE_PAGES};
use docbatch_core::{Decision, DecisionPrompt, StatusSurface};
use std::cell::RefCell;
use std::io::{BufRead, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

struct StatusState {
    lines: [String; 2],
    percent: usize,
    timer: JobTimer,
    redraw: bool,
    drawn: bool,
}

/// Progress on stderr. Redraws one line in place when stderr is a terminal,
/// and prints plain lines otherwise.
pub struct TerminalStatus {
    state: RefCell<StatusState>,
    cancel: Arc<AtomicBool>,
}

impl TerminalStatus {
    pub fn new(cancel: Arc<AtomicBool>) -> Self {
        Self {
            state: RefCell::new(StatusState {
                lines: [String::new(), String::new()],
                percent: 0,
                timer: JobTimer::started(),
                redraw: std::io::stderr().is_terminal(),
                drawn: false,
            }),
            cancel,
        }
    }

    fn draw(state: &mut StatusState) {
        let line = format!(
            "[{:>3}%] {}  {}  {}",
            state.percent,
            state.lines[LINE_ITEM],
            state.lines[LINE_PAGES],
            format_elapsed(state.timer.elapsed())
        );
        let mut stderr = std::io::stderr().lock();
        if state.redraw {
            let _ = write!(stderr, "\r\x1b[2K{}", line);
            let _ = stderr.flush();
            state.drawn = true;
        } else {
            let _ = writeln!(stderr, "{}", line);
        }
    }

    /// End the in-place line so other output starts on a fresh one.
    fn break_line(state: &mut StatusState) {
        if state.drawn {
            eprintln!();
            state.drawn = false;
        }
    }
}

impl StatusSurface for TerminalStatus {
    fn set_line(&self, index: usize, text: &str) {
        let mut state = self.state.borrow_mut();
        if let Some(line) = state.lines.get_mut(index) {
            *line = text.to_string();
        }
        if index == LINE_ITEM || state.redraw {
            Self::draw(&mut state);
        }
    }

    fn set_percentage(&self, completed: usize, total: usize) {
        let mut state = self.state.borrow_mut();
        state.percent = if total == 0 {
            0
        } else {
            (completed * 100 / total).min(100)
        };
        Self::draw(&mut state);
    }

    fn has_user_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn pause_timer(&self) {
        let mut state = self.state.borrow_mut();
        state.timer.pause();
        Self::break_line(&mut state);
    }

    fn resume_timer(&self) {
        self.state.borrow_mut().timer.resume();
    }

    fn finish(&self) {
        let mut state = self.state.borrow_mut();
        state.timer.stop();
        Self::break_line(&mut state);
    }
}

/// How failures are triaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OnError {
    /// Ask on the terminal.
    Ask,
    Abort,
    Ignore,
}

/// Decision prompt reading answers from stdin, or answering with a fixed
/// policy.
pub struct TerminalPrompt {
    policy: OnError,
}

impl TerminalPrompt {
    pub fn new(policy: OnError) -> Self {
        Self { policy }
    }

    fn read_decision(message: &str, input: &mut dyn BufRead) -> Decision {
        loop {
            eprint!("{}\n[a]bort, [r]etry, [i]gnore? ", message);
            let _ = std::io::stderr().flush();

            let mut answer = String::new();
            match input.read_line(&mut answer) {
                Ok(0) | Err(_) => return Decision::Abort,
                Ok(_) => match answer.parse::<Decision>() {
                    Ok(decision) => return decision,
                    Err(e) => eprintln!("{}", e),
                },
            }
        }
    }
}

impl DecisionPrompt for TerminalPrompt {
    fn ask(&mut self, message: &str) -> Decision {
        match self.policy {
            OnError::Ask => Self::read_decision(message, &mut std::io::stdin().lock()),
            OnError::Abort => {
                eprintln!("{}", message);
                Decision::Abort
            }
            OnError::Ignore => {
                eprintln!("Skipping: {}", message);
                Decision::Ignore
            }
        }
    }
}
