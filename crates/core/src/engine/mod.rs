//! Serialized access to the rendering engine.
//!
//! The native engine is single-threaded and not reentrant. [`EngineService`]
//! owns the backend and an engine lock; every [`EngineService::invoke`] call
//! holds that lock while it creates an instance, runs one argument vector and
//! tears the instance down again. Share one service (behind an `Arc`) between
//! all callers in a process.

mod args;
mod backend;
mod display;
mod ghostscript;
#[cfg(any(test, feature = "test-utils"))]
mod scripted;

pub use args::{escape_postscript_string, parse_page_marker, EngineArgs, BATCH_FLAGS, PROGRAM_NAME};
pub use backend::{codes, ArgEncoding, EngineBackend, EngineHooks, EngineInstance, BAND_ROWS};
pub use display::{
    DirtyRect, DisplayCallbacks, FrameCollector, FrameState, PixelFormat, ProgressiveCallback,
    RenderedFrame, SharedFrame,
};
pub use ghostscript::GhostscriptBackend;
#[cfg(any(test, feature = "test-utils"))]
pub use scripted::{Script, ScriptContext, ScriptedBackend};

use crate::config::EngineConfig;
use crate::error::{ConversionError, Result};
use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// One engine run: arguments plus the callbacks installed for its duration.
pub struct Invocation<'a> {
    args: Vec<String>,
    cancel: Option<&'a dyn Fn() -> bool>,
    display: Option<&'a mut dyn DisplayCallbacks>,
    stdout_line: Option<&'a mut dyn FnMut(&str)>,
}

impl<'a> Invocation<'a> {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            cancel: None,
            display: None,
            stdout_line: None,
        }
    }

    /// Predicate polled by the engine. Once it returns true the run is
    /// interrupted.
    pub fn cancel_poll(mut self, cancel: &'a dyn Fn() -> bool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Install the frame-buffer protocol.
    pub fn display(mut self, display: &'a mut dyn DisplayCallbacks) -> Self {
        self.display = Some(display);
        self
    }

    /// Observe complete stdout lines as the engine writes them.
    pub fn on_stdout_line(mut self, observer: &'a mut dyn FnMut(&str)) -> Self {
        self.stdout_line = Some(observer);
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Owns a live engine instance and tears it down on every exit path.
struct InstanceGuard {
    instance: Box<dyn EngineInstance>,
    exited: bool,
}

impl InstanceGuard {
    fn new(instance: Box<dyn EngineInstance>) -> Self {
        Self {
            instance,
            exited: false,
        }
    }

    /// Exit the interpreter and destroy the instance. Returns the exit code.
    fn finish(mut self) -> i32 {
        self.exited = true;
        self.instance.exit()
    }
}

impl Deref for InstanceGuard {
    type Target = dyn EngineInstance;

    fn deref(&self) -> &Self::Target {
        &*self.instance
    }
}

impl DerefMut for InstanceGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.instance
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if !self.exited {
            let code = self.instance.exit();
            if code < 0 {
                warn!("Engine exit during teardown returned {}", code);
            }
        }
    }
}

/// Process-wide engine entry point.
pub struct EngineService {
    backend: Box<dyn EngineBackend>,
    lock: Mutex<()>,
}

impl EngineService {
    pub fn new(backend: Box<dyn EngineBackend>) -> Self {
        Self {
            backend,
            lock: Mutex::new(()),
        }
    }

    /// Create a service backed by Ghostscript.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self::new(Box::new(GhostscriptBackend::new(config)?)))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Run one argument vector.
    ///
    /// Returns `Ok(true)` on success and `Ok(false)` when the run was
    /// cancelled cooperatively, either through the cancel predicate or by a
    /// quit while display callbacks are installed.
    pub fn invoke(&self, invocation: Invocation<'_>) -> Result<bool> {
        let Invocation {
            args,
            cancel,
            display,
            stdout_line,
        } = invocation;

        let _engine = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("Invoking {} engine with {} arguments", self.backend.name(), args.len());

        let mut guard = InstanceGuard::new(self.backend.new_instance()?);
        let code = guard.set_arg_encoding(ArgEncoding::Utf8);
        if code == codes::QUIT {
            return Err(ConversionError::UnexpectedQuit {
                phase: "argument setup".to_string(),
                stderr: String::new(),
            });
        }
        if code < 0 {
            return Err(ConversionError::NativeEngine {
                code,
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let cancelled = Cell::new(false);
        let mut poll = || {
            if cancelled.get() || cancel.is_some_and(|cancel| cancel()) {
                cancelled.set(true);
                codes::INTERRUPT
            } else {
                codes::OK
            }
        };
        let has_display = display.is_some();
        let display: Option<&mut dyn DisplayCallbacks> = match display {
            Some(display) => Some(display),
            None => None,
        };
        let stdout_line: Option<&mut dyn FnMut(&str)> = match stdout_line {
            Some(observer) => Some(observer),
            None => None,
        };

        let mut hooks = EngineHooks::new(&mut poll, display, stdout_line);
        let code = guard.init_with_args(&args, &mut hooks);
        let (stdout, stderr) = hooks.into_output();

        // A paint checkpoint may interrupt before the poll hook latches.
        let cancelled =
            cancelled.get() || (code == codes::INTERRUPT && cancel.is_some_and(|cancel| cancel()));
        let outcome = classify_run(code, cancelled, has_display, stdout, stderr);
        if outcome.is_err() {
            return outcome;
        }

        match guard.finish() {
            codes::QUIT => Err(ConversionError::UnexpectedQuit {
                phase: "exit".to_string(),
                stderr: String::new(),
            }),
            code if code < 0 => Err(ConversionError::NativeEngine {
                code,
                stdout: String::new(),
                stderr: String::new(),
            }),
            _ => outcome,
        }
    }
}

fn classify_run(
    code: i32,
    cancelled: bool,
    has_display: bool,
    stdout: String,
    stderr: String,
) -> Result<bool> {
    if code >= 0 {
        return Ok(true);
    }
    if cancelled && (code == codes::INTERRUPT || code == codes::QUIT) {
        debug!("Engine run cancelled (code {})", code);
        return Ok(false);
    }
    if code == codes::QUIT {
        // A quit during the run phase ends the run; with a display attached
        // it means the page loop stopped early.
        return Ok(!has_display);
    }
    Err(ConversionError::NativeEngine {
        code,
        stdout,
        stderr,
    })
}
