//! Deterministic in-process engine used by tests.
//!
//! A [`ScriptedBackend`] runs a closure instead of a native interpreter. The
//! closure sees the argument vector and talks back through the same hooks a
//! real backend uses, so stdout markers, poll-driven cancellation and the
//! frame-buffer protocol can all be exercised without Ghostscript.

use super::backend::{codes, ArgEncoding, EngineBackend, EngineHooks, EngineInstance};
use super::display::PixelFormat;
use crate::error::Result;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Script run for every invocation. Returns an engine code.
pub type Script = dyn Fn(&mut ScriptContext<'_, '_>) -> i32 + Send + Sync;

/// Side of the engine visible to a script.
pub struct ScriptContext<'h, 'a> {
    args: &'h [String],
    hooks: &'h mut EngineHooks<'a>,
}

impl ScriptContext<'_, '_> {
    /// Full argument vector, program token included.
    pub fn args(&self) -> &[String] {
        self.args
    }

    /// Whether any argument contains `needle`.
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a.contains(needle))
    }

    pub fn stdout(&mut self, text: &str) {
        self.hooks.write_stdout(text);
    }

    pub fn stderr(&mut self, text: &str) {
        self.hooks.write_stderr(text);
    }

    pub fn poll(&mut self) -> i32 {
        self.hooks.poll()
    }

    pub fn has_display(&self) -> bool {
        self.hooks.has_display()
    }

    /// Paint one RGB frame through the display protocol.
    pub fn paint_frame(&mut self, width: u32, height: u32, rgb: &[u8]) -> i32 {
        self.hooks.paint_frame(width, height, PixelFormat::Rgb24, rgb)
    }

    /// Emit `Page 1` … `Page n`, polling after each page and painting a small
    /// white frame per page when display callbacks are installed.
    pub fn emit_pages(&mut self, n: usize) -> i32 {
        for page in 1..=n {
            self.stdout(&format!("Page {}\n", page));
            if self.has_display() {
                let code = self.paint_frame(8, 8, &[255; 8 * 8 * 3]);
                if code != codes::OK {
                    return code;
                }
            }
            let code = self.poll();
            if code != codes::OK {
                return code;
            }
        }
        codes::OK
    }
}

#[derive(Default)]
struct Stats {
    live: AtomicUsize,
    peak: AtomicUsize,
    created: AtomicUsize,
    invocations: Mutex<Vec<Vec<String>>>,
}

/// Test backend that runs a closure per invocation and counts instances.
#[derive(Clone)]
pub struct ScriptedBackend {
    script: Arc<Script>,
    exit_code: Arc<AtomicI32>,
    stats: Arc<Stats>,
}

impl ScriptedBackend {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&mut ScriptContext<'_, '_>) -> i32 + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            exit_code: Arc::new(AtomicI32::new(codes::OK)),
            stats: Arc::new(Stats::default()),
        }
    }

    /// A backend whose every run succeeds without output.
    pub fn succeeding() -> Self {
        Self::new(|_| codes::OK)
    }

    /// Code returned by `exit` on every instance created afterwards.
    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
    }

    pub fn live_instances(&self) -> usize {
        self.stats.live.load(Ordering::SeqCst)
    }

    /// Largest number of instances that existed at the same time.
    pub fn peak_instances(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    pub fn instances_created(&self) -> usize {
        self.stats.created.load(Ordering::SeqCst)
    }

    /// Argument vectors of every run so far, in order.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.stats
            .invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EngineBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn new_instance(&self) -> Result<Box<dyn EngineInstance>> {
        let live = self.stats.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(live, Ordering::SeqCst);
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedInstance {
            script: Arc::clone(&self.script),
            exit_code: self.exit_code.load(Ordering::SeqCst),
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct ScriptedInstance {
    script: Arc<Script>,
    exit_code: i32,
    stats: Arc<Stats>,
}

impl EngineInstance for ScriptedInstance {
    fn set_arg_encoding(&mut self, _encoding: ArgEncoding) -> i32 {
        codes::OK
    }

    fn init_with_args(&mut self, args: &[String], hooks: &mut EngineHooks<'_>) -> i32 {
        self.stats
            .invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(args.to_vec());
        let mut context = ScriptContext { args, hooks };
        (self.script)(&mut context)
    }

    fn exit(&mut self) -> i32 {
        self.exit_code
    }
}

impl Drop for ScriptedInstance {
    fn drop(&mut self) {
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
    }
}
