//! The narrow contract between the invocation layer and a native engine
//! implementation.
//!
//! An [`EngineBackend`] creates instances; an [`EngineInstance`] runs exactly
//! one argument vector and is destroyed afterwards. Everything the engine
//! reports back (text, poll requests, painted pixels) flows through
//! [`EngineHooks`].

use super::display::{DisplayCallbacks, PixelFormat};
use crate::error::Result;

/// Engine result codes shared by all backends.
pub mod codes {
    /// Success.
    pub const OK: i32 = 0;
    /// Generic failure, also used when a page completes without a frame.
    pub const UNKNOWN_ERROR: i32 = -1;
    /// Returned by the poll hook and by the engine once cancellation latched.
    pub const INTERRUPT: i32 = -6;
    /// Unrecoverable engine failure.
    pub const FATAL: i32 = -100;
    /// The engine executed `quit`.
    pub const QUIT: i32 = -101;
}

/// Rows painted per display update when a backend replays a whole frame.
pub const BAND_ROWS: u32 = 32;

/// How argument strings are encoded for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgEncoding {
    Local,
    Utf8,
}

/// Factory for engine instances.
pub trait EngineBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Create a fresh instance. Dropping the returned box destroys it.
    fn new_instance(&self) -> Result<Box<dyn EngineInstance>>;
}

/// One native engine instance.
pub trait EngineInstance {
    /// Configure argument encoding. Returns an engine code.
    fn set_arg_encoding(&mut self, encoding: ArgEncoding) -> i32;

    /// Run the argument vector to completion. `args[0]` is the program-name
    /// token. Returns an engine code.
    fn init_with_args(&mut self, args: &[String], hooks: &mut EngineHooks<'_>) -> i32;

    /// Leave the interpreter. Returns an engine code.
    fn exit(&mut self) -> i32;
}

/// Callbacks installed on an instance for the duration of one run.
pub struct EngineHooks<'a> {
    stdout: String,
    stderr: String,
    partial_line: String,
    stdout_line: Option<&'a mut dyn FnMut(&str)>,
    poll: &'a mut dyn FnMut() -> i32,
    display: Option<&'a mut dyn DisplayCallbacks>,
}

impl<'a> EngineHooks<'a> {
    pub fn new(
        poll: &'a mut dyn FnMut() -> i32,
        display: Option<&'a mut dyn DisplayCallbacks>,
        stdout_line: Option<&'a mut dyn FnMut(&str)>,
    ) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            partial_line: String::new(),
            stdout_line,
            poll,
            display,
        }
    }

    /// Capture engine stdout, forwarding complete lines to the observer.
    pub fn write_stdout(&mut self, text: &str) {
        self.stdout.push_str(text);
        let Some(observer) = self.stdout_line.as_mut() else {
            return;
        };
        self.partial_line.push_str(text);
        while let Some(pos) = self.partial_line.find('\n') {
            let line: String = self.partial_line.drain(..=pos).collect();
            observer(line.trim_end_matches(&['\r', '\n'][..]));
        }
    }

    /// Capture engine stderr.
    pub fn write_stderr(&mut self, text: &str) {
        self.stderr.push_str(text);
    }

    /// Called periodically by the engine. Non-zero means stop.
    pub fn poll(&mut self) -> i32 {
        (self.poll)()
    }

    pub fn has_display(&self) -> bool {
        self.display.is_some()
    }

    /// Run `f` against the installed display callbacks, if any.
    pub fn with_display<R>(&mut self, f: impl FnOnce(&mut dyn DisplayCallbacks) -> R) -> Option<R> {
        match self.display.as_mut() {
            Some(display) => Some(f(&mut **display)),
            None => None,
        }
    }

    /// Replay one fully painted frame through the display protocol in bands
    /// of [`BAND_ROWS`] rows, polling between bands.
    pub fn paint_frame(&mut self, width: u32, height: u32, format: PixelFormat, data: &[u8]) -> i32 {
        if !self.has_display() {
            return codes::OK;
        }
        let stride = width as usize * format.bytes_per_pixel();

        let code = self
            .with_display(|d| d.on_presize(width, height, stride, format))
            .unwrap_or(codes::OK);
        if code < 0 {
            return code;
        }
        let frame = match self.with_display(|d| d.on_size(width, height, stride, format)) {
            Some(Ok(frame)) => frame,
            Some(Err(code)) => return code,
            None => return codes::OK,
        };

        let mut row = 0u32;
        for band in data.chunks(stride.max(1) * BAND_ROWS as usize) {
            let rows = (band.len() / stride.max(1)) as u32;
            frame.write_rows(row, band);
            let code = self
                .with_display(|d| d.on_update(0, row, width, rows))
                .unwrap_or(codes::OK);
            if code < 0 {
                return code;
            }
            let code = self.poll();
            if code != codes::OK {
                return code;
            }
            row += rows;
        }

        self.with_display(|d| d.on_page(1, true))
            .unwrap_or(codes::OK)
    }

    /// Finish the run and hand back the captured text.
    pub fn into_output(mut self) -> (String, String) {
        if !self.partial_line.is_empty() {
            if let Some(observer) = self.stdout_line.as_mut() {
                observer(self.partial_line.trim_end_matches('\r'));
            }
        }
        (self.stdout, self.stderr)
    }
}
