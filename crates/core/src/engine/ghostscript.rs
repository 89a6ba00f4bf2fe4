//! Ghostscript backend.
//!
//! Each engine instance drives one Ghostscript child process. Stdout and
//! stderr are read on helper threads and forwarded to the hooks; the poll
//! hook is called whenever output arrives and at the configured poll
//! interval, and an interrupt kills the child. When display callbacks are
//! installed the device is rewritten to raw PPM on stdout and every decoded
//! frame is replayed through the frame-buffer protocol.

use super::backend::{codes, ArgEncoding, EngineBackend, EngineHooks, EngineInstance};
use super::display::PixelFormat;
use crate::config::EngineConfig;
use crate::error::{ConversionError, Result};
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use image::codecs::pnm::{PnmDecoder, PnmSubtype, SampleEncoding};
use image::{ColorType, ImageDecoder};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Message from a child-process reader thread.
enum ChildOutput {
    Stdout(String),
    Stderr(String),
    Frame(PpmFrame),
    ReadError(String),
}

/// Backend that runs the Ghostscript executable.
#[derive(Debug, Clone)]
pub struct GhostscriptBackend {
    executable: PathBuf,
    poll_interval: Duration,
}

impl GhostscriptBackend {
    /// Locate Ghostscript and create the backend.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let executable = Self::find_executable(config)?;
        info!("Found Ghostscript at: {:?}", executable);
        Ok(Self {
            executable,
            poll_interval: config.poll_interval,
        })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Find the Ghostscript executable.
    fn find_executable(config: &EngineConfig) -> Result<PathBuf> {
        if let Some(ref path) = config.executable {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(ConversionError::EngineNotFound);
        }

        let candidates = [
            // macOS (Homebrew)
            "/opt/homebrew/bin/gs",
            "/usr/local/bin/gs",
            // Linux
            "/usr/bin/gs",
        ];

        for candidate in candidates {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Ok(path);
            }
        }

        which::which("gs")
            .or_else(|_| which::which("gswin64c"))
            .or_else(|_| which::which("gswin32c"))
            .map_err(|_| ConversionError::EngineNotFound)
    }
}

impl EngineBackend for GhostscriptBackend {
    fn name(&self) -> &str {
        "ghostscript"
    }

    fn new_instance(&self) -> Result<Box<dyn EngineInstance>> {
        Ok(Box::new(GhostscriptInstance {
            executable: self.executable.clone(),
            poll_interval: self.poll_interval,
            encoding: ArgEncoding::Local,
            child: None,
        }))
    }
}

struct GhostscriptInstance {
    executable: PathBuf,
    poll_interval: Duration,
    encoding: ArgEncoding,
    child: Option<Child>,
}

impl GhostscriptInstance {
    fn kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("Ghostscript child already gone: {}", e);
            }
            let _ = child.wait();
        }
    }

    fn spawn_readers(child: &mut Child, display: bool, tx: Sender<ChildOutput>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(2);

        if let Some(stderr) = child.stderr.take() {
            let tx = tx.clone();
            handles.push(std::thread::spawn(move || {
                forward_lines(BufReader::new(stderr), &tx, ChildOutput::Stderr)
            }));
        }

        if let Some(stdout) = child.stdout.take() {
            handles.push(std::thread::spawn(move || {
                let mut reader = BufReader::new(stdout);
                if !display {
                    forward_lines(reader, &tx, ChildOutput::Stdout);
                    return;
                }
                loop {
                    match read_ppm_frame(&mut reader) {
                        Ok(Some(frame)) => {
                            if tx.send(ChildOutput::Frame(frame)).is_err() {
                                return;
                            }
                        }
                        Ok(None) => return,
                        Err(e) => {
                            let _ = tx.send(ChildOutput::ReadError(e.to_string()));
                            return;
                        }
                    }
                }
            }));
        }

        handles
    }
}

impl EngineInstance for GhostscriptInstance {
    fn set_arg_encoding(&mut self, encoding: ArgEncoding) -> i32 {
        self.encoding = encoding;
        codes::OK
    }

    fn init_with_args(&mut self, args: &[String], hooks: &mut EngineHooks<'_>) -> i32 {
        let display = hooks.has_display();
        let child_args = if display {
            display_arguments(args)
        } else {
            args.iter().skip(1).cloned().collect()
        };
        debug!("Running {:?} {:?} ({:?})", self.executable, child_args, self.encoding);

        let mut child = match Command::new(&self.executable)
            .args(&child_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                hooks.write_stderr(&format!("Failed to start Ghostscript: {}\n", e));
                return codes::FATAL;
            }
        };

        let (tx, rx) = unbounded();
        let readers = Self::spawn_readers(&mut child, display, tx);
        self.child = Some(child);

        let mut code = codes::OK;
        loop {
            match rx.recv_timeout(self.poll_interval) {
                Ok(ChildOutput::Stdout(line)) => hooks.write_stdout(&line),
                Ok(ChildOutput::Stderr(line)) => hooks.write_stderr(&line),
                Ok(ChildOutput::ReadError(message)) => {
                    hooks.write_stderr(&format!("Failed to read engine output: {}\n", message));
                    code = codes::FATAL;
                    break;
                }
                Ok(ChildOutput::Frame(frame)) => {
                    let painted =
                        hooks.paint_frame(frame.width, frame.height, PixelFormat::Rgb24, &frame.data);
                    if painted != codes::OK {
                        code = painted;
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if hooks.poll() != codes::OK {
                debug!("Ghostscript run interrupted by poll hook");
                code = codes::INTERRUPT;
                break;
            }
        }

        if code != codes::OK {
            self.kill_child();
        }
        for handle in readers {
            if handle.join().is_err() {
                warn!("Ghostscript output reader panicked");
            }
        }
        if display {
            hooks.with_display(|d| d.on_preclose());
        }
        if code != codes::OK {
            return code;
        }

        match self.child.take().map(|mut child| child.wait()) {
            Some(Ok(status)) if status.success() => codes::OK,
            Some(Ok(status)) => {
                debug!("Ghostscript exited with {}", status);
                codes::FATAL
            }
            Some(Err(e)) => {
                hooks.write_stderr(&format!("Failed to wait for Ghostscript: {}\n", e));
                codes::FATAL
            }
            None => codes::FATAL,
        }
    }

    fn exit(&mut self) -> i32 {
        self.kill_child();
        codes::OK
    }
}

impl Drop for GhostscriptInstance {
    fn drop(&mut self) {
        self.kill_child();
    }
}

fn forward_lines<R: BufRead>(reader: R, tx: &Sender<ChildOutput>, wrap: fn(String) -> ChildOutput) {
    for line in reader.lines() {
        match line {
            Ok(mut line) => {
                line.push('\n');
                if tx.send(wrap(line)).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(ChildOutput::ReadError(e.to_string()));
                return;
            }
        }
    }
}

/// Rewrite an argument vector so pages arrive as raw PPM on stdout.
fn display_arguments(args: &[String]) -> Vec<String> {
    let mut out = vec![
        "-q".to_string(),
        "-sDEVICE=ppmraw".to_string(),
        "-sOutputFile=-".to_string(),
    ];
    out.extend(
        args.iter()
            .skip(1)
            .filter(|a| {
                !(a.starts_with("-sDEVICE=")
                    || a.starts_with("-sOutputFile=")
                    || a.starts_with("-dDisplay")
                    || a.as_str() == "-q")
            })
            .cloned(),
    );
    out
}

/// One decoded `P6` frame (8-bit RGB).
#[derive(Debug)]
pub(crate) struct PpmFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Read the next binary PPM frame. Returns `None` at a clean end of stream.
///
/// The decoder consumes exactly one header and raster, leaving `reader` at the
/// start of the next frame.
pub(crate) fn read_ppm_frame<R: BufRead>(reader: &mut R) -> Result<Option<PpmFrame>> {
    if reader
        .fill_buf()
        .map_err(|e| ConversionError::ImageError(e.to_string()))?
        .is_empty()
    {
        return Ok(None);
    }

    let decoder = PnmDecoder::new(&mut *reader)?;
    if decoder.subtype() != PnmSubtype::Pixmap(SampleEncoding::Binary)
        || decoder.color_type() != ColorType::Rgb8
    {
        return Err(ConversionError::ImageError(format!(
            "unsupported PPM frame: {:?} {:?}",
            decoder.subtype(),
            decoder.color_type()
        )));
    }

    let (width, height) = decoder.dimensions();
    let mut data = vec![0u8; decoder.total_bytes() as usize];
    decoder.read_image(&mut data)?;
    Ok(Some(PpmFrame {
        width,
        height,
        data,
    }))
}
