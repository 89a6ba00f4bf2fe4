use crate::terminal::{OnError, TerminalPrompt, TerminalStatus};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use docbatch_core::format;
use docbatch_core::{
    Converter, ConverterBuilder, ConverterConfig, Document, DocumentType, DocumentTypes,
    RenderOptions, Rotation,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "docbatch")]
#[command(about = "Batch-convert PDF and image documents through Ghostscript")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to a JSON configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Ghostscript executable. Searched on PATH when omitted.
    #[arg(long, global = true)]
    pub gs: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

/// Input types accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputType {
    Pdf,
    Postscript,
    Eps,
    Image,
}

impl From<InputType> for DocumentType {
    fn from(value: InputType) -> Self {
        match value {
            InputType::Pdf => DocumentType::Pdf,
            InputType::Postscript => DocumentType::PostScript,
            InputType::Eps => DocumentType::Eps,
            InputType::Image => DocumentType::Image,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert documents to another format.
    Convert {
        files: Vec<PathBuf>,
        /// pdf, png, png-gray, png-alpha, tiff, tiff-g4, tiff-lzw or jpeg.
        #[arg(long, default_value = "pdf")]
        format: String,
        #[arg(long)]
        dpi: Option<u32>,
        /// Output directory.
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OnError::Ask)]
        on_error: OnError,
        /// Accepted input types.
        #[arg(long, value_enum, value_delimiter = ',')]
        allow: Vec<InputType>,
        /// Cancel the job after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Open and count every input before converting the first one.
        #[arg(long)]
        count_first: bool,
        /// Print the job report as JSON on stdout.
        #[arg(long)]
        json: bool,
    },
    /// Show type and page count of documents.
    Info { files: Vec<PathBuf> },
    /// Render pages of one document to PNG.
    Render {
        file: PathBuf,
        /// 1-based page numbers. Defaults to page 1.
        #[arg(long = "page")]
        pages: Vec<usize>,
        #[arg(long, default_value_t = 96)]
        dpi: u32,
        /// Clockwise rotation in degrees (0, 90, 180, 270).
        #[arg(long, default_value_t = 0)]
        rotate: i32,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    init_logging(args.log_level.as_deref())?;
    let config = load_config(args.config.as_deref(), args.gs.as_deref())?;

    match args.cmd {
        Command::Convert {
            files,
            format,
            dpi,
            out,
            on_error,
            allow,
            timeout,
            count_first,
            json,
        } => {
            let mut config = config;
            if count_first {
                config.job.count_first = true;
            }
            if let Some(dpi) = dpi {
                config.render.dpi = dpi;
            }
            if let Some(out) = out {
                config.job.output_dir = out;
            }
            if !allow.is_empty() {
                config.job.allowed_types = allow.into_iter().map(DocumentType::from).collect();
            }
            convert(config, &files, &format, on_error, timeout, json)
        }
        Command::Info { files } => info_cmd(&files),
        Command::Render {
            file,
            pages,
            dpi,
            rotate,
            out,
        } => render(config, &file, &pages, dpi, rotate, &out),
    }
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))
}

fn load_config(path: Option<&Path>, gs: Option<&Path>) -> Result<ConverterConfig> {
    let mut config = match path {
        Some(path) => ConverterConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ConverterConfig::default(),
    };
    if let Some(gs) = gs {
        config.engine.executable = Some(gs.to_path_buf());
    }
    Ok(config)
}

fn build_converter(config: ConverterConfig) -> Result<Converter> {
    ConverterBuilder::from_config(config)
        .build()
        .context("starting the rendering engine")
}

/// Raises `cancel` once `timeout` passes, unless stopped first.
struct Watchdog {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Watchdog {
    fn start(cancel: Arc<AtomicBool>, timeout: Duration) -> Self {
        let (stop, stopped) = bounded::<()>(1);
        let handle = std::thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(timeout) {
                warn!("Timeout of {:?} reached, cancelling job", timeout);
                cancel.store(true, Ordering::SeqCst);
            }
        });
        Self { stop, handle }
    }

    fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            warn!("Timeout watchdog panicked");
        }
    }
}

fn convert(
    config: ConverterConfig,
    files: &[PathBuf],
    format_name: &str,
    on_error: OnError,
    timeout: Option<u64>,
    json: bool,
) -> Result<()> {
    if files.is_empty() {
        return Err(anyhow!("no input files given"));
    }
    let format = format::from_name(format_name)?;
    let converter = build_converter(config)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let watchdog =
        timeout.map(|secs| Watchdog::start(Arc::clone(&cancel), Duration::from_secs(secs)));

    let status = TerminalStatus::new(cancel);
    let mut prompt = TerminalPrompt::new(on_error);
    let result = converter.run_conversion(files, format.as_ref(), &status, &mut prompt);
    if let Some(watchdog) = watchdog {
        watchdog.stop();
    }
    let report = result.context("conversion job failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for output in &report.outputs {
            println!("{}", output.display());
        }
        for skipped in &report.skipped {
            eprintln!("skipped {}: {}", skipped.path.display(), skipped.error);
        }
        eprintln!(
            "{:?}: {}/{} pages in {:.1}s",
            report.state,
            report.pages_completed,
            report.total_pages,
            report.elapsed.as_secs_f64()
        );
    }

    if report.is_finished() {
        Ok(())
    } else {
        Err(anyhow!("job aborted"))
    }
}

fn info_cmd(files: &[PathBuf]) -> Result<()> {
    let mut failures = 0;
    for path in files {
        match Document::open(path, DocumentTypes::all()) {
            Ok(document) => {
                let pages = document.page_count()?;
                println!("{}\t{}\t{} pages", path.display(), document.doc_type(), pages);
            }
            Err(e) => {
                failures += 1;
                println!("{}\terror\t{}", path.display(), e);
            }
        }
    }
    if failures > 0 {
        return Err(anyhow!("{} of {} files could not be opened", failures, files.len()));
    }
    Ok(())
}

fn render(
    config: ConverterConfig,
    file: &Path,
    pages: &[usize],
    dpi: u32,
    rotate: i32,
    out: &Path,
) -> Result<()> {
    let rotation = Rotation::from_degrees(rotate)
        .ok_or_else(|| anyhow!("rotation must be a multiple of 90, got {}", rotate))?;
    let pages = if pages.is_empty() { vec![1] } else { pages.to_vec() };
    let converter = build_converter(config)?;

    let options = RenderOptions::with_dpi(dpi).rotation(rotation);
    let saved = converter
        .render_pages(file, &pages, &options, out, &|| false)
        .with_context(|| format!("rendering {}", file.display()))?;

    for frame in &saved {
        info!("Page {} -> {:?}", frame.page_number, frame.path);
        println!(
            "{}\t{}x{}",
            frame.path.display(),
            frame.width,
            frame.height
        );
    }
    Ok(())
}
