//! The conversion orchestrator.
//!
//! A job runs two threads: the enumeration producer and the calling thread,
//! which dequeues documents in order and drives each one through the engine.
//! The calling thread also owns the status surface and the decision prompt, so
//! every operator interaction happens here, including questions the producer
//! asks through its [`DecisionBroker`].

use crate::config::ConverterConfig;
use crate::decision::{Decision, DecisionBroker, DecisionPrompt, DecisionRequest};
use crate::document::{Document, DocumentType, RenderOptions};
use crate::engine::{parse_page_marker, EngineArgs, EngineService, Invocation};
use crate::enumerate::{EnumerationSummary, Enumerator, QueuedDocument, SkippedItem};
use crate::error::{ConversionError, Result};
use crate::format::{FormatDescriptor, OutputNames, Preflight};
use crate::progress::ProgressTracker;
use crate::raster::{save_frames, SavedFrame};
use crate::status::{StatusSurface, LINE_ITEM, LINE_PAGES};
use crossbeam_channel::{never, select, unbounded, Receiver};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Idle,
    WaitingForItem,
    Converting,
    ItemDone,
    ItemFailed,
    Finished,
    Aborted,
}

/// Outcome of one [`Converter::run_conversion`] call.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    /// `Finished` or `Aborted`.
    pub state: JobState,
    /// Files written, in conversion order.
    pub outputs: Vec<PathBuf>,
    /// Inputs dropped by an Ignore decision.
    pub skipped: Vec<SkippedItem>,
    /// Pages of the converted documents.
    pub pages_completed: usize,
    /// Pages of every document enumerated.
    pub total_pages: usize,
    pub elapsed: Duration,
}

impl JobReport {
    fn empty(state: JobState) -> Self {
        Self {
            state,
            outputs: Vec::new(),
            skipped: Vec::new(),
            pages_completed: 0,
            total_pages: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == JobState::Finished
    }
}

/// Step of the job loop, carrying the entry it acts on.
enum Step {
    Idle,
    WaitingForItem,
    Converting(QueuedDocument),
    ItemDone(QueuedDocument, Vec<PathBuf>),
    ItemFailed(QueuedDocument, ConversionError),
    Finished,
    Aborted,
}

impl Step {
    fn state(&self) -> JobState {
        match self {
            Step::Idle => JobState::Idle,
            Step::WaitingForItem => JobState::WaitingForItem,
            Step::Converting(_) => JobState::Converting,
            Step::ItemDone(..) => JobState::ItemDone,
            Step::ItemFailed(..) => JobState::ItemFailed,
            Step::Finished => JobState::Finished,
            Step::Aborted => JobState::Aborted,
        }
    }
}

enum Wait {
    Item(QueuedDocument),
    Closed,
    Aborted,
}

/// Consumer-side state of one running job.
struct JobRun<'a> {
    engine: &'a EngineService,
    config: &'a ConverterConfig,
    format: &'a dyn FormatDescriptor,
    status: &'a dyn StatusSurface,
    prompt: &'a mut dyn DecisionPrompt,
    abort: &'a AtomicBool,
    decisions: Receiver<DecisionRequest>,
    scratch: &'a Path,
    input_count: usize,
    progress: ProgressTracker,
    names: OutputNames,
    outputs: Vec<PathBuf>,
    skipped: Vec<SkippedItem>,
    converted: usize,
}

impl JobRun<'_> {
    fn cancel_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst) || self.status.has_user_cancelled()
    }

    fn ask(&mut self, message: &str) -> Decision {
        self.status.pause_timer();
        let decision = self.prompt.ask(message);
        self.status.resume_timer();
        debug!("Operator chose {} for '{}'", decision, message);
        decision
    }

    fn serve(&mut self, request: DecisionRequest) {
        let decision = self.ask(request.message());
        if decision == Decision::Abort {
            self.abort.store(true, Ordering::SeqCst);
        }
        request.answer(decision);
    }

    fn wait_for_item(&mut self, queue: &Receiver<QueuedDocument>) -> Wait {
        let poll_interval = self.config.job.queue_poll_interval;
        loop {
            if self.cancel_requested() {
                self.abort.store(true, Ordering::SeqCst);
                return Wait::Aborted;
            }
            let decisions = self.decisions.clone();
            select! {
                recv(queue) -> entry => {
                    return match entry {
                        Ok(entry) => Wait::Item(entry),
                        Err(_) => Wait::Closed,
                    };
                }
                recv(decisions) -> request => match request {
                    Ok(request) => self.serve(request),
                    Err(_) => self.decisions = never(),
                },
                default(poll_interval) => {}
            }
        }
    }

    /// Serve the producer's questions until it has enumerated every input.
    /// Returns false if the job was aborted meanwhile.
    fn await_enumeration(&mut self) -> bool {
        let poll_interval = self.config.job.queue_poll_interval;
        loop {
            if self.cancel_requested() {
                self.abort.store(true, Ordering::SeqCst);
                return false;
            }
            let decisions = self.decisions.clone();
            select! {
                recv(decisions) -> request => match request {
                    Ok(request) => self.serve(request),
                    // The broker is dropped when enumeration ends.
                    Err(_) => {
                        self.decisions = never();
                        return !self.abort.load(Ordering::SeqCst);
                    }
                },
                default(poll_interval) => {}
            }
        }
    }

    fn push_progress(progress: &mut ProgressTracker, status: &dyn StatusSurface) {
        if let Some(update) = progress.update() {
            status.set_percentage(update.completed, update.total);
        }
    }

    /// Run one item through the engine.
    fn convert_item(&mut self, entry: &mut QueuedDocument) -> Result<Vec<PathBuf>> {
        let pages = entry.page_count;
        self.progress.start_item(pages);

        let name = entry
            .document
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.status.set_line(
            LINE_ITEM,
            &format!("Converting {} ({} of {})", name, entry.index + 1, self.input_count),
        );
        self.status.set_line(LINE_PAGES, &format!("Page 0 of {}", pages));

        let input = entry.document.engine_input(self.scratch)?;
        let output_dir = &self.config.job.output_dir;
        let stem = self.names.stem_for(entry.index, entry.document.path());

        let mut args = EngineArgs::new();
        args.flags(self.config.engine.extra_args.iter().cloned());
        self.format.build_args(&mut args, &self.config.render);
        self.format.set_output(&mut args, output_dir, &stem);
        args.input_file(&input);

        let abort = self.abort;
        let status = self.status;
        let progress = &mut self.progress;
        let cancel = || abort.load(Ordering::SeqCst) || status.has_user_cancelled();
        // `Page N` is printed when page N starts.
        let mut observer = |line: &str| {
            if let Some(page) = parse_page_marker(line) {
                status.set_line(LINE_PAGES, &format!("Page {} of {}", page, pages));
                progress.set_done_in_item(page.saturating_sub(1));
                Self::push_progress(progress, status);
            }
        };

        let invocation = Invocation::new(args.build())
            .cancel_poll(&cancel)
            .on_stdout_line(&mut observer);
        if !self.engine.invoke(invocation)? {
            return Err(ConversionError::OperationCanceled);
        }

        Ok(self.format.output_files(output_dir, &stem, pages))
    }

    fn step(&mut self, step: Step, queue: &Receiver<QueuedDocument>) -> Result<Step> {
        let next = match step {
            Step::Idle if self.config.job.count_first => {
                self.status.set_line(LINE_ITEM, "Counting documents");
                if self.await_enumeration() {
                    debug!("Enumeration complete, {} pages", self.progress.grand_total());
                    Step::WaitingForItem
                } else {
                    Step::Aborted
                }
            }
            Step::Idle => {
                self.status.set_line(LINE_ITEM, "Waiting for documents");
                Step::WaitingForItem
            }
            Step::WaitingForItem => match self.wait_for_item(queue) {
                Wait::Item(entry) => Step::Converting(entry),
                Wait::Closed => Step::Finished,
                Wait::Aborted => Step::Aborted,
            },
            Step::Converting(mut entry) => match self.convert_item(&mut entry) {
                Ok(outputs) => Step::ItemDone(entry, outputs),
                Err(e) if e.is_canceled() => {
                    info!("Conversion of {:?} cancelled", entry.document.path());
                    Step::Aborted
                }
                Err(e) => Step::ItemFailed(entry, e),
            },
            Step::ItemDone(mut entry, outputs) => {
                info!(
                    "Converted {:?} ({} pages)",
                    entry.document.path(),
                    entry.page_count
                );
                self.progress.set_done_in_item(entry.page_count);
                self.progress.finish_item();
                Self::push_progress(&mut self.progress, self.status);
                self.outputs.extend(outputs);
                self.converted += 1;
                entry.document.dispose();
                Step::WaitingForItem
            }
            Step::ItemFailed(mut entry, e) => {
                if !e.is_item_error() {
                    error!("Job failed on {:?}: {}", entry.document.path(), e);
                    return Err(e);
                }
                warn!("Failed to convert {:?}: {}", entry.document.path(), e);
                entry.document.ensure_no_open_renderer();
                let message = format!("{}: {}", entry.document.path().display(), e);
                match self.ask(&message) {
                    Decision::Retry => Step::Converting(entry),
                    Decision::Ignore => {
                        self.progress.skip_item();
                        Self::push_progress(&mut self.progress, self.status);
                        self.skipped.push(SkippedItem {
                            path: entry.document.path().to_path_buf(),
                            error: e.to_string(),
                        });
                        Step::WaitingForItem
                    }
                    Decision::Abort => Step::Aborted,
                }
            }
            terminal @ (Step::Finished | Step::Aborted) => terminal,
        };
        Ok(next)
    }

    fn drive(&mut self, queue: &Receiver<QueuedDocument>) -> Result<JobState> {
        let mut step = Step::Idle;
        loop {
            let state = step.state();
            if matches!(state, JobState::Finished | JobState::Aborted) {
                return Ok(state);
            }
            step = self.step(step, queue)?;
            debug!("Job state {:?} -> {:?}", state, step.state());
        }
    }
}

/// Raises the abort flag on drop unless the job finished, including when the
/// consumer unwinds, so the producer stops and the scope can join it.
struct AbortUnlessFinished<'a> {
    abort: &'a AtomicBool,
    finished: bool,
}

impl Drop for AbortUnlessFinished<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.abort.store(true, Ordering::SeqCst);
        }
    }
}

/// Batch converter around one shared engine.
///
/// Every job run through the same converter (or through converters sharing
/// one [`EngineService`]) is serialized at the engine.
pub struct Converter {
    engine: Arc<EngineService>,
    config: ConverterConfig,
    jobs_run: AtomicUsize,
    documents_converted: AtomicUsize,
    pages_converted: AtomicUsize,
}

impl Converter {
    /// Create a converter driving Ghostscript.
    pub fn new(config: ConverterConfig) -> Result<Self> {
        config.validate()?;
        let engine = EngineService::from_config(&config.engine)?;
        Self::with_engine(config, Arc::new(engine))
    }

    /// Create a converter sharing an existing engine.
    pub fn with_engine(config: ConverterConfig, engine: Arc<EngineService>) -> Result<Self> {
        config.validate()?;

        info!(
            "Initializing converter with engine={}, dpi={}, output_dir={:?}",
            engine.backend_name(),
            config.render.dpi,
            config.job.output_dir
        );

        Ok(Self {
            engine,
            config,
            jobs_run: AtomicUsize::new(0),
            documents_converted: AtomicUsize::new(0),
            pages_converted: AtomicUsize::new(0),
        })
    }

    /// Get the current configuration.
    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<EngineService> {
        &self.engine
    }

    /// Get statistics about processing.
    pub fn stats(&self) -> ConverterStats {
        ConverterStats {
            jobs_run: self.jobs_run.load(Ordering::SeqCst),
            documents_converted: self.documents_converted.load(Ordering::SeqCst),
            pages_converted: self.pages_converted.load(Ordering::SeqCst),
            dpi: self.config.render.dpi,
        }
    }

    fn scratch_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("docbatch-");
        match &self.config.job.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| ConversionError::io(dir, e))?;
                builder.tempdir_in(dir).map_err(|e| ConversionError::io(dir, e))
            }
            None => builder
                .tempdir()
                .map_err(|e| ConversionError::io(std::env::temp_dir(), e)),
        }
    }

    /// Convert `files` to `format`.
    ///
    /// Enumeration runs on a second thread while this thread converts. Item
    /// failures from either stage are put to `prompt`; the job ends
    /// `Finished` when every input was converted or skipped, or `Aborted` on
    /// an Abort decision or cancellation. Errors that do not belong to a
    /// single item are returned.
    pub fn run_conversion(
        &self,
        files: &[PathBuf],
        format: &dyn FormatDescriptor,
        status: &dyn StatusSurface,
        prompt: &mut dyn DecisionPrompt,
    ) -> Result<JobReport> {
        let start = Instant::now();
        self.jobs_run.fetch_add(1, Ordering::SeqCst);

        if format.preflight(files) == Preflight::Cancel {
            info!("Job cancelled by {} preflight", format.name());
            status.finish();
            return Ok(JobReport::empty(JobState::Aborted));
        }

        let output_dir = &self.config.job.output_dir;
        if let Err(e) = std::fs::create_dir_all(output_dir) {
            status.finish();
            return Err(ConversionError::io(output_dir, e));
        }
        let scratch = match self.scratch_dir() {
            Ok(scratch) => scratch,
            Err(e) => {
                status.finish();
                return Err(e);
            }
        };

        info!(
            "Starting {} job for {} inputs into {:?}",
            format.name(),
            files.len(),
            output_dir
        );

        let abort = Arc::new(AtomicBool::new(false));
        let grand_total = Arc::new(AtomicUsize::new(0));
        let (queue_tx, queue) = unbounded();
        let (broker, decisions) =
            DecisionBroker::channel(Arc::clone(&abort), self.config.job.decision_poll_interval);
        let enumerator = Enumerator::new(
            self.config.job.type_mask(),
            queue_tx,
            broker,
            Arc::clone(&abort),
            Arc::clone(&grand_total),
        );

        let mut run = JobRun {
            engine: &self.engine,
            config: &self.config,
            format,
            status,
            prompt,
            abort: &abort,
            decisions,
            scratch: scratch.path(),
            input_count: files.len(),
            progress: ProgressTracker::new(Arc::clone(&grand_total)),
            names: OutputNames::new(),
            outputs: Vec::new(),
            skipped: Vec::new(),
            converted: 0,
        };

        let (outcome, summary) = thread::scope(|scope| {
            let producer = scope.spawn(move || enumerator.run(files));
            let mut guard = AbortUnlessFinished {
                abort: &abort,
                finished: false,
            };
            let outcome = run.drive(&queue);
            guard.finished = matches!(outcome, Ok(JobState::Finished));
            drop(guard);
            let summary = producer.join().unwrap_or_else(|_| {
                error!("Enumeration thread panicked");
                EnumerationSummary {
                    aborted: true,
                    ..EnumerationSummary::default()
                }
            });
            (outcome, summary)
        });

        let discarded = queue.try_iter().count();
        if discarded > 0 {
            debug!("Released {} queued documents", discarded);
        }
        status.finish();

        let state = outcome?;
        let mut skipped = summary.skipped;
        skipped.append(&mut run.skipped);
        let pages_completed = run.progress.completed_pages();
        let report = JobReport {
            state,
            outputs: run.outputs,
            skipped,
            pages_completed,
            total_pages: grand_total.load(Ordering::SeqCst),
            elapsed: start.elapsed(),
        };

        self.pages_converted
            .fetch_add(report.pages_completed, Ordering::SeqCst);
        self.documents_converted
            .fetch_add(run.converted, Ordering::SeqCst);

        info!(
            "Job {:?}: {}/{} pages, {} outputs, {} skipped in {:?}",
            report.state,
            report.pages_completed,
            report.total_pages,
            report.outputs.len(),
            report.skipped.len(),
            report.elapsed
        );
        Ok(report)
    }

    /// Render pages of one document to PNG files in `output_dir`.
    pub fn render_pages(
        &self,
        path: &Path,
        pages: &[usize],
        options: &RenderOptions,
        output_dir: &Path,
        cancel: &dyn Fn() -> bool,
    ) -> Result<Vec<SavedFrame>> {
        let mut document = Document::open(path, self.config.job.type_mask())?;
        let prefix = document
            .path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page".to_string());

        let mut frames = Vec::with_capacity(pages.len());
        for &page in pages {
            let mut frame = document.render_page(&self.engine, page, options, cancel, None)?;
            frame.index = page - 1;
            frames.push(frame);
        }
        document.dispose();

        save_frames(frames, output_dir, &prefix, &self.config.render)
    }
}

/// Statistics about the converter.
#[derive(Debug, Clone)]
pub struct ConverterStats {
    /// Jobs started since creation.
    pub jobs_run: usize,
    pub documents_converted: usize,
    pub pages_converted: usize,
    /// Configured DPI.
    pub dpi: u32,
}

/// Builder for creating a Converter with custom settings.
pub struct ConverterBuilder {
    config: ConverterConfig,
    engine: Option<Arc<EngineService>>,
}

impl ConverterBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ConverterConfig::default(),
            engine: None,
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ConverterConfig) -> Self {
        Self {
            config,
            engine: None,
        }
    }

    /// Set the DPI for rendering.
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.render.dpi = dpi;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.job.output_dir = dir.into();
        self
    }

    /// Restrict the accepted input types.
    pub fn allowed_types(mut self, types: Vec<DocumentType>) -> Self {
        self.config.job.allowed_types = types;
        self
    }

    /// Set the path to the Ghostscript executable.
    pub fn executable(mut self, path: PathBuf) -> Self {
        self.config.engine.executable = Some(path);
        self
    }

    /// Set how often waits re-check for cancellation.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.engine.poll_interval = interval;
        self.config.job.queue_poll_interval = interval;
        self
    }

    /// Enumerate every input before the first conversion.
    pub fn count_first(mut self, enabled: bool) -> Self {
        self.config.job.count_first = enabled;
        self
    }

    /// Set the directory for intermediate files.
    pub fn scratch_dir(mut self, dir: PathBuf) -> Self {
        self.config.job.scratch_dir = Some(dir);
        self
    }

    /// Set the number of render threads.
    pub fn render_threads(mut self, threads: usize) -> Self {
        self.config.render.render_threads = threads;
        self
    }

    /// Use an existing engine instead of locating Ghostscript.
    pub fn engine(mut self, engine: Arc<EngineService>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Build the converter.
    pub fn build(self) -> Result<Converter> {
        match self.engine {
            Some(engine) => Converter::with_engine(self.config, engine),
            None => Converter::new(self.config),
        }
    }
}

impl Default for ConverterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
