//! End-to-end job tests.
//!
//! Most tests drive the pipeline through the scripted engine backend. The
//! Ghostscript tests at the bottom need `gs` on PATH and are skipped
//! otherwise.
//!
//! Run with: cargo test --package docbatch-core --test pipeline_tests

use docbatch_core::engine::{codes, ScriptContext, ScriptedBackend};
use docbatch_core::{
    ConversionError, Converter, ConverterBuilder, Decision, Document, DocumentTypes,
    EngineService, FixedDecision, JobState, LogStatus, NullStatus, PdfFormat, PngFormat,
    RenderOptions, StatusSurface,
};
use image::codecs::gif::GifEncoder;
use image::{Delay, Frame, Rgba, RgbaImage};
use lopdf::{dictionary, Object};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Fixtures
// ============================================================================

fn write_pdf(path: &Path, pages: usize) {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(200),
                    Object::Integer(100),
                ],
            })
            .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

fn write_gif(path: &Path, frames: usize) {
    let file = std::fs::File::create(path).unwrap();
    let mut encoder = GifEncoder::new(file);
    for i in 0..frames {
        let image = RgbaImage::from_pixel(6, 4, Rgba([0, (i * 50) as u8, 0, 255]));
        encoder
            .encode_frame(Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(50, 1)))
            .unwrap();
    }
}

/// Write PDFs with the given page counts as `doc0.pdf`, `doc1.pdf`, ...
fn pdf_inputs(dir: &Path, page_counts: &[usize]) -> Vec<PathBuf> {
    page_counts
        .iter()
        .enumerate()
        .map(|(i, &pages)| {
            let path = dir.join(format!("doc{}.pdf", i));
            write_pdf(&path, pages);
            path
        })
        .collect()
}

fn input_name(ctx: &ScriptContext<'_, '_>) -> String {
    ctx.args()
        .last()
        .and_then(|arg| Path::new(arg).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Page count of the input file, read the way the engine would see it.
fn input_pages(ctx: &ScriptContext<'_, '_>) -> usize {
    ctx.args()
        .last()
        .and_then(|arg| lopdf::Document::load(arg).ok())
        .map(|doc| doc.get_pages().len())
        .unwrap_or(1)
}

fn converter(backend: &ScriptedBackend, output_dir: &Path) -> Converter {
    ConverterBuilder::new()
        .output_dir(output_dir)
        .poll_interval(Duration::from_millis(5))
        .engine(Arc::new(EngineService::new(Box::new(backend.clone()))))
        .build()
        .unwrap()
}

/// Status surface that records what it was told.
#[derive(Default)]
struct RecordingStatus {
    percentages: RefCell<Vec<(usize, usize)>>,
    lines: RefCell<Vec<(usize, String)>>,
    cancel: Arc<AtomicBool>,
    pauses: Cell<usize>,
    finished: Cell<bool>,
}

impl RecordingStatus {
    fn percents(&self) -> Vec<u32> {
        self.percentages
            .borrow()
            .iter()
            .map(|&(completed, total)| {
                (100.0 * completed as f64 / total as f64).round() as u32
            })
            .collect()
    }
}

impl StatusSurface for RecordingStatus {
    fn set_line(&self, index: usize, text: &str) {
        self.lines.borrow_mut().push((index, text.to_string()));
    }

    fn set_percentage(&self, completed: usize, total: usize) {
        self.percentages.borrow_mut().push((completed, total));
    }

    fn has_user_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn pause_timer(&self) {
        self.pauses.set(self.pauses.get() + 1);
    }

    fn resume_timer(&self) {}

    fn finish(&self) {
        self.finished.set(true);
    }
}

fn assert_non_decreasing(values: &[u32]) {
    for pair in values.windows(2) {
        assert!(pair[0] <= pair[1], "percentage went down: {:?}", values);
    }
}

// ============================================================================
// Progress and ordering
// ============================================================================

#[test]
fn test_pages_two_three_four_report_progress() {
    let dir = TempDir::new().unwrap();
    let inputs = pdf_inputs(dir.path(), &[2, 3, 4]);

    let backend = ScriptedBackend::new(|ctx| {
        let pages = input_pages(ctx);
        ctx.emit_pages(pages)
    });
    let out = dir.path().join("out");
    // The grand total is complete before the first item starts.
    let converter = ConverterBuilder::new()
        .output_dir(&out)
        .poll_interval(Duration::from_millis(5))
        .count_first(true)
        .engine(Arc::new(EngineService::new(Box::new(backend.clone()))))
        .build()
        .unwrap();
    let status = RecordingStatus::default();

    let report = converter
        .run_conversion(
            &inputs,
            &PdfFormat::default(),
            &status,
            &mut FixedDecision(Decision::Abort),
        )
        .unwrap();

    assert_eq!(report.state, JobState::Finished);
    assert_eq!(report.total_pages, 9);
    assert_eq!(report.pages_completed, 9);
    assert_eq!(
        report.outputs,
        vec![out.join("doc0.pdf"), out.join("doc1.pdf"), out.join("doc2.pdf")]
    );

    let percentages = status.percentages.borrow().clone();
    assert!(percentages.contains(&(2, 9)), "{:?}", percentages);
    assert!(percentages.contains(&(3, 9)), "{:?}", percentages);
    assert_eq!(percentages.last(), Some(&(9, 9)));
    assert_non_decreasing(&status.percents());
    assert!(status.finished.get());
}

#[test]
fn test_count_first_aborts_during_enumeration() {
    let dir = TempDir::new().unwrap();
    let mut inputs = pdf_inputs(dir.path(), &[1, 1]);
    let broken = dir.path().join("notes.txt");
    std::fs::write(&broken, "plain text").unwrap();
    inputs.insert(1, broken);

    let backend = ScriptedBackend::new(|ctx| ctx.emit_pages(1));
    let converter = ConverterBuilder::new()
        .output_dir(dir.path().join("out"))
        .poll_interval(Duration::from_millis(5))
        .count_first(true)
        .engine(Arc::new(EngineService::new(Box::new(backend.clone()))))
        .build()
        .unwrap();
    let status = RecordingStatus::default();

    let report = converter
        .run_conversion(
            &inputs,
            &PdfFormat::default(),
            &status,
            &mut FixedDecision(Decision::Abort),
        )
        .unwrap();

    assert_eq!(report.state, JobState::Aborted);
    assert_eq!(backend.instances_created(), 0);
    assert!(status
        .lines
        .borrow()
        .iter()
        .any(|(_, text)| text == "Counting documents"));
}

#[test]
fn test_dequeue_order_matches_input_order() {
    let dir = TempDir::new().unwrap();
    let inputs = pdf_inputs(dir.path(), &[1, 1, 1, 1, 1]);
    let backend = ScriptedBackend::new(|ctx| ctx.emit_pages(1));
    let converter = converter(&backend, &dir.path().join("out"));

    let report = converter
        .run_conversion(
            &inputs,
            &PngFormat::default(),
            &NullStatus,
            &mut FixedDecision(Decision::Abort),
        )
        .unwrap();
    assert!(report.is_finished());

    let seen: Vec<String> = backend
        .invocations()
        .iter()
        .map(|args| {
            Path::new(args.last().unwrap())
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    assert_eq!(seen, vec!["doc0.pdf", "doc1.pdf", "doc2.pdf", "doc3.pdf", "doc4.pdf"]);
    assert_eq!(report.outputs[0].file_name().unwrap(), "doc0-001.png");
}

#[test]
fn test_inputs_sharing_a_stem_get_distinct_outputs() {
    let dir = TempDir::new().unwrap();
    let mut inputs = Vec::new();
    for sub in ["a", "b"] {
        let folder = dir.path().join(sub);
        std::fs::create_dir(&folder).unwrap();
        let path = folder.join("doc.png");
        RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();
        inputs.push(path);
    }

    let backend = ScriptedBackend::new(|ctx| ctx.emit_pages(1));
    let out = dir.path().join("out");
    let converter = converter(&backend, &out);

    let report = converter
        .run_conversion(
            &inputs,
            &PdfFormat::default(),
            &NullStatus,
            &mut FixedDecision(Decision::Abort),
        )
        .unwrap();

    assert!(report.is_finished());
    assert_eq!(report.outputs, vec![out.join("doc.pdf"), out.join("doc-2.pdf")]);

    let targets: Vec<String> = backend
        .invocations()
        .iter()
        .flat_map(|args| args.iter())
        .filter(|arg| arg.starts_with("-sOutputFile="))
        .cloned()
        .collect();
    assert_eq!(targets.len(), 2);
    assert_ne!(targets[0], targets[1]);
}

#[test]
fn test_status_lines_name_current_item() {
    let dir = TempDir::new().unwrap();
    let inputs = pdf_inputs(dir.path(), &[2]);
    let backend = ScriptedBackend::new(|ctx| ctx.emit_pages(2));
    let converter = converter(&backend, &dir.path().join("out"));
    let status = RecordingStatus::default();

    converter
        .run_conversion(
            &inputs,
            &PdfFormat::default(),
            &status,
            &mut FixedDecision(Decision::Abort),
        )
        .unwrap();

    let lines = status.lines.borrow();
    assert!(lines
        .iter()
        .any(|(index, text)| *index == 0 && text.contains("doc0.pdf") && text.contains("1 of 1")));
    assert!(lines.iter().any(|(index, text)| *index == 1 && text == "Page 2 of 2"));
}

// ============================================================================
// Triage
// ============================================================================

#[test]
fn test_engine_error_retry_repeats_same_item() {
    let dir = TempDir::new().unwrap();
    let inputs = pdf_inputs(dir.path(), &[2, 1]);

    let attempts: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
    let seen = Arc::clone(&attempts);
    let backend = ScriptedBackend::new(move |ctx| {
        let name = input_name(ctx);
        let attempt = {
            let mut seen = seen.lock().unwrap();
            let count = seen.entry(name.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if name == "doc0.pdf" && attempt == 1 {
            ctx.stdout("Page 1\n");
            ctx.stdout("Page 2\n");
            ctx.stderr("Error: /ioerror in --showpage--\n");
            return codes::FATAL;
        }
        let pages = input_pages(ctx);
        ctx.emit_pages(pages)
    });
    let converter = converter(&backend, &dir.path().join("out"));
    let status = RecordingStatus::default();

    let mut asked = Vec::new();
    let mut prompt = |message: &str| {
        asked.push(message.to_string());
        Decision::Retry
    };
    let report = converter
        .run_conversion(&inputs, &PdfFormat::default(), &status, &mut prompt)
        .unwrap();

    assert_eq!(report.state, JobState::Finished);
    assert_eq!(report.pages_completed, 3);
    assert!(report.skipped.is_empty());
    assert_eq!(backend.invocations().len(), 3);
    assert_eq!(attempts.lock().unwrap()["doc0.pdf"], 2);

    assert_eq!(asked.len(), 1);
    assert!(asked[0].contains("doc0.pdf"));
    assert!(asked[0].contains("/ioerror"));
    assert_eq!(status.pauses.get(), 1);
    assert_non_decreasing(&status.percents());
    assert_eq!(backend.live_instances(), 0);
}

#[test]
fn test_ignore_skips_item_and_keeps_total() {
    let dir = TempDir::new().unwrap();
    let inputs = pdf_inputs(dir.path(), &[3, 2]);
    let backend = ScriptedBackend::new(|ctx| {
        if input_name(ctx) == "doc0.pdf" {
            ctx.stdout("Page 1\n");
            return codes::FATAL;
        }
        ctx.emit_pages(2)
    });
    let out = dir.path().join("out");
    let converter = converter(&backend, &out);
    let status = RecordingStatus::default();

    let report = converter
        .run_conversion(
            &inputs,
            &PdfFormat::default(),
            &status,
            &mut FixedDecision(Decision::Ignore),
        )
        .unwrap();

    assert_eq!(report.state, JobState::Finished);
    assert_eq!(report.total_pages, 5);
    assert_eq!(report.pages_completed, 2);
    assert_eq!(report.outputs, vec![out.join("doc1.pdf")]);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].path.ends_with("doc0.pdf"));
    assert_eq!(status.percentages.borrow().last(), Some(&(5, 5)));
    assert_non_decreasing(&status.percents());
}

#[test]
fn test_abort_decision_stops_job() {
    let dir = TempDir::new().unwrap();
    let inputs = pdf_inputs(dir.path(), &[1, 1]);
    let backend = ScriptedBackend::new(|_| codes::FATAL);
    let converter = converter(&backend, &dir.path().join("out"));

    let report = converter
        .run_conversion(
            &inputs,
            &PdfFormat::default(),
            &NullStatus,
            &mut FixedDecision(Decision::Abort),
        )
        .unwrap();

    assert_eq!(report.state, JobState::Aborted);
    assert!(report.outputs.is_empty());
    assert_eq!(backend.invocations().len(), 1);
}

#[test]
fn test_enumeration_failure_is_triaged_on_caller_thread() {
    let dir = TempDir::new().unwrap();
    let mut inputs = pdf_inputs(dir.path(), &[1]);
    let broken = dir.path().join("broken.txt");
    std::fs::write(&broken, "plain text").unwrap();
    inputs.insert(0, broken);

    let backend = ScriptedBackend::new(|ctx| ctx.emit_pages(1));
    let converter = converter(&backend, &dir.path().join("out"));
    let caller = std::thread::current().id();
    let mut asked = Vec::new();
    let mut prompt = |message: &str| {
        assert_eq!(std::thread::current().id(), caller);
        asked.push(message.to_string());
        Decision::Ignore
    };

    let report = converter
        .run_conversion(&inputs, &PdfFormat::default(), &NullStatus, &mut prompt)
        .unwrap();

    assert_eq!(report.state, JobState::Finished);
    assert_eq!(report.pages_completed, 1);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].path.ends_with("broken.txt"));
    assert_eq!(asked.len(), 1);
    assert!(asked[0].contains("broken.txt"));
}

#[test]
fn test_engine_panic_stops_enumeration() {
    let dir = TempDir::new().unwrap();
    let mut inputs = pdf_inputs(dir.path(), &[1]);
    let broken = dir.path().join("notes.txt");
    std::fs::write(&broken, "plain text").unwrap();
    inputs.push(broken);

    let backend = ScriptedBackend::new(|_| panic!("engine crashed"));
    let converter = converter(&backend, &dir.path().join("out"));

    // The enumeration thread keeps asking about notes.txt. The panic must
    // still reach the caller instead of leaving the job waiting on it.
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        converter.run_conversion(
            &inputs,
            &PdfFormat::default(),
            &NullStatus,
            &mut FixedDecision(Decision::Retry),
        )
    }));
    assert!(result.is_err());
}

#[test]
fn test_zero_page_pdf_is_rejected() {
    let dir = TempDir::new().unwrap();
    let empty = dir.path().join("empty.pdf");
    write_pdf(&empty, 0);

    let result = Document::open(&empty, DocumentTypes::all());
    assert!(matches!(result, Err(ConversionError::DataFormat { .. })));

    let backend = ScriptedBackend::succeeding();
    let converter = converter(&backend, &dir.path().join("out"));
    let report = converter
        .run_conversion(
            &[empty],
            &PdfFormat::default(),
            &NullStatus,
            &mut FixedDecision(Decision::Ignore),
        )
        .unwrap();
    assert_eq!(report.state, JobState::Finished);
    assert_eq!(report.total_pages, 0);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(backend.instances_created(), 0);
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn test_cancel_before_first_item() {
    let dir = TempDir::new().unwrap();
    let inputs = pdf_inputs(dir.path(), &[1, 1]);
    let backend = ScriptedBackend::succeeding();
    let converter = converter(&backend, &dir.path().join("out"));
    let status = LogStatus::new(Arc::new(AtomicBool::new(true)));

    let report = converter
        .run_conversion(
            &inputs,
            &PdfFormat::default(),
            &status,
            &mut FixedDecision(Decision::Ignore),
        )
        .unwrap();
    assert_eq!(report.state, JobState::Aborted);
    assert_eq!(backend.instances_created(), 0);
}

#[test]
fn test_cancel_at_engine_poll() {
    let dir = TempDir::new().unwrap();
    let inputs = pdf_inputs(dir.path(), &[3, 1]);
    let cancel = Arc::new(AtomicBool::new(false));
    let trigger = Arc::clone(&cancel);
    let backend = ScriptedBackend::new(move |ctx| {
        trigger.store(true, Ordering::SeqCst);
        ctx.emit_pages(3)
    });
    let converter = converter(&backend, &dir.path().join("out"));
    let status = LogStatus::new(cancel);

    let report = converter
        .run_conversion(
            &inputs,
            &PdfFormat::default(),
            &status,
            &mut FixedDecision(Decision::Retry),
        )
        .unwrap();

    assert_eq!(report.state, JobState::Aborted);
    assert_eq!(report.pages_completed, 0);
    assert_eq!(backend.invocations().len(), 1);
    assert_eq!(backend.live_instances(), 0);
}

#[test]
fn test_cancel_at_paint_checkpoint() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("page.pdf");
    write_pdf(&input, 2);
    let backend = ScriptedBackend::new(|ctx| ctx.emit_pages(1));
    let converter = converter(&backend, dir.path());

    let result = converter.render_pages(
        &input,
        &[1],
        &RenderOptions::with_dpi(72),
        &dir.path().join("frames"),
        &|| true,
    );
    assert!(matches!(result, Err(ConversionError::OperationCanceled)));
    assert_eq!(backend.live_instances(), 0);
}

// ============================================================================
// Images and rendering
// ============================================================================

#[test]
fn test_animated_gif_converts_every_frame() {
    let dir = TempDir::new().unwrap();
    let gif = dir.path().join("anim.gif");
    write_gif(&gif, 3);

    let backend = ScriptedBackend::new(|ctx| {
        let pages = input_pages(ctx);
        ctx.emit_pages(pages)
    });
    let converter = converter(&backend, &dir.path().join("out"));
    let report = converter
        .run_conversion(
            &[gif],
            &PngFormat::default(),
            &NullStatus,
            &mut FixedDecision(Decision::Abort),
        )
        .unwrap();

    assert!(report.is_finished());
    assert_eq!(report.total_pages, 3);
    assert_eq!(report.pages_completed, 3);
    assert_eq!(report.outputs.len(), 3);
    assert_eq!(report.outputs[2].file_name().unwrap(), "anim-003.png");
}

#[test]
fn test_jpeg_density_sizes_intermediate_pdf() {
    use image::codecs::jpeg::{JpegEncoder, PixelDensity};

    let dir = TempDir::new().unwrap();
    let jpeg = dir.path().join("scan.jpg");
    let pixels = image::RgbImage::from_pixel(300, 150, image::Rgb([240, 240, 240]));
    let file = std::fs::File::create(&jpeg).unwrap();
    let mut encoder = JpegEncoder::new(file);
    encoder.set_pixel_density(PixelDensity::dpi(150));
    encoder.encode_image(&pixels).unwrap();

    let mut document = Document::open(&jpeg, DocumentTypes::all()).unwrap();
    let pdf = dir.path().join("scan.pdf");
    document.convert_to_pdf(&pdf).unwrap();

    let written = lopdf::Document::load(&pdf).unwrap();
    let (_, page_id) = written.get_pages().into_iter().next().unwrap();
    let page = written.get_dictionary(page_id).unwrap();
    let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
    assert_eq!(media_box[2].as_float().unwrap(), 144.0);
    assert_eq!(media_box[3].as_float().unwrap(), 72.0);
}

#[test]
fn test_render_pages_writes_numbered_pngs() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("two.pdf");
    write_pdf(&input, 2);
    let backend = ScriptedBackend::new(|ctx| {
        ctx.stdout("Page 1\n");
        ctx.paint_frame(10, 5, &[200; 10 * 5 * 3])
    });
    let converter = converter(&backend, dir.path());

    let frames_dir = dir.path().join("frames");
    let saved = converter
        .render_pages(
            &input,
            &[1, 2],
            &RenderOptions::with_dpi(72),
            &frames_dir,
            &|| false,
        )
        .unwrap();

    assert_eq!(saved.len(), 2);
    assert_eq!(saved[1].page_number, 2);
    assert!(saved[1].path.ends_with("two-002.png"));
    assert_eq!((saved[0].width, saved[0].height), (10, 5));
    assert!(saved[0].path.exists());
}

#[test]
fn test_jobs_sharing_engine_never_overlap() {
    let dir = TempDir::new().unwrap();
    let inputs = pdf_inputs(dir.path(), &[2, 2, 2]);
    let backend = ScriptedBackend::new(|ctx| {
        std::thread::sleep(Duration::from_millis(5));
        ctx.emit_pages(2)
    });
    let engine = Arc::new(EngineService::new(Box::new(backend.clone())));

    std::thread::scope(|scope| {
        for job in 0..3 {
            let engine = Arc::clone(&engine);
            let inputs = &inputs;
            let out = dir.path().join(format!("out{}", job));
            scope.spawn(move || {
                let converter = ConverterBuilder::new()
                    .output_dir(out)
                    .poll_interval(Duration::from_millis(5))
                    .engine(engine)
                    .build()
                    .unwrap();
                let report = converter
                    .run_conversion(
                        inputs,
                        &PdfFormat::default(),
                        &NullStatus,
                        &mut FixedDecision(Decision::Abort),
                    )
                    .unwrap();
                assert!(report.is_finished());
            });
        }
    });

    assert_eq!(backend.instances_created(), 9);
    assert_eq!(backend.peak_instances(), 1);
    assert_eq!(backend.live_instances(), 0);
}

// ============================================================================
// Ghostscript
// ============================================================================

fn ghostscript_available() -> bool {
    which::which("gs").is_ok()
}

/// Skip test if Ghostscript is not available
macro_rules! require_gs {
    () => {
        if !ghostscript_available() {
            eprintln!("Skipping test: Ghostscript not found");
            return;
        }
    };
}

fn ghostscript_converter(output_dir: &Path) -> Converter {
    ConverterBuilder::new()
        .output_dir(output_dir)
        .dpi(36)
        .build()
        .unwrap()
}

#[test]
fn test_ghostscript_pdf_to_png() {
    require_gs!();

    let dir = TempDir::new().unwrap();
    let inputs = pdf_inputs(dir.path(), &[2]);
    let out = dir.path().join("out");
    let converter = ghostscript_converter(&out);
    let status = RecordingStatus::default();

    let report = converter
        .run_conversion(
            &inputs,
            &PngFormat::default(),
            &status,
            &mut FixedDecision(Decision::Abort),
        )
        .unwrap();

    assert_eq!(report.state, JobState::Finished);
    assert_eq!(report.pages_completed, 2);
    for output in &report.outputs {
        assert!(output.exists(), "missing {:?}", output);
    }
    assert_eq!(status.percentages.borrow().last(), Some(&(2, 2)));
}

#[test]
fn test_ghostscript_image_to_pdf() {
    require_gs!();

    let dir = TempDir::new().unwrap();
    let gif = dir.path().join("frames.gif");
    write_gif(&gif, 2);
    let out = dir.path().join("out");
    let converter = ghostscript_converter(&out);

    let report = converter
        .run_conversion(
            &[gif],
            &PdfFormat::default(),
            &NullStatus,
            &mut FixedDecision(Decision::Abort),
        )
        .unwrap();

    assert!(report.is_finished());
    let written = lopdf::Document::load(&report.outputs[0]).unwrap();
    assert_eq!(written.get_pages().len(), 2);
}
