//! # docbatch-core
//!
//! Batch document conversion around a single, non-reentrant rendering
//! engine (Ghostscript).
//!
//! A job enumerates its inputs on a background thread while the calling
//! thread converts them one at a time:
//!
//! - **Enumeration** opens each input as a [`Document`] (PDF, image, and
//!   detection of PostScript/EPS), totals page counts and queues documents in
//!   order
//! - **Conversion** feeds each document to the [`EngineService`], which
//!   serializes every engine run process-wide
//! - **Progress** is page based and never moves backwards, even as the page
//!   total grows during enumeration
//! - **Failures** of a single input are put to the operator as
//!   Abort/Retry/Ignore
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docbatch_core::{
//!     Converter, ConverterConfig, Decision, FixedDecision, LogStatus, PngFormat,
//! };
//! use std::path::PathBuf;
//!
//! fn main() -> docbatch_core::Result<()> {
//!     let converter = Converter::new(ConverterConfig::new("./output", 150))?;
//!
//!     let files = vec![PathBuf::from("report.pdf"), PathBuf::from("scan.png")];
//!     let report = converter.run_conversion(
//!         &files,
//!         &PngFormat::default(),
//!         &LogStatus::default(),
//!         &mut FixedDecision(Decision::Ignore),
//!     )?;
//!
//!     println!("Converted {} of {} pages", report.pages_completed, report.total_pages);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod converter;
pub mod decision;
pub mod document;
pub mod engine;
pub mod enumerate;
pub mod error;
pub mod format;
pub mod progress;
pub mod raster;
pub mod status;

// Re-export main types for convenience
pub use config::{ConverterConfig, EngineConfig, JobConfig, RenderConfig};
pub use converter::{Converter, ConverterBuilder, ConverterStats, JobReport, JobState};
pub use decision::{Decision, DecisionBroker, DecisionPrompt, FixedDecision};
pub use document::{Document, DocumentType, DocumentTypes, RenderOptions, Rotation};
pub use engine::{EngineService, Invocation, RenderedFrame};
pub use enumerate::{QueuedDocument, SkippedItem};
pub use error::{ConversionError, Result};
pub use format::{
    FormatDescriptor, JpegFormat, OutputNames, PdfFormat, PngColor, PngFormat, Preflight,
    TiffCompression, TiffFormat,
};
pub use progress::ProgressTracker;
pub use status::{JobTimer, LogStatus, NullStatus, StatusSurface};
