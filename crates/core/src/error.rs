//! Error types for docbatch conversion jobs.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the docbatch library.
#[derive(Error, Debug)]
pub enum ConversionError {
    /// The input is not a recognized or allowed document type, or its page
    /// count is out of range.
    #[error("Unsupported document '{path}': {message} (allowed types: {allowed})")]
    DataFormat {
        path: PathBuf,
        message: String,
        allowed: String,
    },

    /// File access or path resolution failed.
    #[error("I/O error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The rendering engine returned a non-recoverable result code.
    #[error("Rendering engine failed with code {code}: {}", diagnostic_summary(.stdout, .stderr))]
    NativeEngine {
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// Cooperative cancellation. Never shown to the operator.
    #[error("Operation canceled")]
    OperationCanceled,

    /// The operation is not available for this document variant.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// An operation was attempted on a disposed document.
    #[error("Document '{0}' has already been released")]
    UseAfterFree(PathBuf),

    /// The engine executable could not be located.
    #[error("Ghostscript not found. Install Ghostscript and ensure 'gs' is in PATH")]
    EngineNotFound,

    /// The engine quit outside of its main run phase.
    #[error("Rendering engine quit unexpectedly during {phase}: {stderr}")]
    UnexpectedQuit { phase: String, stderr: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Image decoding or encoding failed.
    #[error("Image error: {0}")]
    ImageError(String),

    /// PDF structure could not be read or written.
    #[error("PDF error: {0}")]
    PdfError(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, ConversionError>;

impl ConversionError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConversionError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error belongs to a single input item and should be
    /// offered to the operator as Abort/Retry/Ignore instead of failing the job.
    pub fn is_item_error(&self) -> bool {
        matches!(
            self,
            ConversionError::DataFormat { .. }
                | ConversionError::Io { .. }
                | ConversionError::NativeEngine { .. }
                | ConversionError::NotImplemented(_)
                | ConversionError::ImageError(_)
                | ConversionError::PdfError(_)
        )
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, ConversionError::OperationCanceled)
    }
}

fn diagnostic_summary(stdout: &str, stderr: &str) -> String {
    let text = if stderr.trim().is_empty() { stdout } else { stderr };
    let text = text.trim();
    if text.is_empty() {
        "no diagnostic output".to_string()
    } else {
        text.to_string()
    }
}

impl From<std::io::Error> for ConversionError {
    fn from(source: std::io::Error) -> Self {
        ConversionError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

impl From<image::ImageError> for ConversionError {
    fn from(e: image::ImageError) -> Self {
        ConversionError::ImageError(e.to_string())
    }
}

impl From<lopdf::Error> for ConversionError {
    fn from(e: lopdf::Error) -> Self {
        ConversionError::PdfError(e.to_string())
    }
}
