//! PostScript and EPS documents.
//!
//! Page counting for PostScript needs a full interpreter pass, which this
//! crate does not do. Every operation reports `NotImplemented`, so opening such
//! a file fails and the item is offered to the operator for triage.

use super::{DocumentBackend, DocumentType, RenderOptions};
use crate::engine::{EngineArgs, EngineService, ProgressiveCallback, RenderedFrame};
use crate::error::{ConversionError, Result};
use std::path::{Path, PathBuf};

pub struct PostScriptDocument {
    path: PathBuf,
    doc_type: DocumentType,
}

impl PostScriptDocument {
    pub fn new(path: &Path, doc_type: DocumentType) -> Self {
        Self {
            path: path.to_path_buf(),
            doc_type,
        }
    }

    fn unsupported(&self, operation: &str) -> ConversionError {
        ConversionError::NotImplemented(format!(
            "{} is not supported for {} document {}",
            operation,
            self.doc_type,
            self.path.display()
        ))
    }
}

impl DocumentBackend for PostScriptDocument {
    fn doc_type(&self) -> DocumentType {
        self.doc_type
    }

    fn page_count(&self) -> Result<usize> {
        Err(self.unsupported("page counting"))
    }

    fn convert_to_pdf(&mut self, _output: &Path) -> Result<()> {
        Err(self.unsupported("PDF conversion"))
    }

    fn render_page(
        &mut self,
        _engine: &EngineService,
        _page: usize,
        _options: &RenderOptions,
        _cancel: &dyn Fn() -> bool,
        _progressive: Option<ProgressiveCallback<'_>>,
    ) -> Result<RenderedFrame> {
        Err(self.unsupported("page rendering"))
    }

    fn run_initialize(&self, _args: &mut EngineArgs) -> Result<()> {
        Err(self.unsupported("engine initialization"))
    }

    fn run_page(&self, _args: &mut EngineArgs, _page: usize) -> Result<()> {
        Err(self.unsupported("running a page"))
    }

    fn engine_input(&mut self, _scratch: &Path) -> Result<PathBuf> {
        Err(self.unsupported("engine input"))
    }

    fn ensure_no_open_renderer(&mut self) {}
}
