//! PDF documents.

use super::{DocumentBackend, DocumentType, RenderOptions, Rotation};
use crate::engine::{
    codes, escape_postscript_string, EngineArgs, EngineService, FrameCollector, Invocation,
    ProgressiveCallback, RenderedFrame,
};
use crate::error::{ConversionError, Result};
use crate::raster::rotate;
use std::path::{Path, PathBuf};
use tracing::debug;

struct CachedPage {
    page: usize,
    dpi: u32,
    rotation: Rotation,
    frame: RenderedFrame,
}

/// Engine-side renderer for one PDF.
///
/// Each page render is one engine run with the frame-buffer protocol
/// installed. The most recent page is kept so repeated requests for the same
/// page and options skip the engine.
pub struct PageRenderer {
    path: PathBuf,
    last: Option<CachedPage>,
}

impl PageRenderer {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            last: None,
        }
    }

    /// Render `page`. `args` already carries the operands that load the
    /// document and select the page; the display device is added here.
    pub fn render(
        &mut self,
        engine: &EngineService,
        mut args: EngineArgs,
        page: usize,
        options: &RenderOptions,
        cancel: &dyn Fn() -> bool,
        progressive: Option<ProgressiveCallback<'_>>,
    ) -> Result<RenderedFrame> {
        if let Some(cached) = &self.last {
            if cached.page == page && cached.dpi == options.dpi && cached.rotation == options.rotation
            {
                debug!("Reusing rendered page {} of {:?}", page, self.path);
                return Ok(cached.frame.clone());
            }
        }

        args.device("display")
            .resolution(options.dpi)
            .anti_alias(options.anti_alias_bits, options.anti_alias_bits);

        let mut collector = FrameCollector::new(options.dpi).with_cancel(cancel);
        if let Some(progressive) = progressive {
            collector = collector.with_progressive(progressive);
        }

        let completed = engine.invoke(
            Invocation::new(args.build())
                .cancel_poll(cancel)
                .display(&mut collector),
        )?;
        if !completed {
            return Err(ConversionError::OperationCanceled);
        }

        let frame = collector
            .into_pages()
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| ConversionError::NativeEngine {
                code: codes::UNKNOWN_ERROR,
                stdout: String::new(),
                stderr: format!("page {} produced no image", page),
            })?;
        let frame = RenderedFrame {
            image: rotate(frame.image, options.rotation),
            ..frame
        };

        self.last = Some(CachedPage {
            page,
            dpi: options.dpi,
            rotation: options.rotation,
            frame: frame.clone(),
        });
        Ok(frame)
    }
}

/// A PDF file. Page count comes from a metadata-only structure load.
pub struct PdfDocument {
    path: PathBuf,
    page_count: usize,
    renderer: Option<PageRenderer>,
}

impl PdfDocument {
    pub fn open(path: &Path) -> Result<Self> {
        let structure = lopdf::Document::load(path)
            .map_err(|e| ConversionError::PdfError(format!("{}: {}", path.display(), e)))?;
        let page_count = structure.get_pages().len();
        Ok(Self {
            path: path.to_path_buf(),
            page_count,
            renderer: None,
        })
    }

    pub fn has_open_renderer(&self) -> bool {
        self.renderer.is_some()
    }
}

impl DocumentBackend for PdfDocument {
    fn doc_type(&self) -> DocumentType {
        DocumentType::Pdf
    }

    fn page_count(&self) -> Result<usize> {
        Ok(self.page_count)
    }

    fn convert_to_pdf(&mut self, _output: &Path) -> Result<()> {
        Err(ConversionError::NotImplemented(format!(
            "{} is already a PDF",
            self.path.display()
        )))
    }

    fn render_page(
        &mut self,
        engine: &EngineService,
        page: usize,
        options: &RenderOptions,
        cancel: &dyn Fn() -> bool,
        progressive: Option<ProgressiveCallback<'_>>,
    ) -> Result<RenderedFrame> {
        let mut args = EngineArgs::new();
        self.run_initialize(&mut args)?;
        self.run_page(&mut args, page)?;

        let path = &self.path;
        let renderer = self.renderer.get_or_insert_with(|| {
            debug!("Opening page renderer for {:?}", path);
            PageRenderer::new(path)
        });

        match renderer.render(engine, args, page, options, cancel, progressive) {
            Err(e @ ConversionError::NativeEngine { .. }) => {
                self.renderer = None;
                Err(e)
            }
            other => other,
        }
    }

    /// Grant read access to the file and open it in the engine's PDF
    /// interpreter.
    fn run_initialize(&self, args: &mut EngineArgs) -> Result<()> {
        let path = self.path.display().to_string();
        args.flag(format!("--permit-file-read={}", path));
        args.postscript(format!(
            "({}) (r) file runpdfbegin",
            escape_postscript_string(&path)
        ));
        Ok(())
    }

    fn run_page(&self, args: &mut EngineArgs, page: usize) -> Result<()> {
        args.postscript(format!("{} pdfgetpage pdfshowpage", page));
        Ok(())
    }

    fn engine_input(&mut self, _scratch: &Path) -> Result<PathBuf> {
        Ok(self.path.clone())
    }

    fn ensure_no_open_renderer(&mut self) {
        if self.renderer.take().is_some() {
            debug!("Closed page renderer for {:?}", self.path);
        }
    }
}
