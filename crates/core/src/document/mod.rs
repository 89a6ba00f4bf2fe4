//! Input documents.
//!
//! A [`Document`] is one input file opened through a variant selected by
//! sniffing its header. Opening reads only metadata (page or frame count);
//! rendering resources are created lazily and released on [`Document::dispose`]
//! or drop.

mod image;
mod pdf;
mod postscript;

pub use self::image::ImageDocument;
pub use self::pdf::{PageRenderer, PdfDocument};
pub use self::postscript::PostScriptDocument;

use crate::engine::{EngineArgs, EngineService, ProgressiveCallback, RenderedFrame};
use crate::error::{ConversionError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// Bytes read from the start of a file to identify it.
const SNIFF_LEN: usize = 1024;

/// Document variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    Pdf,
    PostScript,
    Eps,
    Image,
}

impl DocumentType {
    pub const ALL: [DocumentType; 4] = [
        DocumentType::Pdf,
        DocumentType::PostScript,
        DocumentType::Eps,
        DocumentType::Image,
    ];

    fn bit(self) -> u8 {
        match self {
            DocumentType::Pdf => 1,
            DocumentType::PostScript => 1 << 1,
            DocumentType::Eps => 1 << 2,
            DocumentType::Image => 1 << 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DocumentType::Pdf => "PDF",
            DocumentType::PostScript => "PostScript",
            DocumentType::Eps => "EPS",
            DocumentType::Image => "Image",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A set of document types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DocumentTypes(u8);

impl DocumentTypes {
    pub fn all() -> Self {
        DocumentType::ALL.into_iter().collect()
    }

    pub fn with(self, doc_type: DocumentType) -> Self {
        Self(self.0 | doc_type.bit())
    }

    pub fn contains(self, doc_type: DocumentType) -> bool {
        self.0 & doc_type.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = DocumentType> {
        DocumentType::ALL.into_iter().filter(move |t| self.contains(*t))
    }
}

impl FromIterator<DocumentType> for DocumentTypes {
    fn from_iter<I: IntoIterator<Item = DocumentType>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), Self::with)
    }
}

impl fmt::Display for DocumentTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let labels: Vec<&str> = self.iter().map(DocumentType::label).collect();
        f.write_str(&labels.join(" | "))
    }
}

/// Quarter-turn rotation applied to a rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    /// Whether width and height trade places.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

/// Options for rendering one page to pixels.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub dpi: u32,
    pub rotation: Rotation,
    /// Text and graphics anti-aliasing bits passed to the engine.
    pub anti_alias_bits: u8,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            dpi: 96,
            rotation: Rotation::None,
            anti_alias_bits: 4,
        }
    }
}

impl RenderOptions {
    pub fn with_dpi(dpi: u32) -> Self {
        Self {
            dpi,
            ..Default::default()
        }
    }

    pub fn rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }
}

/// Capabilities every document variant provides.
///
/// Pages are 1-based throughout.
pub trait DocumentBackend: Send {
    fn doc_type(&self) -> DocumentType;

    fn page_count(&self) -> Result<usize>;

    /// Write the document as a PDF to `output`.
    fn convert_to_pdf(&mut self, output: &Path) -> Result<()>;

    /// Render one page. `cancel` is checked at every paint checkpoint and
    /// yields [`ConversionError::OperationCanceled`].
    fn render_page(
        &mut self,
        engine: &EngineService,
        page: usize,
        options: &RenderOptions,
        cancel: &dyn Fn() -> bool,
        progressive: Option<ProgressiveCallback<'_>>,
    ) -> Result<RenderedFrame>;

    /// Add the engine arguments that load this document.
    fn run_initialize(&self, args: &mut EngineArgs) -> Result<()>;

    /// Add the engine arguments that run one page.
    fn run_page(&self, args: &mut EngineArgs, page: usize) -> Result<()>;

    /// A file the engine can read directly, converting into `scratch` if
    /// needed.
    fn engine_input(&mut self, scratch: &Path) -> Result<PathBuf>;

    /// Release any engine-side renderer.
    fn ensure_no_open_renderer(&mut self);
}

/// One opened input file.
pub struct Document {
    path: PathBuf,
    doc_type: DocumentType,
    page_count: usize,
    backend: Option<Box<dyn DocumentBackend>>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("path", &self.path)
            .field("doc_type", &self.doc_type)
            .field("page_count", &self.page_count)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Document {
    /// Open `path` if its type is in `allowed`.
    pub fn open(path: &Path, allowed: DocumentTypes) -> Result<Self> {
        let path = std::fs::canonicalize(path).map_err(|e| ConversionError::io(path, e))?;
        let doc_type = Self::sniff(&path, allowed)?;
        if !allowed.contains(doc_type) {
            return Err(ConversionError::DataFormat {
                path,
                message: format!("{} documents are not accepted", doc_type),
                allowed: allowed.to_string(),
            });
        }

        let backend: Box<dyn DocumentBackend> = match doc_type {
            DocumentType::Pdf => Box::new(PdfDocument::open(&path)?),
            DocumentType::PostScript | DocumentType::Eps => {
                Box::new(PostScriptDocument::new(&path, doc_type))
            }
            DocumentType::Image => Box::new(ImageDocument::open(&path)?),
        };

        let page_count = backend.page_count()?;
        if page_count < 1 {
            return Err(ConversionError::DataFormat {
                path,
                message: "document has no pages".to_string(),
                allowed: allowed.to_string(),
            });
        }

        debug!("Opened {:?} as {} with {} pages", path, doc_type, page_count);
        Ok(Self {
            path,
            doc_type,
            page_count,
            backend: Some(backend),
        })
    }

    /// Identify a file from its first bytes.
    pub fn sniff(path: &Path, allowed: DocumentTypes) -> Result<DocumentType> {
        let mut file = std::fs::File::open(path).map_err(|e| ConversionError::io(path, e))?;
        let mut header = Vec::with_capacity(SNIFF_LEN);
        file.by_ref()
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut header)
            .map_err(|e| ConversionError::io(path, e))?;

        sniff_bytes(&header).ok_or_else(|| ConversionError::DataFormat {
            path: path.to_path_buf(),
            message: "unrecognized file format".to_string(),
            allowed: allowed.to_string(),
        })
    }

    /// Canonical path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn doc_type(&self) -> DocumentType {
        self.doc_type
    }

    pub fn page_count(&self) -> Result<usize> {
        self.backend()?;
        Ok(self.page_count)
    }

    pub fn is_disposed(&self) -> bool {
        self.backend.is_none()
    }

    fn backend(&self) -> Result<&dyn DocumentBackend> {
        self.backend
            .as_deref()
            .ok_or_else(|| ConversionError::UseAfterFree(self.path.clone()))
    }

    fn backend_mut(&mut self) -> Result<&mut (dyn DocumentBackend + 'static)> {
        match self.backend.as_deref_mut() {
            Some(backend) => Ok(backend),
            None => Err(ConversionError::UseAfterFree(self.path.clone())),
        }
    }

    pub fn convert_to_pdf(&mut self, output: &Path) -> Result<()> {
        self.backend_mut()?.convert_to_pdf(output)
    }

    pub fn render_page(
        &mut self,
        engine: &EngineService,
        page: usize,
        options: &RenderOptions,
        cancel: &dyn Fn() -> bool,
        progressive: Option<ProgressiveCallback<'_>>,
    ) -> Result<RenderedFrame> {
        self.backend()?;
        if page == 0 || page > self.page_count {
            return Err(ConversionError::DataFormat {
                path: self.path.clone(),
                message: format!("page {} is out of range 1..={}", page, self.page_count),
                allowed: DocumentTypes::default().with(self.doc_type).to_string(),
            });
        }
        self.backend_mut()?
            .render_page(engine, page, options, cancel, progressive)
    }

    pub fn engine_input(&mut self, scratch: &Path) -> Result<PathBuf> {
        self.backend_mut()?.engine_input(scratch)
    }

    pub fn ensure_no_open_renderer(&mut self) {
        if let Some(backend) = self.backend.as_deref_mut() {
            backend.ensure_no_open_renderer();
        }
    }

    /// Release all resources. Later operations fail with `UseAfterFree`.
    pub fn dispose(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.ensure_no_open_renderer();
            debug!("Disposed {:?}", self.path);
        }
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn eps_header() -> Option<&'static Regex> {
    static EPS: OnceLock<Option<Regex>> = OnceLock::new();
    EPS.get_or_init(|| Regex::new(r"^%!PS-Adobe-\d+\.\d+(\s+EPSF-\d+\.\d+)?").ok())
        .as_ref()
}

fn sniff_bytes(header: &[u8]) -> Option<DocumentType> {
    if header.starts_with(b"%PDF-") {
        return Some(DocumentType::Pdf);
    }
    if header.starts_with(b"%!") {
        let end = header
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
            .unwrap_or(header.len());
        let first_line = String::from_utf8_lossy(&header[..end]);
        let is_eps = eps_header()
            .and_then(|re| re.captures(&first_line))
            .is_some_and(|caps| caps.get(1).is_some());
        return Some(if is_eps {
            DocumentType::Eps
        } else {
            DocumentType::PostScript
        });
    }
    ::image::guess_format(header)
        .ok()
        .map(|_| DocumentType::Image)
}
