//! Output formats.
//!
//! A [`FormatDescriptor`] decides the engine device and its flags, and names
//! the files a conversion writes.

use crate::config::RenderConfig;
use crate::engine::EngineArgs;
use crate::error::{ConversionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Result of a format's preflight step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preflight {
    Continue,
    /// End the job before enumeration starts.
    Cancel,
}

/// Describes one output format.
pub trait FormatDescriptor: Send + Sync {
    /// Short name, e.g. `png`.
    fn name(&self) -> &str;

    /// File extension without the dot.
    fn extension(&self) -> &str;

    /// Whether every page goes to its own file.
    fn one_file_per_page(&self) -> bool {
        true
    }

    /// Add the device and format flags.
    fn build_args(&self, args: &mut EngineArgs, render: &RenderConfig);

    /// Runs once before the job starts.
    fn preflight(&self, _files: &[PathBuf]) -> Preflight {
        Preflight::Continue
    }

    /// Point the engine at the output for `stem`. Multi-file formats use a
    /// `%03d` page pattern.
    fn set_output(&self, args: &mut EngineArgs, output_dir: &Path, stem: &str) {
        if self.one_file_per_page() {
            args.output_page_pattern(output_dir, stem, self.extension());
        } else {
            args.output_file(&output_dir.join(format!("{}.{}", stem, self.extension())));
        }
    }

    /// The files a successful conversion of `pages` pages produces.
    fn output_files(&self, output_dir: &Path, stem: &str, pages: usize) -> Vec<PathBuf> {
        if self.one_file_per_page() {
            (1..=pages)
                .map(|page| output_dir.join(format!("{}-{:03}.{}", stem, page, self.extension())))
                .collect()
        } else {
            vec![output_dir.join(format!("{}.{}", stem, self.extension()))]
        }
    }
}

/// Output file stems of one job.
///
/// Inputs sharing a file stem (`a/doc.png`, `b/doc.png`) would write the same
/// files; later ones get a `-2`, `-3`, ... suffix. A stem stays assigned to its
/// queue index, so a retried item writes to the same place.
#[derive(Debug, Default)]
pub struct OutputNames {
    claimed: HashSet<String>,
    assigned: HashMap<usize, String>,
}

impl OutputNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stem for the input at queue position `index`.
    pub fn stem_for(&mut self, index: usize, input: &Path) -> String {
        if let Some(stem) = self.assigned.get(&index) {
            return stem.clone();
        }
        let base = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let mut stem = base.clone();
        let mut n = 2;
        while !self.claimed.insert(stem.clone()) {
            stem = format!("{}-{}", base, n);
            n += 1;
        }
        if stem != base {
            debug!("Output name {:?} already used in this job, writing {:?}", base, stem);
        }
        self.assigned.insert(index, stem.clone());
        stem
    }
}

/// PDF output through the `pdfwrite` device.
#[derive(Debug, Clone)]
pub struct PdfFormat {
    pub compatibility_level: String,
}

impl Default for PdfFormat {
    fn default() -> Self {
        Self {
            compatibility_level: "1.7".to_string(),
        }
    }
}

impl FormatDescriptor for PdfFormat {
    fn name(&self) -> &str {
        "pdf"
    }

    fn extension(&self) -> &str {
        "pdf"
    }

    fn one_file_per_page(&self) -> bool {
        false
    }

    fn build_args(&self, args: &mut EngineArgs, _render: &RenderConfig) {
        args.device("pdfwrite")
            .flag(format!("-dCompatibilityLevel={}", self.compatibility_level));
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PngColor {
    #[default]
    Rgb,
    Gray,
    /// RGB with transparency.
    Alpha,
}

#[derive(Debug, Clone, Default)]
pub struct PngFormat {
    pub color: PngColor,
}

impl FormatDescriptor for PngFormat {
    fn name(&self) -> &str {
        "png"
    }

    fn extension(&self) -> &str {
        "png"
    }

    fn build_args(&self, args: &mut EngineArgs, render: &RenderConfig) {
        let device = match self.color {
            PngColor::Rgb => "png16m",
            PngColor::Gray => "pnggray",
            PngColor::Alpha => "pngalpha",
        };
        args.device(device)
            .resolution(render.dpi)
            .anti_alias(render.text_alpha_bits, render.graphics_alpha_bits);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TiffCompression {
    /// Bilevel CCITT Group 4, for scans of text.
    Group4,
    /// Uncompressed 24-bit color.
    #[default]
    None,
    Lzw,
}

#[derive(Debug, Clone, Default)]
pub struct TiffFormat {
    pub compression: TiffCompression,
}

impl FormatDescriptor for TiffFormat {
    fn name(&self) -> &str {
        "tiff"
    }

    fn extension(&self) -> &str {
        "tif"
    }

    fn build_args(&self, args: &mut EngineArgs, render: &RenderConfig) {
        let device = match self.compression {
            TiffCompression::Group4 => "tiffg4",
            TiffCompression::None => "tiff24nc",
            TiffCompression::Lzw => "tifflzw",
        };
        args.device(device).resolution(render.dpi);
        if self.compression != TiffCompression::Group4 {
            args.anti_alias(render.text_alpha_bits, render.graphics_alpha_bits);
        }
    }
}

#[derive(Debug, Clone)]
pub struct JpegFormat {
    /// 0..=100.
    pub quality: u8,
}

impl Default for JpegFormat {
    fn default() -> Self {
        Self { quality: 85 }
    }
}

impl FormatDescriptor for JpegFormat {
    fn name(&self) -> &str {
        "jpeg"
    }

    fn extension(&self) -> &str {
        "jpg"
    }

    fn build_args(&self, args: &mut EngineArgs, render: &RenderConfig) {
        args.device("jpeg")
            .flag(format!("-dJPEGQ={}", self.quality.min(100)))
            .resolution(render.dpi)
            .anti_alias(render.text_alpha_bits, render.graphics_alpha_bits);
    }
}

/// Look up a built-in format by name.
pub fn from_name(name: &str) -> Result<Box<dyn FormatDescriptor>> {
    match name.to_ascii_lowercase().as_str() {
        "pdf" => Ok(Box::new(PdfFormat::default())),
        "png" => Ok(Box::new(PngFormat::default())),
        "png-gray" => Ok(Box::new(PngFormat {
            color: PngColor::Gray,
        })),
        "png-alpha" => Ok(Box::new(PngFormat {
            color: PngColor::Alpha,
        })),
        "tiff" | "tif" => Ok(Box::new(TiffFormat::default())),
        "tiff-g4" => Ok(Box::new(TiffFormat {
            compression: TiffCompression::Group4,
        })),
        "tiff-lzw" => Ok(Box::new(TiffFormat {
            compression: TiffCompression::Lzw,
        })),
        "jpeg" | "jpg" => Ok(Box::new(JpegFormat::default())),
        other => Err(ConversionError::InvalidConfig(format!(
            "unknown output format '{}'",
            other
        ))),
    }
}
