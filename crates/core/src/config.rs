//! Configuration types for docbatch conversion jobs.

use crate::document::{DocumentType, DocumentTypes};
use crate::error::{ConversionError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the rendering engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the Ghostscript executable. If None, searches common
    /// locations and PATH.
    pub executable: Option<PathBuf>,

    /// How often the engine's poll hook is called while a child runs.
    /// Default: 50 ms.
    pub poll_interval: Duration,

    /// Extra arguments inserted after the standard batch flags of every
    /// invocation.
    pub extra_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable: None,
            poll_interval: Duration::from_millis(50),
            extra_args: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Set the Ghostscript executable path.
    pub fn executable(mut self, path: PathBuf) -> Self {
        self.executable = Some(path);
        self
    }

    /// Set the poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(ConversionError::InvalidConfig(
                "poll_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for page rasterization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Output DPI (dots per inch).
    /// Default: 150.
    pub dpi: u32,

    /// Number of threads for parallel PNG encoding of rendered frames.
    /// Default: number of CPU cores.
    pub render_threads: usize,

    /// Anti-aliasing bits for text (1, 2 or 4).
    /// Default: 4.
    pub text_alpha_bits: u8,

    /// Anti-aliasing bits for graphics (1, 2 or 4).
    /// Default: 4.
    pub graphics_alpha_bits: u8,

    /// Whether to keep the alpha channel of rendered frames.
    /// Default: false.
    pub use_alpha: bool,

    /// Background color used to flatten transparent pixels.
    /// Default: white (255, 255, 255).
    pub background_color: (u8, u8, u8),
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            render_threads: num_cpus::get(),
            text_alpha_bits: 4,
            graphics_alpha_bits: 4,
            use_alpha: false,
            background_color: (255, 255, 255),
        }
    }
}

impl RenderConfig {
    /// Create a render config with specified DPI.
    pub fn with_dpi(dpi: u32) -> Self {
        Self {
            dpi,
            ..Default::default()
        }
    }

    /// Set the number of render threads.
    pub fn render_threads(mut self, threads: usize) -> Self {
        self.render_threads = threads;
        self
    }

    /// Set both anti-aliasing levels.
    pub fn anti_alias(mut self, bits: u8) -> Self {
        self.text_alpha_bits = bits;
        self.graphics_alpha_bits = bits;
        self
    }

    /// Enable alpha channel.
    pub fn use_alpha(mut self, enabled: bool) -> Self {
        self.use_alpha = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.dpi == 0 || self.dpi > 1200 {
            return Err(ConversionError::InvalidConfig(
                "dpi must be between 1 and 1200".to_string(),
            ));
        }
        if self.render_threads == 0 {
            return Err(ConversionError::InvalidConfig(
                "render_threads must be at least 1".to_string(),
            ));
        }
        for bits in [self.text_alpha_bits, self.graphics_alpha_bits] {
            if !matches!(bits, 1 | 2 | 4) {
                return Err(ConversionError::InvalidConfig(format!(
                    "anti-alias bits must be 1, 2 or 4, got {}",
                    bits
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for one batch job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Directory receiving converted output.
    pub output_dir: PathBuf,

    /// Document types the enumerator accepts.
    /// Default: PDF and images.
    pub allowed_types: Vec<DocumentType>,

    /// How often a waiting consumer re-checks the abort flag.
    /// Default: 50 ms.
    pub queue_poll_interval: Duration,

    /// How often a producer waiting for an operator decision re-checks the
    /// abort flag.
    /// Default: 100 ms.
    pub decision_poll_interval: Duration,

    /// Directory for intermediate files. Default: system temp directory.
    pub scratch_dir: Option<PathBuf>,

    /// Enumerate every input before converting the first one, so the
    /// percentage is based on the final page total from the start.
    /// Default: false.
    #[serde(default)]
    pub count_first: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            allowed_types: vec![DocumentType::Pdf, DocumentType::Image],
            queue_poll_interval: Duration::from_millis(50),
            decision_poll_interval: Duration::from_millis(100),
            scratch_dir: None,
            count_first: false,
        }
    }
}

impl JobConfig {
    /// Create a job config writing into `output_dir`.
    pub fn with_output_dir(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    /// Restrict the accepted document types.
    pub fn allowed_types(mut self, types: Vec<DocumentType>) -> Self {
        self.allowed_types = types;
        self
    }

    /// Set the scratch directory.
    pub fn scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = Some(dir);
        self
    }

    /// Finish enumeration before converting.
    pub fn count_first(mut self, enabled: bool) -> Self {
        self.count_first = enabled;
        self
    }

    /// The accepted types as a mask.
    pub fn type_mask(&self) -> DocumentTypes {
        DocumentTypes::from_iter(self.allowed_types.iter().copied())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.allowed_types.is_empty() {
            return Err(ConversionError::InvalidConfig(
                "allowed_types must name at least one document type".to_string(),
            ));
        }
        if self.queue_poll_interval.is_zero() || self.decision_poll_interval.is_zero() {
            return Err(ConversionError::InvalidConfig(
                "poll intervals must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Combined configuration for the converter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Render configuration.
    #[serde(default)]
    pub render: RenderConfig,

    /// Job configuration.
    #[serde(default)]
    pub job: JobConfig,
}

impl ConverterConfig {
    /// Create a new converter config writing into `output_dir` at `dpi`.
    pub fn new(output_dir: impl Into<PathBuf>, dpi: u32) -> Self {
        Self {
            engine: EngineConfig::default(),
            render: RenderConfig::with_dpi(dpi),
            job: JobConfig::with_output_dir(output_dir),
        }
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ConversionError::io(path, e))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            ConversionError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ConversionError::InvalidConfig(e.to_string()))
    }

    /// Validate the entire configuration.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.render.validate()?;
        self.job.validate()?;
        Ok(())
    }
}
