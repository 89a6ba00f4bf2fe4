//! Engine argument vectors.

use std::path::Path;

/// Program-name token placed at `argv[0]`.
pub const PROGRAM_NAME: &str = "docbatch";

/// Flags present on every invocation: run non-interactively and never wait
/// for the operator.
pub const BATCH_FLAGS: &[&str] = &["-dBATCH", "-dNOPAUSE", "-dNOPROMPT", "-dSAFER"];

/// Builder for an engine argument vector.
///
/// The built vector is ordered as program token, batch flags, device,
/// format-specific flags, output designator, then input operands (files and
/// PostScript snippets).
#[derive(Debug, Clone)]
pub struct EngineArgs {
    device: Option<String>,
    flags: Vec<String>,
    output: Option<String>,
    operands: Vec<String>,
}

impl Default for EngineArgs {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineArgs {
    pub fn new() -> Self {
        Self {
            device: None,
            flags: Vec::new(),
            output: None,
            operands: Vec::new(),
        }
    }

    /// Select the output device.
    pub fn device(&mut self, name: impl Into<String>) -> &mut Self {
        self.device = Some(name.into());
        self
    }

    /// Append a format-specific flag.
    pub fn flag(&mut self, flag: impl Into<String>) -> &mut Self {
        self.flags.push(flag.into());
        self
    }

    /// Append several format-specific flags.
    pub fn flags<I, S>(&mut self, flags: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }

    pub fn resolution(&mut self, dpi: u32) -> &mut Self {
        self.flag(format!("-r{}", dpi))
    }

    /// Text and graphics anti-aliasing levels.
    pub fn anti_alias(&mut self, text_bits: u8, graphics_bits: u8) -> &mut Self {
        self.flag(format!("-dTextAlphaBits={}", text_bits))
            .flag(format!("-dGraphicsAlphaBits={}", graphics_bits))
    }

    /// Set the output-file designator to a single literal file.
    pub fn output_file(&mut self, path: &Path) -> &mut Self {
        self.output = Some(escape_output_path(&path.display().to_string()));
        self
    }

    /// Set the output-file designator to `<dir>/<stem>-%03d.<extension>`,
    /// one file per page.
    pub fn output_page_pattern(&mut self, dir: &Path, stem: &str, extension: &str) -> &mut Self {
        let prefix = escape_output_path(&dir.join(stem).display().to_string());
        self.output = Some(format!("{}-%03d.{}", prefix, extension));
        self
    }

    /// Append an input file operand.
    pub fn input_file(&mut self, path: &Path) -> &mut Self {
        self.operands.push("-f".to_string());
        self.operands.push(path.display().to_string());
        self
    }

    /// Append PostScript code run through the scripting surface.
    pub fn postscript(&mut self, code: impl Into<String>) -> &mut Self {
        self.operands.push("-c".to_string());
        self.operands.push(code.into());
        self
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// The final argument vector.
    pub fn build(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(
            1 + BATCH_FLAGS.len() + 2 + self.flags.len() + self.operands.len(),
        );
        args.push(PROGRAM_NAME.to_string());
        args.extend(BATCH_FLAGS.iter().map(|f| f.to_string()));
        if let Some(device) = &self.device {
            args.push(format!("-sDEVICE={}", device));
        }
        args.extend(self.flags.iter().cloned());
        if let Some(output) = &self.output {
            args.push(format!("-sOutputFile={}", output));
        }
        args.extend(self.operands.iter().cloned());
        args
    }
}

/// Escape `%` so the engine does not read it as a page-number directive.
pub fn escape_output_path(text: &str) -> String {
    text.replace('%', "%%")
}

/// Escape text for embedding inside a PostScript string literal `( … )`.
pub fn escape_postscript_string(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '(' => escaped.push_str("\\("),
            ')' => escaped.push_str("\\)"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Parse the engine's `Page N` progress marker.
pub fn parse_page_marker(line: &str) -> Option<usize> {
    let rest = line.trim().strip_prefix("Page ")?;
    rest.trim().parse().ok()
}
