use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output formats the editor can produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Svg,
    Png,
    Jpeg,
    Webp,
    /// Snapshot of the selected shapes as structured JSON.
    Json,
    /// Native re-serialization of the whole sketch file.
    Tldr,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 6] = [
        ExportFormat::Svg,
        ExportFormat::Png,
        ExportFormat::Jpeg,
        ExportFormat::Webp,
        ExportFormat::Json,
        ExportFormat::Tldr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Svg => "svg",
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpeg",
            ExportFormat::Webp => "webp",
            ExportFormat::Json => "json",
            ExportFormat::Tldr => "tldr",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }

    /// Binary formats are base64 encoded in print mode.
    pub fn is_raster(self) -> bool {
        matches!(
            self,
            ExportFormat::Png | ExportFormat::Jpeg | ExportFormat::Webp
        )
    }

    pub fn is_vector(self) -> bool {
        self == ExportFormat::Svg
    }

    /// Whether the format serializes the whole document instead of a selection.
    pub fn is_document(self) -> bool {
        self == ExportFormat::Tldr
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported export format '{0}'; expected one of svg, png, jpeg, webp, json, tldr")]
pub struct UnknownFormat(pub String);

impl FromStr for ExportFormat {
    type Err = UnknownFormat;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        let normalized = normalized.trim_start_matches('.');
        ExportFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == normalized)
            .or_else(|| (normalized == "jpg").then_some(ExportFormat::Jpeg))
            .ok_or_else(|| UnknownFormat(value.to_string()))
    }
}

/// Which pages or frames a caller asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection<T> {
    /// Nothing requested: first page only, whole-page export.
    #[default]
    Default,
    /// Everything.
    All,
    /// Only targets matching one of the tokens.
    Tokens(Vec<T>),
}

impl<T> Selection<T> {
    /// An empty token list means "everything".
    pub fn from_tokens(tokens: Vec<T>) -> Self {
        if tokens.is_empty() {
            Selection::All
        } else {
            Selection::Tokens(tokens)
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Selection::Default)
    }
}

/// A page reference: a name or id, or a zero-based position in the page list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PageToken {
    Name(String),
    Index(usize),
}

impl From<&str> for PageToken {
    fn from(value: &str) -> Self {
        match value.trim().parse::<usize>() {
            Ok(index) => PageToken::Index(index),
            Err(_) => PageToken::Name(value.to_string()),
        }
    }
}

impl From<String> for PageToken {
    fn from(value: String) -> Self {
        PageToken::from(value.as_str())
    }
}

impl From<usize> for PageToken {
    fn from(value: usize) -> Self {
        PageToken::Index(value)
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageToken::Name(name) => f.write_str(name),
            PageToken::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Immutable per-call export configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// Destination directory; defaults to the working directory.
    pub output: Option<PathBuf>,
    /// Return content instead of writing files.
    pub print: bool,
    /// Base name override for written files.
    pub name: Option<String>,
    pub dark: bool,
    pub transparent: bool,
    pub padding: Option<f64>,
    pub scale: Option<f64>,
    /// Remove `<style>` elements from SVG output.
    pub strip_style: bool,
    pub pages: Selection<PageToken>,
    pub frames: Selection<String>,
}

impl ExportOptions {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }

    /// Check option combinations and decide where artifacts go.
    pub fn output_mode(&self) -> Result<OutputMode, OptionsError> {
        if let Some(padding) = self.padding {
            if !padding.is_finite() || padding < 0.0 {
                return Err(OptionsError::InvalidPadding(padding));
            }
        }
        if let Some(scale) = self.scale {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(OptionsError::InvalidScale(scale));
            }
        }

        match (self.print, &self.output) {
            (true, Some(_)) => Err(OptionsError::PrintWithOutput),
            (true, None) => Ok(OutputMode::Print),
            (false, Some(dir)) => Ok(OutputMode::Directory(dir.clone())),
            (false, None) => Ok(OutputMode::Directory(PathBuf::from("./"))),
        }
    }
}

/// Where finished artifacts end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    Directory(PathBuf),
    Print,
}

#[derive(Debug, Error, PartialEq)]
pub enum OptionsError {
    #[error("cannot use --output with --print")]
    PrintWithOutput,
    #[error("padding must be a non-negative number, got {0}")]
    InvalidPadding(f64),
    #[error("scale must be a positive number, got {0}")]
    InvalidScale(f64),
}
