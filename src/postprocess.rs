//! Per-format artifact post-processing.
//!
//! Vector output can have its `<style>` elements removed, and print mode
//! turns raw artifact bytes into a single line of text per target.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::{Reader, Writer, events::Event};
use thiserror::Error;

use crate::types::{ExportFormat, ExportOptions};

#[derive(Debug, Error)]
pub enum PostProcessError {
    #[error("failed to parse svg at position {position}: {source}")]
    Parse {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },
    #[error("failed to re-serialize svg: {0}")]
    Write(String),
    #[error("{format} output is not valid UTF-8 text")]
    NotText {
        format: ExportFormat,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

/// Apply format-specific transformations to a freshly downloaded artifact.
///
/// Style stripping only applies to vector output; for every other format it
/// leaves the bytes untouched (the caller reports the ignored flag).
pub fn post_process(
    raw: Vec<u8>,
    format: ExportFormat,
    options: &ExportOptions,
) -> Result<Vec<u8>, PostProcessError> {
    if options.strip_style && format.is_vector() {
        let text = String::from_utf8(raw).map_err(|source| PostProcessError::NotText {
            format,
            source,
        })?;
        return strip_style_elements(&text).map(String::into_bytes);
    }
    Ok(raw)
}

/// Remove every `<style>` element (and its contents) from an SVG document.
pub fn strip_style_elements(svg: &str) -> Result<String, PostProcessError> {
    let mut reader = Reader::from_str(svg);
    let mut writer = Writer::new(Cursor::new(Vec::with_capacity(svg.len())));
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Start(elem)) if elem.local_name().as_ref() == b"style" => depth += 1,
            Ok(Event::Start(_)) if depth > 0 => depth += 1,
            Ok(Event::End(_)) if depth > 0 => depth -= 1,
            Ok(Event::Empty(elem)) if elem.local_name().as_ref() == b"style" => {}
            Ok(_) if depth > 0 => {}
            Ok(event) => writer
                .write_event(event)
                .map_err(|err| PostProcessError::Write(err.to_string()))?,
            Err(source) => {
                return Err(PostProcessError::Parse {
                    position: reader.error_position(),
                    source,
                });
            }
        }
    }

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|source| PostProcessError::NotText {
        format: ExportFormat::Svg,
        source,
    })
}

/// Turn artifact bytes into the single-line form returned in print mode.
///
/// Raster formats are base64 encoded; everything else is text with its
/// newlines removed.
pub fn printable(bytes: Vec<u8>, format: ExportFormat) -> Result<String, PostProcessError> {
    if format.is_raster() {
        return Ok(STANDARD.encode(bytes));
    }
    let text =
        String::from_utf8(bytes).map_err(|source| PostProcessError::NotText { format, source })?;
    Ok(text.replace(['\r', '\n'], ""))
}
