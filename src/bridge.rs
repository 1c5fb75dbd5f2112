//! In-page bridge between the orchestrator and the editor.
//!
//! The bridge script lives in `scripts/editor_bridge.js` and is embedded at
//! compile time. It installs `window.__tldrawExport`, whose methods are the
//! only editor surface the orchestrator depends on. [`BridgeCall`] renders
//! each request as a JavaScript expression with JSON-quoted arguments.

use serde_json::{Value as JsonValue, json};

use crate::types::ExportFormat;

/// Embedded contents of `scripts/editor_bridge.js`.
pub const EDITOR_BRIDGE_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/editor_bridge.js"
));

/// Truthy once the editor has mounted and exposed itself on `window`.
pub const EDITOR_READY: &str = "typeof window.editor !== 'undefined'";

/// Truthy once the bridge has been installed.
pub const BRIDGE_READY: &str = "typeof window.__tldrawExport !== 'undefined'";

/// Render parameters for image-style exports.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub format: ExportFormat,
    /// Inverse of the transparency flag.
    pub background: bool,
    pub dark_mode: bool,
    pub padding: Option<f64>,
    pub scale: Option<f64>,
}

impl ImageRequest {
    fn to_json(&self) -> JsonValue {
        json!({
            "format": self.format.as_str(),
            "background": self.background,
            "darkMode": self.dark_mode,
            "padding": self.padding,
            "scale": self.scale,
        })
    }
}

/// One request against `window.__tldrawExport`.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCall<'a> {
    Structure,
    CurrentPage,
    SetCurrentPage(&'a str),
    SelectAll,
    SelectFrame(&'a str),
    DownloadImage(&'a ImageRequest),
    DownloadDocument,
}

impl BridgeCall<'_> {
    pub fn method(&self) -> &'static str {
        match self {
            BridgeCall::Structure => "structure",
            BridgeCall::CurrentPage => "currentPage",
            BridgeCall::SetCurrentPage(_) => "setCurrentPage",
            BridgeCall::SelectAll => "selectAll",
            BridgeCall::SelectFrame(_) => "selectFrame",
            BridgeCall::DownloadImage(_) => "downloadImage",
            BridgeCall::DownloadDocument => "downloadDocument",
        }
    }

    pub fn expression(&self) -> String {
        let argument = match self {
            BridgeCall::SetCurrentPage(id) | BridgeCall::SelectFrame(id) => {
                JsonValue::String((*id).to_string()).to_string()
            }
            BridgeCall::DownloadImage(request) => request.to_json().to_string(),
            _ => String::new(),
        };
        format!("window.__tldrawExport.{}({argument})", self.method())
    }
}
