//! Export tldraw sketches through a headless browser.
//!
//! A sketch (a local `.tldr` file or a tldraw.com URL) is opened in the
//! editor inside a private browser session. The orchestrator reads the
//! document's page and frame structure, resolves the requested targets into a
//! download plan, and drives the editor's own exporters for each entry,
//! writing files or returning single-line content in print mode.

pub mod asset_host;
pub mod batch;
pub mod bridge;
pub mod channel;
pub mod chromium;
pub mod config;
pub mod exporter;
pub mod logging;
pub mod naming;
pub mod postprocess;
pub mod resolver;
pub mod session;
pub mod types;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{BatchFailure, BatchReport, export_batch};
pub use channel::{AutomationChannel, ChannelError, ChannelLauncher};
pub use chromium::{ChromiumChannel, ChromiumLauncher};
pub use config::{ExportConfig, Verbosity};
pub use exporter::{ExportArtifact, ExportError, ExportOrchestrator, FailurePolicy};
pub use logging::ExportLogger;
pub use session::{ExportSession, SessionError};
pub use types::{ExportFormat, ExportOptions, PageToken, Selection};
