//! Core data structures shared by the resolver, orchestrator, and CLI.
//!
//! Documents are read from the live editor, options are decided once at the
//! API boundary, and plan entries are derived fresh for every export call.

pub mod document;
pub mod options;
pub mod plan;

pub use document::{DEFAULT_FRAME_NAME, Document, Frame, PAGE_ID_PREFIX, Page, SHAPE_ID_PREFIX};
pub use options::{
    ExportFormat, ExportOptions, OptionsError, OutputMode, PageToken, Selection, UnknownFormat,
};
pub use plan::DownloadPlanEntry;
