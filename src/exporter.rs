//! Export orchestrator.
//!
//! Owns one [`AutomationChannel`] for the lifetime of an export run. After
//! [`ExportOrchestrator::start`] has loaded the editor and installed the
//! bridge, [`ExportOrchestrator::export`] reads the document structure,
//! resolves a download plan and executes it entry by entry. Entries run
//! strictly one after another because they share the editor's selection.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;

use crate::bridge::{BRIDGE_READY, BridgeCall, EDITOR_BRIDGE_SCRIPT, EDITOR_READY, ImageRequest};
use crate::channel::{AutomationChannel, ChannelError};
use crate::logging::ExportLogger;
use crate::naming::{natural_cmp, resolve_output_path};
use crate::postprocess::{PostProcessError, post_process, printable};
use crate::resolver::resolve_plan;
use crate::types::{Document, DownloadPlanEntry, ExportFormat, ExportOptions, OutputMode};

const CATEGORY: &str = "export";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export orchestrator has not been started")]
    NotStarted,
    #[error("export orchestrator was already started")]
    AlreadyStarted,
    #[error("export orchestrator is closed")]
    Closed,
    #[error("Sketch is empty")]
    EmptyDocument,
    #[error("unexpected document structure from editor: {0}")]
    Structure(#[source] serde_json::Error),
    #[error("editor returned {0} where a page id was expected")]
    UnexpectedValue(serde_json::Value),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    PostProcess(#[from] PostProcessError),
    #[error("failed to read downloaded artifact {path}: {source}")]
    ReadArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    WriteArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Lifecycle of one orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Started,
    Ready,
    Closed,
}

/// Steps each plan entry walks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStage {
    Selecting,
    Requesting,
    AwaitingCompletion,
    PostProcessing,
}

impl EntryStage {
    fn label(self) -> &'static str {
        match self {
            EntryStage::Selecting => "selecting",
            EntryStage::Requesting => "requesting",
            EntryStage::AwaitingCompletion => "awaiting completion",
            EntryStage::PostProcessing => "post-processing",
        }
    }
}

/// What to do when one plan entry fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the run with the entry's error.
    #[default]
    FailFast,
    /// Record the failure and continue with the remaining entries.
    Collect,
}

/// Where and under which name artifacts are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTarget {
    pub mode: OutputMode,
    /// File name stem shared by every artifact of the run.
    pub base_name: String,
}

impl ExportTarget {
    pub fn new(mode: OutputMode, base_name: impl Into<String>) -> Self {
        Self {
            mode,
            base_name: base_name.into(),
        }
    }
}

/// One delivered artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportArtifact {
    /// Absolute path of a written file.
    File(PathBuf),
    /// Single-line content returned in print mode.
    Printed(String),
}

impl ExportArtifact {
    fn sort_key(&self) -> Cow<'_, str> {
        match self {
            ExportArtifact::File(path) => path.to_string_lossy(),
            ExportArtifact::Printed(content) => Cow::Borrowed(content),
        }
    }
}

impl fmt::Display for ExportArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportArtifact::File(path) => write!(f, "{}", path.display()),
            ExportArtifact::Printed(content) => f.write_str(content),
        }
    }
}

/// A plan entry that did not produce an artifact.
#[derive(Debug)]
pub struct EntryFailure {
    /// `None` for whole-document exports, which have no plan entry.
    pub entry: Option<DownloadPlanEntry>,
    pub error: ExportError,
}

/// Result of one export run.
#[derive(Debug, Default)]
pub struct ExportReport {
    /// Delivered artifacts in natural order.
    pub artifacts: Vec<ExportArtifact>,
    pub failures: Vec<EntryFailure>,
}

impl ExportReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct ExportOrchestrator<C: AutomationChannel> {
    channel: C,
    logger: Arc<ExportLogger>,
    state: OrchestratorState,
}

impl<C: AutomationChannel> fmt::Debug for ExportOrchestrator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportOrchestrator")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<C: AutomationChannel> ExportOrchestrator<C> {
    pub fn new(channel: C, logger: Arc<ExportLogger>) -> Self {
        Self {
            channel,
            logger,
            state: OrchestratorState::Idle,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Load the editor at `href` and install the bridge.
    pub async fn start(&mut self, href: &str) -> Result<(), ExportError> {
        match self.state {
            OrchestratorState::Idle => {}
            OrchestratorState::Closed => return Err(ExportError::Closed),
            _ => return Err(ExportError::AlreadyStarted),
        }

        self.logger
            .info(format!("Opening editor at {href}"), Some(CATEGORY));
        self.channel.navigate(href).await?;
        self.channel.wait_for_function(EDITOR_READY).await?;
        self.channel.evaluate(EDITOR_BRIDGE_SCRIPT).await?;
        self.channel.wait_for_function(BRIDGE_READY).await?;
        self.state = OrchestratorState::Started;
        Ok(())
    }

    /// Export the loaded sketch according to `options`.
    pub async fn export(
        &mut self,
        options: &ExportOptions,
        target: &ExportTarget,
        policy: FailurePolicy,
    ) -> Result<ExportReport, ExportError> {
        match self.state {
            OrchestratorState::Started | OrchestratorState::Ready => {}
            OrchestratorState::Idle => return Err(ExportError::NotStarted),
            OrchestratorState::Closed => return Err(ExportError::Closed),
        }

        let document = self.document().await?;
        if document.is_empty() && options.format != ExportFormat::Tldr {
            return Err(ExportError::EmptyDocument);
        }
        self.state = OrchestratorState::Ready;

        if options.strip_style && !options.format.is_vector() {
            self.logger.warn(
                "--strip-style is only supported for SVG output",
                Some(CATEGORY),
            );
        }

        let mut report = if options.format.is_document() {
            self.export_document(options, target, policy).await?
        } else {
            self.export_plan(&document, options, target, policy).await?
        };

        report
            .artifacts
            .sort_by(|left, right| natural_cmp(&left.sort_key(), &right.sort_key()));
        Ok(report)
    }

    /// Close the underlying channel. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), ExportError> {
        if self.state == OrchestratorState::Closed {
            return Ok(());
        }
        self.state = OrchestratorState::Closed;
        self.channel.close().await?;
        Ok(())
    }

    async fn document(&self) -> Result<Document, ExportError> {
        let value = self
            .channel
            .evaluate(&BridgeCall::Structure.expression())
            .await?;
        let document: Document = serde_json::from_value(value).map_err(ExportError::Structure)?;
        self.logger.debug(
            format!(
                "Sketch has {} page(s) and {} shape(s)",
                document.pages.len(),
                document.shape_count
            ),
            Some(CATEGORY),
            None,
        );
        Ok(document)
    }

    async fn current_page(&self) -> Result<String, ExportError> {
        match self
            .channel
            .evaluate(&BridgeCall::CurrentPage.expression())
            .await?
        {
            serde_json::Value::String(id) => Ok(id),
            other => Err(ExportError::UnexpectedValue(other)),
        }
    }

    async fn export_plan(
        &self,
        document: &Document,
        options: &ExportOptions,
        target: &ExportTarget,
        policy: FailurePolicy,
    ) -> Result<ExportReport, ExportError> {
        let plan = resolve_plan(document, &options.pages, &options.frames);
        for warning in &plan.warnings {
            self.logger.warn(warning.to_string(), Some("resolver"));
        }
        self.logger.debug(
            format!("Resolved {} download(s)", plan.entries.len()),
            Some(CATEGORY),
            Some(json!({ "entries": plan.entries })),
        );

        let initial_page = self.current_page().await?;
        let mut current_page = initial_page.clone();
        let mut report = ExportReport::default();

        for entry in &plan.entries {
            match self
                .run_entry(entry, options, target, &mut current_page)
                .await
            {
                Ok(artifact) => report.artifacts.push(artifact),
                Err(error) if policy == FailurePolicy::Collect => {
                    self.logger.error(
                        format!("Export of page {} failed: {error}", entry.page_id),
                        Some(CATEGORY),
                    );
                    report.failures.push(EntryFailure {
                        entry: Some(entry.clone()),
                        error,
                    });
                }
                Err(error) => {
                    self.restore_page(&initial_page, &current_page).await;
                    return Err(error);
                }
            }
        }

        self.restore_page(&initial_page, &current_page).await;
        Ok(report)
    }

    async fn run_entry(
        &self,
        entry: &DownloadPlanEntry,
        options: &ExportOptions,
        target: &ExportTarget,
        current_page: &mut String,
    ) -> Result<ExportArtifact, ExportError> {
        self.stage(EntryStage::Selecting, entry);
        if entry.page_id != *current_page {
            self.channel
                .evaluate(&BridgeCall::SetCurrentPage(&entry.page_id).expression())
                .await?;
            current_page.clone_from(&entry.page_id);
        }
        let selection = match &entry.frame_id {
            Some(frame_id) => BridgeCall::SelectFrame(frame_id),
            None => BridgeCall::SelectAll,
        };
        self.channel.evaluate(&selection.expression()).await?;

        let request = ImageRequest {
            format: options.format,
            background: !options.transparent,
            dark_mode: options.dark,
            padding: options.padding,
            scale: options.scale,
        };
        let download = self
            .download(&BridgeCall::DownloadImage(&request), Some(entry))
            .await?;

        self.stage(EntryStage::PostProcessing, entry);
        self.deliver(&download, options, target, &entry.suffix)
            .await
    }

    async fn export_document(
        &self,
        options: &ExportOptions,
        target: &ExportTarget,
        policy: FailurePolicy,
    ) -> Result<ExportReport, ExportError> {
        for flag in ignored_document_flags(options) {
            self.logger.warn(
                format!(
                    "--{flag} is not supported when exporting to \"{}\", ignoring flag and exporting entire sketch file",
                    options.format
                ),
                Some(CATEGORY),
            );
        }

        let result = match self.download(&BridgeCall::DownloadDocument, None).await {
            Ok(download) => self.deliver(&download, options, target, "").await,
            Err(error) => Err(error),
        };

        let mut report = ExportReport::default();
        match result {
            Ok(artifact) => report.artifacts.push(artifact),
            Err(error) if policy == FailurePolicy::Collect => {
                self.logger
                    .error(format!("Export of sketch failed: {error}"), Some(CATEGORY));
                report.failures.push(EntryFailure { entry: None, error });
            }
            Err(error) => return Err(error),
        }
        Ok(report)
    }

    /// Arm a listener, issue the request, and wait until the artifact is on disk.
    async fn download(
        &self,
        call: &BridgeCall<'_>,
        entry: Option<&DownloadPlanEntry>,
    ) -> Result<PathBuf, ExportError> {
        let ticket = self.channel.arm_download().await?;
        if let Some(entry) = entry {
            self.stage(EntryStage::Requesting, entry);
        }
        let pending = self.channel.issue(ticket, &call.expression()).await?;

        if let Some(entry) = entry {
            self.stage(EntryStage::AwaitingCompletion, entry);
        }
        let location = pending.artifact_ready().await?;
        self.channel.artifact_stable(&location).await?;
        self.logger.debug(
            format!("Download {} finished", location.guid),
            Some(CATEGORY),
            Some(json!({ "path": location.path.display().to_string() })),
        );
        Ok(location.path)
    }

    /// Post-process a downloaded artifact and hand it to its destination.
    async fn deliver(
        &self,
        download: &Path,
        options: &ExportOptions,
        target: &ExportTarget,
        suffix: &str,
    ) -> Result<ExportArtifact, ExportError> {
        let raw = tokio::fs::read(download)
            .await
            .map_err(|source| ExportError::ReadArtifact {
                path: download.to_path_buf(),
                source,
            })?;
        let processed = post_process(raw, options.format, options)?;

        match &target.mode {
            OutputMode::Print => Ok(ExportArtifact::Printed(printable(
                processed,
                options.format,
            )?)),
            OutputMode::Directory(dir) => {
                let path = resolve_output_path(dir, &target.base_name, suffix, options.format);
                relocate(download, &path, &processed, &self.logger).await?;
                self.logger
                    .info(format!("Wrote {}", path.display()), Some(CATEGORY));
                Ok(ExportArtifact::File(path))
            }
        }
    }

    async fn restore_page(&self, initial_page: &str, current_page: &str) {
        if initial_page == current_page {
            return;
        }
        if let Err(err) = self
            .channel
            .evaluate(&BridgeCall::SetCurrentPage(initial_page).expression())
            .await
        {
            self.logger.warn(
                format!("Failed to restore page {initial_page}: {err}"),
                Some(CATEGORY),
            );
        }
    }

    fn stage(&self, stage: EntryStage, entry: &DownloadPlanEntry) {
        self.logger.debug(
            format!("Entry {}: {}", display_entry(entry), stage.label()),
            Some(CATEGORY),
            None,
        );
    }
}

fn display_entry(entry: &DownloadPlanEntry) -> String {
    match &entry.frame_id {
        Some(frame_id) => format!("{}/{frame_id}", entry.page_id),
        None => entry.page_id.clone(),
    }
}

/// Flags that have no meaning for a whole-document export.
fn ignored_document_flags(options: &ExportOptions) -> Vec<&'static str> {
    let mut flags = Vec::new();
    if !options.frames.is_default() {
        flags.push("frames");
    }
    if !options.pages.is_default() {
        flags.push("pages");
    }
    if options.dark {
        flags.push("dark");
    }
    if options.padding.is_some() {
        flags.push("padding");
    }
    if options.scale.is_some() {
        flags.push("scale");
    }
    if options.transparent {
        flags.push("transparent");
    }
    flags
}

/// Write `contents` to `destination` and drop the transient download.
async fn relocate(
    download: &Path,
    destination: &Path,
    contents: &[u8],
    logger: &ExportLogger,
) -> Result<(), ExportError> {
    let write_error = |source| ExportError::WriteArtifact {
        path: destination.to_path_buf(),
        source,
    };
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
    }
    tokio::fs::write(destination, contents)
        .await
        .map_err(write_error)?;
    if let Err(err) = tokio::fs::remove_file(download).await {
        logger.debug(
            format!("Could not remove download {}: {err}", download.display()),
            Some(CATEGORY),
            None,
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, capture_logger};
    use crate::testing::{
        MockChannel, MockScript, document_json, empty_document_json, file_names, position,
    };
    use crate::types::{PageToken, Selection};

    fn three_frames() -> serde_json::Value {
        document_json(&[(
            "page:one",
            "Page 1",
            &[
                ("shape:a", "Frame 1"),
                ("shape:b", "Frame 2"),
                ("shape:c", "Frame 3"),
            ],
        )])
    }

    fn three_pages() -> serde_json::Value {
        document_json(&[
            ("page:one", "Intro", &[]),
            ("page:two", "Body", &[("shape:x", "Chart")]),
            ("page:three", "Outro", &[]),
        ])
    }

    async fn started(
        script: MockScript,
        downloads: &Path,
    ) -> (
        ExportOrchestrator<MockChannel>,
        Arc<std::sync::Mutex<Vec<crate::logging::ExportLogRecord>>>,
    ) {
        let (logger, records) = capture_logger();
        let mut orchestrator = ExportOrchestrator::new(MockChannel::new(script, downloads), logger);
        orchestrator.start("http://127.0.0.1:1/").await.unwrap();
        (orchestrator, records)
    }

    fn files(report: &ExportReport) -> Vec<PathBuf> {
        report
            .artifacts
            .iter()
            .map(|artifact| match artifact {
                ExportArtifact::File(path) => path.clone(),
                ExportArtifact::Printed(content) => panic!("unexpected printed {content}"),
            })
            .collect()
    }

    fn warnings(records: &std::sync::Mutex<Vec<crate::logging::ExportLogRecord>>) -> Vec<String> {
        records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.level == LogLevel::Warn)
            .map(|record| record.message.clone())
            .collect()
    }

    #[tokio::test]
    async fn start_installs_bridge_after_editor_loads() {
        let downloads = tempfile::tempdir().unwrap();
        let (orchestrator, _) =
            started(MockScript::new(three_frames()), downloads.path()).await;

        assert_eq!(orchestrator.state(), OrchestratorState::Started);
        let calls = orchestrator.channel().calls();
        assert_eq!(calls[0], "navigate http://127.0.0.1:1/");
        assert!(position(&calls, "wait") < position(&calls, "inject"));
    }

    #[tokio::test]
    async fn export_before_start_is_rejected() {
        let downloads = tempfile::tempdir().unwrap();
        let (logger, _) = capture_logger();
        let mut orchestrator = ExportOrchestrator::new(
            MockChannel::new(MockScript::new(three_frames()), downloads.path()),
            logger,
        );
        let target = ExportTarget::new(OutputMode::Print, "sketch");

        let err = orchestrator
            .export(&ExportOptions::default(), &target, FailurePolicy::FailFast)
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::NotStarted));
        assert!(orchestrator.channel().calls().is_empty());
    }

    #[tokio::test]
    async fn single_frame_selection_writes_suffixed_file() {
        let downloads = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let (mut orchestrator, _) =
            started(MockScript::new(three_frames()), downloads.path()).await;

        let mut options = ExportOptions::new(ExportFormat::Svg);
        options.frames = Selection::Tokens(vec!["Frame 3".to_string()]);
        let target = ExportTarget::new(OutputMode::Directory(output.path().into()), "sketch");

        let report = orchestrator
            .export(&options, &target, FailurePolicy::FailFast)
            .await
            .unwrap();

        assert_eq!(orchestrator.state(), OrchestratorState::Ready);
        let paths = files(&report);
        assert_eq!(file_names(&paths), vec!["sketch-frame-3.svg"]);
        assert!(paths[0].is_absolute());
        let written = std::fs::read_to_string(&paths[0]).unwrap();
        assert!(written.contains("data-selection=\"shape:c\""));

        let calls = orchestrator.channel().calls();
        assert!(calls.contains(&"selectFrame shape:c".to_string()));
        let arm = position(&calls, "arm").unwrap();
        let issue = position(&calls, "issue downloadImage").unwrap();
        assert!(arm < issue, "listener must be armed before the request");
    }

    #[tokio::test]
    async fn index_token_switches_page_and_restores_it() {
        let downloads = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let (mut orchestrator, _) =
            started(MockScript::new(three_pages()), downloads.path()).await;

        let mut options = ExportOptions::new(ExportFormat::Png);
        options.pages = Selection::Tokens(vec![PageToken::Index(2)]);
        let target = ExportTarget::new(OutputMode::Directory(output.path().into()), "deck");

        let report = orchestrator
            .export(&options, &target, FailurePolicy::FailFast)
            .await
            .unwrap();

        assert_eq!(file_names(&files(&report)), vec!["deck-outro.png"]);
        let calls = orchestrator.channel().calls();
        assert!(calls.contains(&"setCurrentPage page:three".to_string()));
        assert_eq!(calls.last().unwrap(), "setCurrentPage page:one");
        assert_eq!(orchestrator.channel().current_page(), "page:one");
    }

    #[tokio::test]
    async fn all_frames_are_sorted_naturally() {
        let downloads = tempfile::tempdir().unwrap();
        let document = document_json(&[(
            "page:one",
            "Page 1",
            &[
                ("shape:a", "Frame 10"),
                ("shape:b", "Frame 9"),
                ("shape:c", "Frame 1"),
            ],
        )]);
        let (mut orchestrator, _) = started(MockScript::new(document), downloads.path()).await;
        let output = tempfile::tempdir().unwrap();

        let mut options = ExportOptions::new(ExportFormat::Svg);
        options.frames = Selection::All;
        let target = ExportTarget::new(OutputMode::Directory(output.path().into()), "s");

        let report = orchestrator
            .export(&options, &target, FailurePolicy::FailFast)
            .await
            .unwrap();
        assert_eq!(
            file_names(&files(&report)),
            vec!["s-frame-1.svg", "s-frame-9.svg", "s-frame-10.svg"]
        );
    }

    #[tokio::test]
    async fn empty_document_is_rejected_before_planning() {
        let downloads = tempfile::tempdir().unwrap();
        let (mut orchestrator, _) =
            started(MockScript::new(empty_document_json()), downloads.path()).await;
        let target = ExportTarget::new(OutputMode::Print, "sketch");

        let err = orchestrator
            .export(
                &ExportOptions::new(ExportFormat::Png),
                &target,
                FailurePolicy::Collect,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::EmptyDocument));
        let calls = orchestrator.channel().calls();
        assert!(position(&calls, "currentPage").is_none());
        assert!(position(&calls, "arm").is_none());
    }

    #[tokio::test]
    async fn print_mode_returns_single_line_and_strips_styles() {
        let downloads = tempfile::tempdir().unwrap();
        let (mut orchestrator, records) =
            started(MockScript::new(three_frames()), downloads.path()).await;

        let mut options = ExportOptions::new(ExportFormat::Svg);
        options.print = true;
        options.strip_style = true;
        let target = ExportTarget::new(OutputMode::Print, "sketch");

        let report = orchestrator
            .export(&options, &target, FailurePolicy::FailFast)
            .await
            .unwrap();

        let [ExportArtifact::Printed(content)] = report.artifacts.as_slice() else {
            panic!("expected one printed artifact, got {:?}", report.artifacts);
        };
        assert!(!content.contains('\n'));
        assert!(!content.contains("<style"));
        assert!(content.contains("data-selection=\"all\""));
        assert!(warnings(&records).is_empty());
    }

    #[tokio::test]
    async fn raster_print_is_base64() {
        let downloads = tempfile::tempdir().unwrap();
        let (mut orchestrator, records) =
            started(MockScript::new(three_frames()), downloads.path()).await;

        let mut options = ExportOptions::new(ExportFormat::Png);
        options.strip_style = true;
        let target = ExportTarget::new(OutputMode::Print, "sketch");

        let report = orchestrator
            .export(&options, &target, FailurePolicy::FailFast)
            .await
            .unwrap();

        use base64::Engine;
        let expected = base64::engine::general_purpose::STANDARD.encode("page:one|all");
        assert_eq!(report.artifacts, vec![ExportArtifact::Printed(expected)]);
        assert_eq!(
            warnings(&records),
            vec!["--strip-style is only supported for SVG output"]
        );
    }

    #[tokio::test]
    async fn cancel_fails_fast_in_single_mode() {
        let downloads = tempfile::tempdir().unwrap();
        let (mut orchestrator, _) = started(
            MockScript::new(three_frames()).canceling(0),
            downloads.path(),
        )
        .await;
        let target = ExportTarget::new(OutputMode::Print, "sketch");

        let err = orchestrator
            .export(
                &ExportOptions::new(ExportFormat::Svg),
                &target,
                FailurePolicy::FailFast,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExportError::Channel(ChannelError::Canceled { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_is_collected_per_entry() {
        let downloads = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let (mut orchestrator, _) = started(
            MockScript::new(three_frames()).canceling(1),
            downloads.path(),
        )
        .await;

        let mut options = ExportOptions::new(ExportFormat::Svg);
        options.frames = Selection::All;
        let target = ExportTarget::new(OutputMode::Directory(output.path().into()), "sketch");

        let report = orchestrator
            .export(&options, &target, FailurePolicy::Collect)
            .await
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(
            file_names(&files(&report)),
            vec!["sketch-frame-1.svg", "sketch-frame-3.svg"]
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].entry.as_ref().unwrap().frame_id.as_deref(),
            Some("shape:b")
        );
    }

    #[tokio::test]
    async fn stalled_download_times_out_without_stopping_siblings() {
        let downloads = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let (mut orchestrator, _) = started(
            MockScript::new(three_frames()).stalling(1),
            downloads.path(),
        )
        .await;

        let mut options = ExportOptions::new(ExportFormat::Svg);
        options.frames = Selection::All;
        let target = ExportTarget::new(OutputMode::Directory(output.path().into()), "sketch");

        let report = orchestrator
            .export(&options, &target, FailurePolicy::Collect)
            .await
            .unwrap();

        assert_eq!(
            file_names(&files(&report)),
            vec!["sketch-frame-1.svg", "sketch-frame-3.svg"]
        );
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            ExportError::Channel(ChannelError::Timeout { .. })
        ));
        assert_eq!(
            report.failures[0].entry.as_ref().unwrap().frame_id.as_deref(),
            Some("shape:b")
        );
    }

    #[tokio::test]
    async fn unwritable_destination_is_collected_per_entry() {
        let downloads = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::create_dir(output.path().join("sketch-frame-2.svg")).unwrap();
        let (mut orchestrator, _) =
            started(MockScript::new(three_frames()), downloads.path()).await;

        let mut options = ExportOptions::new(ExportFormat::Svg);
        options.frames = Selection::All;
        let target = ExportTarget::new(OutputMode::Directory(output.path().into()), "sketch");

        let report = orchestrator
            .export(&options, &target, FailurePolicy::Collect)
            .await
            .unwrap();

        assert_eq!(
            file_names(&files(&report)),
            vec!["sketch-frame-1.svg", "sketch-frame-3.svg"]
        );
        assert_eq!(report.failures.len(), 1);
        let ExportError::WriteArtifact { path, .. } = &report.failures[0].error else {
            panic!("expected a write failure, got {:?}", report.failures[0].error);
        };
        assert!(path.ends_with("sketch-frame-2.svg"));
    }

    #[tokio::test]
    async fn leftover_download_is_reported_at_debug_level() {
        let dir = tempfile::tempdir().unwrap();
        let (logger, records) = capture_logger();
        let destination = dir.path().join("out").join("sketch.svg");

        relocate(&dir.path().join("gone"), &destination, b"<svg/>", &logger)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), b"<svg/>");
        let records = records.lock().unwrap();
        assert!(records.iter().any(|record| {
            record.level == LogLevel::Debug && record.message.starts_with("Could not remove download")
        }));
    }

    #[tokio::test]
    async fn tldr_ignores_selection_flags_with_warnings() {
        let downloads = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let (mut orchestrator, records) =
            started(MockScript::new(three_pages()), downloads.path()).await;

        let mut options = ExportOptions::new(ExportFormat::Tldr);
        options.frames = Selection::All;
        options.dark = true;
        options.padding = Some(8.0);
        let target = ExportTarget::new(OutputMode::Directory(output.path().into()), "deck");

        let report = orchestrator
            .export(&options, &target, FailurePolicy::FailFast)
            .await
            .unwrap();

        assert_eq!(file_names(&files(&report)), vec!["deck.tldr"]);
        assert_eq!(
            warnings(&records),
            vec![
                "--frames is not supported when exporting to \"tldr\", ignoring flag and exporting entire sketch file",
                "--dark is not supported when exporting to \"tldr\", ignoring flag and exporting entire sketch file",
                "--padding is not supported when exporting to \"tldr\", ignoring flag and exporting entire sketch file",
            ]
        );
        let calls = orchestrator.channel().calls();
        assert!(calls.contains(&"issue downloadDocument".to_string()));
        assert!(position(&calls, "selectAll").is_none());
    }

    #[tokio::test]
    async fn tldr_of_empty_document_is_allowed() {
        let downloads = tempfile::tempdir().unwrap();
        let (mut orchestrator, _) =
            started(MockScript::new(empty_document_json()), downloads.path()).await;
        let target = ExportTarget::new(OutputMode::Print, "sketch");

        let report = orchestrator
            .export(
                &ExportOptions::new(ExportFormat::Tldr),
                &target,
                FailurePolicy::FailFast,
            )
            .await
            .unwrap();
        assert_eq!(
            report.artifacts,
            vec![ExportArtifact::Printed("{  \"records\": []}".to_string())]
        );
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_exports() {
        let downloads = tempfile::tempdir().unwrap();
        let (mut orchestrator, _) =
            started(MockScript::new(three_frames()), downloads.path()).await;

        orchestrator.close().await.unwrap();
        orchestrator.close().await.unwrap();
        let closes = orchestrator
            .channel()
            .calls()
            .into_iter()
            .filter(|call| call == "close")
            .count();
        assert_eq!(closes, 1);

        let target = ExportTarget::new(OutputMode::Print, "sketch");
        let err = orchestrator
            .export(&ExportOptions::default(), &target, FailurePolicy::FailFast)
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Closed));
    }
}
