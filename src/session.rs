//! Session lifecycle.
//!
//! One [`ExportSession::export`] call owns everything it creates: a private
//! temporary directory for downloads and the browser profile, a local asset
//! host when the input is a file, and a freshly launched automation channel.
//! Teardown always runs, channel first and host second, whatever the export
//! loop returned.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use thiserror::Error;

use crate::asset_host::{AssetHostError, LocalAssetHost};
use crate::channel::{ChannelError, ChannelLauncher, LaunchRequest};
use crate::config::ExportConfig;
use crate::exporter::{
    ExportArtifact, ExportError, ExportOrchestrator, ExportReport, ExportTarget, FailurePolicy,
};
use crate::logging::ExportLogger;
use crate::naming::{base_name_from_path, base_name_from_url, strip_format_extension};
use crate::types::{ExportOptions, OptionsError, OutputMode};
use crate::validation::{InputError, SketchSource, ValidationRules, validate_input};

const CATEGORY: &str = "session";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    AssetHost(#[from] AssetHostError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("failed to read sketch {path}: {source}")]
    ReadSketch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create session directory: {0}")]
    TempDir(#[source] std::io::Error),
}

/// Exports sketches, one isolated browser session per call.
pub struct ExportSession<L: ChannelLauncher> {
    launcher: L,
    config: ExportConfig,
    logger: Arc<ExportLogger>,
}

impl<L: ChannelLauncher> std::fmt::Debug for ExportSession<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportSession")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<L: ChannelLauncher> ExportSession<L> {
    pub fn new(launcher: L, config: ExportConfig, logger: Arc<ExportLogger>) -> Self {
        Self {
            launcher,
            config,
            logger,
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn logger(&self) -> &Arc<ExportLogger> {
        &self.logger
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Export one sketch; any failed entry fails the call.
    pub async fn export(
        &self,
        input: &str,
        options: &ExportOptions,
    ) -> Result<Vec<ExportArtifact>, SessionError> {
        let report = self
            .export_with_policy(input, options, FailurePolicy::FailFast)
            .await?;
        Ok(report.artifacts)
    }

    /// Export one sketch with an explicit per-entry failure policy.
    ///
    /// Options and input are validated before anything is launched.
    pub async fn export_with_policy(
        &self,
        input: &str,
        options: &ExportOptions,
        policy: FailurePolicy,
    ) -> Result<ExportReport, SessionError> {
        let mode = options.output_mode()?;
        let source = validate_input(input, &ValidationRules::from(&self.config))?;
        let target = ExportTarget::new(mode.clone(), self.base_name(&source, options, &mode));

        let workspace = tempfile::Builder::new()
            .prefix("tldraw-export-")
            .tempdir()
            .map_err(SessionError::TempDir)?;
        let request = launch_request(&workspace)?;

        let (mut host, href) = match &source {
            SketchSource::Local(path) => {
                let document = tokio::fs::read_to_string(path).await.map_err(|source| {
                    SessionError::ReadSketch {
                        path: path.clone(),
                        source,
                    }
                })?;
                let mut host = LocalAssetHost::new(
                    &self.config.asset_dir,
                    Some(document),
                    Arc::clone(&self.logger),
                );
                let href = host.start().await?;
                (Some(host), href)
            }
            SketchSource::Remote(url) => (None, url.to_string()),
        };

        let result = self.run(&request, &href, options, &target, policy).await;

        if let Some(host) = host.as_mut() {
            if let Err(err) = host.close().await {
                self.logger
                    .warn(format!("Failed to stop asset host: {err}"), Some(CATEGORY));
            }
        }
        if let Err(err) = workspace.close() {
            self.logger.debug(
                format!("Failed to remove session directory: {err}"),
                Some(CATEGORY),
                None,
            );
        }

        result
    }

    async fn run(
        &self,
        request: &LaunchRequest,
        href: &str,
        options: &ExportOptions,
        target: &ExportTarget,
        policy: FailurePolicy,
    ) -> Result<ExportReport, SessionError> {
        let channel = self.launcher.launch(request).await?;
        let mut orchestrator = ExportOrchestrator::new(channel, Arc::clone(&self.logger));

        let result = match orchestrator.start(href).await {
            Ok(()) => orchestrator.export(options, target, policy).await,
            Err(err) => Err(err),
        };

        if let Err(err) = orchestrator.close().await {
            self.logger
                .warn(format!("Failed to close browser: {err}"), Some(CATEGORY));
        }
        Ok(result?)
    }

    fn base_name(&self, source: &SketchSource, options: &ExportOptions, mode: &OutputMode) -> String {
        if let Some(name) = &options.name {
            if *mode == OutputMode::Print {
                self.logger
                    .warn("Ignoring --name when using --print", Some(CATEGORY));
            } else {
                return strip_format_extension(name, options.format).to_string();
            }
        }
        match source {
            SketchSource::Local(path) => base_name_from_path(path),
            SketchSource::Remote(url) => base_name_from_url(url),
        }
    }
}

fn launch_request(workspace: &TempDir) -> Result<LaunchRequest, SessionError> {
    let downloads_dir = workspace.path().join("downloads");
    let profile_dir = workspace.path().join("profile");
    std::fs::create_dir_all(&downloads_dir).map_err(SessionError::TempDir)?;
    std::fs::create_dir_all(&profile_dir).map_err(SessionError::TempDir)?;
    Ok(LaunchRequest {
        downloads_dir,
        profile_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExportConfigOverrides;
    use crate::logging::{LogLevel, capture_logger};
    use crate::testing::{MockLauncher, MockScript, document_json, empty_document_json};
    use crate::types::{ExportFormat, Selection};

    struct Fixture {
        dir: TempDir,
        config: ExportConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let bundle = dir.path().join("bundle");
            std::fs::create_dir(&bundle).unwrap();
            std::fs::write(bundle.join("index.html"), "<html></html>").unwrap();
            let config = ExportConfig::default().with_overrides(
                ExportConfigOverrides::default()
                    .asset_dir(bundle)
                    .operation_timeout_ms(5_000),
            );
            Self { dir, config }
        }

        fn sketch(&self, name: &str) -> String {
            let path = self.dir.path().join(name);
            std::fs::write(&path, "{\"records\":[]}").unwrap();
            path.to_string_lossy().into_owned()
        }

        fn output(&self) -> PathBuf {
            self.dir.path().join("out")
        }
    }

    fn one_page() -> serde_json::Value {
        document_json(&[("page:one", "Page 1", &[("shape:a", "Frame 1")])])
    }

    fn session(
        launcher: MockLauncher,
        config: ExportConfig,
    ) -> (
        ExportSession<MockLauncher>,
        Arc<std::sync::Mutex<Vec<crate::logging::ExportLogRecord>>>,
    ) {
        let (logger, records) = capture_logger();
        (ExportSession::new(launcher, config, logger), records)
    }

    #[tokio::test]
    async fn print_with_output_fails_before_any_channel_call() {
        let fixture = Fixture::new();
        let (session, _) = session(
            MockLauncher::new([MockScript::new(one_page())]),
            fixture.config.clone(),
        );
        let mut options = ExportOptions::new(ExportFormat::Svg);
        options.print = true;
        options.output = Some(fixture.output());

        let err = session
            .export(&fixture.sketch("sketch.tldr"), &options)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Options(OptionsError::PrintWithOutput)));
        assert!(session.launcher().launches().is_empty());
        assert!(session.launcher().calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_input_fails_before_launch() {
        let fixture = Fixture::new();
        let (session, _) = session(MockLauncher::default(), fixture.config.clone());

        let err = session
            .export("https://example.com/s/abc", &ExportOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Input(InputError::Hostname { .. })));
        assert!(session.launcher().launches().is_empty());
    }

    #[tokio::test]
    async fn local_sketch_is_served_and_written_by_file_stem() {
        let fixture = Fixture::new();
        let (session, _) = session(
            MockLauncher::new([MockScript::new(one_page())]),
            fixture.config.clone(),
        );
        let mut options = ExportOptions::new(ExportFormat::Svg);
        options.output = Some(fixture.output());

        let artifacts = session
            .export(&fixture.sketch("my-sketch.tldr"), &options)
            .await
            .unwrap();

        assert_eq!(
            artifacts,
            vec![ExportArtifact::File(fixture.output().join("my-sketch.svg"))]
        );
        let calls = session.launcher().calls();
        assert!(calls[0].starts_with("navigate http://127.0.0.1:"));
        assert_eq!(calls.last().unwrap(), "close");

        let launch = &session.launcher().launches()[0];
        assert!(!launch.downloads_dir.exists(), "session directory is removed");
    }

    #[tokio::test]
    async fn remote_sketch_navigates_to_url_and_uses_last_segment() {
        let fixture = Fixture::new();
        let (session, _) = session(
            MockLauncher::new([MockScript::new(one_page())]),
            fixture.config.clone(),
        );
        let mut options = ExportOptions::new(ExportFormat::Png);
        options.output = Some(fixture.output());
        options.frames = Selection::All;

        let artifacts = session
            .export("https://www.tldraw.com/s/v2_c_abc", &options)
            .await
            .unwrap();

        assert_eq!(
            artifacts,
            vec![ExportArtifact::File(
                fixture.output().join("v2_c_abc-frame-1.png")
            )]
        );
        assert_eq!(
            session.launcher().calls()[0],
            "navigate https://www.tldraw.com/s/v2_c_abc"
        );
    }

    #[tokio::test]
    async fn name_override_drops_matching_extension() {
        let fixture = Fixture::new();
        let (session, _) = session(
            MockLauncher::new([MockScript::new(one_page())]),
            fixture.config.clone(),
        );
        let mut options = ExportOptions::new(ExportFormat::Svg);
        options.output = Some(fixture.output());
        options.name = Some("poster.svg".to_string());

        let artifacts = session
            .export(&fixture.sketch("sketch.tldr"), &options)
            .await
            .unwrap();
        assert_eq!(
            artifacts,
            vec![ExportArtifact::File(fixture.output().join("poster.svg"))]
        );
    }

    #[tokio::test]
    async fn print_mode_ignores_name_with_warning() {
        let fixture = Fixture::new();
        let (session, records) = session(
            MockLauncher::new([MockScript::new(one_page())]),
            fixture.config.clone(),
        );
        let mut options = ExportOptions::new(ExportFormat::Svg);
        options.print = true;
        options.name = Some("ignored".to_string());

        let artifacts = session
            .export(&fixture.sketch("sketch.tldr"), &options)
            .await
            .unwrap();

        assert!(matches!(artifacts.as_slice(), [ExportArtifact::Printed(_)]));
        let warned = records.lock().unwrap().iter().any(|record| {
            record.level == LogLevel::Warn && record.message == "Ignoring --name when using --print"
        });
        assert!(warned);
    }

    #[tokio::test]
    async fn cleanup_runs_when_export_fails() {
        let fixture = Fixture::new();
        let (session, _) = session(
            MockLauncher::new([MockScript::new(empty_document_json())]),
            fixture.config.clone(),
        );

        let err = session
            .export(&fixture.sketch("sketch.tldr"), &ExportOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Export(ExportError::EmptyDocument)));
        assert_eq!(session.launcher().calls().last().unwrap(), "close");
        assert!(!session.launcher().launches()[0].profile_dir.exists());
    }

    #[tokio::test]
    async fn navigation_failure_still_closes_channel() {
        let fixture = Fixture::new();
        let mut script = MockScript::new(one_page());
        script.fail_navigation = true;
        let (session, _) = session(MockLauncher::new([script]), fixture.config.clone());

        let err = session
            .export(&fixture.sketch("sketch.tldr"), &ExportOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SessionError::Export(ExportError::Channel(ChannelError::Message(_)))
        ));
        assert_eq!(session.launcher().calls().last().unwrap(), "close");
    }
}
