//! Chromiumoxide-backed automation channel.
//!
//! Launches a private Chrome instance per export session, routes its downloads
//! into the session's download directory (files named by download guid), and
//! forwards download lifecycle events and page console output.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EvaluateParams, EventConsoleApiCalled,
};
use chromiumoxide::page::Page as ChromiumPage;
use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::channel::{
    AutomationChannel, ChannelError, ChannelLauncher, DownloadEvent, DownloadTicket,
    LaunchRequest, bounded,
};
use crate::config::ExportConfig;
use crate::logging::{ExportLogger, LogLevel};

const CATEGORY: &str = "browser";

/// Browser launch parameters taken from [`ExportConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    pub chrome_executable: Option<PathBuf>,
    pub headless: bool,
    pub sandbox: bool,
    pub operation_timeout: Duration,
}

impl From<&ExportConfig> for LaunchSettings {
    fn from(config: &ExportConfig) -> Self {
        Self {
            chrome_executable: config.chrome_executable.clone(),
            headless: config.headless,
            sandbox: config.sandbox,
            operation_timeout: config.operation_timeout(),
        }
    }
}

/// Launches one [`ChromiumChannel`] per export session.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    settings: LaunchSettings,
    logger: Arc<ExportLogger>,
}

impl ChromiumLauncher {
    pub fn new(settings: LaunchSettings, logger: Arc<ExportLogger>) -> Self {
        Self { settings, logger }
    }

    pub fn from_config(config: &ExportConfig, logger: Arc<ExportLogger>) -> Self {
        Self::new(LaunchSettings::from(config), logger)
    }
}

#[async_trait]
impl ChannelLauncher for ChromiumLauncher {
    type Channel = ChromiumChannel;

    async fn launch(&self, request: &LaunchRequest) -> Result<ChromiumChannel, ChannelError> {
        ChromiumChannel::launch(&self.settings, request, Arc::clone(&self.logger)).await
    }
}

struct ChromiumState {
    browser: Browser,
    page: ChromiumPage,
    handler: JoinHandle<()>,
    listeners: Vec<JoinHandle<()>>,
}

pub struct ChromiumChannel {
    state: Mutex<Option<ChromiumState>>,
    downloads: broadcast::Sender<DownloadEvent>,
    downloads_dir: PathBuf,
    timeout: Duration,
    logger: Arc<ExportLogger>,
}

impl std::fmt::Debug for ChromiumChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromiumChannel")
            .field("downloads_dir", &self.downloads_dir)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ChromiumChannel {
    async fn launch(
        settings: &LaunchSettings,
        request: &LaunchRequest,
        logger: Arc<ExportLogger>,
    ) -> Result<Self, ChannelError> {
        let config = build_config(settings, request)?;
        let timeout = settings.operation_timeout;
        let (mut browser, handler) = bounded("browser launch", timeout, Browser::launch(config))
            .await?
            .map_err(map_chromium_error)?;
        let handler = spawn_handler(handler, Arc::clone(&logger));
        let (downloads, _) = broadcast::channel(64);

        match prepare(&browser, request, &downloads, &logger, timeout).await {
            Ok((page, listeners)) => Ok(Self {
                state: Mutex::new(Some(ChromiumState {
                    browser,
                    page,
                    handler,
                    listeners,
                })),
                downloads,
                downloads_dir: request.downloads_dir.clone(),
                timeout,
                logger,
            }),
            Err(err) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler.abort();
                Err(err)
            }
        }
    }

    async fn page(&self) -> Result<ChromiumPage, ChannelError> {
        let guard = self.state.lock().await;
        guard
            .as_ref()
            .map(|state| state.page.clone())
            .ok_or(ChannelError::Closed)
    }
}

#[async_trait]
impl AutomationChannel for ChromiumChannel {
    async fn navigate(&self, url: &str) -> Result<(), ChannelError> {
        let page = self.page().await?;
        bounded("navigation", self.timeout, page.goto(url))
            .await?
            .map_err(map_chromium_error)?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<JsonValue, ChannelError> {
        let page = self.page().await?;
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(ChannelError::Message)?;
        let result = bounded("evaluation", self.timeout, page.evaluate_expression(params))
            .await?
            .map_err(map_chromium_error)?;
        Ok(result.value().cloned().unwrap_or(JsonValue::Null))
    }

    fn operation_timeout(&self) -> Duration {
        self.timeout
    }

    async fn arm_download(&self) -> Result<DownloadTicket, ChannelError> {
        if self.state.lock().await.is_none() {
            return Err(ChannelError::Closed);
        }
        Ok(DownloadTicket::new(
            self.downloads.subscribe(),
            &self.downloads_dir,
            self.timeout,
        ))
    }

    async fn close(&self) -> Result<(), ChannelError> {
        let Some(state) = self.state.lock().await.take() else {
            return Ok(());
        };
        let ChromiumState {
            mut browser,
            page,
            handler,
            listeners,
        } = state;

        for listener in listeners {
            listener.abort();
        }
        if let Err(err) = page.close().await {
            self.logger
                .debug(format!("Failed to close page: {err}"), Some(CATEGORY), None);
        }

        let shutdown = bounded("browser shutdown", self.timeout, async {
            browser.close().await.map_err(map_chromium_error)?;
            browser.wait().await.map_err(map_chromium_error)?;
            Ok::<(), ChannelError>(())
        })
        .await;
        handler.abort();
        shutdown?
    }
}

/// Open the working page, route downloads, and start event forwarding.
async fn prepare(
    browser: &Browser,
    request: &LaunchRequest,
    downloads: &broadcast::Sender<DownloadEvent>,
    logger: &Arc<ExportLogger>,
    timeout: Duration,
) -> Result<(ChromiumPage, Vec<JoinHandle<()>>), ChannelError> {
    let page = bounded("page creation", timeout, browser.new_page("about:blank"))
        .await?
        .map_err(map_chromium_error)?;

    let behavior = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::AllowAndName)
        .download_path(request.downloads_dir.to_string_lossy().into_owned())
        .events_enabled(true)
        .build()
        .map_err(ChannelError::Message)?;
    browser
        .execute(behavior)
        .await
        .map_err(map_chromium_error)?;

    let mut began = browser
        .event_listener::<EventDownloadWillBegin>()
        .await
        .map_err(map_chromium_error)?;
    let mut progress = browser
        .event_listener::<EventDownloadProgress>()
        .await
        .map_err(map_chromium_error)?;
    let sender = downloads.clone();
    let download_listener = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = began.next() => {
                    let _ = sender.send(DownloadEvent::Started {
                        guid: event.guid.clone(),
                        suggested_filename: Some(event.suggested_filename.clone()),
                    });
                }
                Some(event) = progress.next() => {
                    let _ = sender.send(download_event(
                        &event.guid,
                        &event.state,
                        event.received_bytes,
                        event.total_bytes,
                    ));
                }
                else => break,
            }
        }
    });

    let mut console = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .map_err(map_chromium_error)?;
    let console_logger = Arc::clone(logger);
    let console_listener = tokio::spawn(async move {
        while let Some(event) = console.next().await {
            let text = event
                .args
                .iter()
                .filter_map(|arg| match &arg.value {
                    Some(JsonValue::String(text)) => Some(text.clone()),
                    Some(value) => Some(value.to_string()),
                    None => arg.description.clone(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            console_logger.log(text, console_level(&event.r#type), Some(CATEGORY), None);
        }
    });

    Ok((page, vec![download_listener, console_listener]))
}

fn build_config(
    settings: &LaunchSettings,
    request: &LaunchRequest,
) -> Result<BrowserConfig, ChannelError> {
    let mut builder = BrowserConfig::builder();

    if let Some(path) = &settings.chrome_executable {
        builder = builder.chrome_executable(path);
    }

    let builder = builder
        .user_data_dir(&request.profile_dir)
        .request_timeout(settings.operation_timeout)
        .args(["--hide-scrollbars", "--mute-audio"]);

    let builder = if settings.headless {
        builder
    } else {
        builder.with_head()
    };

    let builder = if settings.sandbox {
        builder
    } else {
        builder.no_sandbox()
    };

    builder.build().map_err(ChannelError::Message)
}

fn download_event(
    guid: &str,
    state: &DownloadProgressState,
    received_bytes: f64,
    total_bytes: f64,
) -> DownloadEvent {
    let guid = guid.to_string();
    match state {
        DownloadProgressState::Completed => DownloadEvent::Completed { guid },
        DownloadProgressState::Canceled => DownloadEvent::Canceled { guid },
        DownloadProgressState::InProgress => DownloadEvent::Progress {
            guid,
            received_bytes: received_bytes.max(0.0) as u64,
            total_bytes: total_bytes.max(0.0) as u64,
        },
    }
}

fn console_level(kind: &ConsoleApiCalledType) -> LogLevel {
    match kind {
        ConsoleApiCalledType::Error | ConsoleApiCalledType::Assert => LogLevel::Error,
        ConsoleApiCalledType::Warning => LogLevel::Warn,
        _ => LogLevel::Info,
    }
}

fn map_chromium_error<E: std::fmt::Display>(err: E) -> ChannelError {
    ChannelError::Message(err.to_string())
}

fn spawn_handler(
    mut handler: chromiumoxide::handler::Handler,
    logger: Arc<ExportLogger>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = handler.next().await {
            if let Err(err) = result {
                logger.debug(
                    format!("chromiumoxide handler error: {err}"),
                    Some(CATEGORY),
                    None,
                );
            }
        }
    })
}
