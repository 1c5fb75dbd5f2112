//! Automation channel abstraction.
//!
//! A channel drives one remotely controlled browser page: navigation, in-page
//! evaluation, and a stream of download lifecycle events. Downloads follow a
//! strict two-step shape: a [`DownloadTicket`] is armed (subscribed to the
//! event stream) before the request is issued, and issuing consumes the
//! ticket, so a completion event can never slip past an unregistered listener.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{self, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Download lifecycle notifications emitted by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Started {
        guid: String,
        suggested_filename: Option<String>,
    },
    Progress {
        guid: String,
        received_bytes: u64,
        total_bytes: u64,
    },
    Completed {
        guid: String,
    },
    Canceled {
        guid: String,
    },
}

impl DownloadEvent {
    pub fn guid(&self) -> &str {
        match self {
            DownloadEvent::Started { guid, .. }
            | DownloadEvent::Progress { guid, .. }
            | DownloadEvent::Completed { guid }
            | DownloadEvent::Canceled { guid } => guid,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("automation channel error: {0}")]
    Message(String),
    #[error("{operation} timed out after {}ms", timeout.as_millis())]
    Timeout {
        operation: String,
        timeout: Duration,
    },
    #[error("automation channel is closed")]
    Closed,
    #[error("download {guid} was canceled")]
    Canceled { guid: String },
    #[error("download event stream ended before the download finished")]
    EventStreamClosed,
    #[error("unsupported automation operation: {0}")]
    Unsupported(String),
    #[error("failed to inspect downloaded artifact: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        ChannelError::Timeout {
            operation: operation.into(),
            timeout,
        }
    }
}

/// Where a finished download landed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub guid: String,
    pub path: PathBuf,
}

/// A listener registered for the next download, created before the request
/// that triggers it.
#[derive(Debug)]
pub struct DownloadTicket {
    events: broadcast::Receiver<DownloadEvent>,
    downloads_dir: PathBuf,
    timeout: Duration,
}

impl DownloadTicket {
    pub fn new(
        events: broadcast::Receiver<DownloadEvent>,
        downloads_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            events,
            downloads_dir: downloads_dir.into(),
            timeout,
        }
    }
}

/// A download whose request has been issued; resolves to the artifact's
/// location once the browser reports completion.
#[derive(Debug)]
pub struct PendingDownload {
    ticket: DownloadTicket,
}

impl PendingDownload {
    /// Only an armed ticket can become a pending download.
    pub fn from_ticket(ticket: DownloadTicket) -> Self {
        Self { ticket }
    }

    /// Wait for the single terminal event of this download.
    pub async fn artifact_ready(self) -> Result<ArtifactLocation, ChannelError> {
        let DownloadTicket {
            mut events,
            downloads_dir,
            timeout,
        } = self.ticket;

        let wait = async move {
            let mut tracked: Option<String> = None;
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return Err(ChannelError::EventStreamClosed),
                };

                let is_ours = tracked
                    .as_deref()
                    .is_none_or(|guid| guid == event.guid());
                if !is_ours {
                    continue;
                }

                match event {
                    DownloadEvent::Started { guid, .. } | DownloadEvent::Progress { guid, .. } => {
                        tracked.get_or_insert(guid);
                    }
                    DownloadEvent::Completed { guid } => {
                        let path = downloads_dir.join(&guid);
                        return Ok(ArtifactLocation { guid, path });
                    }
                    DownloadEvent::Canceled { guid } => {
                        return Err(ChannelError::Canceled { guid });
                    }
                }
            }
        };

        bounded("download completion", timeout, wait).await?
    }
}

/// Handle to one automated browser page hosting the editor.
#[async_trait]
pub trait AutomationChannel: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), ChannelError>;

    /// Evaluate `expression` in the page, awaiting promises, and return the
    /// JSON value it produced.
    async fn evaluate(&self, expression: &str) -> Result<JsonValue, ChannelError>;

    /// Upper bound applied to each channel operation.
    fn operation_timeout(&self) -> Duration;

    /// Poll `predicate` until it evaluates truthy.
    async fn wait_for_function(&self, predicate: &str) -> Result<(), ChannelError> {
        let deadline = Instant::now() + self.operation_timeout();
        loop {
            let value = self.evaluate(predicate).await?;
            if is_truthy(&value) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ChannelError::timeout(
                    format!("waiting for `{predicate}`"),
                    self.operation_timeout(),
                ));
            }
            time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Register a listener for the next download.
    async fn arm_download(&self) -> Result<DownloadTicket, ChannelError>;

    /// Run the in-page expression that triggers the download `ticket` waits for.
    async fn issue(
        &self,
        ticket: DownloadTicket,
        expression: &str,
    ) -> Result<PendingDownload, ChannelError> {
        self.evaluate(expression).await?;
        Ok(PendingDownload::from_ticket(ticket))
    }

    /// Wait until the artifact is fully flushed to disk.
    async fn artifact_stable(&self, location: &ArtifactLocation) -> Result<(), ChannelError> {
        wait_until_stable(&location.path, self.operation_timeout()).await
    }

    async fn close(&self) -> Result<(), ChannelError>;
}

/// Request passed to a launcher for one export session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Directory the browser saves downloads into.
    pub downloads_dir: PathBuf,
    /// Private browser profile directory.
    pub profile_dir: PathBuf,
}

/// Creates a fresh, exclusively owned channel per export session.
#[async_trait]
pub trait ChannelLauncher: Send + Sync {
    type Channel: AutomationChannel + 'static;

    async fn launch(&self, request: &LaunchRequest) -> Result<Self::Channel, ChannelError>;
}

/// Run `future` with an upper time bound.
pub async fn bounded<F, T>(operation: &str, timeout: Duration, future: F) -> Result<T, ChannelError>
where
    F: Future<Output = T>,
{
    time::timeout(timeout, future)
        .await
        .map_err(|_| ChannelError::timeout(operation, timeout))
}

/// Poll `path` until it exists and its size stops changing between polls.
pub async fn wait_until_stable(path: &Path, timeout: Duration) -> Result<(), ChannelError> {
    let poll = async {
        let mut last_len: Option<u64> = None;
        loop {
            match tokio::fs::metadata(path).await {
                Ok(metadata) => {
                    let len = metadata.len();
                    if last_len == Some(len) {
                        return Ok(());
                    }
                    last_len = Some(len);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => last_len = None,
                Err(err) => return Err(ChannelError::Io(err)),
            }
            time::sleep(POLL_INTERVAL).await;
        }
    };
    bounded("waiting for download to settle", timeout, poll).await?
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(flag) => *flag,
        JsonValue::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        JsonValue::String(text) => !text.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}
