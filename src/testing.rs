//! In-memory automation channel used by unit tests across the crate.
//!
//! The mock plays the editor's part of the bridge protocol: it answers
//! structure and page queries from a scripted document, tracks selection, and
//! turns download requests into guid-named files plus download events.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use tokio::sync::broadcast;

use crate::bridge::{BRIDGE_READY, EDITOR_BRIDGE_SCRIPT, EDITOR_READY};
use crate::channel::{
    AutomationChannel, ChannelError, ChannelLauncher, DownloadEvent, DownloadTicket, LaunchRequest,
};

const BRIDGE_PREFIX: &str = "window.__tldrawExport.";

/// How one mocked session behaves.
#[derive(Debug, Clone)]
pub(crate) struct MockScript {
    pub document: JsonValue,
    /// Zero-based download indexes that end in a cancel event.
    pub cancel: Vec<usize>,
    /// Zero-based download indexes that start but never finish.
    pub stall: Vec<usize>,
    pub fail_navigation: bool,
    pub timeout: Duration,
}

impl MockScript {
    pub fn new(document: JsonValue) -> Self {
        Self {
            document,
            cancel: Vec::new(),
            stall: Vec::new(),
            fail_navigation: false,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn canceling(mut self, download: usize) -> Self {
        self.cancel.push(download);
        self
    }

    /// Leave `download` without a terminal event and shorten the timeout so
    /// the wait gives up quickly.
    pub fn stalling(mut self, download: usize) -> Self {
        self.stall.push(download);
        self.timeout = Duration::from_millis(500);
        self
    }
}

/// Document with `pages` of `(id, name, frames)`, where frames are `(id, name)`.
pub(crate) fn document_json(pages: &[(&str, &str, &[(&str, &str)])]) -> JsonValue {
    let mut shape_count = 0;
    let pages: Vec<JsonValue> = pages
        .iter()
        .map(|(id, name, frames)| {
            shape_count += frames.len() + 1;
            json!({
                "id": id,
                "name": name,
                "frames": frames
                    .iter()
                    .map(|(id, name)| json!({ "id": id, "name": name }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({ "pages": pages, "shapeCount": shape_count })
}

pub(crate) fn empty_document_json() -> JsonValue {
    json!({ "pages": [{ "id": "page:page", "name": "Page 1", "frames": [] }], "shapeCount": 0 })
}

#[derive(Debug)]
struct MockState {
    script: MockScript,
    downloads_dir: PathBuf,
    events: broadcast::Sender<DownloadEvent>,
    calls: Arc<StdMutex<Vec<String>>>,
    current_page: StdMutex<String>,
    selection: StdMutex<String>,
    downloads: StdMutex<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct MockChannel {
    state: Arc<MockState>,
}

impl MockChannel {
    pub fn new(script: MockScript, downloads_dir: impl Into<PathBuf>) -> Self {
        Self::with_calls(script, downloads_dir, Arc::default())
    }

    fn with_calls(
        script: MockScript,
        downloads_dir: impl Into<PathBuf>,
        calls: Arc<StdMutex<Vec<String>>>,
    ) -> Self {
        let first_page = script.document["pages"][0]["id"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let (events, _) = broadcast::channel(64);
        Self {
            state: Arc::new(MockState {
                script,
                downloads_dir: downloads_dir.into(),
                events,
                calls,
                current_page: StdMutex::new(first_page),
                selection: StdMutex::new(String::new()),
                downloads: StdMutex::new(0),
            }),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn current_page(&self) -> String {
        self.state.current_page.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.state.calls.lock().unwrap().push(call.into());
    }

    fn argument(expression: &str) -> String {
        let raw = expression
            .split_once('(')
            .and_then(|(_, rest)| rest.strip_suffix(')'))
            .unwrap_or_default();
        serde_json::from_str::<String>(raw).unwrap_or_default()
    }

    fn payload(&self, method: &str, expression: &str) -> Vec<u8> {
        if method == "downloadDocument" {
            return b"{\n  \"records\": []\n}\n".to_vec();
        }
        let selection = self.state.selection.lock().unwrap().clone();
        let page = self.current_page();
        if expression.contains("\"format\":\"svg\"") {
            format!(
                "<svg xmlns=\"http://www.w3.org/2000/svg\">\n<style>.shape {{ fill: red; }}</style>\n<g data-page=\"{page}\" data-selection=\"{selection}\"/>\n</svg>\n"
            )
            .into_bytes()
        } else {
            format!("{page}|{selection}").into_bytes()
        }
    }

    fn download(&self, method: &str, expression: &str) -> Result<JsonValue, ChannelError> {
        let index = {
            let mut downloads = self.state.downloads.lock().unwrap();
            let index = *downloads;
            *downloads += 1;
            index
        };
        let guid = format!("download-{index}");
        let send = |event| {
            let _ = self.state.events.send(event);
        };

        send(DownloadEvent::Started {
            guid: guid.clone(),
            suggested_filename: Some("export".to_string()),
        });
        if self.state.script.stall.contains(&index) {
            return Ok(JsonValue::String("export".to_string()));
        }
        if self.state.script.cancel.contains(&index) {
            send(DownloadEvent::Canceled { guid });
        } else {
            std::fs::write(
                self.state.downloads_dir.join(&guid),
                self.payload(method, expression),
            )?;
            send(DownloadEvent::Progress {
                guid: guid.clone(),
                received_bytes: 1,
                total_bytes: 1,
            });
            send(DownloadEvent::Completed { guid });
        }
        Ok(JsonValue::String("export".to_string()))
    }
}

#[async_trait]
impl AutomationChannel for MockChannel {
    async fn navigate(&self, url: &str) -> Result<(), ChannelError> {
        self.record(format!("navigate {url}"));
        if self.state.script.fail_navigation {
            return Err(ChannelError::Message(format!("net::ERR_FAILED at {url}")));
        }
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<JsonValue, ChannelError> {
        if expression == EDITOR_READY || expression == BRIDGE_READY {
            self.record("wait");
            return Ok(JsonValue::Bool(true));
        }
        if expression == EDITOR_BRIDGE_SCRIPT {
            self.record("inject");
            return Ok(JsonValue::Null);
        }

        let Some(call) = expression.strip_prefix(BRIDGE_PREFIX) else {
            return Err(ChannelError::Unsupported(expression.to_string()));
        };
        let method = call.split('(').next().unwrap_or_default().to_string();
        match method.as_str() {
            "structure" => {
                self.record("structure");
                Ok(self.state.script.document.clone())
            }
            "currentPage" => {
                self.record("currentPage");
                Ok(JsonValue::String(self.current_page()))
            }
            "setCurrentPage" => {
                let page = Self::argument(call);
                self.record(format!("setCurrentPage {page}"));
                *self.state.current_page.lock().unwrap() = page.clone();
                Ok(JsonValue::String(page))
            }
            "selectAll" => {
                self.record("selectAll");
                *self.state.selection.lock().unwrap() = "all".to_string();
                Ok(json!(1))
            }
            "selectFrame" => {
                let frame = Self::argument(call);
                self.record(format!("selectFrame {frame}"));
                *self.state.selection.lock().unwrap() = frame;
                Ok(json!(1))
            }
            "downloadImage" | "downloadDocument" => {
                self.record(format!("issue {method}"));
                self.download(&method, call)
            }
            _ => Err(ChannelError::Unsupported(method)),
        }
    }

    fn operation_timeout(&self) -> Duration {
        self.state.script.timeout
    }

    async fn arm_download(&self) -> Result<DownloadTicket, ChannelError> {
        self.record("arm");
        Ok(DownloadTicket::new(
            self.state.events.subscribe(),
            &self.state.downloads_dir,
            self.operation_timeout(),
        ))
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.record("close");
        Ok(())
    }
}

/// Launcher handing out one scripted [`MockChannel`] per launch.
#[derive(Debug, Default)]
pub(crate) struct MockLauncher {
    scripts: StdMutex<VecDeque<MockScript>>,
    launches: StdMutex<Vec<LaunchRequest>>,
    calls: Arc<StdMutex<Vec<String>>>,
}

impl MockLauncher {
    pub fn new(scripts: impl IntoIterator<Item = MockScript>) -> Self {
        Self {
            scripts: StdMutex::new(scripts.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Every channel call across every launched session, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.launches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelLauncher for MockLauncher {
    type Channel = MockChannel;

    async fn launch(&self, request: &LaunchRequest) -> Result<MockChannel, ChannelError> {
        self.launches.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ChannelError::Message("no scripted session left".to_string()))?;
        Ok(MockChannel::with_calls(
            script,
            &request.downloads_dir,
            Arc::clone(&self.calls),
        ))
    }
}

/// Position of the first call equal to `call`.
pub(crate) fn position(calls: &[String], call: &str) -> Option<usize> {
    calls.iter().position(|recorded| recorded == call)
}

pub(crate) fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|path| Path::file_name(path))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}
