//! Local asset host.
//!
//! Serves the editor's static bundle on an ephemeral loopback port so a local
//! sketch can be opened without network access. When a document is attached,
//! its raw `.tldr` text is exposed at `/tldr-data` for the bundle to fetch on
//! load. Requests are answered by a dedicated worker thread.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use percent_encoding::percent_decode_str;
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tokio::sync::oneshot;

use crate::logging::ExportLogger;

/// Path the bundle fetches the initial document from.
pub const DOCUMENT_PATH: &str = "tldr-data";

const CATEGORY: &str = "asset-host";

mod mime {
    pub const HTML: &str = "text/html; charset=utf-8";
    pub const PLAIN: &str = "text/plain; charset=utf-8";
    pub const CSS: &str = "text/css; charset=utf-8";
    pub const JAVASCRIPT: &str = "text/javascript; charset=utf-8";
    pub const JSON: &str = "application/json";
    pub const SVG: &str = "image/svg+xml";
    pub const PNG: &str = "image/png";
    pub const JPEG: &str = "image/jpeg";
    pub const WEBP: &str = "image/webp";
    pub const ICO: &str = "image/x-icon";
    pub const WOFF: &str = "font/woff";
    pub const WOFF2: &str = "font/woff2";
    pub const TTF: &str = "font/ttf";
    pub const WASM: &str = "application/wasm";
    pub const OCTET_STREAM: &str = "application/octet-stream";

    pub fn from_path(path: &std::path::Path) -> &'static str {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("html" | "htm") => HTML,
            Some("css") => CSS,
            Some("js" | "mjs" | "cjs") => JAVASCRIPT,
            Some("json" | "map") => JSON,
            Some("svg") => SVG,
            Some("png") => PNG,
            Some("jpg" | "jpeg") => JPEG,
            Some("webp") => WEBP,
            Some("ico") => ICO,
            Some("woff") => WOFF,
            Some("woff2") => WOFF2,
            Some("ttf") => TTF,
            Some("wasm") => WASM,
            Some("txt" | "tldr") => PLAIN,
            _ => OCTET_STREAM,
        }
    }
}

#[derive(Debug, Error)]
pub enum AssetHostError {
    #[error("editor bundle not found at {0}")]
    MissingBundle(PathBuf),
    #[error("failed to bind asset host: {0}")]
    Bind(String),
    #[error("asset host worker exited before reporting its address")]
    WorkerGone,
    #[error("asset host has not been started")]
    NotStarted,
    #[error("asset host is already running")]
    AlreadyStarted,
    #[error("asset host worker panicked")]
    WorkerPanicked,
}

struct RunningHost {
    server: Arc<Server>,
    addr: SocketAddr,
    worker: JoinHandle<()>,
}

/// Static file server for one export session.
pub struct LocalAssetHost {
    root: PathBuf,
    document: Option<Arc<str>>,
    logger: Arc<ExportLogger>,
    running: Option<RunningHost>,
    closed: bool,
}

impl std::fmt::Debug for LocalAssetHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAssetHost")
            .field("root", &self.root)
            .field("document", &self.document.as_ref().map(|doc| doc.len()))
            .field("addr", &self.running.as_ref().map(|host| host.addr))
            .field("closed", &self.closed)
            .finish()
    }
}

impl LocalAssetHost {
    pub fn new(
        root: impl Into<PathBuf>,
        document: Option<String>,
        logger: Arc<ExportLogger>,
    ) -> Self {
        Self {
            root: root.into(),
            document: document.map(Arc::from),
            logger,
            running: None,
            closed: false,
        }
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|host| host.addr)
    }

    /// Bind an ephemeral loopback port and start answering requests.
    ///
    /// Resolves only after the worker has bound and reported its address.
    pub async fn start(&mut self) -> Result<String, AssetHostError> {
        if self.running.is_some() || self.closed {
            return Err(AssetHostError::AlreadyStarted);
        }
        if !self.root.is_dir() {
            return Err(AssetHostError::MissingBundle(self.root.clone()));
        }

        let (bound_tx, bound_rx) = oneshot::channel();
        let root = self.root.clone();
        let document = self.document.clone();
        let logger = Arc::clone(&self.logger);

        let worker = thread::spawn(move || {
            let server = match Server::http("127.0.0.1:0") {
                Ok(server) => Arc::new(server),
                Err(err) => {
                    let _ = bound_tx.send(Err(AssetHostError::Bind(err.to_string())));
                    return;
                }
            };
            let Some(addr) = server.server_addr().to_ip() else {
                let _ = bound_tx.send(Err(AssetHostError::Bind(
                    "listener has no ip address".to_string(),
                )));
                return;
            };
            if bound_tx.send(Ok((Arc::clone(&server), addr))).is_err() {
                return;
            }

            for request in server.incoming_requests() {
                let url = request.url().to_string();
                if let Err(err) = handle_request(request, &root, document.as_deref()) {
                    logger.debug(
                        format!("Failed to answer {url}: {err}"),
                        Some(CATEGORY),
                        None,
                    );
                }
            }
        });

        let (server, addr) = bound_rx.await.map_err(|_| AssetHostError::WorkerGone)??;
        self.running = Some(RunningHost {
            server,
            addr,
            worker,
        });

        let href = format!("http://{addr}/");
        self.logger
            .debug(format!("Serving editor bundle at {href}"), Some(CATEGORY), None);
        Ok(href)
    }

    /// Stop the worker. Fails before [`start`](Self::start); a second call is a no-op.
    pub async fn close(&mut self) -> Result<(), AssetHostError> {
        let Some(running) = self.running.take() else {
            return if self.closed {
                Ok(())
            } else {
                Err(AssetHostError::NotStarted)
            };
        };
        self.closed = true;

        running.server.unblock();
        tokio::task::spawn_blocking(move || running.worker.join())
            .await
            .map_err(|_| AssetHostError::WorkerPanicked)?
            .map_err(|_| AssetHostError::WorkerPanicked)?;
        self.logger
            .debug("Asset host stopped", Some(CATEGORY), None);
        Ok(())
    }
}

fn handle_request(request: Request, root: &Path, document: Option<&str>) -> std::io::Result<()> {
    if !matches!(request.method(), Method::Get | Method::Head) {
        return send(request, 405, mime::PLAIN, b"405 Method Not Allowed".to_vec());
    }

    let path = normalize_url(request.url());
    if path == DOCUMENT_PATH {
        return match document {
            Some(document) => send(request, 200, mime::PLAIN, document.as_bytes().to_vec()),
            None => not_found(request),
        };
    }

    match resolve_path(&path, root) {
        Some(file) => {
            let body = std::fs::read(&file)?;
            send(request, 200, mime::from_path(&file), body)
        }
        None if path == "favicon.ico" => send(request, 200, mime::ICO, Vec::new()),
        None => not_found(request),
    }
}

fn not_found(request: Request) -> std::io::Result<()> {
    send(request, 404, mime::PLAIN, b"404 Not Found".to_vec())
}

fn send(
    request: Request,
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
) -> std::io::Result<()> {
    let mut response = Response::from_data(body).with_status_code(StatusCode(status));
    if let Ok(header) = Header::from_bytes("Content-Type", content_type) {
        response.add_header(header);
    }
    request.respond(response)
}

/// Decode the request path, drop the query string, and trim slashes.
fn normalize_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_default();
    decoded.trim_matches('/').to_string()
}

/// Map a normalized request path to a file under `root`, serving
/// `index.html` for directories and refusing anything outside `root`.
fn resolve_path(path: &str, root: &Path) -> Option<PathBuf> {
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return None;
    }

    let canonical = root.join(path).canonicalize().ok()?;
    let root = root.canonicalize().ok()?;
    if !canonical.starts_with(&root) {
        return None;
    }

    if canonical.is_file() {
        return Some(canonical);
    }
    let index = canonical.join("index.html");
    index.is_file().then_some(index)
}
