//! Static appbase server for hoist.
//!
//! Serves a published application directory over HTTP the way an updater
//! expects: `GET` streams a file, `HEAD` answers with its `Content-Length`,
//! anything outside the root is refused. Paths are percent-decoded and must
//! be plain relative resource paths.
//!
//! The [`TestServer`] helper starts a server on a random port for
//! integration testing, optionally throttled to simulate a slow mirror.

use hoist_schema::validate_resource_path;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, warn};

/// Serving options shared by every request.
#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    /// Pause before every chunk of a `GET` body.
    pub chunk_delay: Option<Duration>,
}

/// A directory served as an appbase.
pub struct AppRoot {
    root: PathBuf,
    options: ServeOptions,
    log: Mutex<Vec<String>>,
}

impl AppRoot {
    pub fn new(root: PathBuf, options: ServeOptions) -> Self {
        Self {
            root,
            options,
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a request URL onto a file below the root.
    pub fn resolve(&self, url: &str) -> Option<PathBuf> {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let decoded = decode_path(path.trim_start_matches('/'))?;
        validate_resource_path(&decoded).ok()?;
        Some(self.root.join(decoded))
    }

    /// Every request seen so far as `"METHOD /path"`.
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn record(&self, method: &Method, url: &str) {
        if let Ok(mut log) = self.log.lock() {
            log.push(format!("{method} {url}"));
        }
    }
}

/// Decode `%XX` escapes. Returns `None` for malformed escapes or non-UTF-8.
pub fn decode_path(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Reader that sleeps between reads.
struct Throttled<R> {
    inner: R,
    delay: Duration,
}

impl<R: Read> Read for Throttled<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::thread::sleep(self.delay);
        let cap = buf.len().min(4096);
        self.inner.read(&mut buf[..cap])
    }
}

fn respond_err(req: tiny_http::Request, code: u16, msg: &str) {
    let _ = req.respond(Response::from_string(msg).with_status_code(StatusCode(code)));
}

fn octet_stream() -> Vec<Header> {
    Header::from_bytes("Content-Type", "application/octet-stream")
        .map(|h| vec![h])
        .unwrap_or_default()
}

fn serve_file(app: &AppRoot, req: tiny_http::Request, path: &Path) {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            respond_err(req, 404, "not found");
            return;
        }
        Err(e) => {
            warn!("cannot open {}: {e}", path.display());
            respond_err(req, 500, "read error");
            return;
        }
    };
    let len = match file.metadata() {
        Ok(m) if m.is_file() => m.len() as usize,
        Ok(_) => {
            respond_err(req, 404, "not found");
            return;
        }
        Err(e) => {
            warn!("cannot stat {}: {e}", path.display());
            respond_err(req, 500, "read error");
            return;
        }
    };

    // tiny_http drops the body itself for HEAD, keeping Content-Length.
    let result = match app.options.chunk_delay {
        Some(delay) if *req.method() == Method::Get => {
            let body = Throttled { inner: file, delay };
            req.respond(Response::new(StatusCode(200), octet_stream(), body, Some(len), None))
        }
        _ => req.respond(Response::new(StatusCode(200), octet_stream(), file, Some(len), None)),
    };
    if let Err(e) = result {
        debug!("client went away while sending {}: {e}", path.display());
    }
}

/// Handle a single HTTP request.
pub fn handle_request(app: &AppRoot, req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");
    app.record(&method, &url);

    if url == "/health" && method == Method::Get {
        let _ = req.respond(Response::from_string(r#"{"status":"ok"}"#));
        return;
    }
    if !matches!(method, Method::Get | Method::Head) {
        respond_err(req, 405, "method not allowed");
        return;
    }
    match app.resolve(&url) {
        Some(path) => serve_file(app, req, &path),
        None => respond_err(req, 404, "not found"),
    }
}

/// Start the server loop, blocking the current thread.
pub fn run_server(app: &AppRoot, addr: &str) -> std::io::Result<()> {
    let server = Server::http(addr).map_err(std::io::Error::other)?;
    for request in server.incoming_requests() {
        handle_request(app, request);
    }
    Ok(())
}

/// A server on `127.0.0.1` with a random port, running on a background
/// thread until dropped.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    app: Arc<AppRoot>,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    pub fn start(root: PathBuf) -> Self {
        Self::start_with(root, ServeOptions::default())
    }

    pub fn start_with(root: PathBuf, options: ServeOptions) -> Self {
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let app = Arc::new(AppRoot::new(root, options));
        let srv = Arc::clone(&server);
        let served = Arc::clone(&app);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                let served = Arc::clone(&served);
                // Requests are handled concurrently so a throttled body does
                // not stall other transfers.
                std::thread::spawn(move || handle_request(&served, request));
            }
        });

        Self {
            url,
            port,
            app,
            server,
            _handle: handle,
        }
    }

    pub fn root(&self) -> &Path {
        self.app.root()
    }

    pub fn requests(&self) -> Vec<String> {
        self.app.requests()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}
