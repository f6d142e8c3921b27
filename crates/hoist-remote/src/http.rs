use crate::config::DownloaderConfig;
use crate::transport::{Transfer, Transport};
use crate::RemoteError;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use hoist_schema::Resource;
use std::io::{self, Read};
use std::thread;
use std::time::Duration;
use tracing::debug;

const PUMP_CHUNK: usize = 16 * 1024;

/// Fetches resources from their `remote` URL.
///
/// - `HEAD <url>` for the size, from `Content-Length`
/// - `GET <url>` to stream the body
///
/// The read timeout bounds the wait for response headers and every gap
/// between body bytes, not the length of the whole transfer.
pub struct HttpTransport {
    agent: ureq::Agent,
    read_timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            read_timeout: None,
        }
    }

    pub fn from_config(config: &DownloaderConfig) -> Result<Self, RemoteError> {
        let proxy = match &config.proxy {
            Some(url) => Some(
                ureq::Proxy::new(url)
                    .map_err(|e| RemoteError::Config(format!("invalid proxy '{url}': {e}")))?,
            ),
            None => None,
        };
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_connect(Some(config.connect_timeout()))
            .timeout_recv_response(Some(config.read_timeout()))
            .proxy(proxy)
            .build()
            .into();
        Ok(Self {
            agent,
            read_timeout: Some(config.read_timeout()),
        })
    }

    pub(crate) fn head_url(&self, url: &str) -> Result<Option<u64>, RemoteError> {
        debug!("HEAD {url}");
        let resp = self.agent.head(url).call().map_err(|e| map_error(url, e))?;
        Ok(resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok()))
    }

    pub(crate) fn get_url(&self, url: &str) -> Result<Transfer, RemoteError> {
        debug!("GET {url}");
        let resp = self.agent.get(url).call().map_err(|e| map_error(url, e))?;
        let length = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let body = resp.into_body().into_reader();
        let reader: Box<dyn Read + Send> = match self.read_timeout {
            Some(idle) => Box::new(IdleTimeoutReader::new(body, idle)),
            None => Box::new(body),
        };
        Ok(Transfer { reader, length })
    }
}

/// Reader that fails once no bytes have arrived for `idle`.
///
/// A pump thread owns the inner reader and forwards chunks over a bounded
/// channel; it exits when the inner reader ends or this side is dropped.
struct IdleTimeoutReader {
    chunks: Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    offset: usize,
    idle: Duration,
}

impl IdleTimeoutReader {
    fn new(mut inner: impl Read + Send + 'static, idle: Duration) -> Self {
        let (tx, rx) = crossbeam::channel::bounded(4);
        thread::spawn(move || {
            let mut buf = vec![0u8; PUMP_CHUNK];
            loop {
                let chunk = match inner.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => Ok(buf[..n].to_vec()),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => Err(e),
                };
                let last = chunk.is_err();
                if tx.send(chunk).is_err() || last {
                    break;
                }
            }
        });
        Self {
            chunks: rx,
            pending: Vec::new(),
            offset: 0,
            idle,
        }
    }
}

impl Read for IdleTimeoutReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset == self.pending.len() {
            match self.chunks.recv_timeout(self.idle) {
                Ok(chunk) => {
                    self.pending = chunk?;
                    self.offset = 0;
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no data received for {:?}", self.idle),
                    ));
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.offset);
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn map_error(url: &str, err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::StatusCode(404) => RemoteError::NotFound(url.to_owned()),
        ureq::Error::StatusCode(code) => RemoteError::Http(format!("HTTP {code} for {url}")),
        ureq::Error::Io(e) => RemoteError::Io(e),
        other => RemoteError::Http(format!("{url}: {other}")),
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn probe_size(&self, resource: &Resource) -> Result<Option<u64>, RemoteError> {
        self.head_url(resource.remote())
    }

    fn open(&self, resource: &Resource) -> Result<Transfer, RemoteError> {
        self.get_url(resource.remote())
    }
}
