use crate::http::HttpTransport;
use crate::transport::{SlowTransferPolicy, Transfer, Transport};
use crate::RemoteError;
use hoist_schema::{encode_path, Resource};
use tracing::debug;

/// Fetches resources from peer mirrors that serve the same relative paths
/// as the appbase, falling back to the appbase itself over HTTP.
pub struct PeerTransport {
    peers: Vec<String>,
    client: HttpTransport,
    fallback: HttpTransport,
    policy: SlowTransferPolicy,
}

impl PeerTransport {
    pub fn new(
        peers: Vec<String>,
        client: HttpTransport,
        fallback: HttpTransport,
        policy: SlowTransferPolicy,
    ) -> Self {
        let peers = peers
            .into_iter()
            .map(|p| p.trim_end_matches('/').to_owned())
            .collect();
        Self {
            peers,
            client,
            fallback,
            policy,
        }
    }

    fn peer_urls<'a>(&'a self, resource: &Resource) -> impl Iterator<Item = String> + 'a {
        let path = encode_path(resource.path());
        self.peers.iter().map(move |base| format!("{base}/{path}"))
    }

    /// Try each peer in order, returning the first success or the last error.
    fn first_peer<T>(
        &self,
        resource: &Resource,
        op: impl Fn(&str) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let mut last = RemoteError::NotFound(format!("no peer has {}", resource.path()));
        for url in self.peer_urls(resource) {
            match op(&url) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!("peer {url} failed: {e}");
                    last = e;
                }
            }
        }
        Err(last)
    }
}

impl Transport for PeerTransport {
    fn name(&self) -> &str {
        "peer"
    }

    fn probe_size(&self, resource: &Resource) -> Result<Option<u64>, RemoteError> {
        self.first_peer(resource, |url| self.client.head_url(url))
    }

    fn open(&self, resource: &Resource) -> Result<Transfer, RemoteError> {
        self.first_peer(resource, |url| self.client.get_url(url))
    }

    fn fallback(&self) -> Option<&dyn Transport> {
        Some(&self.fallback)
    }

    fn slow_transfer_policy(&self) -> Option<SlowTransferPolicy> {
        Some(self.policy)
    }
}
