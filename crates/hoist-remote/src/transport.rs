use crate::RemoteError;
use hoist_schema::Resource;
use std::io::Read;
use std::time::Duration;

/// An open download stream.
pub struct Transfer {
    pub reader: Box<dyn Read + Send>,
    /// Length announced by the source, when it announced one.
    pub length: Option<u64>,
}

/// A transfer that has not delivered `min_bytes` after `grace` is abandoned
/// in favour of the transport's fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlowTransferPolicy {
    pub grace: Duration,
    pub min_bytes: u64,
}

impl Default for SlowTransferPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            min_bytes: 64 * 1024,
        }
    }
}

/// A way of fetching resources.
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Size of the resource in bytes, `None` when the source does not say.
    fn probe_size(&self, resource: &Resource) -> Result<Option<u64>, RemoteError>;

    fn open(&self, resource: &Resource) -> Result<Transfer, RemoteError>;

    /// Transport to switch to when this one fails or is too slow.
    fn fallback(&self) -> Option<&dyn Transport> {
        None
    }

    fn slow_transfer_policy(&self) -> Option<SlowTransferPolicy> {
        None
    }
}
