use crate::gc::{GarbageCollector, GcReport, Retention};
use crate::layout::{CacheLayout, Sharding};
use tracing::debug;

/// Runs the collector around one population of a cache.
///
/// With a positive retention, entries touched by this launch must survive,
/// so collection happens in [`finish`](Self::finish). A non-positive
/// retention empties the cache up front in [`begin`](Self::begin) and the
/// launch repopulates it.
pub struct CacheSession {
    gc: GarbageCollector,
    sharding: Sharding,
    retention: Retention,
}

impl CacheSession {
    pub fn begin(layout: &CacheLayout, retention: Retention) -> (Self, Option<GcReport>) {
        let session = Self {
            gc: GarbageCollector::new(layout.root()),
            sharding: layout.sharding(),
            retention,
        };
        let report = retention.is_unconditional().then(|| {
            debug!("clearing {} before population", layout.root().display());
            session.run()
        });
        (session, report)
    }

    pub fn finish(self) -> Option<GcReport> {
        (!self.retention.is_unconditional()).then(|| self.run())
    }

    fn run(&self) -> GcReport {
        match self.sharding {
            Sharding::Prefix => self.gc.collect(self.retention),
            Sharding::Full => self.gc.collect_native(self.retention),
        }
    }
}
