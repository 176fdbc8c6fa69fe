//! Pool I/O contexts
//!
//! A `PoolContext` borrows the [`ClusterHandle`] it was opened from, so it
//! can never outlive the connection. Completion handles in turn borrow the
//! context's [`CompletionRegistry`], which keeps `close` from running while
//! any of them is alive.

use rados_native::SNAP_HEAD;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::cluster::ClusterHandle;
use crate::completion::CompletionRegistry;
use crate::error::{RadosError, Result};
use crate::snapshot::{SnapId, SnapshotManager};

/// How long `close` waits for operations of dropped handles to settle
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// I/O context bound to one pool
pub struct PoolContext<'c> {
    cluster: &'c ClusterHandle,
    name: String,
    pool_id: i64,
    read_snap: AtomicU64,
    registry: CompletionRegistry,
}

impl<'c> PoolContext<'c> {
    /// Open a context on `name`
    ///
    /// Fails with `PoolNotFound` for unknown pools and with a connection
    /// error when the cluster handle is not connected.
    pub fn open(cluster: &'c ClusterHandle, name: &str) -> Result<Self> {
        let cluster_id = cluster.connected_id("open pool")?;
        let native = cluster.native().clone();

        let io = native
            .ioctx_create(cluster_id, name)
            .map_err(|code| RadosError::pool("open pool", name, code))?;
        let pool_id = match native.ioctx_pool_id(io) {
            Ok(id) => id,
            Err(code) => {
                native.ioctx_destroy(io);
                return Err(RadosError::pool("open pool", name, code));
            }
        };

        debug!("Opened pool {} (id {}) as {}", name, pool_id, io);
        Ok(Self {
            cluster,
            name: name.to_string(),
            pool_id,
            read_snap: AtomicU64::new(SNAP_HEAD),
            registry: CompletionRegistry::new(native, io, name),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> i64 {
        self.pool_id
    }

    pub fn cluster(&self) -> &'c ClusterHandle {
        self.cluster
    }

    pub fn is_open(&self) -> bool {
        self.registry.is_open()
    }

    /// Outstanding asynchronous operations of this context
    pub fn completions(&self) -> &CompletionRegistry {
        &self.registry
    }

    pub fn snapshots(&self) -> SnapshotManager<'_, 'c> {
        SnapshotManager::new(self)
    }

    pub(crate) fn registry(&self) -> &CompletionRegistry {
        &self.registry
    }

    pub(crate) fn read_snap(&self) -> SnapId {
        SnapId(self.read_snap.load(Ordering::Acquire))
    }

    pub(crate) fn set_read_snap(&self, snap: SnapId) {
        self.read_snap.store(snap.0, Ordering::Release);
    }

    /// Close the context, waiting up to [`DEFAULT_CLOSE_TIMEOUT`]
    pub fn close(&mut self) -> Result<()> {
        self.close_within(DEFAULT_CLOSE_TIMEOUT)
    }

    /// Close the context
    ///
    /// Operations whose handles were dropped while pending get `timeout` to
    /// settle. The context is closed either way. Leftovers that are still
    /// queued are canceled, running ones are leaked, and both are reported
    /// as `Timeout`.
    pub fn close_within(&mut self, timeout: Duration) -> Result<()> {
        let io = self.registry.io("close")?;
        let settled = self.registry.shut(timeout);
        self.registry.native().ioctx_destroy(io);
        debug!("Closed pool {} ({})", self.name, io);
        settled
    }
}

impl fmt::Debug for PoolContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolContext")
            .field("name", &self.name)
            .field("pool_id", &self.pool_id)
            .field("open", &self.is_open())
            .field("read_snap", &self.read_snap())
            .finish()
    }
}

impl Drop for PoolContext<'_> {
    fn drop(&mut self) {
        if !self.is_open() {
            return;
        }
        if let Err(e) = self.close() {
            warn!("Closing pool {} on drop: {}", self.name, e);
        }
    }
}
