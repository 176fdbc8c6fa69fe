//! Pool snapshots

use rados_native::SNAP_HEAD;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::error::{RadosError, Result};
use crate::ioctx::PoolContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SnapId(pub u64);

impl SnapId {
    /// The live object state
    pub const HEAD: SnapId = SnapId(SNAP_HEAD);

    pub fn is_head(self) -> bool {
        self == Self::HEAD
    }
}

impl fmt::Display for SnapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_head() {
            write!(f, "head")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapInfo {
    pub id: SnapId,
    pub name: String,
    pub pool: String,
    pub timestamp: SystemTime,
}

/// Snapshot operations on one pool context
pub struct SnapshotManager<'p, 'c> {
    pool: &'p PoolContext<'c>,
}

impl<'p, 'c> SnapshotManager<'p, 'c> {
    pub fn new(pool: &'p PoolContext<'c>) -> Self {
        Self { pool }
    }

    fn io(&self, op: &str) -> Result<rados_native::IoCtxId> {
        self.pool.registry().io(op)
    }

    /// Snapshot the whole pool under `name`
    pub fn create(&self, name: &str) -> Result<SnapId> {
        let io = self.io("snap create")?;
        let native = self.pool.registry().native();
        native
            .snap_create(io, name)
            .map_err(|code| RadosError::snapshot("snap create", name, code))?;
        let id = native
            .snap_lookup(io, name)
            .map_err(|code| RadosError::snapshot("snap create", name, code))?;
        debug!("Created snapshot {} ({}) in pool {}", name, id, self.pool.name());
        Ok(SnapId(id))
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let io = self.io("snap remove")?;
        self.pool
            .registry()
            .native()
            .snap_remove(io, name)
            .map_err(|code| RadosError::snapshot("snap remove", name, code))?;
        debug!("Removed snapshot {} from pool {}", name, self.pool.name());
        Ok(())
    }

    /// Restore `object` to its state in snapshot `name`
    pub fn rollback(&self, name: &str, object: &str) -> Result<()> {
        let io = self.io("snap rollback")?;
        let native = self.pool.registry().native();
        native.snap_rollback(io, object, name).map_err(|code| {
            if code != -libc::ENOENT {
                return RadosError::io("snap rollback", object, code);
            }
            // ENOENT covers the pool, the snapshot and the object alike
            let pool_gone = self
                .pool
                .cluster()
                .pool_lookup(self.pool.name())
                .map_or(true, |id| id != self.pool.id());
            if pool_gone {
                RadosError::pool("snap rollback", self.pool.name(), code)
            } else if native.snap_lookup(io, name).is_err() {
                RadosError::snapshot("snap rollback", name, code)
            } else {
                RadosError::io("snap rollback", object, code)
            }
        })
    }

    /// Direct subsequent reads at `snap`; [`SnapId::HEAD`] goes back to live data
    ///
    /// While a snapshot is selected, writes fail with `EROFS`.
    pub fn select_read(&self, snap: SnapId) -> Result<()> {
        let io = self.io("snap set read")?;
        let native = self.pool.registry().native();
        if !snap.is_head() {
            native
                .snap_get_name(io, snap.0)
                .map_err(|code| RadosError::snapshot("snap set read", &snap.to_string(), code))?;
        }
        native.snap_set_read(io, snap.0);
        self.pool.set_read_snap(snap);
        debug!("Reading pool {} at snapshot {}", self.pool.name(), snap);
        Ok(())
    }

    pub fn current_read(&self) -> SnapId {
        self.pool.read_snap()
    }

    pub fn lookup(&self, name: &str) -> Result<SnapId> {
        let io = self.io("snap lookup")?;
        self.pool
            .registry()
            .native()
            .snap_lookup(io, name)
            .map(SnapId)
            .map_err(|code| RadosError::snapshot("snap lookup", name, code))
    }

    pub fn name(&self, snap: SnapId) -> Result<String> {
        let io = self.io("snap get name")?;
        self.pool
            .registry()
            .native()
            .snap_get_name(io, snap.0)
            .map_err(|code| RadosError::snapshot("snap get name", &snap.to_string(), code))
    }

    /// Every snapshot of the pool, oldest first
    pub fn list(&self) -> Result<Vec<SnapInfo>> {
        let io = self.io("snap list")?;
        let native = self.pool.registry().native();
        let mut ids = native
            .snap_list(io)
            .map_err(|code| RadosError::io("snap list", self.pool.name(), code))?;
        ids.sort_unstable();

        ids.into_iter()
            .map(|id| -> Result<SnapInfo> {
                let label = id.to_string();
                let name = native
                    .snap_get_name(io, id)
                    .map_err(|code| RadosError::snapshot("snap list", &label, code))?;
                let stamp = native
                    .snap_get_stamp(io, id)
                    .map_err(|code| RadosError::snapshot("snap list", &label, code))?;
                Ok(SnapInfo {
                    id: SnapId(id),
                    name,
                    pool: self.pool.name().to_string(),
                    timestamp: UNIX_EPOCH + Duration::from_secs(stamp.max(0) as u64),
                })
            })
            .collect()
    }
}
