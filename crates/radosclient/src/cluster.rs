//! Cluster handle lifecycle
//!
//! A `ClusterHandle` walks through `Uninitialized -> Created -> Connected ->
//! ShutDown`. State-changing calls take `&mut self`, so the borrow checker
//! refuses to shut a handle down while any [`PoolContext`] or
//! [`AdminCommandChannel`] borrowed from it is still alive.

use rados_native::{ClusterId, ClusterStat, RadosNative};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::command::AdminCommandChannel;
use crate::error::{RadosError, Result};
use crate::ioctx::PoolContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Uninitialized,
    Created,
    Connected,
    ShutDown,
}

/// Native library version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: i32,
    pub minor: i32,
    pub patch: i32,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Connection to one cluster
///
/// # Example
///
/// ```
/// use radosclient::ClusterHandle;
/// use rados_native::MemRados;
/// use std::sync::Arc;
///
/// let mut cluster = ClusterHandle::new(Arc::new(MemRados::new().unwrap()));
/// cluster.create("ceph", "client.admin", 0).unwrap();
/// cluster.set_config("mon host", "127.0.0.1:6789").unwrap();
/// cluster.set_config("mem pools", "data").unwrap();
/// cluster.connect().unwrap();
///
/// {
///     let pool = cluster.open_pool("data").unwrap();
///     pool.write_full("greeting", b"hello").unwrap();
/// }
///
/// cluster.shutdown().unwrap();
/// ```
pub struct ClusterHandle {
    native: Arc<dyn RadosNative>,
    id: Option<ClusterId>,
    state: ClusterState,
    cluster_name: String,
    user_name: String,
    conf_path: Option<PathBuf>,
}

impl ClusterHandle {
    pub fn new(native: Arc<dyn RadosNative>) -> Self {
        Self {
            native,
            id: None,
            state: ClusterState::Uninitialized,
            cluster_name: String::new(),
            user_name: String::new(),
            conf_path: None,
        }
    }

    /// Create the native handle
    ///
    /// `flags` is passed to the native layer unchanged.
    pub fn create(&mut self, cluster_name: &str, user_name: &str, flags: u64) -> Result<()> {
        if self.state != ClusterState::Uninitialized {
            return Err(RadosError::InvalidState(format!(
                "create on a {:?} cluster handle",
                self.state
            )));
        }

        let id = self
            .native
            .create(cluster_name, user_name, flags)
            .map_err(|code| RadosError::connection("create", code))?;

        debug!("Created cluster handle {} for {} as {}", id, cluster_name, user_name);
        self.id = Some(id);
        self.state = ClusterState::Created;
        self.cluster_name = cluster_name.to_string();
        self.user_name = user_name.to_string();
        Ok(())
    }

    fn created_id(&self, op: &str) -> Result<ClusterId> {
        match (self.state, self.id) {
            (ClusterState::Created, Some(id)) => Ok(id),
            _ => Err(RadosError::InvalidState(format!(
                "{} requires a created, unconnected handle (state: {:?})",
                op, self.state
            ))),
        }
    }

    /// Read a configuration file into the handle
    pub fn load_config(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let id = self.created_id("load_config")?;
        self.native
            .conf_read_file(id, path)
            .map_err(|code| RadosError::config("load_config", code))?;
        debug!("Loaded configuration from {}", path.display());
        self.conf_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Override a single configuration option
    pub fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        let id = self.created_id("set_config")?;
        self.native
            .conf_set(id, key, value)
            .map_err(|code| RadosError::config("set_config", code))
    }

    pub fn get_config(&self, key: &str) -> Result<String> {
        let id = match (self.state, self.id) {
            (ClusterState::Created | ClusterState::Connected, Some(id)) => id,
            _ => {
                return Err(RadosError::InvalidState(format!(
                    "get_config on a {:?} cluster handle",
                    self.state
                )))
            }
        };
        self.native
            .conf_get(id, key)
            .map_err(|code| RadosError::config("get_config", code))
    }

    /// Connect to the cluster
    ///
    /// A failed attempt leaves the handle in `Created`, so it can be
    /// reconfigured and retried.
    pub fn connect(&mut self) -> Result<()> {
        let id = match (self.state, self.id) {
            (ClusterState::Created, Some(id)) => id,
            _ => {
                return Err(RadosError::InvalidState(format!(
                    "connect on a {:?} cluster handle",
                    self.state
                )))
            }
        };

        self.native
            .connect(id)
            .map_err(|code| RadosError::connection("connect", code))?;

        self.state = ClusterState::Connected;
        debug!("Connected {} to cluster {}", id, self.cluster_name);
        Ok(())
    }

    /// Release the native connection
    ///
    /// Valid from `Created` or `Connected`; any later call returns
    /// `InvalidState`.
    pub fn shutdown(&mut self) -> Result<()> {
        match (self.state, self.id) {
            (ClusterState::Created | ClusterState::Connected, Some(id)) => {
                self.native.shutdown(id);
                self.state = ClusterState::ShutDown;
                debug!("Shut down {}", id);
                Ok(())
            }
            _ => Err(RadosError::InvalidState(format!(
                "shutdown on a {:?} cluster handle",
                self.state
            ))),
        }
    }

    pub fn state(&self) -> ClusterState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClusterState::Connected
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn conf_path(&self) -> Option<&Path> {
        self.conf_path.as_deref()
    }

    pub fn version(&self) -> Version {
        let (major, minor, patch) = self.native.version();
        Version {
            major,
            minor,
            patch,
        }
    }

    pub(crate) fn native(&self) -> &Arc<dyn RadosNative> {
        &self.native
    }

    /// Native id of a connected handle
    pub(crate) fn connected_id(&self, op: &'static str) -> Result<ClusterId> {
        match (self.state, self.id) {
            (ClusterState::Connected, Some(id)) => Ok(id),
            _ => Err(RadosError::not_connected(op)),
        }
    }

    pub fn stat(&self) -> Result<ClusterStat> {
        let id = self.connected_id("cluster stat")?;
        self.native
            .cluster_stat(id)
            .map_err(|code| RadosError::connection("cluster stat", code))
    }

    pub fn fsid(&self) -> Result<String> {
        let id = self.connected_id("fsid")?;
        self.native
            .cluster_fsid(id)
            .map_err(|code| RadosError::connection("fsid", code))
    }

    // ===== Pool administration =====

    pub fn pool_list(&self) -> Result<Vec<String>> {
        let id = self.connected_id("pool list")?;
        self.native
            .pool_list(id)
            .map_err(|code| RadosError::connection("pool list", code))
    }

    pub fn pool_create(&self, name: &str) -> Result<()> {
        let id = self.connected_id("pool create")?;
        self.native
            .pool_create(id, name)
            .map_err(|code| RadosError::pool("pool create", name, code))?;
        debug!("Created pool {}", name);
        Ok(())
    }

    pub fn pool_delete(&self, name: &str) -> Result<()> {
        let id = self.connected_id("pool delete")?;
        self.native
            .pool_delete(id, name)
            .map_err(|code| RadosError::pool("pool delete", name, code))?;
        debug!("Deleted pool {}", name);
        Ok(())
    }

    pub fn pool_lookup(&self, name: &str) -> Result<i64> {
        let id = self.connected_id("pool lookup")?;
        self.native
            .pool_lookup(id, name)
            .map_err(|code| RadosError::pool("pool lookup", name, code))
    }

    /// Open a pool context; shorthand for [`PoolContext::open`]
    pub fn open_pool(&self, name: &str) -> Result<PoolContext<'_>> {
        PoolContext::open(self, name)
    }

    /// Channel for administrative commands to monitors, OSDs and PGs
    pub fn admin(&self) -> AdminCommandChannel<'_> {
        AdminCommandChannel::new(self)
    }
}

impl fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterHandle")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("cluster_name", &self.cluster_name)
            .field("user_name", &self.user_name)
            .finish()
    }
}

impl Drop for ClusterHandle {
    fn drop(&mut self) {
        if matches!(self.state, ClusterState::Created | ClusterState::Connected) {
            if let Some(id) = self.id {
                debug!("Shutting down {} on drop", id);
                self.native.shutdown(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rados_native::MemRados;

    fn handle() -> ClusterHandle {
        ClusterHandle::new(Arc::new(MemRados::new().unwrap()))
    }

    #[test]
    fn test_create_then_shutdown_without_connect() {
        let mut cluster = handle();
        assert_eq!(cluster.state(), ClusterState::Uninitialized);
        cluster.create("ceph", "client.admin", 0).unwrap();
        assert_eq!(cluster.state(), ClusterState::Created);
        cluster.shutdown().unwrap();
        assert_eq!(cluster.state(), ClusterState::ShutDown);
    }

    #[test]
    fn test_state_guards() {
        let mut cluster = handle();
        assert_eq!(cluster.connect().unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(cluster.shutdown().unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(
            cluster.load_config("/etc/ceph/ceph.conf").unwrap_err().kind(),
            ErrorKind::InvalidState
        );

        cluster.create("ceph", "client.admin", 0).unwrap();
        assert_eq!(
            cluster.create("ceph", "client.admin", 0).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }

    #[test]
    fn test_failed_connect_is_retryable() {
        let mut cluster = handle();
        cluster.create("ceph", "client.admin", 0).unwrap();

        let err = cluster.connect().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(err.code(), Some(-libc::ENOENT));
        assert_eq!(cluster.state(), ClusterState::Created);

        cluster.set_config("mon_host", "127.0.0.1").unwrap();
        cluster.connect().unwrap();
        assert!(cluster.is_connected());
        assert_eq!(
            cluster.set_config("mon_host", "10.0.0.1").unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(cluster.get_config("mon host").unwrap(), "127.0.0.1");
    }

    #[test]
    fn test_requires_connection() {
        let mut cluster = handle();
        cluster.create("ceph", "client.admin", 0).unwrap();
        let err = cluster.stat().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(err.code(), None);
        assert!(cluster.open_pool("data").is_err());
    }

    #[test]
    fn test_version_in_any_state() {
        let cluster = handle();
        let version = cluster.version();
        assert!(version.major > 0);
        assert_eq!(version.to_string(), format!("{}.{}.{}", version.major, version.minor, version.patch));
    }
}
