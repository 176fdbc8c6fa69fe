//! In-process simulated cluster
//!
//! `MemRados` implements [`RadosNative`] without any network: objects,
//! attributes and pool snapshots live in memory, administrative commands are
//! answered locally, and asynchronous operations run on a private tokio
//! runtime with configurable commit and flush latencies.
//!
//! Handles created with the same cluster name share one simulated cluster, so
//! data written through one handle is visible through another.
//!
//! # Example
//!
//! ```
//! use rados_native::{MemRados, RadosNative};
//!
//! let native = MemRados::new().unwrap();
//! let cluster = native.create("ceph", "client.admin", 0).unwrap();
//! native.conf_set(cluster, "mon host", "127.0.0.1:6789").unwrap();
//! native.conf_set(cluster, "mem pools", "data").unwrap();
//! native.connect(cluster).unwrap();
//!
//! let io = native.ioctx_create(cluster, "data").unwrap();
//! native.write_full(io, "greeting", b"hello").unwrap();
//! native.ioctx_destroy(io);
//! native.shutdown(cluster);
//! ```

mod aio;
mod cluster;
mod command;
mod options;

pub use options::MemOptions;

use bytes::Bytes;
use cephconfig::{CephConfig, ConfigError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{debug, trace};

use crate::native::{AioCallback, RadosNative};
use crate::types::{
    ClusterId, ClusterStat, CommandOutput, CompletionId, IoCtxId, NativeResult, ObjectStat,
    SNAP_HEAD,
};
use aio::{Inflight, PendingOp, Slot};
use cluster::{Mutation, SimCluster, World};
use options::Latency;

struct ClusterEntry {
    name: String,
    entity: String,
    flags: u64,
    config: CephConfig,
    connected: bool,
    latency: Latency,
}

struct IoCtxEntry {
    cluster: ClusterId,
    cluster_name: String,
    pool_id: i64,
    read_snap: u64,
    latency: Latency,
    inflight: Arc<Inflight>,
}

#[derive(Default)]
struct Handles {
    clusters: HashMap<ClusterId, ClusterEntry>,
    ioctxs: HashMap<IoCtxId, IoCtxEntry>,
}

/// Everything an operation needs to know about its pool context
#[derive(Clone)]
pub(crate) struct IoTarget {
    cluster_name: String,
    pool_id: i64,
    read_snap: u64,
    latency: Latency,
    inflight: Arc<Inflight>,
}

impl IoTarget {
    fn writable(&self) -> bool {
        self.read_snap == SNAP_HEAD
    }
}

/// State reachable from both the caller's threads and the runtime's tasks
#[derive(Default)]
pub(crate) struct Shared {
    world: Mutex<World>,
    handles: Mutex<Handles>,
    aio: Mutex<HashMap<CompletionId, Slot>>,
    next_id: AtomicU64,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn target(&self, io: IoCtxId) -> NativeResult<IoTarget> {
        let handles = self.handles.lock();
        let entry = handles.ioctxs.get(&io).ok_or(-libc::EBADF)?;
        match handles.clusters.get(&entry.cluster) {
            Some(cluster) if cluster.connected => {}
            _ => return Err(-libc::ENOTCONN),
        }
        Ok(IoTarget {
            cluster_name: entry.cluster_name.clone(),
            pool_id: entry.pool_id,
            read_snap: entry.read_snap,
            latency: entry.latency,
            inflight: entry.inflight.clone(),
        })
    }

    /// Name of a connected cluster handle
    fn connected_name(&self, cluster: ClusterId) -> NativeResult<String> {
        let handles = self.handles.lock();
        let entry = handles.clusters.get(&cluster).ok_or(-libc::EBADF)?;
        if !entry.connected {
            return Err(-libc::ENOTCONN);
        }
        Ok(entry.name.clone())
    }

    fn with_cluster<R>(
        &self,
        cluster: ClusterId,
        f: impl FnOnce(&mut SimCluster) -> NativeResult<R>,
    ) -> NativeResult<R> {
        let name = self.connected_name(cluster)?;
        let mut world = self.world.lock();
        f(world.cluster_mut(&name)?)
    }

    fn with_target<R>(
        &self,
        target: &IoTarget,
        f: impl FnOnce(&mut SimCluster) -> NativeResult<R>,
    ) -> NativeResult<R> {
        let mut world = self.world.lock();
        f(world.cluster_mut(&target.cluster_name)?)
    }

    fn mutate(&self, target: &IoTarget, oid: &str, mutation: Mutation<'_>) -> NativeResult<()> {
        if !target.writable() {
            return Err(-libc::EROFS);
        }
        self.with_target(target, |c| c.mutate(target.pool_id, oid, mutation))
    }

    fn read(&self, target: &IoTarget, oid: &str, len: usize, offset: u64) -> NativeResult<Vec<u8>> {
        self.with_target(target, |c| {
            let data = c.pool(target.pool_id)?.read(target.read_snap, oid, len, offset)?;
            c.record_read(data.len());
            Ok(data)
        })
    }
}

/// Simulated cluster backend with its own execution runtime
pub struct MemRados {
    shared: Arc<Shared>,
    handle: tokio::runtime::Handle,
    runtime: Option<tokio::runtime::Runtime>,
}

impl MemRados {
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("mem-osd")
            .enable_time()
            .build()?;
        Ok(Self {
            shared: Arc::new(Shared::default()),
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    fn submit(&self, io: IoCtxId, completion: CompletionId, op: PendingOp) -> NativeResult<()> {
        aio::submit(&self.shared, &self.handle, io, completion, op)
    }
}

impl Drop for MemRados {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn config_errno(err: &ConfigError) -> i32 {
    match err {
        ConfigError::IoError(e) => -e.raw_os_error().unwrap_or(libc::EIO),
        ConfigError::MissingOption(_) => -libc::ENOENT,
        ConfigError::ParseError { .. } | ConfigError::InvalidValue { .. } => -libc::EINVAL,
    }
}

impl RadosNative for MemRados {
    fn version(&self) -> (i32, i32, i32) {
        (3, 0, 0)
    }

    fn create(&self, cluster_name: &str, user_name: &str, flags: u64) -> NativeResult<ClusterId> {
        let name = if cluster_name.is_empty() {
            "ceph".to_string()
        } else {
            cluster_name.to_string()
        };
        let entity = match user_name {
            "" => "client.admin".to_string(),
            n if n.contains('.') => n.to_string(),
            n => format!("client.{}", n),
        };
        if !entity.starts_with("client.") {
            return Err(-libc::EINVAL);
        }

        let id = ClusterId(self.shared.next_id());
        debug!("create {} cluster={} entity={} flags={:#x}", id, name, entity, flags);
        self.shared.handles.lock().clusters.insert(
            id,
            ClusterEntry {
                name,
                entity,
                flags,
                config: CephConfig::default(),
                connected: false,
                latency: Latency::default(),
            },
        );
        Ok(id)
    }

    fn conf_read_file(&self, cluster: ClusterId, path: &Path) -> NativeResult<()> {
        let parsed = CephConfig::from_file(path).map_err(|e| config_errno(&e))?;
        let mut handles = self.shared.handles.lock();
        let entry = handles.clusters.get_mut(&cluster).ok_or(-libc::EBADF)?;
        entry.config.replace_sections(parsed);
        debug!("{} read config {}", cluster, path.display());
        Ok(())
    }

    fn conf_set(&self, cluster: ClusterId, key: &str, value: &str) -> NativeResult<()> {
        MemOptions::validate_override(key, value).map_err(|e| config_errno(&e))?;
        let mut handles = self.shared.handles.lock();
        let entry = handles.clusters.get_mut(&cluster).ok_or(-libc::EBADF)?;
        entry.config.set_override(key, value);
        Ok(())
    }

    fn conf_get(&self, cluster: ClusterId, key: &str) -> NativeResult<String> {
        let handles = self.shared.handles.lock();
        let entry = handles.clusters.get(&cluster).ok_or(-libc::EBADF)?;
        let sections = CephConfig::entity_sections(&entry.entity);
        entry
            .config
            .get_with_fallback(&sections, key)
            .map(str::to_string)
            .ok_or(-libc::ENOENT)
    }

    fn connect(&self, cluster: ClusterId) -> NativeResult<()> {
        let mut handles = self.shared.handles.lock();
        let entry = handles.clusters.get_mut(&cluster).ok_or(-libc::EBADF)?;
        if entry.connected {
            return Err(-libc::EISCONN);
        }

        let sections = CephConfig::entity_sections(&entry.entity);
        let mons = entry
            .config
            .mon_addrs(&sections)
            .map_err(|e| config_errno(&e))?;
        let opts = MemOptions::try_from_ceph_config(&entry.config, &sections)
            .map_err(|e| config_errno(&e))?;
        if !opts.is_authorized(&entry.entity) {
            debug!("{} denied: {} not authorized", cluster, entry.entity);
            return Err(-libc::EACCES);
        }

        self.shared.world.lock().bring_up(&entry.name, &opts);
        entry.connected = true;
        entry.latency = opts.latency();
        debug!(
            "{} connected to {} via {:?} (flags {:#x})",
            cluster, entry.name, mons, entry.flags
        );
        Ok(())
    }

    fn shutdown(&self, cluster: ClusterId) {
        let mut handles = self.shared.handles.lock();
        handles.clusters.remove(&cluster);
        handles.ioctxs.retain(|_, io| io.cluster != cluster);
        debug!("{} shut down", cluster);
    }

    fn cluster_stat(&self, cluster: ClusterId) -> NativeResult<ClusterStat> {
        self.shared.with_cluster(cluster, |c| Ok(c.stat()))
    }

    fn cluster_fsid(&self, cluster: ClusterId) -> NativeResult<String> {
        self.shared
            .with_cluster(cluster, |c| Ok(c.fsid.hyphenated().to_string()))
    }

    fn pool_list(&self, cluster: ClusterId) -> NativeResult<Vec<String>> {
        self.shared.with_cluster(cluster, |c| Ok(c.pool_names()))
    }

    fn pool_create(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<()> {
        self.shared
            .with_cluster(cluster, |c| c.create_pool(pool_name).map(|_| ()))
    }

    fn pool_delete(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<()> {
        self.shared.with_cluster(cluster, |c| c.delete_pool(pool_name))
    }

    fn pool_lookup(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<i64> {
        self.shared.with_cluster(cluster, |c| c.lookup_pool(pool_name))
    }

    fn ioctx_create(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<IoCtxId> {
        let pool_id = self.pool_lookup(cluster, pool_name)?;
        let mut handles = self.shared.handles.lock();
        let entry = handles.clusters.get(&cluster).ok_or(-libc::ENOTCONN)?;
        let io_entry = IoCtxEntry {
            cluster,
            cluster_name: entry.name.clone(),
            pool_id,
            read_snap: SNAP_HEAD,
            latency: entry.latency,
            inflight: Arc::new(Inflight::default()),
        };
        let io = IoCtxId(self.shared.next_id());
        handles.ioctxs.insert(io, io_entry);
        trace!("{} opened pool {} ({})", io, pool_name, pool_id);
        Ok(io)
    }

    fn ioctx_destroy(&self, io: IoCtxId) {
        self.shared.handles.lock().ioctxs.remove(&io);
        trace!("{} destroyed", io);
    }

    fn ioctx_pool_id(&self, io: IoCtxId) -> NativeResult<i64> {
        self.shared
            .handles
            .lock()
            .ioctxs
            .get(&io)
            .map(|e| e.pool_id)
            .ok_or(-libc::EBADF)
    }

    fn write_full(&self, io: IoCtxId, oid: &str, data: &[u8]) -> NativeResult<()> {
        let target = self.shared.target(io)?;
        self.shared.mutate(&target, oid, Mutation::WriteFull(data))
    }

    fn write(&self, io: IoCtxId, oid: &str, data: &[u8], offset: u64) -> NativeResult<()> {
        let target = self.shared.target(io)?;
        self.shared.mutate(&target, oid, Mutation::Write(data, offset))
    }

    fn append(&self, io: IoCtxId, oid: &str, data: &[u8]) -> NativeResult<()> {
        let target = self.shared.target(io)?;
        self.shared.mutate(&target, oid, Mutation::Append(data))
    }

    fn read(&self, io: IoCtxId, oid: &str, buf: &mut [u8], offset: u64) -> NativeResult<usize> {
        let target = self.shared.target(io)?;
        let data = self.shared.read(&target, oid, buf.len(), offset)?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    fn remove(&self, io: IoCtxId, oid: &str) -> NativeResult<()> {
        let target = self.shared.target(io)?;
        if !target.writable() {
            return Err(-libc::EROFS);
        }
        self.shared
            .with_target(&target, |c| c.pool_mut(target.pool_id)?.remove(oid))
    }

    fn stat(&self, io: IoCtxId, oid: &str) -> NativeResult<ObjectStat> {
        let target = self.shared.target(io)?;
        self.shared
            .with_target(&target, |c| c.pool(target.pool_id)?.stat(target.read_snap, oid))
    }

    fn list_objects(&self, io: IoCtxId) -> NativeResult<Vec<String>> {
        let target = self.shared.target(io)?;
        self.shared
            .with_target(&target, |c| Ok(c.pool(target.pool_id)?.list()))
    }

    fn setxattr(&self, io: IoCtxId, oid: &str, name: &str, value: &[u8]) -> NativeResult<()> {
        let target = self.shared.target(io)?;
        if !target.writable() {
            return Err(-libc::EROFS);
        }
        self.shared
            .with_target(&target, |c| c.setxattr(target.pool_id, oid, name, value))
    }

    fn getxattr(
        &self,
        io: IoCtxId,
        oid: &str,
        name: &str,
        buf: &mut [u8],
    ) -> NativeResult<usize> {
        let target = self.shared.target(io)?;
        self.shared.with_target(&target, |c| {
            let value = c.pool(target.pool_id)?.getxattr(target.read_snap, oid, name)?;
            if value.len() > buf.len() {
                return Err(-libc::ERANGE);
            }
            buf[..value.len()].copy_from_slice(value);
            Ok(value.len())
        })
    }

    fn rmxattr(&self, io: IoCtxId, oid: &str, name: &str) -> NativeResult<()> {
        let target = self.shared.target(io)?;
        if !target.writable() {
            return Err(-libc::EROFS);
        }
        self.shared
            .with_target(&target, |c| c.pool_mut(target.pool_id)?.rmxattr(oid, name))
    }

    fn aio_create_completion(&self, callback: Arc<dyn AioCallback>) -> NativeResult<CompletionId> {
        let id = CompletionId(self.shared.next_id());
        self.shared.aio.lock().insert(id, Slot::new(callback));
        Ok(id)
    }

    fn aio_write(
        &self,
        io: IoCtxId,
        oid: &str,
        completion: CompletionId,
        data: Bytes,
        offset: u64,
    ) -> NativeResult<()> {
        let oid = oid.to_string();
        self.submit(io, completion, PendingOp::Write { oid, data, offset })
    }

    fn aio_write_full(
        &self,
        io: IoCtxId,
        oid: &str,
        completion: CompletionId,
        data: Bytes,
    ) -> NativeResult<()> {
        let oid = oid.to_string();
        self.submit(io, completion, PendingOp::WriteFull { oid, data })
    }

    fn aio_append(
        &self,
        io: IoCtxId,
        oid: &str,
        completion: CompletionId,
        data: Bytes,
    ) -> NativeResult<()> {
        let oid = oid.to_string();
        self.submit(io, completion, PendingOp::Append { oid, data })
    }

    fn aio_read(
        &self,
        io: IoCtxId,
        oid: &str,
        completion: CompletionId,
        len: usize,
        offset: u64,
    ) -> NativeResult<()> {
        let oid = oid.to_string();
        self.submit(io, completion, PendingOp::Read { oid, len, offset })
    }

    fn aio_flush_async(&self, io: IoCtxId, completion: CompletionId) -> NativeResult<()> {
        self.submit(io, completion, PendingOp::Flush)
    }

    fn aio_cancel(&self, io: IoCtxId, completion: CompletionId) -> NativeResult<()> {
        aio::cancel(&self.shared, io, completion)
    }

    fn aio_read_data(&self, completion: CompletionId) -> Option<Bytes> {
        self.shared.aio.lock().get(&completion).and_then(Slot::read_data)
    }

    fn aio_release(&self, completion: CompletionId) {
        let slot = self.shared.aio.lock().remove(&completion);
        if let Some(slot) = slot {
            slot.discard();
        }
    }

    fn mon_command(&self, cluster: ClusterId, cmd: &[String], inbuf: &[u8]) -> CommandOutput {
        let result = self
            .shared
            .with_cluster(cluster, |c| Ok(command::mon_command(c, cmd, inbuf)));
        result.unwrap_or_else(|e| CommandOutput::error(e, "not connected"))
    }

    fn osd_command(
        &self,
        cluster: ClusterId,
        osd_id: i32,
        cmd: &[String],
        _inbuf: &[u8],
    ) -> CommandOutput {
        let result = self
            .shared
            .with_cluster(cluster, |c| Ok(command::osd_command(c, osd_id, cmd)));
        result.unwrap_or_else(|e| CommandOutput::error(e, "not connected"))
    }

    fn pg_command(
        &self,
        cluster: ClusterId,
        pgid: &str,
        cmd: &[String],
        _inbuf: &[u8],
    ) -> CommandOutput {
        let result = self
            .shared
            .with_cluster(cluster, |c| Ok(command::pg_command(c, pgid, cmd)));
        result.unwrap_or_else(|e| CommandOutput::error(e, "not connected"))
    }

    fn snap_create(&self, io: IoCtxId, name: &str) -> NativeResult<()> {
        let target = self.shared.target(io)?;
        self.shared
            .with_target(&target, |c| c.pool_mut(target.pool_id)?.snap_create(name).map(|_| ()))
    }

    fn snap_remove(&self, io: IoCtxId, name: &str) -> NativeResult<()> {
        let target = self.shared.target(io)?;
        self.shared
            .with_target(&target, |c| c.pool_mut(target.pool_id)?.snap_remove(name))
    }

    fn snap_rollback(&self, io: IoCtxId, oid: &str, name: &str) -> NativeResult<()> {
        let target = self.shared.target(io)?;
        if !target.writable() {
            return Err(-libc::EROFS);
        }
        self.shared
            .with_target(&target, |c| c.pool_mut(target.pool_id)?.snap_rollback(oid, name))
    }

    fn snap_lookup(&self, io: IoCtxId, name: &str) -> NativeResult<u64> {
        let target = self.shared.target(io)?;
        self.shared
            .with_target(&target, |c| c.pool(target.pool_id)?.snap_lookup(name))
    }

    fn snap_list(&self, io: IoCtxId) -> NativeResult<Vec<u64>> {
        let target = self.shared.target(io)?;
        self.shared
            .with_target(&target, |c| Ok(c.pool(target.pool_id)?.snap_ids()))
    }

    fn snap_get_name(&self, io: IoCtxId, snap: u64) -> NativeResult<String> {
        let target = self.shared.target(io)?;
        self.shared
            .with_target(&target, |c| Ok(c.pool(target.pool_id)?.snap(snap)?.name.clone()))
    }

    fn snap_get_stamp(&self, io: IoCtxId, snap: u64) -> NativeResult<i64> {
        let target = self.shared.target(io)?;
        self.shared.with_target(&target, |c| {
            let stamp = c.pool(target.pool_id)?.snap(snap)?.stamp;
            let secs = stamp
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            Ok(secs as i64)
        })
    }

    fn snap_set_read(&self, io: IoCtxId, snap: u64) {
        if let Some(entry) = self.shared.handles.lock().ioctxs.get_mut(&io) {
            entry.read_snap = snap;
        }
    }
}
