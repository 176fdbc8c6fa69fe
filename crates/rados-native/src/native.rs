//! The native RADOS interface
//!
//! `RadosNative` mirrors the handle-based librados C API: every handle is an
//! opaque id minted by the implementation, nothing is freed automatically, and
//! failures come back as bare negative errno values. Higher layers own the
//! lifecycle discipline; implementations only have to be thread-safe.

use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;

use crate::types::{
    ClusterId, ClusterStat, CommandOutput, CompletionId, IoCtxId, NativeResult, ObjectStat,
};

/// Receiver for asynchronous completion notifications
///
/// `complete` fires once the cluster has applied the operation in memory and
/// `safe` once it is durable. Both receive the operation's return value and
/// may run on a thread owned by the native layer.
pub trait AioCallback: Send + Sync {
    fn complete(&self, ret: i32);
    fn safe(&self, ret: i32);
}

pub trait RadosNative: Send + Sync {
    /// Library version as (major, minor, extra)
    fn version(&self) -> (i32, i32, i32);

    // ===== Cluster handle =====

    fn create(&self, cluster_name: &str, user_name: &str, flags: u64) -> NativeResult<ClusterId>;
    fn conf_read_file(&self, cluster: ClusterId, path: &Path) -> NativeResult<()>;
    fn conf_set(&self, cluster: ClusterId, key: &str, value: &str) -> NativeResult<()>;
    fn conf_get(&self, cluster: ClusterId, key: &str) -> NativeResult<String>;
    fn connect(&self, cluster: ClusterId) -> NativeResult<()>;
    /// Release the handle; the id is invalid afterwards
    fn shutdown(&self, cluster: ClusterId);
    fn cluster_stat(&self, cluster: ClusterId) -> NativeResult<ClusterStat>;
    fn cluster_fsid(&self, cluster: ClusterId) -> NativeResult<String>;

    // ===== Pools =====

    fn pool_list(&self, cluster: ClusterId) -> NativeResult<Vec<String>>;
    fn pool_create(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<()>;
    fn pool_delete(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<()>;
    fn pool_lookup(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<i64>;
    fn ioctx_create(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<IoCtxId>;
    fn ioctx_destroy(&self, io: IoCtxId);
    fn ioctx_pool_id(&self, io: IoCtxId) -> NativeResult<i64>;

    // ===== Synchronous object I/O =====

    fn write_full(&self, io: IoCtxId, oid: &str, data: &[u8]) -> NativeResult<()>;
    fn write(&self, io: IoCtxId, oid: &str, data: &[u8], offset: u64) -> NativeResult<()>;
    fn append(&self, io: IoCtxId, oid: &str, data: &[u8]) -> NativeResult<()>;
    /// Read into `buf`, returning the number of bytes filled
    fn read(&self, io: IoCtxId, oid: &str, buf: &mut [u8], offset: u64) -> NativeResult<usize>;
    fn remove(&self, io: IoCtxId, oid: &str) -> NativeResult<()>;
    fn stat(&self, io: IoCtxId, oid: &str) -> NativeResult<ObjectStat>;
    fn list_objects(&self, io: IoCtxId) -> NativeResult<Vec<String>>;

    // ===== Extended attributes =====

    fn setxattr(&self, io: IoCtxId, oid: &str, name: &str, value: &[u8]) -> NativeResult<()>;
    /// Copy the value into `buf`; `-ERANGE` when it does not fit
    fn getxattr(&self, io: IoCtxId, oid: &str, name: &str, buf: &mut [u8])
        -> NativeResult<usize>;
    fn rmxattr(&self, io: IoCtxId, oid: &str, name: &str) -> NativeResult<()>;

    // ===== Asynchronous I/O =====

    fn aio_create_completion(&self, callback: Arc<dyn AioCallback>) -> NativeResult<CompletionId>;
    fn aio_write(
        &self,
        io: IoCtxId,
        oid: &str,
        completion: CompletionId,
        data: Bytes,
        offset: u64,
    ) -> NativeResult<()>;
    fn aio_write_full(
        &self,
        io: IoCtxId,
        oid: &str,
        completion: CompletionId,
        data: Bytes,
    ) -> NativeResult<()>;
    fn aio_append(
        &self,
        io: IoCtxId,
        oid: &str,
        completion: CompletionId,
        data: Bytes,
    ) -> NativeResult<()>;
    fn aio_read(
        &self,
        io: IoCtxId,
        oid: &str,
        completion: CompletionId,
        len: usize,
        offset: u64,
    ) -> NativeResult<()>;
    /// Complete `completion` once every write submitted on `io` is durable
    fn aio_flush_async(&self, io: IoCtxId, completion: CompletionId) -> NativeResult<()>;
    fn aio_cancel(&self, io: IoCtxId, completion: CompletionId) -> NativeResult<()>;
    /// Bytes produced by a finished read
    fn aio_read_data(&self, completion: CompletionId) -> Option<Bytes>;
    /// Free the token; the id is invalid afterwards
    ///
    /// The callback stays alive until its `safe` call has returned, even
    /// when the token is released after `complete` alone.
    fn aio_release(&self, completion: CompletionId);

    // ===== Administrative commands =====

    fn mon_command(&self, cluster: ClusterId, cmd: &[String], inbuf: &[u8]) -> CommandOutput;
    fn osd_command(
        &self,
        cluster: ClusterId,
        osd_id: i32,
        cmd: &[String],
        inbuf: &[u8],
    ) -> CommandOutput;
    fn pg_command(&self, cluster: ClusterId, pgid: &str, cmd: &[String], inbuf: &[u8])
        -> CommandOutput;

    // ===== Pool snapshots =====

    fn snap_create(&self, io: IoCtxId, name: &str) -> NativeResult<()>;
    fn snap_remove(&self, io: IoCtxId, name: &str) -> NativeResult<()>;
    fn snap_rollback(&self, io: IoCtxId, oid: &str, name: &str) -> NativeResult<()>;
    fn snap_lookup(&self, io: IoCtxId, name: &str) -> NativeResult<u64>;
    fn snap_list(&self, io: IoCtxId) -> NativeResult<Vec<u64>>;
    fn snap_get_name(&self, io: IoCtxId, snap: u64) -> NativeResult<String>;
    /// Creation time in seconds since the epoch
    fn snap_get_stamp(&self, io: IoCtxId, snap: u64) -> NativeResult<i64>;
    fn snap_set_read(&self, io: IoCtxId, snap: u64);
}
