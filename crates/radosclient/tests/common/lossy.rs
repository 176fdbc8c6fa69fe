//! A backend that loses the buffers of finished asynchronous reads

use bytes::Bytes;
use rados_native::{
    AioCallback, ClusterId, ClusterStat, CommandOutput, CompletionId, IoCtxId, MemRados,
    NativeResult, ObjectStat, RadosNative,
};
use std::path::Path;
use std::sync::Arc;

/// Delegates everything to [`MemRados`] except `aio_read_data`
pub struct LossyReads(pub MemRados);

impl RadosNative for LossyReads {
    fn version(&self) -> (i32, i32, i32) {
        self.0.version()
    }

    fn create(&self, cluster_name: &str, user_name: &str, flags: u64) -> NativeResult<ClusterId> {
        self.0.create(cluster_name, user_name, flags)
    }

    fn conf_read_file(&self, cluster: ClusterId, path: &Path) -> NativeResult<()> {
        self.0.conf_read_file(cluster, path)
    }

    fn conf_set(&self, cluster: ClusterId, key: &str, value: &str) -> NativeResult<()> {
        self.0.conf_set(cluster, key, value)
    }

    fn conf_get(&self, cluster: ClusterId, key: &str) -> NativeResult<String> {
        self.0.conf_get(cluster, key)
    }

    fn connect(&self, cluster: ClusterId) -> NativeResult<()> {
        self.0.connect(cluster)
    }

    fn shutdown(&self, cluster: ClusterId) {
        self.0.shutdown(cluster)
    }

    fn cluster_stat(&self, cluster: ClusterId) -> NativeResult<ClusterStat> {
        self.0.cluster_stat(cluster)
    }

    fn cluster_fsid(&self, cluster: ClusterId) -> NativeResult<String> {
        self.0.cluster_fsid(cluster)
    }

    fn pool_list(&self, cluster: ClusterId) -> NativeResult<Vec<String>> {
        self.0.pool_list(cluster)
    }

    fn pool_create(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<()> {
        self.0.pool_create(cluster, pool_name)
    }

    fn pool_delete(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<()> {
        self.0.pool_delete(cluster, pool_name)
    }

    fn pool_lookup(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<i64> {
        self.0.pool_lookup(cluster, pool_name)
    }

    fn ioctx_create(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<IoCtxId> {
        self.0.ioctx_create(cluster, pool_name)
    }

    fn ioctx_destroy(&self, io: IoCtxId) {
        self.0.ioctx_destroy(io)
    }

    fn ioctx_pool_id(&self, io: IoCtxId) -> NativeResult<i64> {
        self.0.ioctx_pool_id(io)
    }

    fn write_full(&self, io: IoCtxId, oid: &str, data: &[u8]) -> NativeResult<()> {
        self.0.write_full(io, oid, data)
    }

    fn write(&self, io: IoCtxId, oid: &str, data: &[u8], offset: u64) -> NativeResult<()> {
        self.0.write(io, oid, data, offset)
    }

    fn append(&self, io: IoCtxId, oid: &str, data: &[u8]) -> NativeResult<()> {
        self.0.append(io, oid, data)
    }

    fn read(&self, io: IoCtxId, oid: &str, buf: &mut [u8], offset: u64) -> NativeResult<usize> {
        self.0.read(io, oid, buf, offset)
    }

    fn remove(&self, io: IoCtxId, oid: &str) -> NativeResult<()> {
        self.0.remove(io, oid)
    }

    fn stat(&self, io: IoCtxId, oid: &str) -> NativeResult<ObjectStat> {
        self.0.stat(io, oid)
    }

    fn list_objects(&self, io: IoCtxId) -> NativeResult<Vec<String>> {
        self.0.list_objects(io)
    }

    fn setxattr(&self, io: IoCtxId, oid: &str, name: &str, value: &[u8]) -> NativeResult<()> {
        self.0.setxattr(io, oid, name, value)
    }

    fn getxattr(
        &self,
        io: IoCtxId,
        oid: &str,
        name: &str,
        buf: &mut [u8],
    ) -> NativeResult<usize> {
        self.0.getxattr(io, oid, name, buf)
    }

    fn rmxattr(&self, io: IoCtxId, oid: &str, name: &str) -> NativeResult<()> {
        self.0.rmxattr(io, oid, name)
    }

    fn aio_create_completion(&self, callback: Arc<dyn AioCallback>) -> NativeResult<CompletionId> {
        self.0.aio_create_completion(callback)
    }

    fn aio_write(
        &self,
        io: IoCtxId,
        oid: &str,
        completion: CompletionId,
        data: Bytes,
        offset: u64,
    ) -> NativeResult<()> {
        self.0.aio_write(io, oid, completion, data, offset)
    }

    fn aio_write_full(
        &self,
        io: IoCtxId,
        oid: &str,
        completion: CompletionId,
        data: Bytes,
    ) -> NativeResult<()> {
        self.0.aio_write_full(io, oid, completion, data)
    }

    fn aio_append(
        &self,
        io: IoCtxId,
        oid: &str,
        completion: CompletionId,
        data: Bytes,
    ) -> NativeResult<()> {
        self.0.aio_append(io, oid, completion, data)
    }

    fn aio_read(
        &self,
        io: IoCtxId,
        oid: &str,
        completion: CompletionId,
        len: usize,
        offset: u64,
    ) -> NativeResult<()> {
        self.0.aio_read(io, oid, completion, len, offset)
    }

    fn aio_flush_async(&self, io: IoCtxId, completion: CompletionId) -> NativeResult<()> {
        self.0.aio_flush_async(io, completion)
    }

    fn aio_cancel(&self, io: IoCtxId, completion: CompletionId) -> NativeResult<()> {
        self.0.aio_cancel(io, completion)
    }

    fn aio_read_data(&self, _completion: CompletionId) -> Option<Bytes> {
        None
    }

    fn aio_release(&self, completion: CompletionId) {
        self.0.aio_release(completion)
    }

    fn mon_command(&self, cluster: ClusterId, cmd: &[String], inbuf: &[u8]) -> CommandOutput {
        self.0.mon_command(cluster, cmd, inbuf)
    }

    fn osd_command(
        &self,
        cluster: ClusterId,
        osd_id: i32,
        cmd: &[String],
        inbuf: &[u8],
    ) -> CommandOutput {
        self.0.osd_command(cluster, osd_id, cmd, inbuf)
    }

    fn pg_command(
        &self,
        cluster: ClusterId,
        pgid: &str,
        cmd: &[String],
        inbuf: &[u8],
    ) -> CommandOutput {
        self.0.pg_command(cluster, pgid, cmd, inbuf)
    }

    fn snap_create(&self, io: IoCtxId, name: &str) -> NativeResult<()> {
        self.0.snap_create(io, name)
    }

    fn snap_remove(&self, io: IoCtxId, name: &str) -> NativeResult<()> {
        self.0.snap_remove(io, name)
    }

    fn snap_rollback(&self, io: IoCtxId, oid: &str, name: &str) -> NativeResult<()> {
        self.0.snap_rollback(io, oid, name)
    }

    fn snap_lookup(&self, io: IoCtxId, name: &str) -> NativeResult<u64> {
        self.0.snap_lookup(io, name)
    }

    fn snap_list(&self, io: IoCtxId) -> NativeResult<Vec<u64>> {
        self.0.snap_list(io)
    }

    fn snap_get_name(&self, io: IoCtxId, snap: u64) -> NativeResult<String> {
        self.0.snap_get_name(io, snap)
    }

    fn snap_get_stamp(&self, io: IoCtxId, snap: u64) -> NativeResult<i64> {
        self.0.snap_get_stamp(io, snap)
    }

    fn snap_set_read(&self, io: IoCtxId, snap: u64) {
        self.0.snap_set_read(io, snap)
    }
}
