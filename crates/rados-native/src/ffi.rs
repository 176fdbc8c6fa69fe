//! Bindings to the system librados
//!
//! Raw handles never leave this module: each `rados_t`, `rados_ioctx_t` and
//! `rados_completion_t` is stored in a table and addressed by the opaque id
//! handed to callers. Buffers passed to asynchronous calls live in the
//! completion's table entry until the token is released.

use bytes::Bytes;
use libc::{c_char, c_int, c_void, size_t, time_t};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, trace};

use crate::native::{AioCallback, RadosNative};
use crate::types::{
    ClusterId, ClusterStat, CommandOutput, CompletionId, IoCtxId, NativeResult, ObjectStat,
};

type RadosT = *mut c_void;
type RadosIoctxT = *mut c_void;
type RadosCompletionT = *mut c_void;
type RadosListCtxT = *mut c_void;
type RadosCallbackT = Option<unsafe extern "C" fn(cb: RadosCompletionT, arg: *mut c_void)>;

#[repr(C)]
#[derive(Default)]
struct RadosClusterStatT {
    kb: u64,
    kb_used: u64,
    kb_avail: u64,
    num_objects: u64,
}

#[link(name = "rados")]
extern "C" {
    fn rados_version(major: *mut c_int, minor: *mut c_int, extra: *mut c_int);
    fn rados_create2(
        pcluster: *mut RadosT,
        clustername: *const c_char,
        name: *const c_char,
        flags: u64,
    ) -> c_int;
    fn rados_conf_read_file(cluster: RadosT, path: *const c_char) -> c_int;
    fn rados_conf_set(cluster: RadosT, option: *const c_char, value: *const c_char) -> c_int;
    fn rados_conf_get(cluster: RadosT, option: *const c_char, buf: *mut c_char, len: size_t)
        -> c_int;
    fn rados_connect(cluster: RadosT) -> c_int;
    fn rados_shutdown(cluster: RadosT);
    fn rados_cluster_stat(cluster: RadosT, result: *mut RadosClusterStatT) -> c_int;
    fn rados_cluster_fsid(cluster: RadosT, buf: *mut c_char, len: size_t) -> c_int;

    fn rados_pool_list(cluster: RadosT, buf: *mut c_char, len: size_t) -> c_int;
    fn rados_pool_create(cluster: RadosT, pool_name: *const c_char) -> c_int;
    fn rados_pool_delete(cluster: RadosT, pool_name: *const c_char) -> c_int;
    fn rados_pool_lookup(cluster: RadosT, pool_name: *const c_char) -> i64;
    fn rados_ioctx_create(cluster: RadosT, pool_name: *const c_char, ioctx: *mut RadosIoctxT)
        -> c_int;
    fn rados_ioctx_destroy(io: RadosIoctxT);
    fn rados_ioctx_get_id(io: RadosIoctxT) -> i64;

    fn rados_write_full(io: RadosIoctxT, oid: *const c_char, buf: *const c_char, len: size_t)
        -> c_int;
    fn rados_write(
        io: RadosIoctxT,
        oid: *const c_char,
        buf: *const c_char,
        len: size_t,
        off: u64,
    ) -> c_int;
    fn rados_append(io: RadosIoctxT, oid: *const c_char, buf: *const c_char, len: size_t)
        -> c_int;
    fn rados_read(
        io: RadosIoctxT,
        oid: *const c_char,
        buf: *mut c_char,
        len: size_t,
        off: u64,
    ) -> c_int;
    fn rados_remove(io: RadosIoctxT, oid: *const c_char) -> c_int;
    fn rados_stat(io: RadosIoctxT, oid: *const c_char, psize: *mut u64, pmtime: *mut time_t)
        -> c_int;
    fn rados_nobjects_list_open(io: RadosIoctxT, ctx: *mut RadosListCtxT) -> c_int;
    fn rados_nobjects_list_next(
        ctx: RadosListCtxT,
        entry: *mut *const c_char,
        key: *mut *const c_char,
        nspace: *mut *const c_char,
    ) -> c_int;
    fn rados_nobjects_list_close(ctx: RadosListCtxT);

    fn rados_setxattr(
        io: RadosIoctxT,
        oid: *const c_char,
        name: *const c_char,
        buf: *const c_char,
        len: size_t,
    ) -> c_int;
    fn rados_getxattr(
        io: RadosIoctxT,
        oid: *const c_char,
        name: *const c_char,
        buf: *mut c_char,
        len: size_t,
    ) -> c_int;
    fn rados_rmxattr(io: RadosIoctxT, oid: *const c_char, name: *const c_char) -> c_int;

    fn rados_aio_create_completion(
        cb_arg: *mut c_void,
        cb_complete: RadosCallbackT,
        cb_safe: RadosCallbackT,
        pc: *mut RadosCompletionT,
    ) -> c_int;
    fn rados_aio_release(c: RadosCompletionT);
    fn rados_aio_wait_for_safe_and_cb(c: RadosCompletionT) -> c_int;
    fn rados_aio_get_return_value(c: RadosCompletionT) -> c_int;
    fn rados_aio_write(
        io: RadosIoctxT,
        oid: *const c_char,
        c: RadosCompletionT,
        buf: *const c_char,
        len: size_t,
        off: u64,
    ) -> c_int;
    fn rados_aio_write_full(
        io: RadosIoctxT,
        oid: *const c_char,
        c: RadosCompletionT,
        buf: *const c_char,
        len: size_t,
    ) -> c_int;
    fn rados_aio_append(
        io: RadosIoctxT,
        oid: *const c_char,
        c: RadosCompletionT,
        buf: *const c_char,
        len: size_t,
    ) -> c_int;
    fn rados_aio_read(
        io: RadosIoctxT,
        oid: *const c_char,
        c: RadosCompletionT,
        buf: *mut c_char,
        len: size_t,
        off: u64,
    ) -> c_int;
    fn rados_aio_flush_async(io: RadosIoctxT, c: RadosCompletionT) -> c_int;
    fn rados_aio_cancel(io: RadosIoctxT, c: RadosCompletionT) -> c_int;

    fn rados_mon_command(
        cluster: RadosT,
        cmd: *mut *const c_char,
        cmdlen: size_t,
        inbuf: *const c_char,
        inbuflen: size_t,
        outbuf: *mut *mut c_char,
        outbuflen: *mut size_t,
        outs: *mut *mut c_char,
        outslen: *mut size_t,
    ) -> c_int;
    fn rados_osd_command(
        cluster: RadosT,
        osdid: c_int,
        cmd: *mut *const c_char,
        cmdlen: size_t,
        inbuf: *const c_char,
        inbuflen: size_t,
        outbuf: *mut *mut c_char,
        outbuflen: *mut size_t,
        outs: *mut *mut c_char,
        outslen: *mut size_t,
    ) -> c_int;
    fn rados_pg_command(
        cluster: RadosT,
        pgstr: *const c_char,
        cmd: *mut *const c_char,
        cmdlen: size_t,
        inbuf: *const c_char,
        inbuflen: size_t,
        outbuf: *mut *mut c_char,
        outbuflen: *mut size_t,
        outs: *mut *mut c_char,
        outslen: *mut size_t,
    ) -> c_int;
    fn rados_buffer_free(buf: *mut c_char);

    fn rados_ioctx_snap_create(io: RadosIoctxT, snapname: *const c_char) -> c_int;
    fn rados_ioctx_snap_remove(io: RadosIoctxT, snapname: *const c_char) -> c_int;
    fn rados_ioctx_snap_rollback(io: RadosIoctxT, oid: *const c_char, snapname: *const c_char)
        -> c_int;
    fn rados_ioctx_snap_lookup(io: RadosIoctxT, name: *const c_char, id: *mut u64) -> c_int;
    fn rados_ioctx_snap_list(io: RadosIoctxT, snaps: *mut u64, maxlen: c_int) -> c_int;
    fn rados_ioctx_snap_get_name(io: RadosIoctxT, id: u64, name: *mut c_char, maxlen: c_int)
        -> c_int;
    fn rados_ioctx_snap_get_stamp(io: RadosIoctxT, id: u64, t: *mut time_t) -> c_int;
    fn rados_ioctx_snap_set_read(io: RadosIoctxT, snap: u64);
}

/// A raw librados pointer held in a handle table
#[derive(Clone, Copy)]
struct Raw(*mut c_void);

// librados handles are safe to use from any thread
unsafe impl Send for Raw {}

struct CallbackCtx {
    callback: Arc<dyn AioCallback>,
}

unsafe extern "C" fn on_complete(c: RadosCompletionT, arg: *mut c_void) {
    let ctx = &*(arg as *const CallbackCtx);
    ctx.callback.complete(rados_aio_get_return_value(c));
}

unsafe extern "C" fn on_safe(c: RadosCompletionT, arg: *mut c_void) {
    let ctx = &*(arg as *const CallbackCtx);
    ctx.callback.safe(rados_aio_get_return_value(c));
}

struct CompletionEntry {
    raw: Raw,
    ctx: Raw,
    /// Write payload, alive until release
    #[allow(dead_code)]
    payload: Option<Bytes>,
    read_buf: Option<Vec<u8>>,
    /// librados accepted an op on this completion and will call back
    submitted: bool,
}

impl CompletionEntry {
    /// Release the completion and free its callback context
    ///
    /// # Safety
    ///
    /// The entry must have been removed from the completion table, and
    /// `ctx` must be the pointer handed to `rados_aio_create_completion`.
    unsafe fn free(self) {
        if self.submitted {
            // on_safe still dereferences ctx until this returns
            rados_aio_wait_for_safe_and_cb(self.raw.0);
        }
        rados_aio_release(self.raw.0);
        drop(Box::from_raw(self.ctx.0 as *mut CallbackCtx));
    }
}

fn cstr(s: &str) -> NativeResult<CString> {
    CString::new(s).map_err(|_| -libc::EINVAL)
}

fn check(ret: c_int) -> NativeResult<()> {
    if ret < 0 {
        Err(ret)
    } else {
        Ok(())
    }
}

/// Split a NUL-separated, double-NUL-terminated name list
fn split_names(buf: &[u8]) -> Vec<String> {
    buf.split(|b| *b == 0)
        .filter(|name| !name.is_empty())
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect()
}

fn nul_terminated(buf: &[u8]) -> String {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Take ownership of a librados-allocated buffer
unsafe fn take_buffer(ptr: *mut c_char, len: size_t) -> Vec<u8> {
    if ptr.is_null() {
        return Vec::new();
    }
    let data = std::slice::from_raw_parts(ptr as *const u8, len).to_vec();
    rados_buffer_free(ptr);
    data
}

/// Backend talking to a real cluster through librados
#[derive(Default)]
pub struct LibRados {
    next_id: AtomicU64,
    clusters: Mutex<HashMap<ClusterId, Raw>>,
    ioctxs: Mutex<HashMap<IoCtxId, Raw>>,
    completions: Mutex<HashMap<CompletionId, CompletionEntry>>,
}

impl LibRados {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn cluster(&self, id: ClusterId) -> NativeResult<RadosT> {
        self.clusters.lock().get(&id).map(|r| r.0).ok_or(-libc::EBADF)
    }

    fn io(&self, id: IoCtxId) -> NativeResult<RadosIoctxT> {
        self.ioctxs.lock().get(&id).map(|r| r.0).ok_or(-libc::EBADF)
    }

    fn completion(&self, id: CompletionId) -> NativeResult<RadosCompletionT> {
        self.completions
            .lock()
            .get(&id)
            .map(|e| e.raw.0)
            .ok_or(-libc::EBADF)
    }

    /// Record that librados took ownership of an op on `id`
    fn issued(&self, id: CompletionId, ret: c_int) -> NativeResult<()> {
        check(ret)?;
        if let Some(entry) = self.completions.lock().get_mut(&id) {
            entry.submitted = true;
        }
        Ok(())
    }

    /// Park `payload` in the completion entry and return a pointer into it
    fn hold_payload(&self, id: CompletionId, payload: Bytes) -> NativeResult<(*const c_char, usize)> {
        let mut completions = self.completions.lock();
        let entry = completions.get_mut(&id).ok_or(-libc::EBADF)?;
        let ptr = payload.as_ptr() as *const c_char;
        let len = payload.len();
        entry.payload = Some(payload);
        Ok((ptr, len))
    }

    fn run_command(
        cmd: &[String],
        inbuf: &[u8],
        call: impl FnOnce(
            *mut *const c_char,
            size_t,
            *const c_char,
            size_t,
            *mut *mut c_char,
            *mut size_t,
            *mut *mut c_char,
            *mut size_t,
        ) -> c_int,
    ) -> CommandOutput {
        let owned: Result<Vec<CString>, _> = cmd.iter().map(|c| cstr(c)).collect();
        let owned = match owned {
            Ok(owned) => owned,
            Err(e) => return CommandOutput::error(e, "command contains a NUL byte"),
        };
        let mut ptrs: Vec<*const c_char> = owned.iter().map(|c| c.as_ptr()).collect();

        let mut outbuf: *mut c_char = std::ptr::null_mut();
        let mut outbuflen: size_t = 0;
        let mut outs: *mut c_char = std::ptr::null_mut();
        let mut outslen: size_t = 0;

        let status = call(
            ptrs.as_mut_ptr(),
            ptrs.len(),
            inbuf.as_ptr() as *const c_char,
            inbuf.len(),
            &mut outbuf,
            &mut outbuflen,
            &mut outs,
            &mut outslen,
        );

        // SAFETY: librados allocated both buffers with the lengths it reported
        let (outbuf, outs) = unsafe { (take_buffer(outbuf, outbuflen), take_buffer(outs, outslen)) };
        CommandOutput {
            status,
            outbuf,
            outs: String::from_utf8_lossy(&outs).into_owned(),
        }
    }
}

impl Drop for LibRados {
    fn drop(&mut self) {
        let entries: Vec<CompletionEntry> =
            self.completions.lock().drain().map(|(_, e)| e).collect();
        for entry in entries {
            // SAFETY: drained from the table, ctx came from aio_create_completion
            unsafe { entry.free() };
        }
        for (_, io) in self.ioctxs.lock().drain() {
            unsafe { rados_ioctx_destroy(io.0) };
        }
        for (_, cluster) in self.clusters.lock().drain() {
            unsafe { rados_shutdown(cluster.0) };
        }
    }
}

impl RadosNative for LibRados {
    fn version(&self) -> (i32, i32, i32) {
        let (mut major, mut minor, mut extra) = (0, 0, 0);
        unsafe { rados_version(&mut major, &mut minor, &mut extra) };
        (major, minor, extra)
    }

    fn create(&self, cluster_name: &str, user_name: &str, flags: u64) -> NativeResult<ClusterId> {
        let cluster_name = cstr(cluster_name)?;
        let user_name = cstr(user_name)?;
        let mut raw: RadosT = std::ptr::null_mut();
        check(unsafe {
            rados_create2(&mut raw, cluster_name.as_ptr(), user_name.as_ptr(), flags)
        })?;
        let id = ClusterId(self.next_id());
        self.clusters.lock().insert(id, Raw(raw));
        debug!("created {}", id);
        Ok(id)
    }

    fn conf_read_file(&self, cluster: ClusterId, path: &Path) -> NativeResult<()> {
        let raw = self.cluster(cluster)?;
        let path = cstr(&path.to_string_lossy())?;
        check(unsafe { rados_conf_read_file(raw, path.as_ptr()) })
    }

    fn conf_set(&self, cluster: ClusterId, key: &str, value: &str) -> NativeResult<()> {
        let raw = self.cluster(cluster)?;
        let (key, value) = (cstr(key)?, cstr(value)?);
        check(unsafe { rados_conf_set(raw, key.as_ptr(), value.as_ptr()) })
    }

    fn conf_get(&self, cluster: ClusterId, key: &str) -> NativeResult<String> {
        let raw = self.cluster(cluster)?;
        let key = cstr(key)?;
        let mut len = 256;
        loop {
            let mut buf = vec![0u8; len];
            let ret = unsafe {
                rados_conf_get(raw, key.as_ptr(), buf.as_mut_ptr() as *mut c_char, len)
            };
            if ret == -libc::ENAMETOOLONG {
                len *= 2;
                continue;
            }
            check(ret)?;
            return Ok(nul_terminated(&buf));
        }
    }

    fn connect(&self, cluster: ClusterId) -> NativeResult<()> {
        let raw = self.cluster(cluster)?;
        check(unsafe { rados_connect(raw) })
    }

    fn shutdown(&self, cluster: ClusterId) {
        if let Some(raw) = self.clusters.lock().remove(&cluster) {
            unsafe { rados_shutdown(raw.0) };
            debug!("shut down {}", cluster);
        }
    }

    fn cluster_stat(&self, cluster: ClusterId) -> NativeResult<ClusterStat> {
        let raw = self.cluster(cluster)?;
        let mut stat = RadosClusterStatT::default();
        check(unsafe { rados_cluster_stat(raw, &mut stat) })?;
        Ok(ClusterStat {
            kb: stat.kb,
            kb_used: stat.kb_used,
            kb_avail: stat.kb_avail,
            num_objects: stat.num_objects,
        })
    }

    fn cluster_fsid(&self, cluster: ClusterId) -> NativeResult<String> {
        let raw = self.cluster(cluster)?;
        let mut buf = vec![0u8; 64];
        let ret = unsafe { rados_cluster_fsid(raw, buf.as_mut_ptr() as *mut c_char, buf.len()) };
        check(ret)?;
        Ok(nul_terminated(&buf))
    }

    fn pool_list(&self, cluster: ClusterId) -> NativeResult<Vec<String>> {
        let raw = self.cluster(cluster)?;
        let mut len = 256;
        loop {
            let mut buf = vec![0u8; len];
            let ret = unsafe { rados_pool_list(raw, buf.as_mut_ptr() as *mut c_char, len) };
            check(ret)?;
            let needed = ret as usize;
            if needed > len {
                len = needed;
                continue;
            }
            return Ok(split_names(&buf[..needed]));
        }
    }

    fn pool_create(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<()> {
        let raw = self.cluster(cluster)?;
        let name = cstr(pool_name)?;
        check(unsafe { rados_pool_create(raw, name.as_ptr()) })
    }

    fn pool_delete(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<()> {
        let raw = self.cluster(cluster)?;
        let name = cstr(pool_name)?;
        check(unsafe { rados_pool_delete(raw, name.as_ptr()) })
    }

    fn pool_lookup(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<i64> {
        let raw = self.cluster(cluster)?;
        let name = cstr(pool_name)?;
        let ret = unsafe { rados_pool_lookup(raw, name.as_ptr()) };
        if ret < 0 {
            return Err(ret as i32);
        }
        Ok(ret)
    }

    fn ioctx_create(&self, cluster: ClusterId, pool_name: &str) -> NativeResult<IoCtxId> {
        let raw = self.cluster(cluster)?;
        let name = cstr(pool_name)?;
        let mut io: RadosIoctxT = std::ptr::null_mut();
        check(unsafe { rados_ioctx_create(raw, name.as_ptr(), &mut io) })?;
        let id = IoCtxId(self.next_id());
        self.ioctxs.lock().insert(id, Raw(io));
        trace!("{} opened pool {}", id, pool_name);
        Ok(id)
    }

    fn ioctx_destroy(&self, io: IoCtxId) {
        if let Some(raw) = self.ioctxs.lock().remove(&io) {
            unsafe { rados_ioctx_destroy(raw.0) };
        }
    }

    fn ioctx_pool_id(&self, io: IoCtxId) -> NativeResult<i64> {
        let raw = self.io(io)?;
        Ok(unsafe { rados_ioctx_get_id(raw) })
    }

    fn write_full(&self, io: IoCtxId, oid: &str, data: &[u8]) -> NativeResult<()> {
        let raw = self.io(io)?;
        let oid = cstr(oid)?;
        check(unsafe {
            rados_write_full(raw, oid.as_ptr(), data.as_ptr() as *const c_char, data.len())
        })
    }

    fn write(&self, io: IoCtxId, oid: &str, data: &[u8], offset: u64) -> NativeResult<()> {
        let raw = self.io(io)?;
        let oid = cstr(oid)?;
        check(unsafe {
            rados_write(
                raw,
                oid.as_ptr(),
                data.as_ptr() as *const c_char,
                data.len(),
                offset,
            )
        })
    }

    fn append(&self, io: IoCtxId, oid: &str, data: &[u8]) -> NativeResult<()> {
        let raw = self.io(io)?;
        let oid = cstr(oid)?;
        check(unsafe {
            rados_append(raw, oid.as_ptr(), data.as_ptr() as *const c_char, data.len())
        })
    }

    fn read(&self, io: IoCtxId, oid: &str, buf: &mut [u8], offset: u64) -> NativeResult<usize> {
        let raw = self.io(io)?;
        let oid = cstr(oid)?;
        let ret = unsafe {
            rados_read(
                raw,
                oid.as_ptr(),
                buf.as_mut_ptr() as *mut c_char,
                buf.len(),
                offset,
            )
        };
        check(ret)?;
        Ok(ret as usize)
    }

    fn remove(&self, io: IoCtxId, oid: &str) -> NativeResult<()> {
        let raw = self.io(io)?;
        let oid = cstr(oid)?;
        check(unsafe { rados_remove(raw, oid.as_ptr()) })
    }

    fn stat(&self, io: IoCtxId, oid: &str) -> NativeResult<ObjectStat> {
        let raw = self.io(io)?;
        let oid = cstr(oid)?;
        let mut size = 0u64;
        let mut mtime: time_t = 0;
        check(unsafe { rados_stat(raw, oid.as_ptr(), &mut size, &mut mtime) })?;
        Ok(ObjectStat {
            size,
            mtime: UNIX_EPOCH + Duration::from_secs(mtime.max(0) as u64),
        })
    }

    fn list_objects(&self, io: IoCtxId) -> NativeResult<Vec<String>> {
        let raw = self.io(io)?;
        let mut ctx: RadosListCtxT = std::ptr::null_mut();
        check(unsafe { rados_nobjects_list_open(raw, &mut ctx) })?;

        let mut names = Vec::new();
        let result = loop {
            let mut entry: *const c_char = std::ptr::null();
            let ret = unsafe {
                rados_nobjects_list_next(ctx, &mut entry, std::ptr::null_mut(), std::ptr::null_mut())
            };
            if ret == -libc::ENOENT {
                break Ok(names);
            }
            if ret < 0 {
                break Err(ret);
            }
            // SAFETY: entry points at a NUL-terminated name owned by the list context
            names.push(unsafe { CStr::from_ptr(entry) }.to_string_lossy().into_owned());
        };
        unsafe { rados_nobjects_list_close(ctx) };
        result
    }

    fn setxattr(&self, io: IoCtxId, oid: &str, name: &str, value: &[u8]) -> NativeResult<()> {
        let raw = self.io(io)?;
        let (oid, name) = (cstr(oid)?, cstr(name)?);
        check(unsafe {
            rados_setxattr(
                raw,
                oid.as_ptr(),
                name.as_ptr(),
                value.as_ptr() as *const c_char,
                value.len(),
            )
        })
    }

    fn getxattr(
        &self,
        io: IoCtxId,
        oid: &str,
        name: &str,
        buf: &mut [u8],
    ) -> NativeResult<usize> {
        let raw = self.io(io)?;
        let (oid, name) = (cstr(oid)?, cstr(name)?);
        let ret = unsafe {
            rados_getxattr(
                raw,
                oid.as_ptr(),
                name.as_ptr(),
                buf.as_mut_ptr() as *mut c_char,
                buf.len(),
            )
        };
        check(ret)?;
        Ok(ret as usize)
    }

    fn rmxattr(&self, io: IoCtxId, oid: &str, name: &str) -> NativeResult<()> {
        let raw = self.io(io)?;
        let (oid, name) = (cstr(oid)?, cstr(name)?);
        check(unsafe { rados_rmxattr(raw, oid.as_ptr(), name.as_ptr()) })
    }

    fn aio_create_completion(&self, callback: Arc<dyn AioCallback>) -> NativeResult<CompletionId> {
        let ctx = Box::into_raw(Box::new(CallbackCtx { callback }));
        let mut raw: RadosCompletionT = std::ptr::null_mut();
        let ret = unsafe {
            rados_aio_create_completion(
                ctx as *mut c_void,
                Some(on_complete),
                Some(on_safe),
                &mut raw,
            )
        };
        if ret < 0 {
            // SAFETY: librados never saw the context
            drop(unsafe { Box::from_raw(ctx) });
            return Err(ret);
        }
        let id = CompletionId(self.next_id());
        self.completions.lock().insert(
            id,
            CompletionEntry {
                raw: Raw(raw),
                ctx: Raw(ctx as *mut c_void),
                payload: None,
                read_buf: None,
                submitted: false,
            },
        );
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
        let (raw_io, c) = (self.io(io)?, self.completion(completion)?);
        let oid = cstr(oid)?;
        let (ptr, len) = self.hold_payload(completion, data)?;
        self.issued(completion, unsafe { rados_aio_write(raw_io, oid.as_ptr(), c, ptr, len, offset) })
    }

    fn aio_write_full(
        &self,
        io: IoCtxId,
        oid: &str,
        completion: CompletionId,
        data: Bytes,
    ) -> NativeResult<()> {
        let (raw_io, c) = (self.io(io)?, self.completion(completion)?);
        let oid = cstr(oid)?;
        let (ptr, len) = self.hold_payload(completion, data)?;
        self.issued(completion, unsafe { rados_aio_write_full(raw_io, oid.as_ptr(), c, ptr, len) })
    }

    fn aio_append(
        &self,
        io: IoCtxId,
        oid: &str,
        completion: CompletionId,
        data: Bytes,
    ) -> NativeResult<()> {
        let (raw_io, c) = (self.io(io)?, self.completion(completion)?);
        let oid = cstr(oid)?;
        let (ptr, len) = self.hold_payload(completion, data)?;
        self.issued(completion, unsafe { rados_aio_append(raw_io, oid.as_ptr(), c, ptr, len) })
    }

    fn aio_read(
        &self,
        io: IoCtxId,
        oid: &str,
        completion: CompletionId,
        len: usize,
        offset: u64,
    ) -> NativeResult<()> {
        let (raw_io, c) = (self.io(io)?, self.completion(completion)?);
        let oid = cstr(oid)?;
        let ptr = {
            let mut completions = self.completions.lock();
            let entry = completions.get_mut(&completion).ok_or(-libc::EBADF)?;
            // the Vec's heap allocation does not move while it sits in the entry
            let buf = entry.read_buf.insert(vec![0u8; len]);
            buf.as_mut_ptr() as *mut c_char
        };
        self.issued(completion, unsafe { rados_aio_read(raw_io, oid.as_ptr(), c, ptr, len, offset) })
    }

    fn aio_flush_async(&self, io: IoCtxId, completion: CompletionId) -> NativeResult<()> {
        let (raw_io, c) = (self.io(io)?, self.completion(completion)?);
        self.issued(completion, unsafe { rados_aio_flush_async(raw_io, c) })
    }

    fn aio_cancel(&self, io: IoCtxId, completion: CompletionId) -> NativeResult<()> {
        let (raw_io, c) = (self.io(io)?, self.completion(completion)?);
        check(unsafe { rados_aio_cancel(raw_io, c) })
    }

    fn aio_read_data(&self, completion: CompletionId) -> Option<Bytes> {
        let completions = self.completions.lock();
        let entry = completions.get(&completion)?;
        let ret = unsafe { rados_aio_get_return_value(entry.raw.0) };
        let buf = entry.read_buf.as_ref()?;
        if ret < 0 {
            return None;
        }
        Some(Bytes::copy_from_slice(&buf[..(ret as usize).min(buf.len())]))
    }

    fn aio_release(&self, completion: CompletionId) {
        let entry = self.completions.lock().remove(&completion);
        if let Some(entry) = entry {
            // SAFETY: removed from the table, ctx came from aio_create_completion
            unsafe { entry.free() };
        }
    }

    fn mon_command(&self, cluster: ClusterId, cmd: &[String], inbuf: &[u8]) -> CommandOutput {
        let raw = match self.cluster(cluster) {
            Ok(raw) => raw,
            Err(e) => return CommandOutput::error(e, "unknown cluster handle"),
        };
        Self::run_command(cmd, inbuf, |c, cl, i, il, o, ol, s, sl| unsafe {
            rados_mon_command(raw, c, cl, i, il, o, ol, s, sl)
        })
    }

    fn osd_command(
        &self,
        cluster: ClusterId,
        osd_id: i32,
        cmd: &[String],
        inbuf: &[u8],
    ) -> CommandOutput {
        let raw = match self.cluster(cluster) {
            Ok(raw) => raw,
            Err(e) => return CommandOutput::error(e, "unknown cluster handle"),
        };
        Self::run_command(cmd, inbuf, |c, cl, i, il, o, ol, s, sl| unsafe {
            rados_osd_command(raw, osd_id, c, cl, i, il, o, ol, s, sl)
        })
    }

    fn pg_command(
        &self,
        cluster: ClusterId,
        pgid: &str,
        cmd: &[String],
        inbuf: &[u8],
    ) -> CommandOutput {
        let raw = match self.cluster(cluster) {
            Ok(raw) => raw,
            Err(e) => return CommandOutput::error(e, "unknown cluster handle"),
        };
        let pgid = match cstr(pgid) {
            Ok(pgid) => pgid,
            Err(e) => return CommandOutput::error(e, "pgid contains a NUL byte"),
        };
        Self::run_command(cmd, inbuf, |c, cl, i, il, o, ol, s, sl| unsafe {
            rados_pg_command(raw, pgid.as_ptr(), c, cl, i, il, o, ol, s, sl)
        })
    }

    fn snap_create(&self, io: IoCtxId, name: &str) -> NativeResult<()> {
        let raw = self.io(io)?;
        let name = cstr(name)?;
        check(unsafe { rados_ioctx_snap_create(raw, name.as_ptr()) })
    }

    fn snap_remove(&self, io: IoCtxId, name: &str) -> NativeResult<()> {
        let raw = self.io(io)?;
        let name = cstr(name)?;
        check(unsafe { rados_ioctx_snap_remove(raw, name.as_ptr()) })
    }

    fn snap_rollback(&self, io: IoCtxId, oid: &str, name: &str) -> NativeResult<()> {
        let raw = self.io(io)?;
        let (oid, name) = (cstr(oid)?, cstr(name)?);
        check(unsafe { rados_ioctx_snap_rollback(raw, oid.as_ptr(), name.as_ptr()) })
    }

    fn snap_lookup(&self, io: IoCtxId, name: &str) -> NativeResult<u64> {
        let raw = self.io(io)?;
        let name = cstr(name)?;
        let mut id = 0u64;
        check(unsafe { rados_ioctx_snap_lookup(raw, name.as_ptr(), &mut id) })?;
        Ok(id)
    }

    fn snap_list(&self, io: IoCtxId) -> NativeResult<Vec<u64>> {
        let raw = self.io(io)?;
        let mut len = 16usize;
        loop {
            let mut snaps = vec![0u64; len];
            let ret = unsafe { rados_ioctx_snap_list(raw, snaps.as_mut_ptr(), len as c_int) };
            if ret == -libc::ERANGE {
                len *= 2;
                continue;
            }
            check(ret)?;
            snaps.truncate(ret as usize);
            return Ok(snaps);
        }
    }

    fn snap_get_name(&self, io: IoCtxId, snap: u64) -> NativeResult<String> {
        let raw = self.io(io)?;
        let mut len = 64usize;
        loop {
            let mut buf = vec![0u8; len];
            let ret = unsafe {
                rados_ioctx_snap_get_name(raw, snap, buf.as_mut_ptr() as *mut c_char, len as c_int)
            };
            if ret == -libc::ERANGE {
                len *= 2;
                continue;
            }
            check(ret)?;
            return Ok(nul_terminated(&buf));
        }
    }

    fn snap_get_stamp(&self, io: IoCtxId, snap: u64) -> NativeResult<i64> {
        let raw = self.io(io)?;
        let mut stamp: time_t = 0;
        check(unsafe { rados_ioctx_snap_get_stamp(raw, snap, &mut stamp) })?;
        Ok(stamp as i64)
    }

    fn snap_set_read(&self, io: IoCtxId, snap: u64) {
        if let Ok(raw) = self.io(io) {
            unsafe { rados_ioctx_snap_set_read(raw, snap) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_names() {
        assert_eq!(split_names(b"data\0rbd\0\0"), vec!["data", "rbd"]);
        assert!(split_names(b"\0").is_empty());
    }

    #[test]
    fn test_nul_terminated() {
        assert_eq!(nul_terminated(b"abc\0garbage"), "abc");
        assert_eq!(nul_terminated(b"full"), "full");
    }
}
