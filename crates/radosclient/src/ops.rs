//! Object operations on a pool context
//!
//! Synchronous calls block until the cluster acknowledges them. The `aio_*`
//! variants return a [`CompletionHandle`] right after submission.

use bytes::Bytes;
use rados_native::ObjectStat;
use tracing::trace;

use crate::completion::{AioOp, CompletionHandle};
use crate::error::{RadosError, Result};
use crate::ioctx::PoolContext;

impl<'c> PoolContext<'c> {
    /// Replace the object's contents, creating it if needed
    pub fn write_full(&self, object: &str, data: &[u8]) -> Result<()> {
        let io = self.registry().io("write_full")?;
        self.registry()
            .native()
            .write_full(io, object, data)
            .map_err(|code| RadosError::io("write_full", object, code))?;
        trace!("write_full {} bytes to {}/{}", data.len(), self.name(), object);
        Ok(())
    }

    /// Write at `offset`; a gap past the current end reads back as zeros
    pub fn write(&self, object: &str, data: &[u8], offset: u64) -> Result<()> {
        let io = self.registry().io("write")?;
        self.registry()
            .native()
            .write(io, object, data, offset)
            .map_err(|code| RadosError::io("write", object, code))?;
        trace!(
            "write {} bytes at {} to {}/{}",
            data.len(),
            offset,
            self.name(),
            object
        );
        Ok(())
    }

    pub fn append(&self, object: &str, data: &[u8]) -> Result<()> {
        let io = self.registry().io("append")?;
        self.registry()
            .native()
            .append(io, object, data)
            .map_err(|code| RadosError::io("append", object, code))
    }

    /// Read up to `len` bytes starting at `offset`
    ///
    /// Reading at or past the end of the object returns an empty buffer.
    pub fn read(&self, object: &str, len: usize, offset: u64) -> Result<Bytes> {
        let io = self.registry().io("read")?;
        let mut buf = vec![0u8; len];
        let n = self
            .registry()
            .native()
            .read(io, object, &mut buf, offset)
            .map_err(|code| RadosError::io("read", object, code))?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    /// Read the whole object
    pub fn read_full(&self, object: &str) -> Result<Bytes> {
        let stat = self.stat(object)?;
        let len = usize::try_from(stat.size).map_err(|_| {
            RadosError::io("read", object, -libc::EFBIG)
        })?;
        self.read(object, len, 0)
    }

    pub fn stat(&self, object: &str) -> Result<ObjectStat> {
        let io = self.registry().io("stat")?;
        self.registry()
            .native()
            .stat(io, object)
            .map_err(|code| RadosError::io("stat", object, code))
    }

    pub fn remove(&self, object: &str) -> Result<()> {
        let io = self.registry().io("remove")?;
        self.registry()
            .native()
            .remove(io, object)
            .map_err(|code| RadosError::io("remove", object, code))
    }

    /// Names of all objects in the pool, sorted
    pub fn list_objects(&self) -> Result<Vec<String>> {
        let io = self.registry().io("list objects")?;
        let mut names = self
            .registry()
            .native()
            .list_objects(io)
            .map_err(|code| RadosError::io("list objects", self.name(), code))?;
        names.sort();
        Ok(names)
    }

    // ===== Extended attributes =====

    pub fn set_xattr(&self, object: &str, name: &str, value: &[u8]) -> Result<()> {
        let io = self.registry().io("setxattr")?;
        self.registry()
            .native()
            .setxattr(io, object, name, value)
            .map_err(|code| RadosError::io("setxattr", object, code))
    }

    /// Fetch an attribute value of at most `max_size` bytes
    pub fn get_xattr(&self, object: &str, name: &str, max_size: usize) -> Result<Bytes> {
        let io = self.registry().io("getxattr")?;
        let mut buf = vec![0u8; max_size];
        match self.registry().native().getxattr(io, object, name, &mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Err(code) if code == -libc::ERANGE => Err(RadosError::BufferTooSmall {
                object: object.to_string(),
                attr: name.to_string(),
                limit: max_size,
                code,
            }),
            Err(code) => Err(RadosError::io("getxattr", object, code)),
        }
    }

    pub fn remove_xattr(&self, object: &str, name: &str) -> Result<()> {
        let io = self.registry().io("rmxattr")?;
        self.registry()
            .native()
            .rmxattr(io, object, name)
            .map_err(|code| RadosError::io("rmxattr", object, code))
    }

    // ===== Asynchronous I/O =====

    /// Submit an asynchronous operation
    pub fn submit(&self, object: &str, op: AioOp) -> Result<CompletionHandle<'_>> {
        let kind = op.kind();
        self.registry().start(kind, object, move |native, io, id| match op {
            AioOp::Write { data, offset } => native.aio_write(io, object, id, data, offset),
            AioOp::WriteFull { data } => native.aio_write_full(io, object, id, data),
            AioOp::Append { data } => native.aio_append(io, object, id, data),
            AioOp::Read { len, offset } => native.aio_read(io, object, id, len, offset),
        })
    }

    pub fn aio_write(
        &self,
        object: &str,
        data: impl Into<Bytes>,
        offset: u64,
    ) -> Result<CompletionHandle<'_>> {
        self.submit(
            object,
            AioOp::Write {
                data: data.into(),
                offset,
            },
        )
    }

    pub fn aio_write_full(&self, object: &str, data: impl Into<Bytes>) -> Result<CompletionHandle<'_>> {
        self.submit(object, AioOp::WriteFull { data: data.into() })
    }

    pub fn aio_append(&self, object: &str, data: impl Into<Bytes>) -> Result<CompletionHandle<'_>> {
        self.submit(object, AioOp::Append { data: data.into() })
    }

    /// Read asynchronously; fetch the bytes with [`CompletionHandle::read_data`]
    pub fn aio_read(&self, object: &str, len: usize, offset: u64) -> Result<CompletionHandle<'_>> {
        self.submit(object, AioOp::Read { len, offset })
    }

    /// Completes once every write submitted before it is durable
    pub fn aio_flush(&self) -> Result<CompletionHandle<'_>> {
        self.registry().flush_async()
    }
}
