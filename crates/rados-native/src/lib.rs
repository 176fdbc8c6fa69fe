//! Native RADOS boundary
//!
//! This crate exposes the handle-based RADOS interface as the [`RadosNative`]
//! trait: opaque ids instead of pointers, negative errno values instead of
//! errors, and no automatic lifetime management. Two backends implement it:
//!
//! - [`MemRados`]: an in-process simulated cluster, always available
//! - `LibRados`: bindings to the system `librados`, behind the `librados`
//!   feature
//!
//! The safe client API is built on top of this trait in `radosclient`.

#[cfg(feature = "librados")]
pub mod ffi;
pub mod mem;
pub mod native;
pub mod types;

#[cfg(feature = "librados")]
pub use ffi::LibRados;
pub use mem::{MemOptions, MemRados};
pub use native::{AioCallback, RadosNative};
pub use types::{
    ClusterId, ClusterStat, CommandOutput, CompletionId, IoCtxId, NativeResult, ObjectStat,
    SNAP_HEAD,
};

use std::sync::Arc;

/// The backend selected at build time
///
/// With the `librados` feature this talks to a real cluster; otherwise it is
/// a fresh in-memory cluster.
pub fn default_backend() -> std::io::Result<Arc<dyn RadosNative>> {
    #[cfg(feature = "librados")]
    {
        Ok(Arc::new(LibRados::new()))
    }
    #[cfg(not(feature = "librados"))]
    {
        Ok(Arc::new(MemRados::new()?))
    }
}
