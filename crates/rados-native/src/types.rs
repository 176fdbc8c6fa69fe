//! Plain data crossing the native boundary

use serde::Serialize;
use std::fmt;
use std::time::SystemTime;

/// Result of a native call: the value, or the negative errno it returned
pub type NativeResult<T> = std::result::Result<T, i32>;

/// Snapshot id selecting the live ("head") object state
pub const SNAP_HEAD: u64 = u64::MAX - 1;

macro_rules! handle_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

handle_id!(
    /// Opaque cluster handle (`rados_t`)
    ClusterId
);
handle_id!(
    /// Opaque pool I/O context (`rados_ioctx_t`)
    IoCtxId
);
handle_id!(
    /// Opaque asynchronous completion token (`rados_completion_t`)
    CompletionId
);

/// Cluster-wide usage (`rados_cluster_stat_t`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClusterStat {
    pub kb: u64,
    pub kb_used: u64,
    pub kb_avail: u64,
    pub num_objects: u64,
}

/// Object size and modification time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
    pub mtime: SystemTime,
}

/// Raw reply of an administrative command
///
/// `status` is zero or a negative errno; `outbuf` and `outs` are exactly what
/// the daemon returned, sized by the native call itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub outbuf: Vec<u8>,
    pub outs: String,
}

impl CommandOutput {
    pub fn ok(outbuf: Vec<u8>) -> Self {
        Self {
            status: 0,
            outbuf,
            outs: String::new(),
        }
    }

    pub fn error(status: i32, outs: impl Into<String>) -> Self {
        Self {
            status,
            outbuf: Vec::new(),
            outs: outs.into(),
        }
    }
}
