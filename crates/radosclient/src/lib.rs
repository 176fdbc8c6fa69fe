//! Safe RADOS client
//!
//! This crate wraps the handle-based native interface from `rados-native`
//! with typed lifecycles, owned completion tokens and structured errors.
//!
//! # Architecture
//!
//! - `ClusterHandle`: configuration, connection and pool administration
//! - `PoolContext`: object I/O against one pool, borrowed from a cluster handle
//! - `CompletionHandle`: owner of one asynchronous operation's native token
//! - `AdminCommandChannel`: JSON commands to monitors, OSDs and PGs
//! - `SnapshotManager`: pool snapshots and snapshot reads
//!
//! Borrowing encodes the teardown order: a cluster handle cannot be shut
//! down while a pool context is open on it, and a pool context cannot be
//! closed while a completion handle of it is alive.

pub mod cluster;
pub mod command;
pub mod completion;
pub mod config;
pub mod error;
pub mod ioctx;
mod ops;
pub mod snapshot;

// Re-export commonly used types
pub use cluster::{ClusterHandle, ClusterState, Version};
pub use command::{AdminCommand, AdminCommandChannel, CommandReply, CommandTarget, PgId};
pub use completion::{AioKind, AioOp, CompletionHandle, CompletionRegistry, CompletionState};
pub use config::ClientSettings;
pub use error::{errno_message, ErrorKind, RadosError, Result};
pub use ioctx::{PoolContext, DEFAULT_CLOSE_TIMEOUT};
pub use snapshot::{SnapId, SnapInfo, SnapshotManager};

pub use rados_native::{default_backend, ClusterStat, MemRados, ObjectStat, RadosNative};
