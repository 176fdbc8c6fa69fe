//! Error types for RADOS client operations
//!
//! Every failure reported by the native layer is translated exactly once into
//! a `RadosError` that keeps the raw negative errno (see [`RadosError::code`])
//! and names the operation and its target. Errors detected by this crate
//! itself, such as using a closed pool context, carry no code.

use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a [`RadosError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Config,
    InvalidState,
    PoolNotFound,
    PoolExists,
    Io,
    BufferTooSmall,
    SnapshotExists,
    SnapshotNotFound,
    AlreadyComplete,
    UseWhilePending,
    Command,
    Timeout,
}

/// Errors that can occur during RADOS client operations
#[derive(Debug, Error)]
pub enum RadosError {
    #[error("Connection error in {op}: {message}")]
    Connection {
        op: &'static str,
        code: Option<i32>,
        message: String,
    },

    #[error("Config error in {op}: {message}")]
    Config {
        op: &'static str,
        code: i32,
        message: String,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Pool not found: {pool}")]
    PoolNotFound { pool: String, code: i32 },

    #[error("Pool already exists: {pool}")]
    PoolExists { pool: String, code: i32 },

    #[error("I/O error in {op} on {object}: {message}")]
    Io {
        op: &'static str,
        object: String,
        code: i32,
        message: String,
    },

    #[error("Attribute {attr} on {object} does not fit in {limit} bytes")]
    BufferTooSmall {
        object: String,
        attr: String,
        limit: usize,
        code: i32,
    },

    #[error("Snapshot already exists: {name}")]
    SnapshotExists { name: String, code: i32 },

    #[error("Snapshot not found: {name}")]
    SnapshotNotFound { name: String, code: i32 },

    #[error("Operation already complete: {message}")]
    AlreadyComplete { message: String, code: Option<i32> },

    #[error("Completion still pending: {0}")]
    UseWhilePending(String),

    #[error("Command to {target} failed: {message}")]
    Command {
        target: String,
        code: i32,
        message: String,
    },

    #[error("Operation timeout after {0:?}")]
    Timeout(Duration),
}

/// Result type alias for RADOS client operations
pub type Result<T> = std::result::Result<T, RadosError>;

/// Human-readable text for a negative errno
pub fn errno_message(code: i32) -> String {
    let err = std::io::Error::from_raw_os_error(code.saturating_neg());
    let text = err.to_string();
    match text.find(" (os error") {
        Some(end) => text[..end].to_string(),
        None => text,
    }
}

impl RadosError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RadosError::Connection { .. } => ErrorKind::Connection,
            RadosError::Config { .. } => ErrorKind::Config,
            RadosError::InvalidState(_) => ErrorKind::InvalidState,
            RadosError::PoolNotFound { .. } => ErrorKind::PoolNotFound,
            RadosError::PoolExists { .. } => ErrorKind::PoolExists,
            RadosError::Io { .. } => ErrorKind::Io,
            RadosError::BufferTooSmall { .. } => ErrorKind::BufferTooSmall,
            RadosError::SnapshotExists { .. } => ErrorKind::SnapshotExists,
            RadosError::SnapshotNotFound { .. } => ErrorKind::SnapshotNotFound,
            RadosError::AlreadyComplete { .. } => ErrorKind::AlreadyComplete,
            RadosError::UseWhilePending(_) => ErrorKind::UseWhilePending,
            RadosError::Command { .. } => ErrorKind::Command,
            RadosError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// The native status code, if the error came from the native layer
    pub fn code(&self) -> Option<i32> {
        match self {
            RadosError::Connection { code, .. } | RadosError::AlreadyComplete { code, .. } => {
                *code
            }
            RadosError::Config { code, .. }
            | RadosError::PoolNotFound { code, .. }
            | RadosError::PoolExists { code, .. }
            | RadosError::Io { code, .. }
            | RadosError::BufferTooSmall { code, .. }
            | RadosError::SnapshotExists { code, .. }
            | RadosError::SnapshotNotFound { code, .. }
            | RadosError::Command { code, .. } => Some(*code),
            RadosError::InvalidState(_)
            | RadosError::UseWhilePending(_)
            | RadosError::Timeout(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::PoolNotFound | ErrorKind::SnapshotNotFound
        ) || self.code() == Some(-libc::ENOENT)
    }

    pub(crate) fn connection(op: &'static str, code: i32) -> Self {
        RadosError::Connection {
            op,
            code: Some(code),
            message: errno_message(code),
        }
    }

    pub(crate) fn not_connected(op: &'static str) -> Self {
        RadosError::Connection {
            op,
            code: None,
            message: "cluster handle is not connected".to_string(),
        }
    }

    pub(crate) fn config(op: &'static str, code: i32) -> Self {
        RadosError::Config {
            op,
            code,
            message: errno_message(code),
        }
    }

    pub(crate) fn io(op: &'static str, object: &str, code: i32) -> Self {
        RadosError::Io {
            op,
            object: object.to_string(),
            code,
            message: errno_message(code),
        }
    }

    /// Map a failed pool-addressing call
    pub(crate) fn pool(op: &'static str, pool: &str, code: i32) -> Self {
        match -code {
            libc::ENOENT => RadosError::PoolNotFound {
                pool: pool.to_string(),
                code,
            },
            libc::EEXIST => RadosError::PoolExists {
                pool: pool.to_string(),
                code,
            },
            _ => RadosError::connection(op, code),
        }
    }

    /// Map a failed snapshot call
    pub(crate) fn snapshot(op: &'static str, name: &str, code: i32) -> Self {
        match -code {
            libc::ENOENT => RadosError::SnapshotNotFound {
                name: name.to_string(),
                code,
            },
            libc::EEXIST => RadosError::SnapshotExists {
                name: name.to_string(),
                code,
            },
            _ => RadosError::io(op, name, code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_codes_are_kept() {
        let err = RadosError::io("read", "greeting", -libc::ENOENT);
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.code(), Some(-libc::ENOENT));
        assert!(err.is_not_found());
        assert!(err.to_string().contains("greeting"));
        assert!(err.to_string().contains("read"));
    }

    #[test]
    fn test_wrapper_errors_have_no_code() {
        let err = RadosError::InvalidState("pool context is closed".into());
        assert_eq!(err.code(), None);
        assert!(!err.is_not_found());

        assert_eq!(RadosError::not_connected("stat").code(), None);
        assert_eq!(
            RadosError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_pool_mapping() {
        let missing = RadosError::pool("open pool", "nope", -libc::ENOENT);
        assert_eq!(missing.kind(), ErrorKind::PoolNotFound);
        assert!(missing.is_not_found());

        let exists = RadosError::pool("pool create", "data", -libc::EEXIST);
        assert_eq!(exists.kind(), ErrorKind::PoolExists);

        let other = RadosError::pool("open pool", "data", -libc::ENOTCONN);
        assert_eq!(other.kind(), ErrorKind::Connection);
        assert_eq!(other.code(), Some(-libc::ENOTCONN));
    }

    #[test]
    fn test_snapshot_mapping() {
        assert_eq!(
            RadosError::snapshot("snap create", "s1", -libc::EEXIST).kind(),
            ErrorKind::SnapshotExists
        );
        assert_eq!(
            RadosError::snapshot("snap remove", "s1", -libc::ENOENT).kind(),
            ErrorKind::SnapshotNotFound
        );
        assert_eq!(
            RadosError::snapshot("snap rollback", "s1", -libc::EROFS).kind(),
            ErrorKind::Io
        );
    }

    #[test]
    fn test_errno_message() {
        assert_eq!(errno_message(-libc::ENOENT), "No such file or directory");
    }
}
