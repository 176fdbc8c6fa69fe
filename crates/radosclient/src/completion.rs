//! Asynchronous operation tracking
//!
//! Every asynchronous submission gets its own native completion token and a
//! [`CompletionHandle`] that owns it. Native callbacks advance the handle's
//! state; callers wait on it with explicit timeouts. States only move forward:
//!
//! ```text
//! Submitted --> CompleteInMemory --> CompleteOnDisk
//!     |                \
//!     +--> Canceled     +--> Failed (a failing op may also go straight here)
//!     +--> Failed
//! ```
//!
//! The token is released exactly once: explicitly through
//! [`CompletionHandle::release`], on drop, or, for handles dropped while the
//! operation was still pending, by the registry once the operation settles.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use rados_native::{AioCallback, CompletionId, IoCtxId, NativeResult, RadosNative};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::error::{errno_message, RadosError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    Submitted,
    CompleteInMemory,
    CompleteOnDisk,
    Canceled,
    Failed(i32),
}

impl CompletionState {
    fn rank(self) -> u8 {
        match self {
            CompletionState::Submitted => 0,
            CompletionState::CompleteInMemory => 1,
            CompletionState::CompleteOnDisk
            | CompletionState::Canceled
            | CompletionState::Failed(_) => 2,
        }
    }

    /// The operation can make no further progress
    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// The operation has at least been applied in memory, or has ended
    pub fn is_complete(self) -> bool {
        self.rank() >= 1
    }
}

/// An asynchronous operation on one object
///
/// Payloads are moved into the operation and stay owned by it until it
/// settles.
#[derive(Debug, Clone)]
pub enum AioOp {
    Write { data: Bytes, offset: u64 },
    WriteFull { data: Bytes },
    Append { data: Bytes },
    Read { len: usize, offset: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AioKind {
    Write,
    WriteFull,
    Append,
    Read,
    Flush,
}

impl AioOp {
    pub fn kind(&self) -> AioKind {
        match self {
            AioOp::Write { .. } => AioKind::Write,
            AioOp::WriteFull { .. } => AioKind::WriteFull,
            AioOp::Append { .. } => AioKind::Append,
            AioOp::Read { .. } => AioKind::Read,
        }
    }
}

impl AioKind {
    fn op_name(self) -> &'static str {
        match self {
            AioKind::Write => "aio write",
            AioKind::WriteFull => "aio write_full",
            AioKind::Append => "aio append",
            AioKind::Read => "aio read",
            AioKind::Flush => "aio flush",
        }
    }
}

/// End of a bounded wait; `None` when the timeout is too far out to represent
#[derive(Debug, Clone, Copy)]
struct Deadline {
    timeout: Duration,
    at: Option<Instant>,
}

impl Deadline {
    fn after(timeout: Duration) -> Self {
        Self {
            timeout,
            at: Instant::now().checked_add(timeout),
        }
    }

    fn remaining(&self) -> Duration {
        match self.at {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => self.timeout,
        }
    }
}

struct Progress {
    state: CompletionState,
    history: Vec<CompletionState>,
    ret: Option<i32>,
}

/// Receives native callbacks and wakes waiters
pub(crate) struct Tracker {
    progress: Mutex<Progress>,
    changed: Condvar,
}

impl Tracker {
    fn new() -> Self {
        Self {
            progress: Mutex::new(Progress {
                state: CompletionState::Submitted,
                history: vec![CompletionState::Submitted],
                ret: None,
            }),
            changed: Condvar::new(),
        }
    }

    /// Move forward to `next`; stale or backward transitions are ignored
    fn advance(&self, next: CompletionState, ret: i32) {
        let mut progress = self.progress.lock();
        if next.rank() <= progress.state.rank() {
            return;
        }
        progress.state = next;
        progress.history.push(next);
        progress.ret = Some(ret);
        drop(progress);
        self.changed.notify_all();
    }

    fn state(&self) -> CompletionState {
        self.progress.lock().state
    }

    fn wait_until(
        &self,
        timeout: Duration,
        ready: impl Fn(CompletionState) -> bool,
    ) -> Result<CompletionState> {
        let deadline = Deadline::after(timeout);
        let mut progress = self.progress.lock();
        while !ready(progress.state) {
            let Some(at) = deadline.at else {
                self.changed.wait(&mut progress);
                continue;
            };
            if self.changed.wait_until(&mut progress, at).timed_out() {
                if ready(progress.state) {
                    break;
                }
                return Err(RadosError::Timeout(timeout));
            }
        }
        Ok(progress.state)
    }
}

impl AioCallback for Tracker {
    fn complete(&self, ret: i32) {
        let next = match ret {
            r if r == -libc::ECANCELED => CompletionState::Canceled,
            r if r < 0 => CompletionState::Failed(r),
            _ => CompletionState::CompleteInMemory,
        };
        self.advance(next, ret);
    }

    fn safe(&self, ret: i32) {
        let next = match ret {
            r if r == -libc::ECANCELED => CompletionState::Canceled,
            r if r < 0 => CompletionState::Failed(r),
            _ => CompletionState::CompleteOnDisk,
        };
        self.advance(next, ret);
    }
}

struct Record {
    kind: AioKind,
    object: String,
    tracker: Arc<Tracker>,
    /// The owning handle was dropped before the op settled
    orphaned: bool,
}

/// Outstanding asynchronous operations of one pool context
pub struct CompletionRegistry {
    native: Arc<dyn RadosNative>,
    io: IoCtxId,
    pool: String,
    open: AtomicBool,
    records: Mutex<HashMap<CompletionId, Record>>,
}

impl CompletionRegistry {
    pub(crate) fn new(native: Arc<dyn RadosNative>, io: IoCtxId, pool: &str) -> Self {
        Self {
            native,
            io,
            pool: pool.to_string(),
            open: AtomicBool::new(true),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn native(&self) -> &dyn RadosNative {
        self.native.as_ref()
    }

    /// Native pool context, or `InvalidState` once closed
    pub(crate) fn io(&self, op: &str) -> Result<IoCtxId> {
        if !self.is_open() {
            return Err(RadosError::InvalidState(format!(
                "{} on closed pool context '{}'",
                op, self.pool
            )));
        }
        Ok(self.io)
    }

    /// Start an operation on a fresh token
    pub(crate) fn start(
        &self,
        kind: AioKind,
        object: &str,
        issue: impl FnOnce(&dyn RadosNative, IoCtxId, CompletionId) -> NativeResult<()>,
    ) -> Result<CompletionHandle<'_>> {
        let op = kind.op_name();
        let io = self.io(op)?;
        self.reap();

        let tracker = Arc::new(Tracker::new());
        let id = self
            .native
            .aio_create_completion(tracker.clone())
            .map_err(|code| RadosError::io(op, object, code))?;

        self.records.lock().insert(
            id,
            Record {
                kind,
                object: object.to_string(),
                tracker: tracker.clone(),
                orphaned: false,
            },
        );

        if let Err(code) = issue(self.native.as_ref(), io, id) {
            debug!("{} on {} failed at submission: {}", op, object, code);
            tracker.advance(CompletionState::Failed(code), code);
            self.records.lock().remove(&id);
            self.native.aio_release(id);
            return Err(RadosError::io(op, object, code));
        }

        trace!("Submitted {} on {} as {}", op, object, id);
        Ok(CompletionHandle {
            registry: self,
            id,
            kind,
            object: object.to_string(),
            tracker,
            released: false,
        })
    }

    /// Number of tracked operations that have not settled
    pub fn outstanding(&self) -> usize {
        self.records
            .lock()
            .values()
            .filter(|r| !r.tracker.state().is_terminal())
            .count()
    }

    /// Wait until every tracked operation is durable or otherwise settled
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        let deadline = Deadline::after(timeout);
        let trackers: Vec<Arc<Tracker>> = self
            .records
            .lock()
            .values()
            .map(|r| r.tracker.clone())
            .collect();
        for tracker in trackers {
            tracker
                .wait_until(deadline.remaining(), CompletionState::is_terminal)
                .map_err(|_| RadosError::Timeout(timeout))?;
        }
        self.reap();
        Ok(())
    }

    /// Ask the cluster to report once all writes submitted so far are durable
    pub fn flush_async(&self) -> Result<CompletionHandle<'_>> {
        self.start(AioKind::Flush, "", |native, io, id| {
            native.aio_flush_async(io, id)
        })
    }

    /// Release tokens of dropped handles whose operations have settled
    pub(crate) fn reap(&self) {
        let mut records = self.records.lock();
        let settled: Vec<CompletionId> = records
            .iter()
            .filter(|(_, r)| r.orphaned && r.tracker.state().is_terminal())
            .map(|(id, _)| *id)
            .collect();
        for id in settled {
            records.remove(&id);
            self.native.aio_release(id);
            trace!("Reaped {}", id);
        }
    }

    fn orphan(&self, id: CompletionId) {
        if let Some(record) = self.records.lock().get_mut(&id) {
            record.orphaned = true;
        }
    }

    fn forget(&self, id: CompletionId) {
        self.records.lock().remove(&id);
    }

    /// Stop accepting work and settle what dropped handles left behind
    ///
    /// Operations still queued after `timeout` are canceled and released.
    /// Tokens of operations already running are leaked rather than released
    /// under them.
    pub(crate) fn shut(&self, timeout: Duration) -> Result<()> {
        self.open.store(false, Ordering::Release);

        let deadline = Deadline::after(timeout);
        let pending: Vec<Arc<Tracker>> = self
            .records
            .lock()
            .values()
            .filter(|r| r.orphaned)
            .map(|r| r.tracker.clone())
            .collect();
        for tracker in pending {
            // leftovers are handled below
            let _ = tracker.wait_until(deadline.remaining(), CompletionState::is_terminal);
        }
        self.reap();

        let leftovers: Vec<(CompletionId, Record)> = self.records.lock().drain().collect();
        if leftovers.is_empty() {
            return Ok(());
        }
        for (id, record) in leftovers {
            // ops still queued are stopped before they touch the pool
            if self.native.aio_cancel(self.io, id).is_ok() {
                record.tracker.advance(CompletionState::Canceled, -libc::ECANCELED);
                self.native.aio_release(id);
                warn!(
                    "Canceled {} ({:?} on {}) unsettled at close of pool '{}'",
                    id, record.kind, record.object, self.pool
                );
            } else {
                warn!(
                    "Leaking {} ({:?} on {}) still pending in pool '{}'",
                    id, record.kind, record.object, self.pool
                );
            }
        }
        Err(RadosError::Timeout(timeout))
    }
}

/// Owner of one native completion token
pub struct CompletionHandle<'p> {
    registry: &'p CompletionRegistry,
    id: CompletionId,
    kind: AioKind,
    object: String,
    tracker: Arc<Tracker>,
    released: bool,
}

impl<'p> CompletionHandle<'p> {
    pub fn id(&self) -> CompletionId {
        self.id
    }

    pub fn kind(&self) -> AioKind {
        self.kind
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    /// Current state without blocking
    pub fn poll(&self) -> CompletionState {
        self.tracker.state()
    }

    pub fn is_complete(&self) -> bool {
        self.poll().is_complete()
    }

    fn ensure_owned(&self) -> Result<()> {
        if self.released {
            return Err(RadosError::InvalidState(format!(
                "{} was already released",
                self.id
            )));
        }
        Ok(())
    }

    /// Block until the cluster has applied the op, or it ended otherwise
    pub fn wait_for_complete(&self, timeout: Duration) -> Result<CompletionState> {
        self.ensure_owned()?;
        self.tracker.wait_until(timeout, CompletionState::is_complete)
    }

    /// Block until the op is durable, canceled or failed
    pub fn wait_for_durable(&self, timeout: Duration) -> Result<CompletionState> {
        self.ensure_owned()?;
        self.tracker.wait_until(timeout, CompletionState::is_terminal)
    }

    /// Cancel an op that has not completed yet
    pub fn cancel(&self) -> Result<()> {
        self.ensure_owned()?;
        let state = self.poll();
        if state != CompletionState::Submitted {
            return Err(RadosError::AlreadyComplete {
                message: format!("{} is {:?}", self.id, state),
                code: None,
            });
        }

        let op = self.kind.op_name();
        match self.registry.native.aio_cancel(self.registry.io, self.id) {
            Ok(()) => {
                self.tracker
                    .advance(CompletionState::Canceled, -libc::ECANCELED);
                debug!("Canceled {} on {}", op, self.object);
                Ok(())
            }
            Err(code) if code == -libc::ENOENT || code == -libc::EALREADY => {
                Err(RadosError::AlreadyComplete {
                    message: format!("{} finished before cancel: {}", self.id, errno_message(code)),
                    code: Some(code),
                })
            }
            Err(code) => Err(RadosError::io(op, &self.object, code)),
        }
    }

    /// Free the native token
    ///
    /// Only allowed once the op is terminal; a second call is `InvalidState`.
    pub fn release(&mut self) -> Result<()> {
        self.ensure_owned()?;
        let state = self.poll();
        if !state.is_terminal() {
            return Err(RadosError::UseWhilePending(format!(
                "{} is {:?}",
                self.id, state
            )));
        }
        self.registry.forget(self.id);
        self.registry.native.aio_release(self.id);
        self.released = true;
        trace!("Released {}", self.id);
        Ok(())
    }

    /// Data returned by a completed read
    pub fn read_data(&self) -> Result<Bytes> {
        self.ensure_owned()?;
        if self.kind != AioKind::Read {
            return Err(RadosError::InvalidState(format!(
                "{} is not a read",
                self.id
            )));
        }
        match self.poll() {
            CompletionState::Submitted => Err(RadosError::UseWhilePending(format!(
                "{} has not completed",
                self.id
            ))),
            CompletionState::Failed(code) => Err(RadosError::io("aio read", &self.object, code)),
            CompletionState::Canceled => {
                Err(RadosError::io("aio read", &self.object, -libc::ECANCELED))
            }
            _ => self
                .registry
                .native
                .aio_read_data(self.id)
                .ok_or_else(|| RadosError::io("aio read", &self.object, -libc::EIO)),
        }
    }

    /// The op's return value once it has completed
    pub fn return_value(&self) -> Option<i32> {
        self.tracker.progress.lock().ret
    }

    /// Every state observed so far, in order
    pub fn history(&self) -> Vec<CompletionState> {
        self.tracker.progress.lock().history.clone()
    }
}

impl std::fmt::Debug for CompletionHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("object", &self.object)
            .field("state", &self.poll())
            .finish()
    }
}

impl Drop for CompletionHandle<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.poll().is_terminal() {
            self.registry.forget(self.id);
            self.registry.native.aio_release(self.id);
        } else {
            trace!("{} dropped while pending, deferring release", self.id);
            self.registry.orphan(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ordering() {
        assert!(!CompletionState::Submitted.is_complete());
        assert!(CompletionState::CompleteInMemory.is_complete());
        assert!(!CompletionState::CompleteInMemory.is_terminal());
        assert!(CompletionState::Failed(-5).is_terminal());
        assert!(CompletionState::Canceled.is_terminal());
    }

    #[test]
    fn test_tracker_never_moves_backward() {
        let tracker = Tracker::new();
        tracker.safe(0);
        tracker.complete(0);
        tracker.safe(0);
        assert_eq!(tracker.state(), CompletionState::CompleteOnDisk);
        assert_eq!(
            tracker.progress.lock().history,
            vec![CompletionState::Submitted, CompletionState::CompleteOnDisk]
        );
    }

    #[test]
    fn test_tracker_failure_is_terminal() {
        let tracker = Tracker::new();
        tracker.complete(-libc::ENOSPC);
        tracker.safe(0);
        assert_eq!(tracker.state(), CompletionState::Failed(-libc::ENOSPC));
    }

    #[test]
    fn test_tracker_cancel() {
        let tracker = Tracker::new();
        tracker.complete(-libc::ECANCELED);
        tracker.safe(-libc::ECANCELED);
        assert_eq!(
            tracker.progress.lock().history,
            vec![CompletionState::Submitted, CompletionState::Canceled]
        );
    }

    #[test]
    fn test_wait_times_out() {
        let tracker = Tracker::new();
        let start = Instant::now();
        let err = tracker
            .wait_until(Duration::from_millis(20), CompletionState::is_complete)
            .unwrap_err();
        assert!(matches!(err, RadosError::Timeout(_)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_wakes_on_callback() {
        let tracker = Arc::new(Tracker::new());
        let notifier = tracker.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            notifier.complete(7);
        });
        let state = tracker
            .wait_until(Duration::from_secs(5), CompletionState::is_complete)
            .unwrap();
        assert_eq!(state, CompletionState::CompleteInMemory);
        assert_eq!(tracker.progress.lock().ret, Some(7));
        handle.join().unwrap();
    }

    #[test]
    fn test_unbounded_wait() {
        let deadline = Deadline::after(Duration::MAX);
        assert!(deadline.at.is_none());
        assert_eq!(deadline.remaining(), Duration::MAX);

        let tracker = Arc::new(Tracker::new());
        let notifier = tracker.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            notifier.complete(0);
            notifier.safe(0);
        });
        let state = tracker
            .wait_until(Duration::MAX, CompletionState::is_terminal)
            .unwrap();
        assert_eq!(state, CompletionState::CompleteOnDisk);
        handle.join().unwrap();
    }
}
