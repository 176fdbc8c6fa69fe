//! Asynchronous operations of the in-memory cluster
//!
//! Each completion token owns a slot. Submitting an operation spawns a task on
//! the backend's runtime; the task owns the op and its payload until the op
//! settles. It waits out the commit latency, applies the op,
//! fires `complete`, waits out the flush latency and fires `safe`. A slot only
//! moves forward: Idle -> Queued -> Applied -> Settled. Cancellation wins only
//! while the slot is still Queued.

use bytes::Bytes;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::trace;

use super::cluster::Mutation;
use super::options::Latency;
use super::{IoTarget, Shared};
use crate::native::AioCallback;
use crate::types::{CompletionId, IoCtxId, NativeResult};

/// Writes submitted on one pool context and not yet durable
#[derive(Debug, Default)]
pub(crate) struct Inflight {
    count: AtomicUsize,
    drained: Notify,
}

impl Inflight {
    fn start(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

enum Stage {
    Idle,
    Queued(JoinHandle<()>),
    Applied,
    Settled,
}

pub(crate) struct Slot {
    callback: Arc<dyn AioCallback>,
    stage: Stage,
    io: Option<IoCtxId>,
    read_data: Option<Bytes>,
    inflight: Option<Arc<Inflight>>,
}

impl Slot {
    pub(crate) fn new(callback: Arc<dyn AioCallback>) -> Self {
        Self {
            callback,
            stage: Stage::Idle,
            io: None,
            read_data: None,
            inflight: None,
        }
    }

    pub(crate) fn read_data(&self) -> Option<Bytes> {
        self.read_data.clone()
    }

    /// Tear down a slot being released, stopping any queued work
    pub(crate) fn discard(self) {
        if let Stage::Queued(task) = self.stage {
            task.abort();
            if let Some(inflight) = self.inflight {
                inflight.finish();
            }
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum PendingOp {
    Write { oid: String, data: Bytes, offset: u64 },
    WriteFull { oid: String, data: Bytes },
    Append { oid: String, data: Bytes },
    Read { oid: String, len: usize, offset: u64 },
    Flush,
}

impl PendingOp {
    fn is_write(&self) -> bool {
        matches!(
            self,
            PendingOp::Write { .. } | PendingOp::WriteFull { .. } | PendingOp::Append { .. }
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            PendingOp::Write { .. } => "write",
            PendingOp::WriteFull { .. } => "write_full",
            PendingOp::Append { .. } => "append",
            PendingOp::Read { .. } => "read",
            PendingOp::Flush => "flush",
        }
    }

}

fn commit_delay(latency: &Latency) -> Duration {
    let jitter = latency.jitter.as_micros() as u64;
    if jitter == 0 {
        return latency.commit;
    }
    latency.commit + Duration::from_micros(rand::thread_rng().gen_range(0..=jitter))
}

/// Queue `op` on `completion`; the slot must be unused
pub(crate) fn submit(
    shared: &Arc<Shared>,
    runtime: &tokio::runtime::Handle,
    io: IoCtxId,
    completion: CompletionId,
    op: PendingOp,
) -> NativeResult<()> {
    let target = shared.target(io)?;
    if op.is_write() && !target.writable() {
        return Err(-libc::EROFS);
    }
    let delay = commit_delay(&target.latency);

    let mut slots = shared.aio.lock();
    let slot = slots.get_mut(&completion).ok_or(-libc::EBADF)?;
    if !matches!(slot.stage, Stage::Idle) {
        return Err(-libc::EBUSY);
    }

    if op.is_write() {
        target.inflight.start();
        slot.inflight = Some(target.inflight.clone());
    }
    slot.io = Some(io);

    trace!("queue {} on {} after {:?}", op.kind(), completion, delay);
    let task = runtime.spawn(run(shared.clone(), completion, target, op, delay));
    slot.stage = Stage::Queued(task);
    Ok(())
}

async fn run(
    shared: Arc<Shared>,
    completion: CompletionId,
    target: IoTarget,
    op: PendingOp,
    delay: Duration,
) {
    match op {
        PendingOp::Flush => target.inflight.wait_drained().await,
        _ => tokio::time::sleep(delay).await,
    }

    let callback = {
        let mut slots = shared.aio.lock();
        let Some(slot) = slots.get_mut(&completion) else {
            return;
        };
        if !matches!(slot.stage, Stage::Queued(_)) {
            return;
        }
        slot.stage = Stage::Applied;
        slot.callback.clone()
    };

    let ret = apply(&shared, &target, completion, &op);
    callback.complete(ret);

    if !matches!(op, PendingOp::Flush) {
        tokio::time::sleep(target.latency.flush).await;
    }

    let inflight = {
        let mut slots = shared.aio.lock();
        match slots.get_mut(&completion) {
            Some(slot) => {
                slot.stage = Stage::Settled;
                slot.inflight.take()
            }
            None => None,
        }
    };
    callback.safe(ret);
    if let Some(inflight) = inflight {
        inflight.finish();
    }
}

fn apply(shared: &Shared, target: &IoTarget, completion: CompletionId, op: &PendingOp) -> i32 {
    let result = match op {
        PendingOp::Write { oid, data, offset } => {
            shared.mutate(target, oid, Mutation::Write(data, *offset)).map(|_| 0)
        }
        PendingOp::WriteFull { oid, data } => {
            shared.mutate(target, oid, Mutation::WriteFull(data)).map(|_| 0)
        }
        PendingOp::Append { oid, data } => {
            shared.mutate(target, oid, Mutation::Append(data)).map(|_| 0)
        }
        PendingOp::Read { oid, len, offset } => {
            shared.read(target, oid, *len, *offset).map(|data| {
                let n = data.len() as i32;
                if let Some(slot) = shared.aio.lock().get_mut(&completion) {
                    slot.read_data = Some(Bytes::from(data));
                }
                n
            })
        }
        PendingOp::Flush => Ok(0),
    };
    result.unwrap_or_else(|e| e)
}

/// Cancel a queued op, firing both callbacks with `-ECANCELED`
pub(crate) fn cancel(shared: &Shared, io: IoCtxId, completion: CompletionId) -> NativeResult<()> {
    let (callback, inflight) = {
        let mut slots = shared.aio.lock();
        let slot = slots.get_mut(&completion).ok_or(-libc::EBADF)?;
        if slot.io != Some(io) {
            return Err(-libc::ENOENT);
        }
        match std::mem::replace(&mut slot.stage, Stage::Settled) {
            Stage::Queued(task) => task.abort(),
            other => {
                slot.stage = other;
                return Err(-libc::ENOENT);
            }
        }
        (slot.callback.clone(), slot.inflight.take())
    };

    trace!("canceled {}", completion);
    callback.complete(-libc::ECANCELED);
    callback.safe(-libc::ECANCELED);
    if let Some(inflight) = inflight {
        inflight.finish();
    }
    Ok(())
}
