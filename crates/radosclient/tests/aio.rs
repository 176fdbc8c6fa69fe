//! Asynchronous operations and completion handles

mod common;

use radosclient::{AioKind, AioOp, CompletionState, ErrorKind, MemRados, SnapId};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

#[test]
fn write_reaches_disk() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();

    let c = pool.aio_write_full("obj", &b"async payload"[..]).unwrap();
    assert_eq!(c.kind(), AioKind::WriteFull);
    assert_eq!(c.object(), "obj");
    assert_eq!(c.wait_for_durable(WAIT).unwrap(), CompletionState::CompleteOnDisk);
    assert_eq!(
        c.history(),
        vec![
            CompletionState::Submitted,
            CompletionState::CompleteInMemory,
            CompletionState::CompleteOnDisk,
        ]
    );
    assert_eq!(c.return_value(), Some(0));
    drop(c);

    assert_eq!(&pool.read_full("obj").unwrap()[..], b"async payload");
    assert_eq!(pool.completions().outstanding(), 0);
}

#[test]
fn write_at_offset_and_append() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();
    pool.write_full("obj", b"hello").unwrap();

    let w = pool.aio_write("obj", &b"J"[..], 0).unwrap();
    w.wait_for_durable(WAIT).unwrap();
    let a = pool.aio_append("obj", &b" world"[..]).unwrap();
    a.wait_for_durable(WAIT).unwrap();

    assert_eq!(&pool.read_full("obj").unwrap()[..], b"Jello world");
}

#[test]
fn read_returns_data() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();
    pool.write_full("obj", b"0123456789").unwrap();

    let c = pool.aio_read("obj", 4, 2).unwrap();
    assert!(c.wait_for_complete(WAIT).unwrap().is_complete());
    assert_eq!(&c.read_data().unwrap()[..], b"2345");
    assert_eq!(c.return_value(), Some(4));
}

#[test]
fn read_data_on_write_is_invalid() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();
    let c = pool
        .submit(
            "obj",
            AioOp::WriteFull {
                data: bytes::Bytes::from_static(b"x"),
            },
        )
        .unwrap();
    c.wait_for_durable(WAIT).unwrap();
    assert_eq!(c.read_data().unwrap_err().kind(), ErrorKind::InvalidState);
}

#[test]
fn failed_read_reports_errno() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();

    let c = pool.aio_read("ghost", 16, 0).unwrap();
    let state = c.wait_for_durable(WAIT).unwrap();
    assert_eq!(state, CompletionState::Failed(-libc::ENOENT));
    assert_eq!(c.return_value(), Some(-libc::ENOENT));

    let err = c.read_data().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(err.is_not_found());
}

#[test]
fn read_without_buffer_is_an_error() {
    let native = Arc::new(common::lossy::LossyReads(MemRados::new().unwrap()));
    let cluster = common::connected_on(native, &[]);
    let pool = cluster.open_pool("data").unwrap();
    pool.write_full("obj", b"0123").unwrap();

    let c = pool.aio_read("obj", 4, 0).unwrap();
    assert!(c.wait_for_complete(WAIT).unwrap().is_complete());
    let err = c.read_data().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(err.code(), Some(-libc::EIO));
}

#[test]
fn write_past_addressable_end_fails() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();

    let c = pool.aio_write("obj", &b"x"[..], u64::MAX).unwrap();
    assert_eq!(
        c.wait_for_durable(WAIT).unwrap(),
        CompletionState::Failed(-libc::EFBIG)
    );
    assert_eq!(
        c.history(),
        vec![CompletionState::Submitted, CompletionState::Failed(-libc::EFBIG)]
    );
    assert!(pool.stat("obj").unwrap_err().is_not_found());

    // the pool keeps working afterwards
    let c = pool.aio_write("obj", &b"x"[..], 2).unwrap();
    assert_eq!(c.wait_for_durable(WAIT).unwrap(), CompletionState::CompleteOnDisk);
    assert_eq!(&pool.read_full("obj").unwrap()[..], b"\0\0x");
}

#[test]
fn unbounded_waits() {
    let cluster = common::connected_with(&[("mem_commit_latency", "20ms")]);
    let mut pool = cluster.open_pool("data").unwrap();

    let c = pool.aio_write_full("obj", &b"forever"[..]).unwrap();
    assert!(c.wait_for_complete(Duration::MAX).unwrap().is_complete());
    assert_eq!(
        c.wait_for_durable(Duration::MAX).unwrap(),
        CompletionState::CompleteOnDisk
    );
    drop(c);

    drop(pool.aio_append("obj", &b"!"[..]).unwrap());
    pool.completions().flush(Duration::MAX).unwrap();
    drop(pool.aio_append("obj", &b"!"[..]).unwrap());
    pool.close_within(Duration::MAX).unwrap();

    let pool = cluster.open_pool("data").unwrap();
    assert_eq!(&pool.read_full("obj").unwrap()[..], b"forever!!");
}

#[test]
fn wait_times_out_while_pending() {
    let cluster = common::connected_with(&[("mem_commit_latency", "10s")]);
    let pool = cluster.open_pool("data").unwrap();

    let c = pool.aio_write_full("obj", &b"slow"[..]).unwrap();
    let err = c.wait_for_complete(Duration::from_millis(30)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(c.poll(), CompletionState::Submitted);
    c.cancel().unwrap();
}

#[test]
fn cancel_pending_write() {
    let cluster = common::connected_with(&[("mem_commit_latency", "10s")]);
    let pool = cluster.open_pool("data").unwrap();

    let mut c = pool.aio_write_full("obj", &b"never"[..]).unwrap();
    assert_eq!(pool.completions().outstanding(), 1);
    c.cancel().unwrap();
    assert_eq!(c.poll(), CompletionState::Canceled);
    assert_eq!(c.wait_for_durable(WAIT).unwrap(), CompletionState::Canceled);
    assert_eq!(
        c.history(),
        vec![CompletionState::Submitted, CompletionState::Canceled]
    );

    let err = c.cancel().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyComplete);
    c.release().unwrap();

    assert!(pool.stat("obj").unwrap_err().is_not_found());
    assert_eq!(pool.completions().outstanding(), 0);
}

#[test]
fn cancel_after_completion() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();

    let c = pool.aio_write_full("obj", &b"done"[..]).unwrap();
    c.wait_for_durable(WAIT).unwrap();
    let err = c.cancel().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyComplete);
    assert_eq!(c.poll(), CompletionState::CompleteOnDisk);
    assert_eq!(&pool.read_full("obj").unwrap()[..], b"done");
}

#[test]
fn release_requires_terminal_state() {
    let cluster = common::connected_with(&[("mem_commit_latency", "10s")]);
    let pool = cluster.open_pool("data").unwrap();

    let mut c = pool.aio_write_full("obj", &b"pending"[..]).unwrap();
    let err = c.release().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UseWhilePending);
    assert_eq!(err.code(), None);

    c.cancel().unwrap();
    c.release().unwrap();
    assert_eq!(c.release().unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(
        c.wait_for_durable(WAIT).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
}

#[test]
fn rejected_submission_is_an_error() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();
    pool.write_full("obj", b"v1").unwrap();

    let snap = pool.snapshots().create("s1").unwrap();
    pool.snapshots().select_read(snap).unwrap();

    let err = pool.aio_write_full("obj", &b"v2"[..]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(err.code(), Some(-libc::EROFS));
    assert_eq!(pool.completions().outstanding(), 0);

    pool.snapshots().select_read(SnapId::HEAD).unwrap();
    let c = pool.aio_write_full("obj", &b"v2"[..]).unwrap();
    c.wait_for_durable(WAIT).unwrap();
}

#[test]
fn flush_waits_for_earlier_writes() {
    let cluster = common::connected_with(&[
        ("mem_commit_latency", "20ms"),
        ("mem_flush_latency", "20ms"),
    ]);
    let pool = cluster.open_pool("data").unwrap();

    let writes: Vec<_> = (0..5)
        .map(|i| {
            pool.aio_write_full(&format!("obj{i}"), bytes::Bytes::from(vec![i as u8; 8]))
                .unwrap()
        })
        .collect();
    let flush = pool.aio_flush().unwrap();
    assert_eq!(flush.kind(), AioKind::Flush);
    assert_eq!(flush.wait_for_durable(WAIT).unwrap(), CompletionState::CompleteOnDisk);

    for w in &writes {
        assert_eq!(w.poll(), CompletionState::CompleteOnDisk);
    }
    assert_eq!(pool.list_objects().unwrap().len(), 5);
}

#[test]
fn registry_flush_covers_dropped_handles() {
    let cluster = common::connected_with(&[("mem_commit_latency", "200ms")]);
    let pool = cluster.open_pool("data").unwrap();

    for i in 0..3 {
        drop(pool.aio_write_full(&format!("obj{i}"), &b"fire and forget"[..]).unwrap());
    }
    assert_eq!(pool.completions().outstanding(), 3);

    pool.completions().flush(WAIT).unwrap();
    assert_eq!(pool.completions().outstanding(), 0);
    assert_eq!(pool.list_objects().unwrap().len(), 3);
}

#[test]
fn close_waits_for_dropped_handles() {
    let cluster = common::connected_with(&[("mem_commit_latency", "30ms")]);
    {
        let mut pool = cluster.open_pool("data").unwrap();
        drop(pool.aio_write_full("late", &b"still lands"[..]).unwrap());
        pool.close().unwrap();
    }
    let pool = cluster.open_pool("data").unwrap();
    assert_eq!(&pool.read_full("late").unwrap()[..], b"still lands");
}

#[test]
fn close_gives_up_on_stuck_operations() {
    let cluster = common::connected_with(&[("mem_commit_latency", "10s")]);
    let mut pool = cluster.open_pool("data").unwrap();
    drop(pool.aio_write_full("stuck", &b"x"[..]).unwrap());

    let err = pool.close_within(Duration::from_millis(20)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(!pool.is_open());
}

#[test]
fn close_cancels_queued_leftovers() {
    let cluster = common::connected_with(&[("mem_commit_latency", "200ms")]);
    {
        let mut pool = cluster.open_pool("data").unwrap();
        drop(pool.aio_write_full("abandoned", &b"x"[..]).unwrap());
        let err = pool.close_within(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    std::thread::sleep(Duration::from_millis(400));
    let pool = cluster.open_pool("data").unwrap();
    assert!(pool.stat("abandoned").unwrap_err().is_not_found());
}

#[test]
fn concurrent_submissions() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();

    std::thread::scope(|s| {
        for t in 0..4 {
            let pool = &pool;
            s.spawn(move || {
                let handles: Vec<_> = (0..10)
                    .map(|i| {
                        pool.aio_write_full(&format!("t{t}-{i}"), bytes::Bytes::from(format!("{t}:{i}")))
                            .unwrap()
                    })
                    .collect();
                for h in &handles {
                    assert_eq!(h.wait_for_durable(WAIT).unwrap(), CompletionState::CompleteOnDisk);
                    assert_eq!(
                        h.history(),
                        vec![
                            CompletionState::Submitted,
                            CompletionState::CompleteInMemory,
                            CompletionState::CompleteOnDisk,
                        ]
                    );
                }
            });
        }
    });

    assert_eq!(pool.list_objects().unwrap().len(), 40);
    assert_eq!(&pool.read_full("t2-7").unwrap()[..], b"2:7");
    assert_eq!(pool.completions().outstanding(), 0);
}
