//! Pool snapshots

mod common;

use radosclient::{ErrorKind, SnapId};
use std::time::{Duration, SystemTime};

#[test]
fn create_lookup_remove() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();
    let snaps = pool.snapshots();

    let id = snaps.create("before-upgrade").unwrap();
    assert!(!id.is_head());
    assert_eq!(snaps.lookup("before-upgrade").unwrap(), id);
    assert_eq!(snaps.name(id).unwrap(), "before-upgrade");

    let err = snaps.create("before-upgrade").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SnapshotExists);
    assert_eq!(err.code(), Some(-libc::EEXIST));

    snaps.remove("before-upgrade").unwrap();
    let err = snaps.lookup("before-upgrade").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SnapshotNotFound);
    assert!(err.is_not_found());
    assert_eq!(
        snaps.remove("before-upgrade").unwrap_err().kind(),
        ErrorKind::SnapshotNotFound
    );
}

#[test]
fn list_in_creation_order() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();
    let snaps = pool.snapshots();
    let started = SystemTime::now() - Duration::from_secs(2);

    let a = snaps.create("a").unwrap();
    let b = snaps.create("b").unwrap();
    let c = snaps.create("c").unwrap();
    snaps.remove("b").unwrap();

    let listed = snaps.list().unwrap();
    let ids: Vec<SnapId> = listed.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![a, c]);
    assert!(b > a && c > b);
    assert_eq!(listed[1].name, "c");
    assert_eq!(listed[1].pool, "data");
    assert!(listed[0].timestamp >= started);
}

#[test]
fn snapshot_reads_see_old_contents() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();
    pool.write_full("obj", b"v1").unwrap();
    pool.set_xattr("obj", "version", b"1").unwrap();

    let snap = pool.snapshots().create("s1").unwrap();
    pool.write_full("obj", b"version two").unwrap();
    pool.set_xattr("obj", "version", b"2").unwrap();
    pool.write_full("new", b"after").unwrap();

    pool.snapshots().select_read(snap).unwrap();
    assert_eq!(pool.snapshots().current_read(), snap);
    assert_eq!(&pool.read_full("obj").unwrap()[..], b"v1");
    assert_eq!(&pool.get_xattr("obj", "version", 8).unwrap()[..], b"1");
    assert!(pool.stat("new").unwrap_err().is_not_found());

    pool.snapshots().select_read(SnapId::HEAD).unwrap();
    assert!(pool.snapshots().current_read().is_head());
    assert_eq!(&pool.read_full("obj").unwrap()[..], b"version two");
}

#[test]
fn writes_fail_while_reading_a_snapshot() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();
    pool.write_full("obj", b"v1").unwrap();
    let snap = pool.snapshots().create("s1").unwrap();
    pool.snapshots().select_read(snap).unwrap();

    for err in [
        pool.write_full("obj", b"v2").unwrap_err(),
        pool.append("obj", b"!").unwrap_err(),
        pool.remove("obj").unwrap_err(),
        pool.set_xattr("obj", "k", b"v").unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.code(), Some(-libc::EROFS));
    }
}

#[test]
fn select_unknown_snapshot() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();

    let err = pool.snapshots().select_read(SnapId(4242)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SnapshotNotFound);
    assert!(pool.snapshots().current_read().is_head());
}

#[test]
fn rollback_restores_object() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();
    pool.write_full("obj", b"good").unwrap();
    pool.snapshots().create("known-good").unwrap();

    pool.write_full("obj", b"corrupted").unwrap();
    pool.write_full("created-later", b"x").unwrap();

    pool.snapshots().rollback("known-good", "obj").unwrap();
    assert_eq!(&pool.read_full("obj").unwrap()[..], b"good");

    pool.snapshots().rollback("known-good", "created-later").unwrap();
    assert!(pool.stat("created-later").unwrap_err().is_not_found());
}

#[test]
fn rollback_to_missing_snapshot() {
    let cluster = common::connected();
    let pool = cluster.open_pool("data").unwrap();
    pool.write_full("obj", b"data").unwrap();

    let err = pool.snapshots().rollback("nope", "obj").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SnapshotNotFound);
    assert_eq!(err.code(), Some(-libc::ENOENT));
}

#[test]
fn rollback_in_deleted_pool() {
    let cluster = common::connected();
    cluster.pool_create("scratch").unwrap();
    let pool = cluster.open_pool("scratch").unwrap();
    pool.write_full("obj", b"data").unwrap();
    pool.snapshots().create("s1").unwrap();

    cluster.pool_delete("scratch").unwrap();
    let err = pool.snapshots().rollback("s1", "obj").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolNotFound);
    assert_eq!(err.code(), Some(-libc::ENOENT));
}

#[test]
fn snapshots_are_per_pool() {
    let cluster = common::connected();
    let data = cluster.open_pool("data").unwrap();
    let rbd = cluster.open_pool("rbd").unwrap();

    data.snapshots().create("shared-name").unwrap();
    rbd.snapshots().create("shared-name").unwrap();
    data.snapshots().remove("shared-name").unwrap();
    assert!(rbd.snapshots().lookup("shared-name").is_ok());
}
