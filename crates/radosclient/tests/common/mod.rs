//! Shared setup for integration tests against the in-memory cluster

#![allow(dead_code)]

pub mod lossy;

use radosclient::{ClusterHandle, MemRados, RadosNative};
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Created but unconnected handle with a fresh backend
pub fn created() -> ClusterHandle {
    init_tracing();
    let native = Arc::new(MemRados::new().expect("start in-memory cluster"));
    let mut cluster = ClusterHandle::new(native);
    cluster.create("ceph", "client.admin", 0).unwrap();
    cluster
}

/// Connected handle with pools `data` and `rbd`
pub fn connected() -> ClusterHandle {
    connected_with(&[])
}

pub fn connected_with(options: &[(&str, &str)]) -> ClusterHandle {
    let native = Arc::new(MemRados::new().expect("start in-memory cluster"));
    connected_on(native, options)
}

/// Connected handle with pools `data` and `rbd` on the given backend
pub fn connected_on(native: Arc<dyn RadosNative>, options: &[(&str, &str)]) -> ClusterHandle {
    init_tracing();
    let mut cluster = ClusterHandle::new(native);
    cluster.create("ceph", "client.admin", 0).unwrap();
    cluster.set_config("mon_host", "127.0.0.1:6789").unwrap();
    cluster.set_config("mem_pools", "data,rbd").unwrap();
    for (key, value) in options {
        cluster.set_config(key, value).unwrap();
    }
    cluster.connect().unwrap();
    cluster
}
