//! State of the simulated clusters
//!
//! Every cluster name maps to one `SimCluster`, shared by all handles that
//! connect with that name. Pools hold their objects directly; pool snapshots
//! are full copies of the object map taken at creation time.

use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;
use uuid::Uuid;

use super::options::MemOptions;
use crate::types::{ClusterStat, NativeResult, ObjectStat, SNAP_HEAD};

#[derive(Debug, Clone)]
pub(crate) struct SimObject {
    pub data: Vec<u8>,
    pub xattrs: BTreeMap<String, Vec<u8>>,
    pub mtime: SystemTime,
}

impl SimObject {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            xattrs: BTreeMap::new(),
            mtime: SystemTime::now(),
        }
    }

    fn footprint(&self) -> u64 {
        let attrs: usize = self.xattrs.values().map(Vec::len).sum();
        (self.data.len() + attrs) as u64
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SimSnap {
    pub name: String,
    pub stamp: SystemTime,
    objects: BTreeMap<String, SimObject>,
}

/// A mutation of object content
#[derive(Debug, Clone, Copy)]
pub(crate) enum Mutation<'a> {
    WriteFull(&'a [u8]),
    Write(&'a [u8], u64),
    Append(&'a [u8]),
}

impl Mutation<'_> {
    /// Object length after the mutation; `EFBIG` when it cannot be addressed
    fn resulting_len(&self, current: usize) -> NativeResult<usize> {
        let len = match *self {
            Mutation::WriteFull(data) => Some(data.len()),
            Mutation::Write(data, offset) => usize::try_from(offset)
                .ok()
                .and_then(|offset| offset.checked_add(data.len()))
                .map(|end| current.max(end)),
            Mutation::Append(data) => current.checked_add(data.len()),
        };
        len.ok_or(-libc::EFBIG)
    }

    fn apply(&self, object: &mut Vec<u8>) {
        match *self {
            Mutation::WriteFull(data) => {
                object.clear();
                object.extend_from_slice(data);
            }
            Mutation::Write(data, offset) => {
                let offset = offset as usize;
                let end = offset + data.len();
                if object.len() < end {
                    object.resize(end, 0);
                }
                object[offset..end].copy_from_slice(data);
            }
            Mutation::Append(data) => object.extend_from_slice(data),
        }
    }
}

#[derive(Debug)]
pub(crate) struct SimPool {
    pub id: i64,
    objects: BTreeMap<String, SimObject>,
    snaps: BTreeMap<u64, SimSnap>,
    next_snap: u64,
}

impl SimPool {
    fn new(id: i64) -> Self {
        Self {
            id,
            objects: BTreeMap::new(),
            snaps: BTreeMap::new(),
            next_snap: 1,
        }
    }

    /// Object map visible at `snap`
    fn view(&self, snap: u64) -> NativeResult<&BTreeMap<String, SimObject>> {
        if snap == SNAP_HEAD {
            return Ok(&self.objects);
        }
        self.snaps
            .get(&snap)
            .map(|s| &s.objects)
            .ok_or(-libc::ENOENT)
    }

    fn object(&self, snap: u64, oid: &str) -> NativeResult<&SimObject> {
        self.view(snap)?.get(oid).ok_or(-libc::ENOENT)
    }

    pub fn read(&self, snap: u64, oid: &str, len: usize, offset: u64) -> NativeResult<Vec<u8>> {
        let data = &self.object(snap, oid)?.data;
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Ok(data[start..end].to_vec())
    }

    pub fn stat(&self, snap: u64, oid: &str) -> NativeResult<ObjectStat> {
        let object = self.object(snap, oid)?;
        Ok(ObjectStat {
            size: object.data.len() as u64,
            mtime: object.mtime,
        })
    }

    pub fn list(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }

    pub fn remove(&mut self, oid: &str) -> NativeResult<()> {
        self.objects.remove(oid).map(|_| ()).ok_or(-libc::ENOENT)
    }

    pub fn getxattr(&self, snap: u64, oid: &str, name: &str) -> NativeResult<&[u8]> {
        self.object(snap, oid)?
            .xattrs
            .get(name)
            .map(Vec::as_slice)
            .ok_or(-libc::ENODATA)
    }

    pub fn rmxattr(&mut self, oid: &str, name: &str) -> NativeResult<()> {
        let object = self.objects.get_mut(oid).ok_or(-libc::ENOENT)?;
        object.xattrs.remove(name).ok_or(-libc::ENODATA)?;
        object.mtime = SystemTime::now();
        Ok(())
    }

    pub fn snap_create(&mut self, name: &str) -> NativeResult<u64> {
        if name.is_empty() {
            return Err(-libc::EINVAL);
        }
        if self.snaps.values().any(|s| s.name == name) {
            return Err(-libc::EEXIST);
        }
        let id = self.next_snap;
        self.next_snap += 1;
        self.snaps.insert(
            id,
            SimSnap {
                name: name.to_string(),
                stamp: SystemTime::now(),
                objects: self.objects.clone(),
            },
        );
        Ok(id)
    }

    pub fn snap_lookup(&self, name: &str) -> NativeResult<u64> {
        self.snaps
            .iter()
            .find(|(_, s)| s.name == name)
            .map(|(id, _)| *id)
            .ok_or(-libc::ENOENT)
    }

    pub fn snap_remove(&mut self, name: &str) -> NativeResult<()> {
        let id = self.snap_lookup(name)?;
        self.snaps.remove(&id);
        Ok(())
    }

    pub fn snap(&self, id: u64) -> NativeResult<&SimSnap> {
        self.snaps.get(&id).ok_or(-libc::ENOENT)
    }

    pub fn snap_ids(&self) -> Vec<u64> {
        self.snaps.keys().copied().collect()
    }

    /// Restore `oid` to its state in snapshot `name`
    pub fn snap_rollback(&mut self, oid: &str, name: &str) -> NativeResult<()> {
        let id = self.snap_lookup(name)?;
        match self.snaps[&id].objects.get(oid).cloned() {
            Some(object) => {
                self.objects.insert(oid.to_string(), object);
            }
            None => {
                self.objects.remove(oid);
            }
        }
        Ok(())
    }

    fn footprint(&self) -> u64 {
        self.objects.values().map(SimObject::footprint).sum()
    }
}

/// Operation counters reported by `perf dump`
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PerfCounters {
    pub op_r: u64,
    pub op_w: u64,
    pub op_r_out_bytes: u64,
    pub op_w_in_bytes: u64,
}

#[derive(Debug)]
pub(crate) struct SimCluster {
    pub fsid: Uuid,
    pub osds: u64,
    pub pg_num: u64,
    pub capacity: u64,
    pub perf: PerfCounters,
    pub config_keys: BTreeMap<String, Vec<u8>>,
    pools: BTreeMap<String, SimPool>,
    next_pool_id: i64,
}

impl SimCluster {
    fn new(opts: &MemOptions) -> Self {
        Self {
            fsid: Uuid::new_v4(),
            osds: opts.mem_osds.0,
            pg_num: opts.mem_pg_num.0.max(1),
            capacity: opts.mem_capacity.0,
            perf: PerfCounters::default(),
            config_keys: BTreeMap::new(),
            pools: BTreeMap::new(),
            next_pool_id: 1,
        }
    }

    pub fn pool_names(&self) -> Vec<String> {
        self.pools.keys().cloned().collect()
    }

    pub fn pools(&self) -> impl Iterator<Item = (&String, &SimPool)> {
        self.pools.iter()
    }

    pub fn create_pool(&mut self, name: &str) -> NativeResult<i64> {
        if name.is_empty() {
            return Err(-libc::EINVAL);
        }
        if self.pools.contains_key(name) {
            return Err(-libc::EEXIST);
        }
        let id = self.next_pool_id;
        self.next_pool_id += 1;
        self.pools.insert(name.to_string(), SimPool::new(id));
        Ok(id)
    }

    pub fn delete_pool(&mut self, name: &str) -> NativeResult<()> {
        self.pools.remove(name).map(|_| ()).ok_or(-libc::ENOENT)
    }

    pub fn lookup_pool(&self, name: &str) -> NativeResult<i64> {
        self.pools.get(name).map(|p| p.id).ok_or(-libc::ENOENT)
    }

    pub fn pool(&self, id: i64) -> NativeResult<&SimPool> {
        self.pools
            .values()
            .find(|p| p.id == id)
            .ok_or(-libc::ENOENT)
    }

    pub fn pool_mut(&mut self, id: i64) -> NativeResult<&mut SimPool> {
        self.pools
            .values_mut()
            .find(|p| p.id == id)
            .ok_or(-libc::ENOENT)
    }

    pub fn used_bytes(&self) -> u64 {
        self.pools.values().map(SimPool::footprint).sum()
    }

    pub fn num_objects(&self) -> u64 {
        self.pools.values().map(|p| p.objects.len() as u64).sum()
    }

    pub fn stat(&self) -> ClusterStat {
        let kb = self.capacity / 1024;
        let kb_used = self.used_bytes().div_ceil(1024);
        ClusterStat {
            kb,
            kb_used,
            kb_avail: kb.saturating_sub(kb_used),
            num_objects: self.num_objects(),
        }
    }

    fn ensure_space(&self, grow_by: u64) -> NativeResult<()> {
        if self
            .used_bytes()
            .checked_add(grow_by)
            .map_or(true, |total| total > self.capacity)
        {
            return Err(-libc::ENOSPC);
        }
        Ok(())
    }

    /// Apply a content mutation, creating the object if needed
    pub fn mutate(&mut self, pool_id: i64, oid: &str, mutation: Mutation<'_>) -> NativeResult<()> {
        if oid.is_empty() {
            return Err(-libc::EINVAL);
        }
        let current = self
            .pool(pool_id)?
            .objects
            .get(oid)
            .map(|o| o.data.len())
            .unwrap_or(0);
        let grow_by = mutation.resulting_len(current)?.saturating_sub(current) as u64;
        self.ensure_space(grow_by)?;

        let in_bytes = match mutation {
            Mutation::WriteFull(d) | Mutation::Write(d, _) | Mutation::Append(d) => d.len(),
        };
        let object = self
            .pool_mut(pool_id)?
            .objects
            .entry(oid.to_string())
            .or_insert_with(SimObject::new);
        mutation.apply(&mut object.data);
        object.mtime = SystemTime::now();

        self.perf.op_w += 1;
        self.perf.op_w_in_bytes += in_bytes as u64;
        Ok(())
    }

    pub fn setxattr(&mut self, pool_id: i64, oid: &str, name: &str, value: &[u8]) -> NativeResult<()> {
        if name.is_empty() {
            return Err(-libc::EINVAL);
        }
        let old = self.pool(pool_id)?.getxattr(SNAP_HEAD, oid, name).map(<[u8]>::len);
        let old = match old {
            Ok(len) => len,
            Err(e) if e == -libc::ENODATA => 0,
            Err(e) => return Err(e),
        };
        self.ensure_space((value.len().saturating_sub(old)) as u64)?;

        let object = self
            .pool_mut(pool_id)?
            .objects
            .get_mut(oid)
            .ok_or(-libc::ENOENT)?;
        object.xattrs.insert(name.to_string(), value.to_vec());
        object.mtime = SystemTime::now();
        self.perf.op_w += 1;
        Ok(())
    }

    pub fn record_read(&mut self, bytes: usize) {
        self.perf.op_r += 1;
        self.perf.op_r_out_bytes += bytes as u64;
    }
}

/// All simulated clusters of one `MemRados` instance, keyed by cluster name
#[derive(Debug, Default)]
pub(crate) struct World {
    clusters: HashMap<String, SimCluster>,
}

impl World {
    /// Return the named cluster, creating it and its initial pools on first use
    pub fn bring_up(&mut self, name: &str, opts: &MemOptions) -> &mut SimCluster {
        self.clusters.entry(name.to_string()).or_insert_with(|| {
            let mut cluster = SimCluster::new(opts);
            for pool in &opts.mem_pools.0 {
                // duplicates in the list are harmless
                let _ = cluster.create_pool(pool);
            }
            cluster
        })
    }

    pub fn cluster(&self, name: &str) -> NativeResult<&SimCluster> {
        self.clusters.get(name).ok_or(-libc::ENOTCONN)
    }

    pub fn cluster_mut(&mut self, name: &str) -> NativeResult<&mut SimCluster> {
        self.clusters.get_mut(name).ok_or(-libc::ENOTCONN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cephconfig::{Count, List, Size};

    fn opts() -> MemOptions {
        MemOptions {
            mem_pools: List(vec!["data".into(), "rbd".into()]),
            mem_capacity: Size(64),
            mem_osds: Count(2),
            ..MemOptions::default()
        }
    }

    #[test]
    fn test_bring_up_creates_pools_once() {
        let mut world = World::default();
        let cluster = world.bring_up("ceph", &opts());
        assert_eq!(cluster.pool_names(), vec!["data", "rbd"]);
        let fsid = cluster.fsid;

        cluster.delete_pool("rbd").unwrap();
        let again = world.bring_up("ceph", &opts());
        assert_eq!(again.fsid, fsid);
        assert_eq!(again.pool_names(), vec!["data"]);
    }

    #[test]
    fn test_partial_write_zero_fills() {
        let mut world = World::default();
        let cluster = world.bring_up("ceph", &opts());
        let pool = cluster.lookup_pool("data").unwrap();

        cluster.mutate(pool, "obj", Mutation::Write(b"xy", 3)).unwrap();
        let data = cluster.pool(pool).unwrap().read(SNAP_HEAD, "obj", 16, 0).unwrap();
        assert_eq!(data, b"\0\0\0xy");

        cluster.mutate(pool, "obj", Mutation::Append(b"z")).unwrap();
        let data = cluster.pool(pool).unwrap().read(SNAP_HEAD, "obj", 2, 4).unwrap();
        assert_eq!(data, b"yz");
    }

    #[test]
    fn test_unaddressable_offset_rejected() {
        let mut world = World::default();
        let cluster = world.bring_up("ceph", &opts());
        let pool = cluster.lookup_pool("data").unwrap();

        assert_eq!(
            cluster.mutate(pool, "obj", Mutation::Write(b"x", u64::MAX)),
            Err(-libc::EFBIG)
        );
        assert!(cluster.pool(pool).unwrap().list().is_empty());
        // far but addressable offsets run into capacity instead
        for offset in [1 << 40, u64::MAX - 8] {
            assert_eq!(
                cluster.mutate(pool, "obj", Mutation::Write(b"x", offset)),
                Err(-libc::ENOSPC)
            );
        }
    }

    #[test]
    fn test_capacity_enforced() {
        let mut world = World::default();
        let cluster = world.bring_up("ceph", &opts());
        let pool = cluster.lookup_pool("data").unwrap();

        cluster.mutate(pool, "a", Mutation::WriteFull(&[1; 60])).unwrap();
        assert_eq!(
            cluster.mutate(pool, "b", Mutation::WriteFull(&[1; 8])),
            Err(-libc::ENOSPC)
        );
        // shrinking never needs space
        cluster.mutate(pool, "a", Mutation::WriteFull(&[1; 10])).unwrap();
        assert_eq!(cluster.stat().num_objects, 1);
    }

    #[test]
    fn test_xattr_requires_object() {
        let mut world = World::default();
        let cluster = world.bring_up("ceph", &opts());
        let pool = cluster.lookup_pool("data").unwrap();

        assert_eq!(cluster.setxattr(pool, "ghost", "tag", b"v"), Err(-libc::ENOENT));
        assert!(cluster.pool(pool).unwrap().list().is_empty());

        cluster.mutate(pool, "obj", Mutation::WriteFull(b"x")).unwrap();
        cluster.setxattr(pool, "obj", "tag", b"v1").unwrap();
        let p = cluster.pool(pool).unwrap();
        assert_eq!(p.getxattr(SNAP_HEAD, "obj", "tag").unwrap(), b"v1");
        assert_eq!(p.getxattr(SNAP_HEAD, "obj", "other"), Err(-libc::ENODATA));
    }

    #[test]
    fn test_snapshot_rollback() {
        let mut world = World::default();
        let cluster = world.bring_up("ceph", &opts());
        let pool_id = cluster.lookup_pool("data").unwrap();

        cluster.mutate(pool_id, "obj", Mutation::WriteFull(b"one")).unwrap();
        let snap = cluster.pool_mut(pool_id).unwrap().snap_create("s1").unwrap();
        cluster.mutate(pool_id, "obj", Mutation::WriteFull(b"two")).unwrap();
        cluster.mutate(pool_id, "new", Mutation::WriteFull(b"n")).unwrap();

        let pool = cluster.pool_mut(pool_id).unwrap();
        assert_eq!(pool.snap_create("s1"), Err(-libc::EEXIST));
        assert_eq!(pool.read(snap, "obj", 8, 0).unwrap(), b"one");

        pool.snap_rollback("obj", "s1").unwrap();
        pool.snap_rollback("new", "s1").unwrap();
        assert_eq!(pool.read(SNAP_HEAD, "obj", 8, 0).unwrap(), b"one");
        assert_eq!(pool.stat(SNAP_HEAD, "new"), Err(-libc::ENOENT));

        pool.snap_remove("s1").unwrap();
        assert_eq!(pool.snap_rollback("obj", "s1"), Err(-libc::ENOENT));
        assert_eq!(pool.read(snap, "obj", 8, 0), Err(-libc::ENOENT));
    }
}
