//! Options understood by the in-memory cluster

use cephconfig::{define_options, Count, Duration, List, Size};

define_options! {
    /// Settings read at connect time from the handle's configuration
    pub struct MemOptions {
        /// Monitor addresses; a handle without any cannot connect
        mon_host: String = String::new(),
        /// Pools created when the cluster is first brought up
        mem_pools: List = List::default(),
        /// If non-empty, only these entities may connect
        mem_auth_users: List = List::default(),
        /// Number of simulated OSD daemons
        mem_osds: Count = Count(3),
        /// Placement groups per pool
        mem_pg_num: Count = Count(8),
        /// Raw capacity shared by all pools
        mem_capacity: Size = Size(1 << 30),
        /// Delay before an async op is applied in memory
        mem_commit_latency: Duration = Duration(std::time::Duration::from_millis(1)),
        /// Delay between in-memory completion and durability
        mem_flush_latency: Duration = Duration(std::time::Duration::from_millis(1)),
        /// Upper bound of random extra delay added to the commit latency
        mem_latency_jitter: Duration = Duration(std::time::Duration::ZERO),
    }
}

/// Latency profile captured into each pool context at creation
#[derive(Debug, Clone, Copy, Default)]
pub struct Latency {
    pub commit: std::time::Duration,
    pub flush: std::time::Duration,
    pub jitter: std::time::Duration,
}

impl MemOptions {
    pub fn latency(&self) -> Latency {
        Latency {
            commit: self.mem_commit_latency.0,
            flush: self.mem_flush_latency.0,
            jitter: self.mem_latency_jitter.0,
        }
    }

    pub fn is_authorized(&self, entity: &str) -> bool {
        let allowed = &self.mem_auth_users.0;
        allowed.is_empty() || allowed.iter().any(|user| user == entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cephconfig::CephConfig;

    #[test]
    fn test_defaults() {
        let opts = MemOptions::default();
        assert!(opts.mon_host.is_empty());
        assert_eq!(opts.mem_osds.0, 3);
        assert_eq!(opts.mem_pg_num.0, 8);
        assert!(opts.is_authorized("client.anyone"));
    }

    #[test]
    fn test_auth_allow_list() {
        let config = CephConfig::parse("[client]\nmem auth users = client.admin, client.rgw\n")
            .unwrap();
        let opts = MemOptions::try_from_ceph_config(&config, &["client.admin", "client", "global"])
            .unwrap();
        assert!(opts.is_authorized("client.admin"));
        assert!(opts.is_authorized("client.rgw"));
        assert!(!opts.is_authorized("client.guest"));
    }

    #[test]
    fn test_override_validation() {
        assert!(MemOptions::validate_override("mem commit latency", "20ms").is_ok());
        assert!(MemOptions::validate_override("mem_capacity", "lots").is_err());
        assert!(MemOptions::validate_override("debug_ms", "whatever").is_ok());
    }
}
