//! Example: Parse a Ceph configuration file
//!
//! Parses a ceph.conf and prints the options an entity would resolve,
//! including the simulated-cluster settings used by `rados-native`.
//!
//! Usage:
//!   cargo run --example parse_config /path/to/ceph.conf [client.admin]

use cephconfig::{define_options, CephConfig, Count, Duration, List, Size};
use std::env;

define_options! {
    /// Options consumed by the in-memory cluster
    pub struct MemOptions {
        mem_pools: List = List::default(),
        mem_osds: Count = Count(3),
        mem_capacity: Size = Size(1 << 30),
        mem_commit_latency: Duration = Duration(std::time::Duration::from_millis(1)),
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let config_path = args
        .get(1)
        .map(String::as_str)
        .unwrap_or("/etc/ceph/ceph.conf");
    let entity = args.get(2).map(String::as_str).unwrap_or("client.admin");

    println!("Parsing Ceph configuration from: {}", config_path);

    let config = match CephConfig::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error parsing config file: {}", e);
            std::process::exit(1);
        }
    };

    println!("Sections:");
    for section in config.sections() {
        println!("  [{}]", section);
    }

    let sections = CephConfig::entity_sections(entity);
    println!("Lookup order for {}: {:?}", entity, sections);

    match config.mon_addrs(&sections) {
        Ok(addrs) => {
            for addr in addrs {
                println!("  mon: {}", addr);
            }
        }
        Err(e) => eprintln!("No monitors: {}", e),
    }

    match MemOptions::try_from_ceph_config(&config, &sections) {
        Ok(opts) => {
            println!("  pools: {:?}", opts.mem_pools.0);
            println!("  osds: {}", opts.mem_osds.0);
            println!("  capacity: {} bytes", opts.mem_capacity.0);
            println!("  commit latency: {:?}", opts.mem_commit_latency.0);
        }
        Err(e) => eprintln!("Invalid option: {}", e),
    }
}
