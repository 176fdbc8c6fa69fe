//! Administrative commands answered by the in-memory cluster
//!
//! Requests are JSON objects with a `prefix` naming the command, the same
//! encoding the real monitors and OSDs accept. Replies are JSON documents in
//! the output buffer; failures set a negative status and a human-readable
//! status string.

use serde_json::{json, Map, Value};

use super::cluster::SimCluster;
use crate::types::CommandOutput;

pub(crate) const VERSION_STRING: &str =
    concat!("rados-native ", env!("CARGO_PKG_VERSION"), " (in-memory)");

struct Request {
    prefix: String,
    args: Map<String, Value>,
}

impl Request {
    fn parse(cmd: &[String]) -> Result<Self, CommandOutput> {
        let joined = cmd.concat();
        let value: Value = serde_json::from_str(&joined).map_err(|e| {
            CommandOutput::error(-libc::EINVAL, format!("command not understood: {}", e))
        })?;
        let Value::Object(mut args) = value else {
            return Err(CommandOutput::error(
                -libc::EINVAL,
                "command must be a JSON object",
            ));
        };
        let prefix = match args.remove("prefix") {
            Some(Value::String(prefix)) => prefix,
            _ => {
                return Err(CommandOutput::error(
                    -libc::EINVAL,
                    "command has no prefix",
                ))
            }
        };
        Ok(Self { prefix, args })
    }

    fn str_arg(&self, name: &str) -> Result<&str, CommandOutput> {
        self.args.get(name).and_then(Value::as_str).ok_or_else(|| {
            CommandOutput::error(
                -libc::EINVAL,
                format!("missing required parameter {}", name),
            )
        })
    }
}

fn reply(value: Value) -> CommandOutput {
    CommandOutput::ok(value.to_string().into_bytes())
}

fn unrecognized(prefix: &str) -> CommandOutput {
    CommandOutput::error(
        -libc::EINVAL,
        format!("unrecognized command '{}'", prefix),
    )
}

pub(crate) fn mon_command(cluster: &mut SimCluster, cmd: &[String], inbuf: &[u8]) -> CommandOutput {
    let req = match Request::parse(cmd) {
        Ok(req) => req,
        Err(out) => return out,
    };

    match req.prefix.as_str() {
        "status" | "health" => {
            let stat = cluster.stat();
            reply(json!({
                "fsid": cluster.fsid.to_string(),
                "health": { "status": "HEALTH_OK" },
                "osdmap": { "num_osds": cluster.osds, "num_up_osds": cluster.osds },
                "pgmap": {
                    "num_pools": cluster.pool_names().len(),
                    "num_pgs": cluster.pg_num * cluster.pool_names().len() as u64,
                    "num_objects": stat.num_objects,
                },
            }))
        }
        "fsid" => reply(json!({ "fsid": cluster.fsid.to_string() })),
        "version" => reply(json!({ "version": VERSION_STRING })),
        "df" => {
            let used = cluster.used_bytes();
            let pools: Vec<Value> = cluster
                .pools()
                .map(|(name, pool)| {
                    let objects = pool.list();
                    json!({ "name": name, "id": pool.id, "stats": { "objects": objects.len() } })
                })
                .collect();
            reply(json!({
                "stats": {
                    "total_bytes": cluster.capacity,
                    "total_used_bytes": used,
                    "total_avail_bytes": cluster.capacity.saturating_sub(used),
                },
                "pools": pools,
            }))
        }
        "osd ls" => reply(json!((0..cluster.osds).collect::<Vec<_>>())),
        "osd pool ls" => reply(json!(cluster.pool_names())),
        "osd pool create" => {
            let name = match req.str_arg("pool") {
                Ok(name) => name.to_string(),
                Err(out) => return out,
            };
            match cluster.create_pool(&name) {
                Ok(_) => CommandOutput {
                    status: 0,
                    outbuf: Vec::new(),
                    outs: format!("pool '{}' created", name),
                },
                Err(e) if e == -libc::EEXIST => CommandOutput {
                    status: 0,
                    outbuf: Vec::new(),
                    outs: format!("pool '{}' already exists", name),
                },
                Err(e) => CommandOutput::error(e, format!("cannot create pool '{}'", name)),
            }
        }
        "osd pool rm" | "osd pool delete" => {
            let name = match req.str_arg("pool") {
                Ok(name) => name.to_string(),
                Err(out) => return out,
            };
            let confirmed = req.args.get("pool2").and_then(Value::as_str) == Some(name.as_str())
                && req
                    .args
                    .get("yes_i_really_really_mean_it")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
            if !confirmed {
                return CommandOutput::error(
                    -libc::EPERM,
                    format!(
                        "WARNING: this will *PERMANENTLY DESTROY* all data stored in pool {}. \
                         If you are *ABSOLUTELY CERTAIN* that is what you want, pass the pool \
                         name *twice*, followed by --yes-i-really-really-mean-it.",
                        name
                    ),
                );
            }
            let outs = match cluster.delete_pool(&name) {
                Ok(()) => format!("pool '{}' removed", name),
                Err(_) => format!("pool '{}' does not exist", name),
            };
            CommandOutput {
                status: 0,
                outbuf: Vec::new(),
                outs,
            }
        }
        "config-key set" | "config-key put" => {
            let key = match req.str_arg("key") {
                Ok(key) => key.to_string(),
                Err(out) => return out,
            };
            let value = match req.args.get("val").and_then(Value::as_str) {
                Some(val) => val.as_bytes().to_vec(),
                None => inbuf.to_vec(),
            };
            cluster.config_keys.insert(key.clone(), value);
            CommandOutput {
                status: 0,
                outbuf: Vec::new(),
                outs: format!("set {}", key),
            }
        }
        "config-key get" => {
            let key = match req.str_arg("key") {
                Ok(key) => key,
                Err(out) => return out,
            };
            match cluster.config_keys.get(key) {
                Some(value) => CommandOutput::ok(value.clone()),
                None => CommandOutput::error(-libc::ENOENT, format!("error obtaining '{}'", key)),
            }
        }
        "config-key rm" | "config-key del" => {
            let key = match req.str_arg("key") {
                Ok(key) => key,
                Err(out) => return out,
            };
            cluster.config_keys.remove(key);
            CommandOutput {
                status: 0,
                outbuf: Vec::new(),
                outs: "key deleted".to_string(),
            }
        }
        other => unrecognized(other),
    }
}

pub(crate) fn osd_command(cluster: &SimCluster, osd_id: i32, cmd: &[String]) -> CommandOutput {
    if osd_id < 0 || osd_id as u64 >= cluster.osds {
        return CommandOutput::error(
            -libc::ENXIO,
            format!("problem getting command descriptions from osd.{}", osd_id),
        );
    }
    let req = match Request::parse(cmd) {
        Ok(req) => req,
        Err(out) => return out,
    };

    match req.prefix.as_str() {
        "version" => reply(json!({ "version": VERSION_STRING })),
        "status" => {
            let pgs = (0..cluster.pg_num * cluster.pool_names().len() as u64)
                .filter(|pg| acting_set(cluster, *pg).contains(&(osd_id as u64)))
                .count();
            reply(json!({
                "cluster_fsid": cluster.fsid.to_string(),
                "whoami": osd_id,
                "state": "active",
                "num_pgs": pgs,
            }))
        }
        "perf dump" => {
            let perf = cluster.perf;
            reply(json!({
                "osd": {
                    "op_r": perf.op_r,
                    "op_w": perf.op_w,
                    "op_r_out_bytes": perf.op_r_out_bytes,
                    "op_w_in_bytes": perf.op_w_in_bytes,
                }
            }))
        }
        other => unrecognized(other),
    }
}

/// Replicas serving placement seed `seed`, primary first
fn acting_set(cluster: &SimCluster, seed: u64) -> Vec<u64> {
    if cluster.osds == 0 {
        return Vec::new();
    }
    let size = cluster.osds.min(3);
    (0..size).map(|k| (seed + k) % cluster.osds).collect()
}

/// Parse `<pool>.<seed-hex>`
fn parse_pgid(pgid: &str) -> Option<(i64, u64)> {
    let (pool, seed) = pgid.split_once('.')?;
    Some((pool.parse().ok()?, u64::from_str_radix(seed, 16).ok()?))
}

pub(crate) fn pg_command(cluster: &SimCluster, pgid: &str, cmd: &[String]) -> CommandOutput {
    let Some((pool_id, seed)) = parse_pgid(pgid) else {
        return CommandOutput::error(-libc::EINVAL, format!("invalid pgid '{}'", pgid));
    };
    if cluster.pool(pool_id).is_err() || seed >= cluster.pg_num {
        return CommandOutput::error(-libc::ENOENT, format!("pgid '{}' does not exist", pgid));
    }
    let req = match Request::parse(cmd) {
        Ok(req) => req,
        Err(out) => return out,
    };

    match req.prefix.as_str() {
        "query" => {
            let acting = acting_set(cluster, seed);
            reply(json!({
                "state": "active+clean",
                "pgid": pgid,
                "up": acting,
                "acting": acting,
                "info": { "pgid": pgid, "stats": { "state": "active+clean" } },
            }))
        }
        "list_unfound" | "list_missing" => reply(json!({
            "num_missing": 0,
            "num_unfound": 0,
            "objects": [],
            "more": false,
        })),
        other => unrecognized(other),
    }
}
