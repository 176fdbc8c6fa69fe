//! Administrative commands
//!
//! Commands are JSON documents sent to a monitor, a single OSD, or the
//! primary of a placement group. Replies carry a status, a data buffer and a
//! status message, each sized by the native call that produced it.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::cluster::ClusterHandle;
use crate::error::{errno_message, RadosError, Result};

/// Placement group id, written `<pool>.<seed hex>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PgId {
    pub pool: i64,
    pub seed: u32,
}

impl fmt::Display for PgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:x}", self.pool, self.seed)
    }
}

impl FromStr for PgId {
    type Err = RadosError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || RadosError::Command {
            target: "pg".to_string(),
            code: -libc::EINVAL,
            message: format!("'{}' is not a placement group id", s),
        };
        let (pool, seed) = s.split_once('.').ok_or_else(invalid)?;
        Ok(PgId {
            pool: pool.parse().map_err(|_| invalid())?,
            seed: u32::from_str_radix(seed, 16).map_err(|_| invalid())?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTarget {
    Monitor,
    Osd(i32),
    PlacementGroup(PgId),
}

impl fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandTarget::Monitor => write!(f, "mon"),
            CommandTarget::Osd(id) => write!(f, "osd.{}", id),
            CommandTarget::PlacementGroup(pg) => write!(f, "pg {}", pg),
        }
    }
}

/// A command document
///
/// Built either from a prefix plus arguments, or from a raw JSON string.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    Structured(Map<String, Value>),
    Raw(String),
}

impl AdminCommand {
    pub fn new(prefix: &str) -> Self {
        let mut map = Map::new();
        map.insert("prefix".into(), Value::String(prefix.to_string()));
        AdminCommand::Structured(map)
    }

    /// Add an argument; ignored on raw commands
    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let AdminCommand::Structured(map) = &mut self {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn prefix(&self) -> Option<String> {
        match self {
            AdminCommand::Structured(map) => map.get("prefix")?.as_str().map(str::to_string),
            AdminCommand::Raw(raw) => serde_json::from_str::<Value>(raw)
                .ok()?
                .get("prefix")?
                .as_str()
                .map(str::to_string),
        }
    }

    pub fn to_json(&self) -> String {
        match self {
            AdminCommand::Structured(map) => Value::Object(map.clone()).to_string(),
            AdminCommand::Raw(raw) => raw.clone(),
        }
    }
}

impl From<&str> for AdminCommand {
    fn from(raw: &str) -> Self {
        AdminCommand::Raw(raw.to_string())
    }
}

impl From<String> for AdminCommand {
    fn from(raw: String) -> Self {
        AdminCommand::Raw(raw)
    }
}

/// Successful command reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReply {
    pub status: i32,
    #[serde(serialize_with = "as_text")]
    pub data: Bytes,
    pub status_message: String,
}

fn as_text<S: serde::Serializer>(data: &Bytes, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(data))
}

impl CommandReply {
    /// Decode the data buffer as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.data).map_err(|e| RadosError::Command {
            target: "reply".to_string(),
            code: -libc::EINVAL,
            message: format!("undecodable reply: {}", e),
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Sends commands over a connected cluster handle
pub struct AdminCommandChannel<'c> {
    cluster: &'c ClusterHandle,
}

impl<'c> AdminCommandChannel<'c> {
    pub fn new(cluster: &'c ClusterHandle) -> Self {
        Self { cluster }
    }

    pub fn mon_command(&self, cmd: impl Into<AdminCommand>, params: &[u8]) -> Result<CommandReply> {
        self.run(CommandTarget::Monitor, cmd, params)
    }

    pub fn osd_command(
        &self,
        osd: i32,
        cmd: impl Into<AdminCommand>,
        params: &[u8],
    ) -> Result<CommandReply> {
        self.run(CommandTarget::Osd(osd), cmd, params)
    }

    pub fn pg_command(
        &self,
        pg: PgId,
        cmd: impl Into<AdminCommand>,
        params: &[u8],
    ) -> Result<CommandReply> {
        self.run(CommandTarget::PlacementGroup(pg), cmd, params)
    }

    /// Send `cmd` to `target`
    ///
    /// A negative status becomes a `Command` error carrying the daemon's
    /// status message, or the errno text when the daemon gave none.
    pub fn run(
        &self,
        target: CommandTarget,
        cmd: impl Into<AdminCommand>,
        params: &[u8],
    ) -> Result<CommandReply> {
        let id = self.cluster.connected_id("admin command")?;
        let cmd = cmd.into();
        let argv = vec![cmd.to_json()];
        let native = self.cluster.native();

        debug!("Sending {} to {}", argv[0], target);
        let out = match target {
            CommandTarget::Monitor => native.mon_command(id, &argv, params),
            CommandTarget::Osd(osd) => native.osd_command(id, osd, &argv, params),
            CommandTarget::PlacementGroup(pg) => {
                native.pg_command(id, &pg.to_string(), &argv, params)
            }
        };

        if out.status < 0 {
            let message = if out.outs.is_empty() {
                errno_message(out.status)
            } else {
                out.outs
            };
            debug!("{} rejected {:?}: {}", target, cmd.prefix(), message);
            return Err(RadosError::Command {
                target: target.to_string(),
                code: out.status,
                message,
            });
        }

        Ok(CommandReply {
            status: out.status,
            data: Bytes::from(out.outbuf),
            status_message: out.outs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pgid_parse() {
        let pg: PgId = "3.1f".parse().unwrap();
        assert_eq!(pg, PgId { pool: 3, seed: 0x1f });
        assert_eq!(pg.to_string(), "3.1f");
        assert!("3".parse::<PgId>().is_err());
        assert!("x.1".parse::<PgId>().is_err());
        assert!("1.zz".parse::<PgId>().is_err());
    }

    #[test]
    fn test_target_display() {
        assert_eq!(CommandTarget::Monitor.to_string(), "mon");
        assert_eq!(CommandTarget::Osd(2).to_string(), "osd.2");
        assert_eq!(
            CommandTarget::PlacementGroup(PgId { pool: 1, seed: 10 }).to_string(),
            "pg 1.a"
        );
    }

    #[test]
    fn test_structured_command() {
        let cmd = AdminCommand::new("osd pool create")
            .arg("pool", "images")
            .arg("pg_num", 16);
        assert_eq!(cmd.prefix().as_deref(), Some("osd pool create"));

        let json: Value = serde_json::from_str(&cmd.to_json()).unwrap();
        assert_eq!(json["pool"], "images");
        assert_eq!(json["pg_num"], 16);
    }

    #[test]
    fn test_raw_command() {
        let cmd = AdminCommand::from(r#"{"prefix": "status", "format": "json"}"#);
        assert_eq!(cmd.prefix().as_deref(), Some("status"));
        assert_eq!(cmd.clone().arg("ignored", 1), cmd);
        assert_eq!(AdminCommand::from("not json").prefix(), None);
    }
}
