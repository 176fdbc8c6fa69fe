//! Startup settings handed in by the embedding application

use rados_native::RadosNative;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cluster::ClusterHandle;
use crate::error::Result;

/// Identity and configuration source for one client instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Cluster name (selects `<cluster>.conf` conventions on real clusters)
    pub cluster_name: String,
    /// Entity to authenticate as
    pub user_name: String,
    /// Configuration file to load before connecting
    pub conf_path: Option<PathBuf>,
    /// Pool the application works in by default
    pub pool: Option<String>,
    /// Opaque flags passed through to the native create call
    pub flags: u64,
    /// Extra options applied after the configuration file
    pub options: BTreeMap<String, String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            cluster_name: "ceph".to_string(),
            user_name: "client.admin".to_string(),
            conf_path: None,
            pool: None,
            flags: 0,
            options: BTreeMap::new(),
        }
    }
}

impl ClusterHandle {
    /// Create, configure and connect a handle in one step
    pub fn connect_with(native: Arc<dyn RadosNative>, settings: &ClientSettings) -> Result<Self> {
        let mut cluster = ClusterHandle::new(native);
        cluster.create(&settings.cluster_name, &settings.user_name, settings.flags)?;
        if let Some(path) = &settings.conf_path {
            cluster.load_config(path)?;
        }
        for (key, value) in &settings.options {
            cluster.set_config(key, value)?;
        }
        cluster.connect()?;
        Ok(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rados_native::MemRados;

    #[test]
    fn test_defaults() {
        let settings = ClientSettings::default();
        assert_eq!(settings.cluster_name, "ceph");
        assert_eq!(settings.user_name, "client.admin");
        assert!(settings.conf_path.is_none());
    }

    #[test]
    fn test_deserialize_partial() {
        let settings: ClientSettings = serde_json::from_str(
            r#"{"user_name": "client.web", "pool": "images", "options": {"mon_host": "10.0.0.1"}}"#,
        )
        .unwrap();
        assert_eq!(settings.cluster_name, "ceph");
        assert_eq!(settings.user_name, "client.web");
        assert_eq!(settings.pool.as_deref(), Some("images"));
        assert_eq!(settings.options["mon_host"], "10.0.0.1");
    }

    #[test]
    fn test_connect_with() {
        let mut settings = ClientSettings::default();
        settings.options.insert("mon_host".into(), "127.0.0.1".into());
        settings.options.insert("mem_pools".into(), "data".into());

        let cluster = ClusterHandle::connect_with(Arc::new(MemRados::new().unwrap()), &settings)
            .unwrap();
        assert!(cluster.is_connected());
        assert_eq!(cluster.pool_list().unwrap(), vec!["data"]);
    }

    #[test]
    fn test_connect_with_bad_option() {
        let mut settings = ClientSettings::default();
        settings.options.insert("mem_osds".into(), "several".into());

        let err = ClusterHandle::connect_with(Arc::new(MemRados::new().unwrap()), &settings)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
