//! Node configuration: a small versioned JSON file saved atomically.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use kestrel_chain::persist::write_file_atomic;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    pub version: u32,
    pub data_dir: String,
    /// Optional file of length-prefixed blocks to import on start.
    pub blocks_file: Option<String>,
    /// Seconds added to the local clock to approximate network time.
    pub network_time_offset: i64,
}

impl NodeConfig {
    pub fn new(data_dir: &str) -> Self {
        Self {
            version: CONFIG_VERSION,
            data_dir: data_dir.to_string(),
            blocks_file: None,
            network_time_offset: 0,
        }
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path).map_err(|e| format!("read config: {e}"))?;
        let config: NodeConfig =
            serde_json::from_str(&raw).map_err(|e| format!("parse config: {e}"))?;
        if config.version > CONFIG_VERSION {
            return Err(format!(
                "config version {} is newer than supported {}",
                config.version, CONFIG_VERSION
            ));
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        let mut raw =
            serde_json::to_vec_pretty(self).map_err(|e| format!("encode config: {e}"))?;
        raw.push(b'\n');
        write_file_atomic(path, &raw).map_err(|e| format!("write config: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("node.json");
        let mut config = NodeConfig::new("/var/lib/kestrel");
        config.blocks_file = Some("bootstrap.blocks".into());
        config.network_time_offset = -12;
        config.save(&path).expect("save");
        assert_eq!(NodeConfig::load(&path).expect("load"), config);
    }

    #[test]
    fn rejects_newer_version() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("node.json");
        let raw = r#"{"version":99,"data_dir":"x","blocks_file":null,"network_time_offset":0}"#;
        std::fs::write(&path, raw).expect("write");
        assert!(NodeConfig::load(&path).is_err());
    }
}
