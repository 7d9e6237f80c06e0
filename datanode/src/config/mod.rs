use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use storage::file_storage::FileStorageConfig;
use utilities::result::Result;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub datanode_id: String,
    pub listen_addrs: String,
    // path to the dir where chunks will be stored
    pub storage_path: String,
    pub capacity_bytes: u64,
    pub log_level: String,
    pub log_base: String,
    pub apm_endpoint: Option<String>,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            datanode_id: "datanode_0".to_string(),
            listen_addrs: "127.0.0.1:7001".to_string(),
            storage_path: "./temp/datanode_0".to_string(),
            capacity_bytes: 10 * 1024 * 1024 * 1024,
            log_level: "info".to_string(),
            log_base: "./temp/logs".to_string(),
            apm_endpoint: None,
        }
    }
}
impl Config {
    pub fn load() -> Result<Self> {
        let env = std::env::var("ENV").unwrap_or_else(|_| "default".to_owned());
        let config_file_path = std::env::var("CONFIG_PATH")
            .unwrap_or_else(|_| format!("./datanode/config/{}.yaml", env));
        println!("Reading config from file : {config_file_path}");
        Self::from_file(config_file_path)
    }
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .map_err(|e| format!("Error while reading datanode config: {e}"))?;
        Ok(config)
    }
    pub fn storage_config(&self) -> FileStorageConfig {
        FileStorageConfig {
            root: PathBuf::from(&self.storage_path),
            capacity_bytes: self.capacity_bytes,
        }
    }
}
