use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use utilities::{chunk::DEFAULT_CHUNK_SIZE, result::Result};

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub id: String,
    pub listen_addrs: String,
    // datanode grpc urls, selection ties are broken by this order
    pub nodes: Vec<String>,
    pub worker_count: usize,
    pub chunk_size: u64,
    pub job_timeout_ms: u64,
    pub download_timeout_ms: u64,
    pub log_level: String,
    pub log_base: String,
    pub apm_endpoint: Option<String>,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            id: "gateway_0".to_string(),
            listen_addrs: "127.0.0.1:7000".to_string(),
            nodes: vec![],
            worker_count: 8,
            chunk_size: DEFAULT_CHUNK_SIZE,
            job_timeout_ms: 30_000,
            download_timeout_ms: 30_000,
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
            .unwrap_or_else(|_| format!("./gateway/config/{}.yaml", env));
        println!("Reading config from file : {config_file_path}");
        Self::from_file(config_file_path)
    }
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .map_err(|e| format!("Error while reading gateway config: {e}"))?;
        config.validate()?;
        Ok(config)
    }
    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than zero".into());
        }
        if self.worker_count == 0 {
            return Err("worker_count must be greater than zero".into());
        }
        if self.nodes.is_empty() {
            return Err("at least one datanode has to be configured".into());
        }
        // a fetch job is cut at job_timeout_ms, it must not end before the download does
        if self.download_timeout_ms > self.job_timeout_ms {
            return Err(format!(
                "download_timeout_ms ({}) must not exceed job_timeout_ms ({})",
                self.download_timeout_ms, self.job_timeout_ms
            )
            .into());
        }
        Ok(())
    }
    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }
    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }
}
