use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use utilities::{chunk::DEFAULT_CHUNK_SIZE, result::Result};

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub client_id: String,
    pub gateway_addrs: String,
    // has to match the chunk size the gateway accepts
    pub chunk_size: u64,
    pub log_level: String,
    pub log_base: String,
    pub apm_endpoint: Option<String>,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: "client_0".to_string(),
            gateway_addrs: "http://127.0.0.1:7000".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            log_level: "info".to_string(),
            log_base: "./temp/logs".to_string(),
            apm_endpoint: None,
        }
    }
}
impl Config {
    pub fn load() -> Result<Self> {
        let env = std::env::var("ENV").unwrap_or_else(|_| "default".to_owned());
        // giving default path to root of binary
        let config_file_path = std::env::var("CONFIG_PATH")
            .unwrap_or_else(|_| format!("./client/config/{}.yaml", env));
        println!("reading config from {config_file_path:?}");
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(config_file_path))
            .extract()
            .map_err(|e| format!("Error while reading client config: {e}"))?;
        if config.chunk_size == 0 {
            return Err("chunk_size must be greater than zero".into());
        }
        Ok(config)
    }
}
