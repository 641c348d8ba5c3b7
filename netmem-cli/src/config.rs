use netmem_core::{NetMemError, Result, StoreConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Load from `path` (optional) with `NETMEM__STORE__*` overrides on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(::config::Environment::with_prefix("NETMEM").separator("__"))
            .build()
            .map_err(|e| NetMemError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| NetMemError::Config(e.to_string()))?;

        config.store.validate()?;
        Ok(config)
    }
}
