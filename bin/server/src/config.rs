//! Centralized server configuration, loaded via the `config` crate from
//! environment variables.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection URL. When unset, the server falls back to
    /// the in-memory stores (single-node, non-durable).
    #[serde(default)]
    pub database_url: Option<String>,

    /// NATS URL for multi-node event broadcast. When unset, the server
    /// falls back to the in-process broadcaster.
    #[serde(default)]
    pub nats_url: Option<String>,

    /// Platform this server instance adapts: `server`, `mobile`, or
    /// `cloud-worker`.
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Root directory the filesystem block is allowed to read under,
    /// when `platform == "server"`.
    #[serde(default = "default_fs_root")]
    pub fs_root: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_platform() -> String {
    "server".to_string()
}

fn default_fs_root() -> String {
    "./data".to_string()
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::default().separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_to_all_interfaces_on_port_3000() {
        assert_eq!(default_bind_addr(), "0.0.0.0:3000");
        assert_eq!(default_platform(), "server");
    }
}
