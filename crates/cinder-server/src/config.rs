//! Server configuration: TOML file with CLI overrides on top.

use std::path::{Path, PathBuf};

use cinder_core::RouterConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Password required by AUTH; empty means no authentication.
    pub password: Option<String>,
    /// Number of logical databases.
    pub databases: usize,
    /// Whether to keep an append-only log of mutations.
    pub appendonly: bool,
    /// Append-only log path.
    pub appendfilename: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 6380,
            password: None,
            databases: cinder_core::DB_COUNT,
            appendonly: false,
            appendfilename: PathBuf::from("cinder.aof"),
        }
    }
}

impl ServerConfig {
    /// Parses a TOML config file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read config file {}: {e}", path.display()))?;
        toml::from_str(&text).map_err(|e| format!("invalid config file: {e}"))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The engine-facing subset.
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            databases: self.databases,
            password: self.password.clone().filter(|p| !p.is_empty()),
            aof_path: self.appendonly.then(|| self.appendfilename.clone()),
        }
    }
}
