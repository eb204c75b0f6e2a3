//! Server configuration.
//!
//! Loaded from the YAML file named by `LISO_CONFIG`, or built from defaults.
//! `LISTEN` overrides the plain listener address either way.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub static_files: StaticFiles,
    pub tls: Option<TlsSettings>,
    pub cgi: Option<CgiSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub listen_addr: String,
    /// Ceiling on simultaneously open client connections.
    pub max_connections: usize,
    pub idle_timeout_secs: u64,
    /// Largest request (head and body) buffered per connection.
    pub max_request_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            max_connections: 512,
            idle_timeout_secs: 3,
            max_request_bytes: 1024 * 1024,
        }
    }
}

impl ServerSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StaticFiles {
    pub root: PathBuf,
}

impl Default for StaticFiles {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./static_site"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsSettings {
    pub listen_addr: String,
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CgiSettings {
    #[serde(default = "default_cgi_prefix")]
    pub prefix: String,
    pub program: PathBuf,
    /// Largest reply a program may write before it is killed.
    #[serde(default = "default_cgi_output_limit")]
    pub max_output_bytes: usize,
}

fn default_cgi_prefix() -> String {
    "/cgi/".to_string()
}

fn default_cgi_output_limit() -> usize {
    8 * 1024 * 1024
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var_os("LISO_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Ok(addr) = std::env::var("LISTEN") {
            config.server.listen_addr = addr;
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(text)?;
        anyhow::ensure!(
            config.server.max_connections > 0,
            "server.max_connections must be at least 1"
        );
        anyhow::ensure!(
            config.server.idle_timeout_secs > 0,
            "server.idle_timeout_secs must be at least 1"
        );
        Ok(config)
    }
}
