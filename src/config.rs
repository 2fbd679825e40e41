use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

/// How idle connections are evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IdlePolicy {
    /// A poll timeout with no ready socket evicts every open connection.
    #[default]
    Sweep,
    /// Each connection is evicted once it has been silent for a full timeout.
    PerConnection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    /// Root of static content. Modules live in `module_dir_name` below it.
    pub base_dir: PathBuf,
    /// Request path prefix that selects handler calls.
    pub handler_prefix: String,
    pub module_dir_name: String,
    pub max_connections: usize,
    pub max_modules: usize,
    pub max_handlers: usize,
    pub poll_timeout_ms: u64,
    pub send_timeout_ms: u64,
    /// Bodies above this size are received into a mapped scratch file.
    pub heap_body_limit: usize,
    pub idle_policy: IdlePolicy,
    /// Name of the built-in administrative module.
    pub control_module: String,
    /// Module file names loaded from the module directory at startup.
    pub preload: Vec<String>,
    pub server_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            base_dir: PathBuf::from("/var/www/html"),
            handler_prefix: "/cgi-bin/".to_string(),
            module_dir_name: "cgi-bin".to_string(),
            max_connections: 12,
            max_modules: 32,
            max_handlers: 256,
            poll_timeout_ms: 3000,
            send_timeout_ms: 3000,
            heap_body_limit: 1024 * 1024,
            idle_policy: IdlePolicy::Sweep,
            control_module: "control.plugin".to_string(),
            preload: Vec::new(),
            server_name: concat!("ember/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// Loads the configuration.
    ///
    /// Starts from the YAML file named by `EMBER_CONFIG` (or the defaults),
    /// then applies the `LISTEN` and `EMBER_BASE` overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("EMBER_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.listen_addr = listen_addr;
        }
        if let Ok(base) = std::env::var("EMBER_BASE") {
            cfg.base_dir = PathBuf::from(base);
        }

        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !self.handler_prefix.starts_with('/') || !self.handler_prefix.ends_with('/') {
            anyhow::bail!("handler_prefix must start and end with '/'");
        }
        if self.max_connections == 0 || self.max_modules == 0 || self.max_handlers == 0 {
            anyhow::bail!("table capacities must be non-zero");
        }
        if self.poll_timeout_ms == 0 {
            anyhow::bail!("poll_timeout_ms must be non-zero");
        }
        Ok(())
    }

    /// Directory holding installed modules and body scratch files.
    pub fn module_dir(&self) -> PathBuf {
        self.base_dir.join(&self.module_dir_name)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}
