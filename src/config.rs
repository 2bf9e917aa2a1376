//! Configuration file loading: `agent.toml`, sibling of the binary.
//!
//! On first run a config is synthesized with sane defaults (including a
//! freshly generated API key) and written back; on later runs any missing
//! required entry (bad port, missing `"_default_"` log group) is defaulted
//! and the file is rewritten, matching the Go original's "heal and persist"
//! behavior rather than failing outright on a sparse file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::task::DEFAULT_LOG_GROUP;

const CONFIG_FILE: &str = "agent.toml";
const DEFAULT_PORT: u16 = 8800;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogStoreConfig {
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default)]
    pub compress: bool,
    pub log_folder: PathBuf,
}

fn default_max_size_mb() -> u32 {
    10
}

fn default_max_backups() -> u32 {
    5
}

impl LogStoreConfig {
    fn defaults_in(base: &Path, subdir: &str) -> Self {
        LogStoreConfig {
            max_size_mb: default_max_size_mb(),
            max_backups: default_max_backups(),
            compress: false,
            log_folder: base.join("log").join(subdir),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub listen_port: u16,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub no_tls: bool,
    pub log_std: LogStoreConfig,
    #[serde(default)]
    pub log_groups: HashMap<String, LogStoreConfig>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl AppConfig {
    /// Load `agent.toml` next to `exe_dir`, creating it with defaults if
    /// absent, and healing/rewriting it if present but incomplete. Any
    /// log folders it names are created.
    pub fn load(exe_dir: &Path) -> anyhow::Result<Self> {
        let path = exe_dir.join(CONFIG_FILE);

        let (mut config, dirty) = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            (toml::from_str::<AppConfig>(&raw)?, false)
        } else {
            (AppConfig::defaults(exe_dir), true)
        };

        let mut dirty = dirty;
        if config.listen_port == 0 {
            config.listen_port = DEFAULT_PORT;
            dirty = true;
        }
        if config.api_key.is_empty() {
            config.api_key = generate_api_key();
            dirty = true;
        }
        if !config.log_groups.contains_key(DEFAULT_LOG_GROUP) {
            config.log_groups.insert(
                DEFAULT_LOG_GROUP.to_string(),
                LogStoreConfig::defaults_in(exe_dir, DEFAULT_LOG_GROUP),
            );
            dirty = true;
        }

        std::fs::create_dir_all(&config.log_std.log_folder)?;
        for group in config.log_groups.values() {
            std::fs::create_dir_all(&group.log_folder)?;
        }

        if dirty {
            let serialized = toml::to_string_pretty(&config)?;
            std::fs::write(&path, serialized)?;
        }

        Ok(config)
    }

    fn defaults(exe_dir: &Path) -> Self {
        let mut log_groups = HashMap::new();
        log_groups.insert(
            DEFAULT_LOG_GROUP.to_string(),
            LogStoreConfig::defaults_in(exe_dir, DEFAULT_LOG_GROUP),
        );
        AppConfig {
            listen_port: DEFAULT_PORT,
            api_key: generate_api_key(),
            no_tls: false,
            log_std: LogStoreConfig::defaults_in(exe_dir, "agent"),
            log_groups,
        }
    }
}

/// A 32-character hex string from 16 random bytes, matching the entropy of
/// the original's `crypto/rand`-derived key.
fn generate_api_key() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
