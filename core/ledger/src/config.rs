//! Ledger runtime configuration.
//!
//! Read from `~/.activetime/ledger.toml` (or `ACTIVETIME_LEDGER_CONFIG`); a
//! missing file yields defaults. Environment variables override file values.

use serde::Deserialize;
use std::env;
use std::path::PathBuf;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".activetime/ledger.toml";
const DEFAULT_DB_RELATIVE_PATH: &str = ".activetime/ledger/sessions.db";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";

pub const CONFIG_ENV: &str = "ACTIVETIME_LEDGER_CONFIG";
pub const ADDR_ENV: &str = "ACTIVETIME_LEDGER_ADDR";
pub const DB_ENV: &str = "ACTIVETIME_LEDGER_DB";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    pub bind_addr: String,
    /// Defaults to `~/.activetime/ledger/sessions.db`.
    pub db_path: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            db_path: None,
        }
    }
}

impl LedgerConfig {
    pub fn resolved_db_path(&self) -> Result<PathBuf, String> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => {
                let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
                Ok(home.join(DEFAULT_DB_RELATIVE_PATH))
            }
        }
    }

    /// Applies `ACTIVETIME_LEDGER_ADDR` and `ACTIVETIME_LEDGER_DB`. Blank values
    /// are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = non_blank(lookup(ADDR_ENV)) {
            self.bind_addr = addr;
        }
        if let Some(path) = non_blank(lookup(DB_ENV)) {
            self.db_path = Some(PathBuf::from(path));
        }
    }
}

pub fn default_config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

/// Loads the file config, then layers the process environment on top.
pub fn load_config() -> Result<LedgerConfig, String> {
    let path = match non_blank(env::var(CONFIG_ENV).ok()) {
        Some(path) => PathBuf::from(path),
        None => default_config_path()?,
    };
    let mut config = load_config_file(path)?;
    config.apply_env_overrides(|key| env::var(key).ok());
    Ok(config)
}

pub fn load_config_file(path: PathBuf) -> Result<LedgerConfig, String> {
    if !path.exists() {
        return Ok(LedgerConfig::default());
    }

    let content = fs_err::read_to_string(&path)
        .map_err(|err| format!("Failed to read ledger config {}: {}", path.display(), err))?;
    toml::from_str::<LedgerConfig>(&content)
        .map_err(|err| format!("Failed to parse ledger config {}: {}", path.display(), err))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
