//! Client configuration.
//!
//! Read from `~/.activetime/client.toml` unless `--config` or
//! `ACTIVETIME_CLIENT_CONFIG` names another file. A missing file yields
//! defaults; environment variables override file values.

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ClientError;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".activetime/client.toml";
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_APP_NAME: &str = "activetime";

pub const CONFIG_ENV: &str = "ACTIVETIME_CLIENT_CONFIG";
pub const SERVER_ENV: &str = "ACTIVETIME_SERVER";
pub const IDLE_TIMEOUT_ENV: &str = "ACTIVETIME_IDLE_TIMEOUT";
pub const USER_ID_ENV: &str = "ACTIVETIME_USER_ID";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub server_addr: String,
    pub request_timeout_ms: u64,
    pub idle_timeout_secs: u64,
    pub poll_interval_secs: u64,
    /// Bound on waiting for the idle poller to exit before `stop` is sent.
    pub stop_wait_secs: u64,
    pub user_id: Option<i64>,
    pub task_id: Option<i64>,
    pub app_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            request_timeout_ms: 5_000,
            idle_timeout_secs: 600,
            poll_interval_secs: 30,
            stop_wait_secs: 5,
            user_id: None,
            task_id: None,
            app_name: DEFAULT_APP_NAME.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stop_wait(&self) -> Duration {
        Duration::from_secs(self.stop_wait_secs)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        let durations = [
            ("request_timeout_ms", self.request_timeout_ms),
            ("idle_timeout_secs", self.idle_timeout_secs),
            ("poll_interval_secs", self.poll_interval_secs),
            ("stop_wait_secs", self.stop_wait_secs),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(ClientError::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.server_addr.trim().is_empty() {
            return Err(ClientError::Config("server_addr is required".to_string()));
        }
        if self.app_name.trim().is_empty() {
            return Err(ClientError::Config("app_name is required".to_string()));
        }
        if matches!(self.user_id, Some(id) if id <= 0) {
            return Err(ClientError::Config("user_id must be positive".to_string()));
        }
        Ok(())
    }

    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ClientError> {
        if let Some(addr) = non_blank(lookup(SERVER_ENV)) {
            self.server_addr = addr;
        }
        if let Some(raw) = non_blank(lookup(IDLE_TIMEOUT_ENV)) {
            self.idle_timeout_secs = parse_env(IDLE_TIMEOUT_ENV, &raw)?;
        }
        if let Some(raw) = non_blank(lookup(USER_ID_ENV)) {
            self.user_id = Some(parse_env(USER_ID_ENV, &raw)?);
        }
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf, ClientError> {
    let home = dirs::home_dir()
        .ok_or_else(|| ClientError::Config("Home directory not found".to_string()))?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

/// Resolves the config file (explicit path, env, then default), applies the
/// process environment and validates the result.
pub fn load_config(path: Option<PathBuf>) -> Result<ClientConfig, ClientError> {
    let config_path = match path {
        Some(path) => path,
        None => match non_blank(env::var(CONFIG_ENV).ok()) {
            Some(path) => PathBuf::from(path),
            None => default_config_path()?,
        },
    };

    let mut config = load_config_file(config_path)?;
    config.apply_env_overrides(|key| env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

pub fn load_config_file(path: PathBuf) -> Result<ClientConfig, ClientError> {
    if !path.exists() {
        return Ok(ClientConfig::default());
    }

    let content = fs_err::read_to_string(&path).map_err(|err| {
        ClientError::Config(format!("Failed to read client config {}: {}", path.display(), err))
    })?;
    toml::from_str::<ClientConfig>(&content).map_err(|err| {
        ClientError::Config(format!("Failed to parse client config {}: {}", path.display(), err))
    })
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ClientError> {
    raw.trim()
        .parse()
        .map_err(|_| ClientError::Config(format!("{} has an invalid value: {}", key, raw)))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let env: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |key: &str| env.get(key).map(|value| value.to_string())
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.idle_timeout(), Duration::from_secs(600));
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.stop_wait(), Duration::from_secs(5));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_config_file(temp_dir.path().join("client.toml")).expect("load");
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn parses_file_values() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("client.toml");
        fs_err::write(
            &path,
            "server_addr = \"10.0.0.5:5000\"\nidle_timeout_secs = 120\nuser_id = 7\napp_name = \"maya\"\n",
        )
        .expect("write");

        let config = load_config_file(path).expect("load");
        assert_eq!(config.server_addr, "10.0.0.5:5000");
        assert_eq!(config.idle_timeout(), Duration::from_secs(120));
        assert_eq!(config.user_id, Some(7));
        assert_eq!(config.app_name, "maya");
        assert_eq!(config.poll_interval_secs, 30);
    }

    #[test]
    fn rejects_zero_durations() {
        let config = ClientConfig {
            poll_interval_secs: 0,
            ..ClientConfig::default()
        };
        let err = config.validate().expect_err("zero poll interval");
        assert!(err.to_string().contains("poll_interval_secs"));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = ClientConfig::default();
        config
            .apply_env_overrides(lookup(&[
                (SERVER_ENV, "ledger.local:6000"),
                (IDLE_TIMEOUT_ENV, "90"),
                (USER_ID_ENV, "12"),
            ]))
            .expect("overrides");

        assert_eq!(config.server_addr, "ledger.local:6000");
        assert_eq!(config.idle_timeout_secs, 90);
        assert_eq!(config.user_id, Some(12));
    }

    #[test]
    fn rejects_unparseable_env_values() {
        let mut config = ClientConfig::default();
        let err = config
            .apply_env_overrides(lookup(&[(IDLE_TIMEOUT_ENV, "ten minutes")]))
            .expect_err("bad idle timeout");
        assert!(matches!(err, ClientError::Config(_)));
    }
}
