use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3456;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_COOKIE_TTL: &str = "24h";
pub const DEFAULT_AGENT_COMMAND: &str = "claude";

/// Server configuration, persisted as JSON next to the worktree metadata dir.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cookie_ttl: String,
    pub agent_command: String,
    pub agent_args: Vec<String>,
    pub root_dirs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_hash: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            cookie_ttl: DEFAULT_COOKIE_TTL.to_string(),
            agent_command: DEFAULT_AGENT_COMMAND.to_string(),
            agent_args: Vec::new(),
            root_dirs: Vec::new(),
            pin_hash: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Config file not found: {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Load the config, writing defaults back when the file is missing so a
    /// fresh install ends up with an editable file on disk.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(_) => {
                let config = Config::default();
                config.save(path)?;
                Ok(config)
            }
        }
    }

    pub fn cookie_ttl_duration(&self) -> Duration {
        parse_ttl(&self.cookie_ttl)
    }

    pub fn into_shared(self) -> SharedConfig {
        std::sync::Arc::new(std::sync::RwLock::new(self))
    }
}

/// Runtime-mutable config handle; root directories change while serving.
pub type SharedConfig = std::sync::Arc<std::sync::RwLock<Config>>;

/// Default config location: `~/.config/agentport/config.json`, overridable
/// via the `AGENTPORT_CONFIG` environment variable.
pub fn default_config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("AGENTPORT_CONFIG") {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agentport")
        .join("config.json")
}

/// Parse a TTL like "30s", "15m", "24h" or "7d". Unrecognized input falls
/// back to 24 hours rather than failing login outright.
pub fn parse_ttl(ttl: &str) -> Duration {
    const FALLBACK: Duration = Duration::from_secs(24 * 60 * 60);

    let ttl = ttl.trim();
    if ttl.len() < 2 {
        return FALLBACK;
    }
    let (value, unit) = ttl.split_at(ttl.len() - 1);
    let Ok(value) = value.parse::<u64>() else {
        return FALLBACK;
    };
    match unit {
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 60 * 60),
        "d" => Duration::from_secs(value * 24 * 60 * 60),
        _ => FALLBACK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.port, 3456);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.agent_command, "claude");
        assert!(config.root_dirs.is_empty());
        assert!(config.pin_hash.is_none());
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");

        let mut config = Config::default();
        config.port = 9999;
        config.root_dirs = vec![PathBuf::from("/code")];
        config.pin_hash = Some("salt$hash".into());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.port, 9999);
        assert_eq!(loaded.root_dirs, vec![PathBuf::from("/code")]);
        assert_eq!(loaded.pin_hash.as_deref(), Some("salt$hash"));
    }

    #[test]
    fn load_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(Config::load(&tmp.path().join("nope.json")).is_err());
    }

    #[test]
    fn load_or_init_writes_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        let config = Config::load_or_init(&path).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(path.exists());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"port": 8080}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.cookie_ttl, DEFAULT_COOKIE_TTL);
    }

    #[test]
    fn ttl_parsing() {
        assert_eq!(parse_ttl("30s"), Duration::from_secs(30));
        assert_eq!(parse_ttl("15m"), Duration::from_secs(900));
        assert_eq!(parse_ttl("24h"), Duration::from_secs(86400));
        assert_eq!(parse_ttl("2d"), Duration::from_secs(172800));
        // Garbage falls back to 24h
        assert_eq!(parse_ttl("soon"), Duration::from_secs(86400));
        assert_eq!(parse_ttl(""), Duration::from_secs(86400));
        assert_eq!(parse_ttl("10x"), Duration::from_secs(86400));
    }
}
