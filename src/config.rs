use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3306;

/// A single driver option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl OptionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Text(value)
    }
}

/// Options every connection gets unless the caller overrides them.
pub fn default_options() -> BTreeMap<String, OptionValue> {
    let mut defaults = BTreeMap::new();
    defaults.insert("use_unicode".to_string(), OptionValue::Bool(true));
    defaults.insert("charset".to_string(), OptionValue::Text("utf8".to_string()));
    defaults.insert("autocommit".to_string(), OptionValue::Bool(false));
    defaults
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Connection parameters handed to a connection factory.
#[derive(Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Caller-supplied overrides; merged over `default_options()`.
    #[serde(default)]
    pub options: BTreeMap<String, OptionValue>,
}

impl DriverConfig {
    pub fn new(user: impl Into<String>, password: impl Into<String>, database: impl Into<String>) -> Self {
        DriverConfig {
            user: user.into(),
            password: password.into(),
            database: database.into(),
            host: default_host(),
            port: default_port(),
            options: BTreeMap::new(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Defaults overlaid with the caller's options. Caller keys always win;
    /// keys the defaults do not know about are passed through.
    pub fn effective_options(&self) -> BTreeMap<String, OptionValue> {
        let mut merged = default_options();
        for (key, value) in &self.options {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

impl fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConfig")
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("options", &self.options)
            .finish()
    }
}

/// Top-level configuration file structure.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub database: DriverConfig,
}

/// Loads configuration from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = transwrap::config::load_config("db.toml").expect("Failed to load config");
/// println!("{:?}", config.database);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| DbError::Config(e.to_string()))
}

/// Location of the configuration file under a configuration directory.
pub fn config_path_in(config_dir: &Path) -> PathBuf {
    config_dir.join("transwrap").join("db.toml")
}

/// Per-user location of the configuration file, if the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| config_path_in(&dir))
}

/// Loads `transwrap/db.toml` under `config_dir`.
pub fn load_config_in(config_dir: &Path) -> Result<Config> {
    load_config(config_path_in(config_dir))
}

/// Loads the configuration from the per-user configuration directory.
pub fn load_default_config() -> Result<Config> {
    let dir = dirs::config_dir()
        .ok_or_else(|| DbError::Config("No configuration directory on this platform".to_string()))?;
    load_config_in(&dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
[database]
user = "root"
password = "123456"
database = "test"
port = 3307

[database.options]
autocommit = true
connect_timeout = 10
"#;

    #[test]
    fn test_load_config_from_str() {
        let config = parse_config(SAMPLE_CONFIG).expect("Failed to parse sample config");
        let db = config.database;
        assert_eq!(db.user, "root");
        assert_eq!(db.database, "test");
        assert_eq!(db.host, DEFAULT_HOST);
        assert_eq!(db.port, 3307);
        assert_eq!(db.options.get("connect_timeout"), Some(&OptionValue::Int(10)));
    }

    #[test]
    fn test_overrides_win_over_defaults() {
        let config = parse_config(SAMPLE_CONFIG).unwrap().database;
        let options = config.effective_options();
        assert_eq!(options["autocommit"], OptionValue::Bool(true));
        assert_eq!(options["use_unicode"], OptionValue::Bool(true));
        assert_eq!(options["charset"], OptionValue::Text("utf8".to_string()));
        assert_eq!(options["connect_timeout"], OptionValue::Int(10));
    }

    #[test]
    fn test_builder_defaults() {
        let config = DriverConfig::new("root", "", "test");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3306);
        assert_eq!(config.effective_options()["autocommit"].as_bool(), Some(false));

        let config = config.host("db.local").port(3310).option("charset", "utf8mb4");
        assert_eq!(config.host, "db.local");
        assert_eq!(config.port, 3310);
        assert_eq!(config.effective_options()["charset"].as_str(), Some("utf8mb4"));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path_in(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, SAMPLE_CONFIG).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.database.user, "root");
        assert_eq!(config.database.port, 3307);

        let config = load_config_in(dir.path()).unwrap();
        assert_eq!(config.database.database, "test");
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        match load_config_in(dir.path()) {
            Err(DbError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("Expected Io error, got {:?}", other.map(|c| c.database)),
        }
    }

    #[test]
    fn test_default_config_path_layout() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("transwrap/db.toml"));
            assert_eq!(Some(path.clone()), dirs::config_dir().map(|d| config_path_in(&d)));
        }
    }

    #[test]
    fn test_debug_hides_password() {
        let config = DriverConfig::new("root", "hunter2", "test");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_missing_required_field() {
        let result = parse_config("[database]\nuser = \"root\"\n");
        match result {
            Err(DbError::Config(msg)) => assert!(msg.contains("database")),
            other => panic!("Expected Config error, got {:?}", other.map(|c| c.database)),
        }
    }
}
