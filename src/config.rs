use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use std::{env, fmt};

use log::debug;
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use url::Url;

/// Protocol-specific options attached to a check or plugin, passed through opaquely.
pub type Args = serde_json::Map<String, serde_json::Value>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid {kind} #{index}: {reason}")]
    Invalid {
        kind: &'static str,
        index: usize,
        reason: String,
    },
}

/// The parsed check run configuration. Read-only once loaded.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub dns_map: BTreeMap<String, String>,
    #[serde(default)]
    pub plugins: Vec<PluginDescriptor>,
    #[serde(default)]
    pub checks: Vec<CheckDescriptor>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading config from {}", path.display());
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_yaml(&content)
    }

    /// Parses and validates a YAML config document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, plugin) in self.plugins.iter().enumerate() {
            let invalid = |reason: &str| ConfigError::Invalid {
                kind: "plugin",
                index,
                reason: reason.to_string(),
            };
            if plugin.source.trim().is_empty() {
                return Err(invalid("lib must not be empty"));
            }
            if plugin.name.trim().is_empty() {
                return Err(invalid("name must not be empty"));
            }
        }

        for (index, check) in self.checks.iter().enumerate() {
            check.validate().map_err(|reason| ConfigError::Invalid {
                kind: "check",
                index,
                reason,
            })?;
        }
        Ok(())
    }
}

/// One declared endpoint and the expectation it is validated against.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CheckDescriptor {
    pub url: String,
    /// Routes the check to a registered plugin instead of the URL scheme.
    #[serde(default, rename = "plugin", skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
    #[serde(default)]
    pub args: Args,
    #[serde(default)]
    pub expect: Expect,
}

impl CheckDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            plugin_name: None,
            args: Args::new(),
            expect: Expect::default(),
        }
    }

    pub fn with_plugin(mut self, name: impl Into<String>) -> Self {
        self.plugin_name = Some(name.into());
        self
    }

    pub fn with_arg(mut self, key: &str, value: serde_json::Value) -> Self {
        self.args.insert(key.to_string(), value);
        self
    }

    pub fn expect_status(mut self, status: u16) -> Self {
        self.expect.status = status;
        self
    }

    pub fn expect_contains(mut self, pattern: Pattern) -> Self {
        self.expect.contains = Some(pattern);
        self
    }

    /// The URL scheme, lower-cased. Empty when the URL does not parse.
    pub fn scheme(&self) -> String {
        Url::parse(&self.url)
            .map(|url| url.scheme().to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Label used when rendering the outcome of this check.
    pub fn label(&self) -> String {
        match &self.plugin_name {
            Some(name) => format!("{}({})", name, self.url),
            None => self.url.clone(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        let url = Url::parse(&self.url).map_err(|e| format!("url {:?}: {}", self.url, e))?;
        let needs_host = matches!(url.scheme(), "http" | "https" | "ws" | "wss");
        if self.plugin_name.is_none() && needs_host && url.host_str().is_none_or(str::is_empty) {
            return Err(format!("url {:?} has no host", self.url));
        }
        if let Some(name) = &self.plugin_name {
            if name.trim().is_empty() {
                return Err("plugin must not be empty".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Expect {
    #[serde(default = "default_status")]
    pub status: u16,
    /// Regular expression searched for in the response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<Pattern>,
}

impl Default for Expect {
    fn default() -> Self {
        Self {
            status: default_status(),
            contains: None,
        }
    }
}

fn default_status() -> u16 {
    200
}

/// A regular expression compiled once, when the config is loaded.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Pattern)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        Pattern::new(&pattern).map_err(|e| de::Error::custom(format!("expect.contains: {}", e)))
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A request to load a plugin module and the name it must register.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PluginDescriptor {
    /// A built-in module identifier or a path to a plugin manifest.
    #[serde(rename = "lib")]
    pub source: String,
    pub name: String,
    #[serde(default)]
    pub args: Args,
}

impl PluginDescriptor {
    pub fn new(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            args: Args::new(),
        }
    }
}

/// Runtime settings taken from the environment.
pub struct Settings {
    pub config_path: PathBuf,
    pub timeout: Duration,
    pub jobs: usize,
}

impl Settings {
    pub fn from_env() -> Self {
        let config_path = env::var("CLUSTERCHECK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("checker.yml"));
        let timeout = env::var("CLUSTERCHECK_TIMEOUT")
            .ok()
            .and_then(|t| t.parse().ok())
            .filter(|t| *t > 0)
            .unwrap_or(10);
        let jobs = env::var("CLUSTERCHECK_JOBS")
            .ok()
            .and_then(|j| j.parse().ok())
            .filter(|j| *j > 0)
            .unwrap_or(1);

        Settings {
            config_path,
            timeout: Duration::from_secs(timeout),
            jobs,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("config_path", &self.config_path)
            .field("timeout", &self.timeout)
            .field("jobs", &self.jobs)
            .finish()
    }
}

pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::from_env);
