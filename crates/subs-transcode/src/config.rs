//! Transcoder configuration.
//!
//! One YAML or JSON file (JSON is tried first) describing where to cache,
//! how to talk to upstreams, how to classify nodes, the subscription
//! sources, and the client profiles. Relative paths are resolved against the
//! directory holding the config file.
//!
//! 环境变量覆盖：`SUBS_CACHE_DIR`、`SUBS_FRESHNESS_SECS`

use crate::classify::Classifier;
use crate::document::DocumentShape;
use crate::fetch::store::validate_key;
use crate::node::Bandwidth;
use crate::Dialect;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_CACHE_DIR: &str = "SUBS_CACHE_DIR";
pub const ENV_FRESHNESS_SECS: &str = "SUBS_FRESHNESS_SECS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranscoderConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Cache entries younger than this are served without a network call.
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub classify: Classifier,
    /// uTLS fingerprint forced onto VLESS nodes.
    #[serde(default = "default_fingerprint")]
    pub fingerprint: String,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    /// Tried in file order by [`TranscoderConfig::select_profile`].
    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
    #[serde(default)]
    pub inject: Option<InjectConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSettings {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Response headers cached and forwarded to clients, case-insensitive.
    #[serde(default = "default_forward_headers")]
    pub forward_headers: Vec<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_ms: default_connect_timeout_ms(),
            timeout_ms: default_timeout_ms(),
            forward_headers: default_forward_headers(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    #[serde(default)]
    pub url: Option<String>,
    /// File whose first non-blank line is the URL.
    #[serde(default)]
    pub url_file: Option<PathBuf>,
    #[serde(default)]
    pub shape: DocumentShape,
}

impl SourceConfig {
    /// The upstream URL, percent-decoded once.
    pub fn resolve_url(&self) -> Result<String, ConfigError> {
        let raw = match (&self.url, &self.url_file) {
            (Some(u), _) => u.trim().to_string(),
            (None, Some(path)) => {
                let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                text.lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .map(String::from)
                    .ok_or_else(|| ConfigError::Invalid(format!("no url in {}", path.display())))?
            }
            (None, None) => return Err(ConfigError::Invalid("source has neither url nor url_file".into())),
        };
        Ok(urlencoding::decode(&raw).map(|c| c.into_owned()).unwrap_or(raw))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub name: String,
    pub dialect: Dialect,
    pub template: PathBuf,
    /// User-agent substrings that select this profile.
    pub signatures: Vec<String>,
    pub bandwidth: Bandwidth,
    /// Append the configured custom nodes.
    #[serde(default)]
    pub inject: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InjectConfig {
    /// Clash YAML: one proxy mapping or a list of them. sing-box profiles
    /// fall back to converting these when `singbox_path` is unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// sing-box JSON: one outbound object or a list, injected unconverted.
    #[serde(default)]
    pub singbox_path: Option<PathBuf>,
    #[serde(default)]
    pub target_groups: Vec<String>,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}
fn default_freshness_secs() -> u64 {
    86_400
}
fn default_fingerprint() -> String {
    "firefox".to_string()
}
fn default_user_agent() -> String {
    "clash-verge".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_timeout_ms() -> u64 {
    15_000
}
fn default_forward_headers() -> Vec<String> {
    vec!["Subscription-Userinfo".to_string()]
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            freshness_secs: default_freshness_secs(),
            http: HttpSettings::default(),
            classify: Classifier::default(),
            fingerprint: default_fingerprint(),
            sources: BTreeMap::new(),
            profiles: Vec::new(),
            inject: None,
        }
    }
}

impl TranscoderConfig {
    /// Load, rebase relative paths, apply env overrides, validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Self::from_str(&text)?;
        if let Some(dir) = path.parent() {
            cfg.rebase(dir);
        }
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        tracing::debug!(
            path = %path.display(),
            sources = cfg.sources.len(),
            profiles = cfg.profiles.len(),
            "config loaded"
        );
        Ok(cfg)
    }

    /// Parse without touching the filesystem or environment.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        match serde_json::from_str(text) {
            Ok(cfg) => Ok(cfg),
            Err(_) => serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string())),
        }
    }

    /// Resolve every relative path against `dir`.
    pub fn rebase(&mut self, dir: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        fix(&mut self.cache_dir);
        for s in self.sources.values_mut() {
            if let Some(f) = s.url_file.as_mut() {
                fix(f);
            }
        }
        for p in &mut self.profiles {
            fix(&mut p.template);
        }
        if let Some(inj) = self.inject.as_mut() {
            inj.path.iter_mut().chain(inj.singbox_path.iter_mut()).for_each(fix);
        }
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(dir) = std::env::var(ENV_CACHE_DIR) {
            if !dir.trim().is_empty() {
                self.cache_dir = PathBuf::from(dir.trim());
            }
        }
        if let Ok(secs) = std::env::var(ENV_FRESHNESS_SECS) {
            self.freshness_secs = secs
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{ENV_FRESHNESS_SECS}={secs:?} is not a number")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, src) in &self.sources {
            validate_key(key).map_err(|e| ConfigError::Invalid(e.to_string()))?;
            if src.url.is_none() && src.url_file.is_none() {
                return Err(ConfigError::Invalid(format!("source {key}: neither url nor url_file")));
            }
        }
        let mut names = HashSet::new();
        for p in &self.profiles {
            if !names.insert(p.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate profile name: {}", p.name)));
            }
            if p.signatures.iter().all(|s| s.is_empty()) {
                return Err(ConfigError::Invalid(format!("profile {}: no signatures", p.name)));
            }
            if p.bandwidth.up_mbps == 0 || p.bandwidth.down_mbps == 0 {
                return Err(ConfigError::Invalid(format!("profile {}: bandwidth must be non-zero", p.name)));
            }
        }
        if let Some(inj) = &self.inject {
            if inj.path.is_none() && inj.singbox_path.is_none() {
                return Err(ConfigError::Invalid("inject: neither path nor singbox_path".into()));
            }
        }
        if self.http.timeout_ms == 0 || self.http.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("http timeouts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }

    /// First profile, in file order, with a signature contained in `user_agent`.
    pub fn select_profile(&self, user_agent: &str) -> Option<&ProfileConfig> {
        self.profiles
            .iter()
            .find(|p| p.signatures.iter().any(|s| !s.is_empty() && user_agent.contains(s.as_str())))
    }

    pub fn profile(&self, name: &str) -> Option<&ProfileConfig> {
        self.profiles.iter().find(|p| p.name == name)
    }
}
