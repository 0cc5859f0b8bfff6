//! Subscription transcoder: turns upstream proxy subscriptions into Clash
//! (YAML) or sing-box (JSON) client configurations merged into per-profile
//! templates.
//!
//! Data flow for one request:
//!
//! ```text
//! fetch (cache / upstream) -> document ingestion -> classify + rename
//!   -> dialect merger (clash | singbox) -> group resolution + pruning -> bytes
//! ```
//!
//! The library never aborts on a single bad node; per-node failures travel in
//! [`node::NodeBatch`]. Request-level failures are [`TranscodeError`].

pub mod classify;
pub mod clash;
pub mod config;
pub mod document;
pub mod error;
pub mod fetch;
pub mod groups;
pub mod node;
pub mod pipeline;
pub mod singbox;
pub mod uri;

pub use classify::{is_included, rename, Classifier, RenameRule};
pub use config::TranscoderConfig;
pub use error::{CacheError, NodeError, NodeFailure, TranscodeError, UpstreamError};
pub use fetch::{FetchedDocument, Fetcher};
pub use node::{Bandwidth, Node, NodeBatch, NodeOptions, Protocol};
pub use pipeline::{Rendered, Transcoder};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output configuration format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Clash / mihomo YAML.
    Clash,
    /// sing-box JSON.
    #[serde(rename = "singbox", alias = "sing-box")]
    SingBox,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clash => "clash",
            Self::SingBox => "singbox",
        }
    }

    /// MIME type of the rendered output.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Clash => "text/yaml; charset=utf-8",
            Self::SingBox => "application/json",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "clash" | "mihomo" => Ok(Self::Clash),
            "singbox" | "sing-box" => Ok(Self::SingBox),
            other => Err(format!("unknown dialect: {other}")),
        }
    }
}
