//! Error taxonomy for the transcoder.
//!
//! Per-node failures ([`NodeError`]) are collected next to the nodes that did
//! parse; upstream failures ([`UpstreamError`]) degrade to cached data inside
//! the fetch layer. Only [`TranscodeError`] aborts a request.

use std::path::PathBuf;
use thiserror::Error;

/// A single endpoint could not be turned into a canonical node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// The scheme prefix is missing or not the expected one.
    #[error("malformed uri: {0}")]
    MalformedUri(String),
    /// Host, port or the protocol credential could not be extracted.
    #[error("{protocol}: missing field `{field}`")]
    MissingField {
        protocol: &'static str,
        field: &'static str,
    },
    /// A field is present but does not hold a usable value.
    #[error("{protocol}: invalid `{field}`: {value}")]
    InvalidValue {
        protocol: &'static str,
        field: &'static str,
        value: String,
    },
    /// The entry is well formed but of a kind this dialect cannot express.
    #[error("unsupported node type: {0}")]
    Unsupported(String),
}

impl NodeError {
    pub(crate) fn missing(protocol: &'static str, field: &'static str) -> Self {
        Self::MissingField { protocol, field }
    }

    pub(crate) fn invalid(protocol: &'static str, field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            protocol,
            field,
            value: value.into(),
        }
    }
}

/// A failed node together with where it came from (URI line or proxy name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub origin: String,
    pub error: NodeError,
}

/// Why one upstream attempt did not produce a usable document.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream returned http {0}")]
    Status(u16),
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("document failed shape validation: {0}")]
    ValidationFailed(String),
}

/// Cache store failures. Reads that fail are treated like a missing entry.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache metadata encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid source key: {0:?}")]
    InvalidKey(String),
}

/// Fatal, request-level failures surfaced to the dispatcher.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("source {source_key}: upstream unavailable and no cached copy ({reason})")]
    UpstreamUnavailable { source_key: String, reason: String },
    #[error("template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),
    #[error("template {} is malformed: {reason}", .path.display())]
    TemplateMalformed { path: PathBuf, reason: String },
    #[error("upstream document is malformed: {0}")]
    DocumentMalformed(String),
    #[error("no nodes matched (document had {total} entries)")]
    NoNodesMatched { total: usize },
    #[error("unknown source: {0}")]
    UnknownSource(String),
    #[error("no profile matches {0:?}")]
    UnknownProfile(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("serialize output: {0}")]
    Serialize(String),
}

impl TranscodeError {
    /// Malformed template handed over in memory rather than read from disk.
    pub(crate) fn inline_template(reason: String) -> Self {
        Self::TemplateMalformed {
            path: PathBuf::from("<inline>"),
            reason,
        }
    }

    /// Stable machine-readable kind used in the error payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::TemplateNotFound(_) => "template_not_found",
            Self::TemplateMalformed { .. } => "template_malformed",
            Self::DocumentMalformed(_) => "document_malformed",
            Self::NoNodesMatched { .. } => "no_nodes_matched",
            Self::UnknownSource(_) => "unknown_source",
            Self::UnknownProfile(_) => "unknown_profile",
            Self::Cache(_) => "cache",
            Self::Serialize(_) => "serialize",
        }
    }

    /// HTTP-style status the dispatcher should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownSource(_) | Self::UnknownProfile(_) => 404,
            Self::UpstreamUnavailable { .. } => 503,
            Self::DocumentMalformed(_) | Self::NoNodesMatched { .. } => 502,
            Self::TemplateNotFound(_)
            | Self::TemplateMalformed { .. }
            | Self::Cache(_)
            | Self::Serialize(_) => 500,
        }
    }

    /// Structured payload: `{"error": kind, "message": text}`.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        })
    }
}
