//! One request, end to end: profile selection, fetch, ingestion,
//! classification, merge.

use crate::classify::Classifier;
use crate::config::{InjectConfig, ProfileConfig, TranscoderConfig};
use crate::document::{self, DocumentShape};
use crate::error::{NodeFailure, TranscodeError, UpstreamError};
use crate::fetch::{FetchOrigin, FetchedDocument, Fetcher, FsCacheStore, HeaderSubset, ReqwestUpstream};
use crate::groups::{Injection, MergeOptions};
use crate::node::Node;
use crate::uri::ParseOptions;
use crate::{clash, singbox, Dialect};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rendered configuration plus what the dispatcher forwards with it.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub body: Vec<u8>,
    /// Allow-listed upstream headers.
    pub headers: HeaderSubset,
    pub dialect: Dialect,
    pub profile: String,
    pub origin: FetchOrigin,
    /// Entries that could not be parsed; the rest were rendered.
    pub failures: Vec<NodeFailure>,
}

impl Rendered {
    pub fn content_type(&self) -> &'static str {
        self.dialect.content_type()
    }

    /// Suggested download name.
    pub fn file_name(&self) -> &'static str {
        match self.dialect {
            Dialect::Clash => "config.yaml",
            Dialect::SingBox => "config.json",
        }
    }
}

/// Read a template for `dialect`; the root must be a mapping and the group
/// list (`proxy-groups` or `outbounds`), when present, a list.
pub fn load_template(path: &Path, dialect: Dialect) -> Result<Map<String, Value>, TranscodeError> {
    let text = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => TranscodeError::TemplateNotFound(path.to_path_buf()),
        _ => TranscodeError::TemplateMalformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    })?;
    let malformed = |reason: String| TranscodeError::TemplateMalformed {
        path: path.to_path_buf(),
        reason,
    };
    let root: Value = match dialect {
        Dialect::Clash => serde_yaml::from_str(&text).map_err(|e| malformed(e.to_string()))?,
        Dialect::SingBox => serde_json::from_str(&text).map_err(|e| malformed(e.to_string()))?,
    };
    let Value::Object(root) = root else {
        return Err(malformed("root is not a mapping".into()));
    };
    let list_key = match dialect {
        Dialect::Clash => clash::GROUPS,
        Dialect::SingBox => singbox::OUTBOUNDS,
    };
    match root.get(list_key) {
        None | Some(Value::Array(_)) => Ok(root),
        Some(_) => Err(malformed(format!("`{list_key}` is not a list"))),
    }
}

/// Custom nodes from a Clash YAML file holding one proxy mapping or a list.
/// A missing file means no custom nodes.
pub fn load_custom_nodes(path: &Path, opts: &ParseOptions) -> Result<Vec<Node>, TranscodeError> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no custom node file");
            return Ok(Vec::new());
        }
        Err(e) => return Err(TranscodeError::DocumentMalformed(format!("{}: {e}", path.display()))),
    };
    let wrapped = match serde_yaml::from_str::<Value>(&text) {
        Ok(Value::Array(list)) => Value::Array(list),
        Ok(Value::Null) => return Ok(Vec::new()),
        Ok(single) => Value::Array(vec![single]),
        Err(e) => return Err(TranscodeError::DocumentMalformed(format!("{}: {e}", path.display()))),
    };
    let doc = serde_yaml::to_string(&serde_json::json!({ "proxies": wrapped }))
        .map_err(|e| TranscodeError::Serialize(e.to_string()))?;
    Ok(document::parse_clash_proxies(&doc, opts)?.nodes)
}

/// Native sing-box outbounds from a JSON file holding one object or a list.
/// A missing file means none; non-object entries are skipped.
pub fn load_custom_outbounds(path: &Path) -> Result<Vec<Map<String, Value>>, TranscodeError> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no custom outbound file");
            return Ok(Vec::new());
        }
        Err(e) => return Err(TranscodeError::DocumentMalformed(format!("{}: {e}", path.display()))),
    };
    let list = match serde_json::from_str::<Value>(&text) {
        Ok(Value::Array(list)) => list,
        Ok(Value::Null) => Vec::new(),
        Ok(single) => vec![single],
        Err(e) => return Err(TranscodeError::DocumentMalformed(format!("{}: {e}", path.display()))),
    };
    Ok(list
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(m) => Some(m),
            other => {
                warn!(path = %path.display(), entry = %other, "non-object custom outbound skipped");
                None
            }
        })
        .collect())
}

/// Pure merge step: document text to rendered bytes.
///
/// Given the same inputs it returns the same bytes, whether `text` came
/// from upstream or from the cache.
pub fn render(
    text: &str,
    shape: DocumentShape,
    dialect: Dialect,
    template: Map<String, Value>,
    classifier: &Classifier,
    opts: &MergeOptions,
) -> Result<(Vec<u8>, Vec<NodeFailure>), TranscodeError> {
    let parse_opts = ParseOptions::for_dialect(dialect).with_hysteria2_bandwidth(opts.bandwidth);
    let batch = document::parse_document(text, shape, &parse_opts)?;
    let total = batch.total();
    if batch.nodes.is_empty() {
        return Err(TranscodeError::NoNodesMatched { total });
    }
    let failures = batch.failures;
    let nodes = classifier.select(batch.nodes)?;
    let body = match dialect {
        Dialect::Clash => clash::merge(nodes, template, opts)?,
        Dialect::SingBox => singbox::merge(nodes, template, opts)?,
    };
    Ok((body, failures))
}

/// Owns the configuration and the fetch-cache layer.
pub struct Transcoder {
    config: TranscoderConfig,
    fetcher: Fetcher,
}

impl Transcoder {
    pub fn new(config: TranscoderConfig, fetcher: Fetcher) -> Self {
        Self { config, fetcher }
    }

    /// Filesystem cache under `cache_dir` and a reqwest upstream client.
    pub fn from_config(config: TranscoderConfig) -> Result<Self, UpstreamError> {
        let upstream = Arc::new(ReqwestUpstream::new(&config.http)?);
        let store = Arc::new(FsCacheStore::new(config.cache_dir.clone()));
        let fetcher = Fetcher::new(upstream, store, config.http.forward_headers.clone());
        Ok(Self::new(config, fetcher))
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn select_profile(&self, user_agent: &str) -> Result<&ProfileConfig, TranscodeError> {
        self.config
            .select_profile(user_agent)
            .ok_or_else(|| TranscodeError::UnknownProfile(user_agent.to_string()))
    }

    pub fn profile(&self, name: &str) -> Result<&ProfileConfig, TranscodeError> {
        self.config
            .profile(name)
            .ok_or_else(|| TranscodeError::UnknownProfile(name.to_string()))
    }

    /// Fetch (or serve from cache) the document of `source_key`.
    pub async fn fetch(&self, source_key: &str, force_refresh: bool) -> Result<(FetchedDocument, DocumentShape), TranscodeError> {
        let source = self
            .config
            .sources
            .get(source_key)
            .ok_or_else(|| TranscodeError::UnknownSource(source_key.to_string()))?;
        let url = source.resolve_url().map_err(|e| TranscodeError::UpstreamUnavailable {
            source_key: source_key.to_string(),
            reason: e.to_string(),
        })?;
        let doc = self
            .fetcher
            .fetch_document(source_key, &url, source.shape, force_refresh, self.config.freshness())
            .await?;
        Ok((doc, source.shape))
    }

    /// Pick the profile whose signature appears in `user_agent`, then
    /// [`Transcoder::transcode`].
    pub async fn transcode_for_client(
        &self,
        source_key: &str,
        user_agent: &str,
        force_refresh: bool,
    ) -> Result<Rendered, TranscodeError> {
        let profile = self.select_profile(user_agent)?.name.clone();
        self.transcode(source_key, &profile, force_refresh).await
    }

    pub async fn transcode(&self, source_key: &str, profile_name: &str, force_refresh: bool) -> Result<Rendered, TranscodeError> {
        let profile = self.profile(profile_name)?;
        if !self.config.sources.contains_key(source_key) {
            return Err(TranscodeError::UnknownSource(source_key.to_string()));
        }
        info!(
            source = source_key,
            profile = %profile.name,
            dialect = %profile.dialect,
            force = force_refresh,
            "transcode request"
        );
        let template = load_template(&profile.template, profile.dialect)?;
        let (doc, shape) = self.fetch(source_key, force_refresh).await?;
        let opts = self.merge_options(profile);

        let (body, failures) = render(&doc.text, shape, profile.dialect, template, &self.config.classify, &opts)?;
        if !failures.is_empty() {
            warn!(source = source_key, failed = failures.len(), "some nodes could not be parsed");
        }
        Ok(Rendered {
            body,
            headers: doc.headers,
            dialect: profile.dialect,
            profile: profile.name.clone(),
            origin: doc.origin,
            failures,
        })
    }

    fn merge_options(&self, profile: &ProfileConfig) -> MergeOptions {
        let mut opts = MergeOptions::new(profile.bandwidth);
        opts.fingerprint = self.config.fingerprint.clone();
        if profile.inject {
            if let Some(inj) = &self.config.inject {
                match self.load_injection(profile, inj) {
                    Ok(injection) if !injection.nodes.is_empty() || !injection.outbounds.is_empty() => {
                        opts.injection = Some(injection);
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%error, "custom nodes not injected"),
                }
            }
        }
        opts
    }

    /// sing-box profiles prefer native outbounds; everything else reads the
    /// Clash node file.
    fn load_injection(&self, profile: &ProfileConfig, inj: &InjectConfig) -> Result<Injection, TranscodeError> {
        let mut injection = Injection {
            target_groups: inj.target_groups.clone(),
            ..Injection::default()
        };
        match (profile.dialect, &inj.singbox_path, &inj.path) {
            (Dialect::SingBox, Some(native), _) => injection.outbounds = load_custom_outbounds(native)?,
            (_, _, Some(path)) => {
                let opts = ParseOptions::for_dialect(profile.dialect).with_hysteria2_bandwidth(profile.bandwidth);
                injection.nodes = load_custom_nodes(path, &opts)?;
            }
            _ => {}
        }
        Ok(injection)
    }
}
