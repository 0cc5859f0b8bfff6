//! Node URI parsers.
//!
//! One parser per scheme, each a pure function from a URI string to a
//! canonical [`Node`]. Shared pieces live here: splitting a URI into
//! userinfo / host / port / query / fragment, percent decoding, and the
//! lenient base64 decoder subscription feeds need.

mod hysteria2;
mod shadowsocks;
mod trojan;
mod vless;

pub use hysteria2::{parse_hysteria2, port_hopping_range};
pub use shadowsocks::parse_shadowsocks;
pub use trojan::parse_trojan;
pub use vless::parse_vless;

use crate::error::{NodeError, NodeFailure};
use crate::node::{Bandwidth, Node, NodeBatch, NodeOptions, SsPlugin, TlsOptions, Transport};
use crate::Dialect;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use std::borrow::Cow;
use tracing::warn;

/// Schemes recognised in URI-list subscriptions.
pub const SUPPORTED_SCHEMES: [&str; 5] = ["ss://", "vless://", "trojan://", "hysteria2://", "hy2://"];

/// Per-dialect defaults the parsers need. Callers pick them explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Enable TLS on VLESS nodes even without `security=tls|reality`.
    pub vless_tls_default: bool,
    /// Hysteria2 bandwidth when the URI carries no `up`/`down` override.
    pub hysteria2_bandwidth: Bandwidth,
}

impl ParseOptions {
    /// Defaults used when rendering for `dialect`.
    pub const fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Clash => Self {
                vless_tls_default: true,
                hysteria2_bandwidth: Bandwidth::new(40, 200),
            },
            Dialect::SingBox => Self {
                vless_tls_default: false,
                hysteria2_bandwidth: Bandwidth::new(20, 40),
            },
        }
    }

    /// Replace the hysteria2 bandwidth default, e.g. with a profile's.
    pub fn with_hysteria2_bandwidth(mut self, bandwidth: Bandwidth) -> Self {
        self.hysteria2_bandwidth = bandwidth;
        self
    }
}

/// Parse any supported URI, dispatching on its scheme.
pub fn parse(uri: &str, opts: &ParseOptions) -> Result<Node, NodeError> {
    let uri = uri.trim();
    if uri.starts_with("ss://") {
        parse_shadowsocks(uri)
    } else if uri.starts_with("vless://") {
        parse_vless(uri, opts)
    } else if uri.starts_with("trojan://") {
        parse_trojan(uri)
    } else if uri.starts_with("hysteria2://") || uri.starts_with("hy2://") {
        parse_hysteria2(uri, opts)
    } else {
        Err(NodeError::MalformedUri(redact(uri)))
    }
}

/// Parse a URI-list subscription body (base64 or plain text).
///
/// Lines with an unknown scheme are skipped silently; lines with a known
/// scheme that fail to parse are reported in [`NodeBatch::failures`].
pub fn parse_uri_list(body: &str, opts: &ParseOptions) -> NodeBatch {
    let text = decode_subscription(body);
    let mut batch = NodeBatch::default();
    for line in text.lines().map(str::trim) {
        if !SUPPORTED_SCHEMES.iter().any(|s| line.starts_with(s)) {
            continue;
        }
        match parse(line, opts) {
            Ok(node) => batch.nodes.push(node),
            Err(error) => {
                warn!(uri = %redact(line), %error, "skipping unparsable node uri");
                batch.failures.push(NodeFailure {
                    origin: redact(line),
                    error,
                });
            }
        }
    }
    batch
}

/// True when `body` (decoded if needed) holds at least one supported URI line.
pub fn looks_like_uri_list(body: &str) -> bool {
    decode_subscription(body)
        .lines()
        .any(|l| SUPPORTED_SCHEMES.iter().any(|s| l.trim().starts_with(s)))
}

/// Decode a base64 subscription body; plain bodies pass through unchanged.
fn decode_subscription(body: &str) -> Cow<'_, str> {
    let trimmed = body.trim();
    if SUPPORTED_SCHEMES.iter().any(|s| trimmed.contains(s)) {
        return Cow::Borrowed(trimmed);
    }
    let compact: String = trimmed.split_whitespace().collect();
    match decode_base64(&compact).and_then(|b| String::from_utf8(b).ok()) {
        Some(s) => Cow::Owned(s),
        None => Cow::Borrowed(trimmed),
    }
}

/// Base64 decode accepting standard or URL-safe alphabets, padding optional.
pub(crate) fn decode_base64(input: &str) -> Option<Vec<u8>> {
    let s = input.trim().trim_end_matches('=');
    if s.is_empty() {
        return None;
    }
    STANDARD_NO_PAD
        .decode(s)
        .or_else(|_| URL_SAFE_NO_PAD.decode(s))
        .ok()
}

pub(crate) fn percent_decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| s.to_string())
}

/// Keeps scheme and host, drops credentials before logging.
pub(crate) fn redact(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(s), Some(at)) if at > s => format!("{}://***{}", &uri[..s], &uri[at..]),
        _ => uri.chars().take(64).collect(),
    }
}

/// Query string with `parse_qs` semantics: `+` is a space, the first
/// non-empty value of a key wins, blank values count as absent.
#[derive(Debug, Default)]
pub(crate) struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    fn parse(raw: &str) -> Self {
        let pairs = raw
            .split('&')
            .filter(|p| !p.is_empty())
            .filter_map(|p| {
                let (k, v) = p.split_once('=').unwrap_or((p, ""));
                let v = percent_decode(&v.replace('+', " "));
                if v.is_empty() {
                    None
                } else {
                    Some((percent_decode(k), v))
                }
            })
            .collect();
        Self { pairs }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First key of `keys` that is present.
    pub(crate) fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub(crate) fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true"))
    }

    pub(crate) fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// `scheme://[userinfo@]host[:port][/path][?query][#fragment]`, split.
#[derive(Debug)]
pub(crate) struct UriParts {
    pub userinfo: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub query: Query,
    pub name: Option<String>,
}

impl UriParts {
    /// Split `uri` after checking it starts with one of `schemes`.
    pub(crate) fn split(uri: &str, schemes: &[&str], protocol: &'static str) -> Result<Self, NodeError> {
        let rest = schemes
            .iter()
            .find_map(|s| uri.strip_prefix(s))
            .ok_or_else(|| NodeError::MalformedUri(redact(uri)))?;

        let (rest, name) = match rest.rfind('#') {
            Some(idx) => {
                let n = percent_decode(&rest[idx + 1..]);
                (&rest[..idx], if n.is_empty() { None } else { Some(n) })
            }
            None => (rest, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((a, q)) => (a, Query::parse(q)),
            None => (rest, Query::default()),
        };
        let authority = rest.split('/').next().unwrap_or_default();
        let (userinfo, hostport) = match authority.rsplit_once('@') {
            Some((u, h)) => (Some(u), h),
            None => (None, authority),
        };
        let (host, port) = split_host_port(hostport, protocol)?;

        Ok(Self {
            userinfo: userinfo.filter(|u| !u.is_empty()).map(String::from),
            host,
            port,
            query,
            name,
        })
    }

    pub(crate) fn require_host(&self, protocol: &'static str) -> Result<String, NodeError> {
        self.host.clone().ok_or_else(|| NodeError::missing(protocol, "server"))
    }

    pub(crate) fn require_port(&self, protocol: &'static str) -> Result<u16, NodeError> {
        self.port.ok_or_else(|| NodeError::missing(protocol, "port"))
    }

    /// Percent-decoded userinfo, required.
    pub(crate) fn require_user(&self, protocol: &'static str, field: &'static str) -> Result<String, NodeError> {
        self.userinfo
            .as_deref()
            .map(percent_decode)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| NodeError::missing(protocol, field))
    }

    pub(crate) fn name_or(&self, placeholder: &str) -> String {
        self.name.clone().unwrap_or_else(|| placeholder.to_string())
    }

    /// `type=ws|grpc` transport; anything else is plain TCP.
    pub(crate) fn transport(&self) -> Option<Transport> {
        match self.query.get("type") {
            Some("ws") => Some(Transport::Ws {
                path: self.query.get("path").map(String::from),
                host: self.query.get("host").map(String::from),
            }),
            Some("grpc") => Some(Transport::Grpc {
                service_name: self.query.get("serviceName").map(String::from),
            }),
            _ => None,
        }
    }

    /// TLS block seeded from the common `sni`/`fp`/`alpn` parameters.
    pub(crate) fn tls(&self, enabled: bool) -> TlsOptions {
        TlsOptions {
            enabled,
            server_name: self.query.get("sni").map(String::from),
            insecure: false,
            fingerprint: self.query.get("fp").map(String::from),
            alpn: self.query.list("alpn"),
            reality: None,
        }
    }
}

fn split_host_port(hostport: &str, protocol: &'static str) -> Result<(Option<String>, Option<u16>), NodeError> {
    let (host, port) = if let Some(rest) = hostport.strip_prefix('[') {
        // [v6]:port
        match rest.split_once(']') {
            Some((h, p)) => (h, p.strip_prefix(':')),
            None => return Err(NodeError::invalid(protocol, "server", hostport)),
        }
    } else {
        match hostport.rsplit_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (hostport, None),
        }
    };
    let port = match port.filter(|p| !p.is_empty()) {
        Some(p) => match p.parse::<u16>() {
            Ok(0) => None,
            Ok(n) => Some(n),
            Err(_) => return Err(NodeError::invalid(protocol, "port", p)),
        },
        None => None,
    };
    let host = Some(host.to_ascii_lowercase()).filter(|h| !h.is_empty());
    Ok((host, port))
}

/// Render the identifying fields of `node` back into a URI of its scheme.
///
/// Only the fields the parsers read are written, so parsing the result
/// yields a node with the same identity, transport and TLS settings.
pub fn to_uri(node: &Node) -> Option<String> {
    let host = if node.server.contains(':') {
        format!("[{}]", node.server)
    } else {
        node.server.clone()
    };
    let tag = urlencoding::encode(&node.tag);
    let mut q: Vec<(String, String)> = Vec::new();
    let (scheme, user) = match &node.options {
        NodeOptions::Shadowsocks(o) => {
            let user = URL_SAFE_NO_PAD.encode(format!("{}:{}", o.method, o.password));
            if let Some(p) = &o.plugin {
                q.push(("plugin".into(), plugin_string(p)));
            }
            ("ss", user)
        }
        NodeOptions::Vless(o) => {
            if let Some(tls) = &o.tls {
                let security = if tls.reality.is_some() { "reality" } else if tls.enabled { "tls" } else { "none" };
                q.push(("security".into(), security.into()));
                push_tls(&mut q, tls);
                if tls.insecure {
                    q.push(("allowInsecure".into(), "1".into()));
                }
                if let Some(r) = &tls.reality {
                    q.push(("pbk".into(), r.public_key.clone()));
                    if let Some(sid) = &r.short_id {
                        q.push(("sid".into(), sid.clone()));
                    }
                }
            }
            if let Some(flow) = &o.flow {
                q.push(("flow".into(), flow.clone()));
            }
            if let Some(pe) = o.packet_encoding.as_deref().filter(|pe| *pe != "xudp") {
                q.push(("packetEncoding".into(), pe.to_string()));
            }
            push_transport(&mut q, o.transport.as_ref());
            ("vless", o.uuid.clone())
        }
        NodeOptions::Trojan(o) => {
            push_tls(&mut q, &o.tls);
            if !o.tls.insecure {
                q.push(("allowInsecure".into(), "0".into()));
            }
            push_transport(&mut q, o.transport.as_ref());
            ("trojan", o.password.clone())
        }
        NodeOptions::Hysteria2(o) => {
            push_tls(&mut q, &o.tls);
            if o.tls.insecure {
                q.push(("insecure".into(), "1".into()));
            }
            if let Some(obfs) = &o.obfs {
                q.push(("obfs".into(), obfs.kind.clone()));
                if let Some(pw) = &obfs.password {
                    q.push(("obfs-password".into(), pw.clone()));
                }
            }
            if let Some(bw) = o.bandwidth {
                q.push(("upmbps".into(), bw.up_mbps.to_string()));
                q.push(("downmbps".into(), bw.down_mbps.to_string()));
            }
            ("hysteria2", o.password.clone())
        }
        NodeOptions::Other(_) => return None,
    };
    let query = q
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let user = urlencoding::encode(&user);
    let sep = if query.is_empty() { "" } else { "?" };
    Some(format!("{scheme}://{user}@{host}:{}{sep}{query}#{tag}", node.port))
}

fn push_tls(q: &mut Vec<(String, String)>, tls: &TlsOptions) {
    if let Some(sni) = &tls.server_name {
        q.push(("sni".into(), sni.clone()));
    }
    if let Some(fp) = &tls.fingerprint {
        q.push(("fp".into(), fp.clone()));
    }
    if !tls.alpn.is_empty() {
        q.push(("alpn".into(), tls.alpn.join(",")));
    }
}

fn push_transport(q: &mut Vec<(String, String)>, transport: Option<&Transport>) {
    match transport {
        Some(Transport::Ws { path, host }) => {
            q.push(("type".into(), "ws".into()));
            if let Some(p) = path {
                q.push(("path".into(), p.clone()));
            }
            if let Some(h) = host {
                q.push(("host".into(), h.clone()));
            }
        }
        Some(Transport::Grpc { service_name }) => {
            q.push(("type".into(), "grpc".into()));
            if let Some(s) = service_name {
                q.push(("serviceName".into(), s.clone()));
            }
        }
        None => {}
    }
}

fn plugin_string(p: &SsPlugin) -> String {
    match p {
        SsPlugin::Obfs { mode, host } => {
            let mut s = format!("obfs-local;obfs={mode}");
            if let Some(h) = host {
                s.push_str(&format!(";obfs-host={h}"));
            }
            s
        }
        SsPlugin::V2ray { mode, host, path, tls } => {
            let mut parts = vec!["v2ray-plugin".to_string()];
            if let Some(m) = mode {
                parts.push(format!("mode={m}"));
            }
            if let Some(h) = host {
                parts.push(format!("host={h}"));
            }
            if let Some(p) = path {
                parts.push(format!("path={p}"));
            }
            if *tls {
                parts.push("tls".into());
            }
            parts.join(";")
        }
        SsPlugin::Raw(s) => s.clone(),
    }
}
