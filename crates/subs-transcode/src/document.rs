//! Upstream document shapes: shape validation and ingestion into
//! canonical [`Node`] records.
//!
//! A Clash document is read as a YAML tree and every `proxies` entry is
//! mapped field by field; keys without a canonical slot are kept in
//! [`Node::extra`]. A URI-list document goes through [`crate::uri`].

use crate::error::{NodeError, NodeFailure, TranscodeError, UpstreamError};
use crate::node::{
    Bandwidth, Hysteria2Options, Node, NodeBatch, NodeOptions, Obfs, OtherOptions, PortRange, RealityOptions,
    ShadowsocksOptions, SsPlugin, TlsOptions, Transport, TrojanOptions, VlessOptions,
};
use crate::uri::{self, ParseOptions};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Literal whose presence marks a usable Clash document.
pub const PROXIES_MARKER: &str = "proxies:";

/// How an upstream source publishes its nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentShape {
    /// Clash YAML with a `proxies` list.
    #[default]
    Clash,
    /// Newline separated node URIs, optionally base64 encoded as a whole.
    UriList,
}

/// Strip a UTF-8 BOM and turn CRLF line endings into LF.
pub fn normalize_text(raw: &str) -> String {
    raw.strip_prefix('\u{feff}').unwrap_or(raw).replace("\r\n", "\n")
}

/// Shape check applied to every fetched body before it may be cached.
pub fn validate(text: &str, shape: DocumentShape) -> Result<(), UpstreamError> {
    let ok = match shape {
        DocumentShape::Clash => text.contains(PROXIES_MARKER),
        DocumentShape::UriList => uri::looks_like_uri_list(text),
    };
    if ok {
        Ok(())
    } else {
        let why = match shape {
            DocumentShape::Clash => format!("missing `{PROXIES_MARKER}` marker"),
            DocumentShape::UriList => "no supported node uri found".to_string(),
        };
        Err(UpstreamError::ValidationFailed(why))
    }
}

/// Ingest a validated document into canonical nodes.
pub fn parse_document(text: &str, shape: DocumentShape, opts: &ParseOptions) -> Result<NodeBatch, TranscodeError> {
    let batch = match shape {
        DocumentShape::Clash => parse_clash_proxies(text, opts)?,
        DocumentShape::UriList => uri::parse_uri_list(&normalize_text(text), opts),
    };
    debug!(nodes = batch.len(), failed = batch.failures.len(), "document ingested");
    Ok(batch)
}

#[derive(Deserialize)]
struct ClashDoc {
    #[serde(default)]
    proxies: Option<Vec<Value>>,
}

/// Read the `proxies` list of a Clash YAML document.
///
/// An unparsable document is [`TranscodeError::DocumentMalformed`]; a bad
/// entry only lands in [`NodeBatch::failures`].
pub fn parse_clash_proxies(text: &str, opts: &ParseOptions) -> Result<NodeBatch, TranscodeError> {
    let doc: ClashDoc =
        serde_yaml::from_str(&normalize_text(text)).map_err(|e| TranscodeError::DocumentMalformed(e.to_string()))?;
    let mut batch = NodeBatch::default();
    for (idx, entry) in doc.proxies.unwrap_or_default().into_iter().enumerate() {
        let origin = entry
            .get("name")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| format!("proxies[{idx}]"));
        let result = match entry {
            Value::Object(map) => node_from_clash(map, opts),
            other => Err(NodeError::Unsupported(format!("non-mapping proxy entry: {other}"))),
        };
        match result {
            Ok(node) => batch.nodes.push(node),
            Err(error) => {
                warn!(proxy = %origin, %error, "skipping proxy entry");
                batch.failures.push(NodeFailure { origin, error });
            }
        }
    }
    Ok(batch)
}

/// Consumes keys out of a proxy mapping; what is left becomes `extra`.
struct Fields {
    map: Map<String, Value>,
    protocol: &'static str,
}

impl Fields {
    fn take(&mut self, key: &str) -> Option<Value> {
        self.map.shift_remove(key).filter(|v| !v.is_null())
    }

    fn string(&mut self, key: &str) -> Option<String> {
        match self.take(key)? {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn require(&mut self, key: &'static str) -> Result<String, NodeError> {
        self.string(key).ok_or_else(|| NodeError::missing(self.protocol, key))
    }

    fn flag(&mut self, key: &str) -> Option<bool> {
        match self.take(key)? {
            Value::Bool(b) => Some(b),
            Value::String(s) => Some(matches!(s.to_ascii_lowercase().as_str(), "true" | "1")),
            Value::Number(n) => Some(n.as_u64() == Some(1)),
            _ => None,
        }
    }

    fn port(&mut self) -> Result<u16, NodeError> {
        let raw = self.string("port").ok_or_else(|| NodeError::missing(self.protocol, "port"))?;
        let parsed = raw.trim().parse::<u16>();
        match parsed {
            Ok(0) | Err(_) => Err(NodeError::invalid(self.protocol, "port", raw)),
            Ok(p) => Ok(p),
        }
    }

    fn sub(&mut self, key: &str) -> Map<String, Value> {
        match self.take(key) {
            Some(Value::Object(m)) => m,
            _ => Map::new(),
        }
    }

    fn list(&mut self, key: &str) -> Vec<String> {
        match self.take(key) {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            Some(Value::String(s)) => s.split(',').map(|x| x.trim().to_string()).filter(|x| !x.is_empty()).collect(),
            _ => Vec::new(),
        }
    }

    fn rate(&mut self, key: &'static str) -> Result<Option<u32>, NodeError> {
        match self.string(key) {
            Some(v) => Bandwidth::parse_rate(&v)
                .map(Some)
                .ok_or_else(|| NodeError::invalid(self.protocol, key, v)),
            None => Ok(None),
        }
    }

    /// `tls`-adjacent keys shared by vless, trojan and hysteria2.
    fn tls(&mut self, enabled: bool, sni_keys: &[&str]) -> TlsOptions {
        let server_name = sni_keys.iter().find_map(|k| self.string(k));
        let fingerprint = self.string("client-fingerprint").or_else(|| self.string("fingerprint"));
        let reality = {
            let mut r = self.sub("reality-opts");
            r.remove("public-key")
                .and_then(|v| v.as_str().map(String::from))
                .map(|public_key| RealityOptions {
                    public_key,
                    short_id: r.remove("short-id").and_then(|v| v.as_str().map(String::from)),
                })
        };
        TlsOptions {
            enabled,
            server_name,
            insecure: self.flag("skip-cert-verify").unwrap_or(false),
            fingerprint,
            alpn: self.list("alpn"),
            reality,
        }
    }

    fn transport(&mut self) -> Option<Transport> {
        let network = self.string("network");
        let mut ws = self.sub("ws-opts");
        let mut grpc = self.sub("grpc-opts");
        match network.as_deref() {
            Some("ws") => {
                let host = match ws.remove("headers") {
                    Some(Value::Object(mut h)) => h
                        .remove("Host")
                        .or_else(|| h.remove("host"))
                        .and_then(|v| v.as_str().map(String::from)),
                    _ => None,
                };
                Some(Transport::Ws {
                    path: ws.remove("path").and_then(|v| v.as_str().map(String::from)),
                    host,
                })
            }
            Some("grpc") => Some(Transport::Grpc {
                service_name: grpc
                    .remove("grpc-service-name")
                    .and_then(|v| v.as_str().map(String::from)),
            }),
            _ => None,
        }
    }
}

/// Map one Clash proxy mapping into a canonical node.
///
/// A hysteria2 entry giving only one of `up`/`down` takes the other side
/// from `opts`.
pub fn node_from_clash(map: Map<String, Value>, opts: &ParseOptions) -> Result<Node, NodeError> {
    let kind = map
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();
    let protocol: &'static str = match kind.as_str() {
        "ss" => "shadowsocks",
        "vless" => "vless",
        "trojan" => "trojan",
        "hysteria2" | "hy2" => "hysteria2",
        "" => return Err(NodeError::missing("proxy", "type")),
        _ => "proxy",
    };
    let mut f = Fields { map, protocol };
    f.take("type");
    let tag = f.require("name")?;
    let server = f.require("server")?;
    let port = f.port()?;
    let udp = f.flag("udp");

    let options = match kind.as_str() {
        "ss" => {
            let method = f.require("cipher")?;
            let password = f.require("password")?;
            let plugin = clash_plugin(&mut f);
            NodeOptions::Shadowsocks(ShadowsocksOptions {
                method,
                password,
                plugin,
            })
        }
        "vless" => {
            let uuid = f.require("uuid")?;
            let tls_on = f.flag("tls").unwrap_or(false);
            let tls = f.tls(true, &["servername", "sni"]);
            NodeOptions::Vless(VlessOptions {
                uuid,
                flow: f.string("flow"),
                packet_encoding: f.string("packet-encoding"),
                tls: (tls_on || tls.reality.is_some()).then_some(tls),
                transport: f.transport(),
            })
        }
        "trojan" => {
            let password = f.require("password")?;
            NodeOptions::Trojan(TrojanOptions {
                password,
                tls: f.tls(true, &["sni", "servername"]),
                transport: f.transport(),
            })
        }
        "hysteria2" | "hy2" => {
            let password = f
                .string("password")
                .or_else(|| f.string("auth"))
                .ok_or_else(|| NodeError::missing(protocol, "password"))?;
            let ports = match f.string("ports") {
                Some(raw) => Some(
                    raw.parse::<PortRange>()
                        .map_err(|e| NodeError::invalid(protocol, "ports", e))?,
                ),
                None => None,
            };
            let up = f.rate("up")?;
            let down = f.rate("down")?;
            let bandwidth = match (up, down) {
                (Some(u), Some(d)) => Some(Bandwidth::new(u, d)),
                (None, None) => None,
                (u, d) => {
                    debug!(proxy = %tag, "hysteria2 entry carries only one of up/down");
                    let fill = opts.hysteria2_bandwidth;
                    Some(Bandwidth::new(u.unwrap_or(fill.up_mbps), d.unwrap_or(fill.down_mbps)))
                }
            };
            let obfs = f.string("obfs").map(|kind| Obfs {
                kind,
                password: f.string("obfs-password"),
            });
            NodeOptions::Hysteria2(Hysteria2Options {
                password,
                ports,
                bandwidth,
                obfs,
                tls: f.tls(true, &["sni", "servername"]),
            })
        }
        _ => NodeOptions::Other(OtherOptions { kind }),
    };

    Ok(Node {
        tag,
        server,
        port,
        udp,
        options,
        extra: f.map,
    })
}

fn clash_plugin(f: &mut Fields) -> Option<SsPlugin> {
    let name = f.string("plugin")?;
    let mut opts = f.sub("plugin-opts");
    let mut get = |k: &str| opts.remove(k).and_then(|v| v.as_str().map(String::from));
    match name.as_str() {
        "obfs" | "simple-obfs" | "obfs-local" => {
            let mode = get("mode").unwrap_or_else(|| "http".to_string());
            Some(SsPlugin::Obfs { mode, host: get("host") })
        }
        "v2ray-plugin" => {
            let mode = get("mode");
            let host = get("host");
            let path = get("path");
            let tls = opts.get("tls").and_then(Value::as_bool).unwrap_or(false);
            Some(SsPlugin::V2ray { mode, host, path, tls })
        }
        other => {
            if !opts.is_empty() {
                f.map.insert("plugin-opts".to_string(), Value::Object(opts));
            }
            Some(SsPlugin::Raw(other.to_string()))
        }
    }
}
