use super::{decode_base64, percent_decode, redact, UriParts};
use crate::error::NodeError;
use crate::node::{Node, NodeOptions, ShadowsocksOptions, SsPlugin};
use serde_json::Map;

const PROTO: &str = "shadowsocks";
const PLACEHOLDER: &str = "Shadowsocks node";

/// Parse `ss://` in SIP002 form (`ss://userinfo@host:port?plugin=..#name`)
/// or the legacy form where everything before `#` is base64.
///
/// The userinfo is base64-decoded first; when that fails or the result has
/// no `method:password` separator, the raw segment is read as
/// `method:password`. No separator in either reading is a parse failure.
pub fn parse_shadowsocks(uri: &str) -> Result<Node, NodeError> {
    let parts = UriParts::split(uri, &["ss://"], PROTO)?;
    let parts = if parts.userinfo.is_none() {
        legacy_form(uri).unwrap_or(parts)
    } else {
        parts
    };

    let raw_user = parts
        .userinfo
        .as_deref()
        .ok_or_else(|| NodeError::missing(PROTO, "userinfo"))?;
    let (method, password) = split_credential(raw_user)
        .ok_or_else(|| NodeError::invalid(PROTO, "userinfo", "no method:password separator"))?;
    if method.is_empty() {
        return Err(NodeError::missing(PROTO, "method"));
    }

    let plugin = parts.query.get("plugin").map(parse_plugin);

    Ok(Node {
        tag: parts.name_or(PLACEHOLDER),
        server: parts.require_host(PROTO)?,
        port: parts.require_port(PROTO)?,
        udp: Some(true),
        options: NodeOptions::Shadowsocks(ShadowsocksOptions {
            method,
            password,
            plugin,
        }),
        extra: Map::new(),
    })
}

fn split_credential(raw: &str) -> Option<(String, String)> {
    let decoded = decode_base64(raw)
        .and_then(|b| String::from_utf8(b).ok())
        .filter(|s| s.contains(':'));
    let text = decoded.unwrap_or_else(|| percent_decode(raw));
    text.split_once(':')
        .map(|(m, p)| (m.to_string(), p.to_string()))
}

/// `ss://BASE64(method:password@host:port)#name`
fn legacy_form(uri: &str) -> Option<UriParts> {
    let body = uri.strip_prefix("ss://")?;
    let (body, fragment) = match body.split_once('#') {
        Some((b, f)) => (b, Some(f)),
        None => (body, None),
    };
    let decoded = String::from_utf8(decode_base64(body)?).ok()?;
    let rebuilt = match fragment {
        Some(f) => format!("ss://{decoded}#{f}"),
        None => format!("ss://{decoded}"),
    };
    let parts = UriParts::split(&rebuilt, &["ss://"], PROTO).ok()?;
    tracing::debug!(uri = %redact(uri), "decoded legacy shadowsocks uri");
    parts.userinfo.is_some().then_some(parts)
}

/// `simple-obfs;obfs=http;obfs-host=..`, `v2ray-plugin;mode=..;host=..;path=..;tls`.
fn parse_plugin(info: &str) -> SsPlugin {
    let mut fields = info.split(';').map(str::trim);
    let name = fields.next().unwrap_or_default();
    let mut kv = Vec::new();
    let mut tls = false;
    for part in fields {
        match part.split_once('=') {
            Some((k, v)) => kv.push((k, v)),
            None if part == "tls" => tls = true,
            None => {}
        }
    }
    let get = |key: &str| kv.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string());

    if name.contains("simple-obfs") || name.contains("obfs-local") {
        if let Some(mode) = get("obfs") {
            return SsPlugin::Obfs {
                mode,
                host: get("obfs-host"),
            };
        }
    } else if name.contains("v2ray-plugin") {
        return SsPlugin::V2ray {
            mode: get("mode"),
            host: get("host"),
            path: get("path"),
            tls,
        };
    }
    SsPlugin::Raw(info.to_string())
}
