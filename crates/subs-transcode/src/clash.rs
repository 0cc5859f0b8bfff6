//! Clash (YAML) dialect: node rendering and template merge.

use crate::error::TranscodeError;
use crate::groups::{self, Group, MergeOptions};
use crate::node::{Node, NodeOptions, SsPlugin, TlsOptions, Transport};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Synthetic DNS passthrough entry appended to every proxy list.
pub const DNS_PASSTHROUGH: &str = "dns-out";

const PROXIES: &str = "proxies";
pub(crate) const GROUPS: &str = "proxy-groups";

/// Dialect-specific field fixes applied to every classified node.
///
/// Hysteria2 gets the caller's bandwidth unless it already has one; VLESS
/// gets `xudp` packet encoding and the forced fingerprint. Both verify
/// certificates. Typed nodes relay UDP.
pub fn normalize(node: &mut Node, opts: &MergeOptions) {
    match &mut node.options {
        NodeOptions::Hysteria2(o) => {
            o.bandwidth.get_or_insert(opts.bandwidth);
            o.tls.insecure = false;
        }
        NodeOptions::Vless(o) => {
            o.packet_encoding = Some("xudp".to_string());
            if let Some(tls) = o.tls.as_mut() {
                tls.insecure = false;
                tls.fingerprint = Some(opts.fingerprint.clone());
            }
        }
        NodeOptions::Other(_) => return,
        _ => {}
    }
    node.udp = Some(true);
}

/// Render one node as a Clash proxy mapping.
pub fn render_proxy(node: &Node) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("name".into(), node.tag.clone().into());
    let kind = match &node.options {
        NodeOptions::Shadowsocks(_) => "ss",
        NodeOptions::Vless(_) => "vless",
        NodeOptions::Trojan(_) => "trojan",
        NodeOptions::Hysteria2(_) => "hysteria2",
        NodeOptions::Other(o) => o.kind.as_str(),
    };
    m.insert("type".into(), kind.into());
    m.insert("server".into(), node.server.clone().into());
    m.insert("port".into(), node.port.into());
    if let Some(udp) = node.udp {
        m.insert("udp".into(), udp.into());
    }

    match &node.options {
        NodeOptions::Shadowsocks(o) => {
            m.insert("cipher".into(), o.method.clone().into());
            m.insert("password".into(), o.password.clone().into());
            match &o.plugin {
                Some(SsPlugin::Obfs { mode, host }) => {
                    m.insert("plugin".into(), "obfs".into());
                    let mut po = Map::new();
                    po.insert("mode".into(), mode.clone().into());
                    put_opt(&mut po, "host", host);
                    m.insert("plugin-opts".into(), po.into());
                }
                Some(SsPlugin::V2ray { mode, host, path, tls }) => {
                    m.insert("plugin".into(), "v2ray-plugin".into());
                    let mut po = Map::new();
                    po.insert("mode".into(), mode.clone().unwrap_or_else(|| "websocket".into()).into());
                    put_opt(&mut po, "host", host);
                    put_opt(&mut po, "path", path);
                    if *tls {
                        po.insert("tls".into(), true.into());
                    }
                    m.insert("plugin-opts".into(), po.into());
                }
                Some(SsPlugin::Raw(name)) => {
                    m.insert("plugin".into(), name.clone().into());
                }
                None => {}
            }
        }
        NodeOptions::Vless(o) => {
            m.insert("uuid".into(), o.uuid.clone().into());
            put_opt(&mut m, "flow", &o.flow);
            put_opt(&mut m, "packet-encoding", &o.packet_encoding);
            m.insert("tls".into(), o.tls.as_ref().is_some_and(|t| t.enabled).into());
            if let Some(tls) = &o.tls {
                put_tls(&mut m, tls, "servername");
            }
            put_transport(&mut m, o.transport.as_ref());
        }
        NodeOptions::Trojan(o) => {
            m.insert("password".into(), o.password.clone().into());
            put_tls(&mut m, &o.tls, "sni");
            put_transport(&mut m, o.transport.as_ref());
        }
        NodeOptions::Hysteria2(o) => {
            m.insert("password".into(), o.password.clone().into());
            if let Some(ports) = o.ports {
                m.insert("ports".into(), ports.to_string().into());
            }
            if let Some(bw) = o.bandwidth {
                m.insert("up".into(), format!("{} Mbps", bw.up_mbps).into());
                m.insert("down".into(), format!("{} Mbps", bw.down_mbps).into());
            }
            if let Some(obfs) = &o.obfs {
                m.insert("obfs".into(), obfs.kind.clone().into());
                put_opt(&mut m, "obfs-password", &obfs.password);
            }
            put_tls(&mut m, &o.tls, "sni");
        }
        NodeOptions::Other(_) => {}
    }

    for (k, v) in &node.extra {
        if !m.contains_key(k) {
            m.insert(k.clone(), v.clone());
        }
    }
    m
}

fn put_opt(m: &mut Map<String, Value>, key: &str, v: &Option<String>) {
    if let Some(v) = v {
        m.insert(key.to_string(), v.clone().into());
    }
}

fn put_tls(m: &mut Map<String, Value>, tls: &TlsOptions, sni_key: &str) {
    put_opt(m, sni_key, &tls.server_name);
    m.insert("skip-cert-verify".into(), tls.insecure.into());
    put_opt(m, "client-fingerprint", &tls.fingerprint);
    if !tls.alpn.is_empty() {
        m.insert("alpn".into(), tls.alpn.clone().into());
    }
    if let Some(r) = &tls.reality {
        let mut ro = Map::new();
        ro.insert("public-key".into(), r.public_key.clone().into());
        put_opt(&mut ro, "short-id", &r.short_id);
        m.insert("reality-opts".into(), ro.into());
    }
}

fn put_transport(m: &mut Map<String, Value>, transport: Option<&Transport>) {
    let Some(t) = transport else { return };
    m.insert("network".into(), t.network().into());
    match t {
        Transport::Ws { path, host } => {
            let mut wo = Map::new();
            put_opt(&mut wo, "path", path);
            if let Some(h) = host {
                wo.insert("headers".into(), json!({ "Host": h }));
            }
            if !wo.is_empty() {
                m.insert("ws-opts".into(), wo.into());
            }
        }
        Transport::Grpc { service_name } => {
            if let Some(s) = service_name {
                m.insert("grpc-opts".into(), json!({ "grpc-service-name": s }));
            }
        }
    }
}

/// Split `proxy-groups` into resolvable groups. Entries without a name are
/// dropped.
fn extract_groups(list: Vec<Value>) -> Vec<Group> {
    list.into_iter()
        .filter_map(|v| {
            let Value::Object(mut body) = v else {
                warn!("non-mapping proxy group skipped");
                return None;
            };
            let Some(name) = body.get("name").and_then(Value::as_str).map(String::from) else {
                warn!("proxy group without name skipped");
                return None;
            };
            let members = string_list(body.get(PROXIES));
            let patterns = body.shift_remove("filter").and_then(|f| match f {
                Value::String(s) => Some(vec![s]),
                Value::Array(items) => Some(items.iter().filter_map(|i| i.as_str().map(String::from)).collect()),
                _ => None,
            });
            if patterns.is_some() {
                body.shift_remove("include-all-proxies");
                body.shift_remove("include-all");
            }
            Some(Group {
                name,
                members,
                patterns,
                body,
            })
        })
        .collect()
}

pub(crate) fn string_list(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| match i {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Merge classified `nodes` into a Clash `template` and serialize it.
pub fn merge(nodes: Vec<Node>, mut template: Map<String, Value>, opts: &MergeOptions) -> Result<Vec<u8>, TranscodeError> {
    if nodes.is_empty() {
        return Err(TranscodeError::NoNodesMatched { total: 0 });
    }
    let mut nodes = nodes;
    for n in &mut nodes {
        normalize(n, opts);
    }
    let tags: Vec<String> = nodes.iter().map(|n| n.tag.clone()).collect();
    let mut proxies: Vec<Value> = nodes.iter().map(|n| Value::Object(render_proxy(n))).collect();

    let mut injected_tags = Vec::new();
    if let Some(inj) = &opts.injection {
        let known: HashSet<&String> = tags.iter().collect();
        for n in &inj.nodes {
            if known.contains(&n.tag) || injected_tags.contains(&n.tag) {
                warn!(node = %n.tag, "injected node collides with an existing tag, skipped");
                continue;
            }
            let mut n = n.clone();
            normalize(&mut n, opts);
            proxies.push(Value::Object(render_proxy(&n)));
            injected_tags.push(n.tag);
        }
    }
    proxies.push(json!({ "name": DNS_PASSTHROUGH, "type": "dns" }));

    // 原地替换，保持模板键顺序
    let raw_groups = match template.get_mut(GROUPS).map(Value::take) {
        Some(Value::Array(list)) => Some(list),
        Some(Value::Null) | None => None,
        Some(_) => return Err(TranscodeError::inline_template(format!("`{GROUPS}` is not a list"))),
    };

    template.insert(PROXIES.into(), Value::Array(proxies));

    if let Some(list) = raw_groups {
        let leaf: HashSet<String> = [DNS_PASSTHROUGH.to_string()].into();
        let mut resolved = groups::resolve(extract_groups(list), &tags, &leaf);
        if let Some(inj) = &opts.injection {
            groups::inject_members(&mut resolved, &inj.target_groups, &injected_tags);
        }
        debug!(groups = resolved.len(), "clash groups resolved");
        let out: Vec<Value> = resolved
            .into_iter()
            .map(|g| {
                let mut body = g.body;
                body.insert(PROXIES.into(), g.members.into());
                Value::Object(body)
            })
            .collect();
        template.insert(GROUPS.into(), Value::Array(out));
    }

    info!(nodes = tags.len(), injected = injected_tags.len(), "clash config rendered");
    serde_yaml::to_string(&Value::Object(template))
        .map(String::into_bytes)
        .map_err(|e| TranscodeError::Serialize(e.to_string()))
}
