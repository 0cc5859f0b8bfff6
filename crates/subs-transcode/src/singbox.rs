//! sing-box (JSON) dialect: outbound translation and template merge.

use crate::clash::string_list;
use crate::error::TranscodeError;
use crate::groups::{self, Group, MergeOptions};
use crate::node::{Node, NodeOptions, SsPlugin, TlsOptions, Transport};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

pub(crate) const OUTBOUNDS: &str = "outbounds";
const GROUP_TYPES: [&str; 2] = ["selector", "urltest"];
/// Built-in outbound types that are never pattern candidates.
const SERVICE_TYPES: [&str; 3] = ["direct", "block", "dns"];
const ALL_PLACEHOLDER: &str = "{all}";

/// Translate one node into a sing-box outbound.
///
/// Returns `None` for types sing-box cannot express here (opaque Clash
/// entries). TLS and transport objects appear only when the node has them.
pub fn render_outbound(node: &Node, opts: &MergeOptions) -> Option<Map<String, Value>> {
    let mut m = Map::new();
    let kind = match &node.options {
        NodeOptions::Shadowsocks(_) => "shadowsocks",
        NodeOptions::Vless(_) => "vless",
        NodeOptions::Trojan(_) => "trojan",
        NodeOptions::Hysteria2(_) => "hysteria2",
        NodeOptions::Other(o) => {
            debug!(node = %node.tag, kind = %o.kind, "no sing-box mapping, skipping node");
            return None;
        }
    };
    m.insert("tag".into(), node.tag.clone().into());
    m.insert("type".into(), kind.into());
    m.insert("server".into(), node.server.clone().into());

    match &node.options {
        NodeOptions::Shadowsocks(o) => {
            m.insert("server_port".into(), node.port.into());
            m.insert("method".into(), o.method.clone().into());
            m.insert("password".into(), o.password.clone().into());
            if let Some(p) = &o.plugin {
                let (name, plugin_opts) = plugin_fields(p);
                m.insert("plugin".into(), name.into());
                if !plugin_opts.is_empty() {
                    m.insert("plugin_opts".into(), plugin_opts.into());
                }
            }
        }
        NodeOptions::Vless(o) => {
            m.insert("server_port".into(), node.port.into());
            m.insert("uuid".into(), o.uuid.clone().into());
            if let Some(flow) = &o.flow {
                m.insert("flow".into(), flow.clone().into());
            }
            if let Some(pe) = &o.packet_encoding {
                m.insert("packet_encoding".into(), pe.clone().into());
            }
            if let Some(tls) = o.tls.as_ref().filter(|t| t.enabled || t.reality.is_some()) {
                m.insert("tls".into(), tls_object(tls, Some(opts.fingerprint.as_str())).into());
            }
            if let Some(t) = &o.transport {
                m.insert("transport".into(), transport_object(t).into());
            }
        }
        NodeOptions::Trojan(o) => {
            m.insert("server_port".into(), node.port.into());
            m.insert("password".into(), o.password.clone().into());
            m.insert("tls".into(), tls_object(&o.tls, o.tls.fingerprint.as_deref()).into());
            if let Some(t) = &o.transport {
                m.insert("transport".into(), transport_object(t).into());
            }
        }
        NodeOptions::Hysteria2(o) => {
            match o.ports {
                Some(r) => m.insert("server_ports".into(), json!([r.colon_form()])),
                None => m.insert("server_port".into(), node.port.into()),
            };
            let bw = o.bandwidth.unwrap_or(opts.bandwidth);
            m.insert("up_mbps".into(), bw.up_mbps.into());
            m.insert("down_mbps".into(), bw.down_mbps.into());
            m.insert("password".into(), o.password.clone().into());
            if let Some(obfs) = &o.obfs {
                m.insert(
                    "obfs".into(),
                    json!({ "type": obfs.kind, "password": obfs.password.clone().unwrap_or_default() }),
                );
            }
            let mut tls = o.tls.clone();
            tls.fingerprint = None;
            m.insert("tls".into(), tls_object(&tls, None).into());
        }
        NodeOptions::Other(_) => return None,
    }
    Some(m)
}

/// `obfs-local` + `obfs=..;obfs-host=..`, `v2ray-plugin` + `mode=..;host=..`.
fn plugin_fields(p: &SsPlugin) -> (String, String) {
    match p {
        SsPlugin::Obfs { mode, host } => (
            "obfs-local".into(),
            format!("obfs={mode};obfs-host={}", host.as_deref().unwrap_or_default()),
        ),
        SsPlugin::V2ray { mode, host, path, tls } => {
            let mut parts = Vec::new();
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
                parts.push("tls".to_string());
            }
            ("v2ray-plugin".into(), parts.join(";"))
        }
        SsPlugin::Raw(raw) => match raw.split_once(';') {
            Some((name, rest)) => (name.to_string(), rest.to_string()),
            None => (raw.clone(), String::new()),
        },
    }
}

fn tls_object(tls: &TlsOptions, fingerprint: Option<&str>) -> Map<String, Value> {
    let mut t = Map::new();
    t.insert("enabled".into(), true.into());
    t.insert("insecure".into(), tls.insecure.into());
    if let Some(sni) = &tls.server_name {
        t.insert("server_name".into(), sni.clone().into());
    }
    if !tls.alpn.is_empty() {
        t.insert("alpn".into(), tls.alpn.clone().into());
    }
    if let Some(fp) = fingerprint {
        t.insert("utls".into(), json!({ "enabled": true, "fingerprint": fp }));
    }
    if let Some(r) = &tls.reality {
        let mut ro = Map::new();
        ro.insert("enabled".into(), true.into());
        ro.insert("public_key".into(), r.public_key.clone().into());
        if let Some(sid) = &r.short_id {
            ro.insert("short_id".into(), sid.clone().into());
        }
        t.insert("reality".into(), ro.into());
    }
    t
}

fn transport_object(t: &Transport) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("type".into(), t.network().into());
    match t {
        Transport::Ws { path, host } => {
            m.insert("path".into(), path.clone().unwrap_or_else(|| "/".into()).into());
            if let Some(h) = host {
                m.insert("headers".into(), json!({ "Host": h }));
            }
        }
        Transport::Grpc { service_name } => {
            m.insert("service_name".into(), service_name.clone().unwrap_or_default().into());
        }
    }
    m
}

fn outbound_type(m: &Map<String, Value>) -> &str {
    m.get("type").and_then(Value::as_str).unwrap_or_default()
}

fn outbound_tag(m: &Map<String, Value>) -> Option<&str> {
    m.get("tag").and_then(Value::as_str)
}

enum Slot {
    Leaf(Map<String, Value>),
    Group(String),
}

/// `filter: [{regex: [..]}, ..]`; a bare string or list of strings is
/// accepted as well.
fn filter_patterns(filter: Value) -> Vec<String> {
    let collect = |v: &Value| -> Vec<String> {
        match v {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items.iter().filter_map(|i| i.as_str().map(String::from)).collect(),
            _ => Vec::new(),
        }
    };
    match filter {
        Value::Array(items) => items
            .iter()
            .flat_map(|f| match f {
                Value::Object(o) => o.get("regex").map(collect).unwrap_or_default(),
                other => collect(other),
            })
            .collect(),
        other => collect(&other),
    }
}

/// Merge classified `nodes` into a sing-box `template` and serialize it.
///
/// Outbounds whose tag already exists are not appended again, so merging
/// into an already merged template changes nothing.
pub fn merge(nodes: Vec<Node>, mut template: Map<String, Value>, opts: &MergeOptions) -> Result<Vec<u8>, TranscodeError> {
    if nodes.is_empty() {
        return Err(TranscodeError::NoNodesMatched { total: 0 });
    }
    let existing = match template.get_mut(OUTBOUNDS).map(Value::take) {
        Some(Value::Array(list)) => list,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err(TranscodeError::inline_template(format!("`{OUTBOUNDS}` is not a list"))),
    };

    let mut slots = Vec::with_capacity(existing.len() + nodes.len());
    let mut groups_in = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for v in existing {
        let Value::Object(mut body) = v else {
            warn!("non-object outbound skipped");
            continue;
        };
        if let Some(tag) = outbound_tag(&body) {
            seen.insert(tag.to_string());
        }
        if !GROUP_TYPES.contains(&outbound_type(&body)) {
            slots.push(Slot::Leaf(body));
            continue;
        }
        let Some(name) = outbound_tag(&body).map(String::from) else {
            warn!("group outbound without tag skipped");
            continue;
        };
        let mut members = string_list(body.get(OUTBOUNDS));
        members.retain(|m| m != ALL_PLACEHOLDER);
        let patterns = body.shift_remove("filter").map(filter_patterns);
        slots.push(Slot::Group(name.clone()));
        groups_in.push(Group {
            name,
            members,
            patterns,
            body,
        });
    }

    // Nodes already present from an earlier merge still count as converted.
    let mut converted = 0usize;
    let mut appended = 0usize;
    for n in &nodes {
        let Some(ob) = render_outbound(n, opts) else { continue };
        converted += 1;
        if seen.insert(n.tag.clone()) {
            slots.push(Slot::Leaf(ob));
            appended += 1;
        }
    }
    if converted == 0 {
        warn!(total = nodes.len(), "no node could be converted to a sing-box outbound");
        return Err(TranscodeError::NoNodesMatched { total: nodes.len() });
    }

    let mut injected_tags = Vec::new();
    if let Some(inj) = &opts.injection {
        let rendered = inj.nodes.iter().filter_map(|n| render_outbound(n, opts));
        for ob in rendered.chain(inj.outbounds.iter().cloned()) {
            let Some(tag) = outbound_tag(&ob).map(String::from) else {
                warn!("injected outbound without tag skipped");
                continue;
            };
            if !seen.insert(tag.clone()) {
                warn!(node = %tag, "injected node collides with an existing tag, skipped");
                continue;
            }
            injected_tags.push(tag);
            slots.push(Slot::Leaf(ob));
        }
    }

    let mut pool = Vec::new();
    let mut leaf_refs = HashSet::new();
    for slot in &slots {
        let Slot::Leaf(body) = slot else { continue };
        let Some(tag) = outbound_tag(body) else { continue };
        if SERVICE_TYPES.contains(&outbound_type(body)) || injected_tags.iter().any(|t| t == tag) {
            leaf_refs.insert(tag.to_string());
        } else {
            pool.push(tag.to_string());
        }
    }

    let mut resolved = groups::resolve(groups_in, &pool, &leaf_refs);
    if let Some(inj) = &opts.injection {
        groups::inject_members(&mut resolved, &inj.target_groups, &injected_tags);
    }
    let mut by_name: HashMap<String, Group> = resolved.into_iter().map(|g| (g.name.clone(), g)).collect();

    let outbounds: Vec<Value> = slots
        .into_iter()
        .filter_map(|slot| match slot {
            Slot::Leaf(body) => Some(Value::Object(body)),
            Slot::Group(name) => by_name.remove(&name).map(|g| Value::Object(finish_group(g))),
        })
        .collect();
    template.insert(OUTBOUNDS.into(), Value::Array(outbounds));

    info!(appended, injected = injected_tags.len(), "sing-box config rendered");
    serde_json::to_vec(&Value::Object(template)).map_err(|e| TranscodeError::Serialize(e.to_string()))
}

/// Write members back and keep a selector's `default` pointing at a member.
fn finish_group(g: Group) -> Map<String, Value> {
    let mut body = g.body;
    if outbound_type(&body) == "selector" {
        let stale = body
            .get("default")
            .and_then(Value::as_str)
            .is_some_and(|d| !g.members.iter().any(|m| m == d));
        if stale {
            debug!(group = %g.name, default = %g.members[0], "selector default reassigned");
            body.insert("default".into(), g.members[0].clone().into());
        }
    }
    body.insert(OUTBOUNDS.into(), g.members.into());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Bandwidth;
    use crate::uri::{parse, ParseOptions};
    use crate::Dialect;

    fn opts() -> MergeOptions {
        MergeOptions::new(Bandwidth::new(40, 100))
    }

    fn node(uri: &str) -> Node {
        parse(uri, &ParseOptions::for_dialect(Dialect::SingBox)).unwrap()
    }

    fn template(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("template must be an object"),
        }
    }

    fn tags(out: &Value) -> Vec<&str> {
        out["outbounds"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["tag"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn translation_table() {
        let n = node("ss://YWVzLTEyOC1nY206cHc@1.2.3.4:8388?plugin=obfs-local%3Bobfs%3Dhttp%3Bobfs-host%3Dx.com#ss");
        let o = render_outbound(&n, &opts()).unwrap();
        assert_eq!(o["method"], "aes-128-gcm");
        assert_eq!(o["server_port"], 8388);
        assert_eq!(o["plugin"], "obfs-local");
        assert_eq!(o["plugin_opts"], "obfs=http;obfs-host=x.com");

        let n = node("vless://u@h:443?security=reality&pbk=K&sid=1&sni=s&type=grpc&serviceName=g#v");
        let o = render_outbound(&n, &opts()).unwrap();
        assert_eq!(o["tls"]["utls"]["fingerprint"], "firefox");
        assert_eq!(o["tls"]["reality"]["public_key"], "K");
        assert_eq!(o["transport"], json!({"type": "grpc", "service_name": "g"}));

        let plain = render_outbound(&node("vless://u@h:443#p"), &opts()).unwrap();
        assert!(plain.get("tls").is_none());
        assert!(plain.get("transport").is_none());

        let hy = render_outbound(&node("hy2://p@h:15005#hy"), &opts()).unwrap();
        assert_eq!(hy["server_ports"], json!(["15000:16000"]));
        assert_eq!(hy["up_mbps"], 20);
        assert_eq!(hy["down_mbps"], 40);
    }

    #[test]
    fn merge_is_idempotent_and_repairs_default() {
        let t = template(json!({
            "log": {"level": "warn"},
            "outbounds": [
                {"tag": "Proxy", "type": "selector", "outbounds": ["HK", "JP", "direct"], "default": "JP"},
                {"tag": "HK", "type": "urltest", "outbounds": ["{all}"], "filter": [{"action": "include", "regex": ["港", "hk"]}]},
                {"tag": "JP", "type": "urltest", "filter": [{"regex": ["jp"]}]},
                {"tag": "direct", "type": "direct"},
                {"tag": "dns-out", "type": "dns"}
            ]
        }));
        let nodes = vec![node("trojan://p@a:443#HK 01"), node("trojan://p@b:443#US 01")];
        let first: Value = serde_json::from_slice(&merge(nodes.clone(), t, &opts()).unwrap()).unwrap();
        assert_eq!(tags(&first), ["Proxy", "HK", "direct", "dns-out", "HK 01", "US 01"]);
        assert_eq!(first["outbounds"][0]["outbounds"], json!(["HK", "direct"]));
        assert_eq!(first["outbounds"][0]["default"], "HK");
        assert_eq!(first["outbounds"][1]["outbounds"], json!(["HK 01"]));
        assert!(first["outbounds"][1].get("filter").is_none());
        assert_eq!(first["log"]["level"], "warn");

        let again = template(first.clone());
        let second: Value = serde_json::from_slice(&merge(nodes, again, &opts()).unwrap()).unwrap();
        assert_eq!(second, first);
    }

    #[test]
    fn nothing_convertible_is_an_error() {
        let doc = "proxies:\n  - {name: s, type: snell, server: h, port: 1, psk: k}\n  - {name: v, type: vmess, server: h, port: 2, uuid: u}\n";
        let nodes = crate::document::parse_clash_proxies(doc, &ParseOptions::for_dialect(Dialect::SingBox)).unwrap().nodes;
        assert_eq!(nodes.len(), 2);
        let t = template(json!({"outbounds": [{"tag": "direct", "type": "direct"}]}));
        let err = merge(nodes, t, &opts()).unwrap_err();
        assert!(matches!(err, TranscodeError::NoNodesMatched { total: 2 }));
    }

    #[test]
    fn native_outbounds_are_injected_verbatim() {
        let mut o = opts();
        o.injection = Some(crate::groups::Injection {
            nodes: vec![],
            outbounds: vec![
                template(json!({"tag": "My WG", "type": "wireguard", "server": "w", "server_port": 51820, "peer_public_key": "pk"})),
                template(json!({"tag": "HK 01", "type": "socks", "server": "s"})),
                template(json!({"type": "socks"})),
            ],
            target_groups: vec!["Proxy".into()],
        });
        let t = template(json!({
            "outbounds": [
                {"tag": "Proxy", "type": "selector", "outbounds": ["Auto"]},
                {"tag": "Auto", "type": "urltest", "outbounds": ["{all}"], "filter": [{"regex": [".*"]}]}
            ]
        }));
        let out: Value = serde_json::from_slice(&merge(vec![node("trojan://p@a:443#HK 01")], t, &o).unwrap()).unwrap();
        assert_eq!(tags(&out), ["Proxy", "Auto", "HK 01", "My WG"]);
        assert_eq!(out["outbounds"][3]["peer_public_key"], "pk");
        assert_eq!(out["outbounds"][0]["outbounds"], json!(["Auto", "My WG"]));
        assert_eq!(out["outbounds"][1]["outbounds"], json!(["HK 01"]));
    }

    #[test]
    fn template_key_order_is_kept() {
        let t = template(json!({"log": {}, "outbounds": [], "route": {"final": "HK"}}));
        let bytes = merge(vec![node("trojan://p@a:443#HK")], t, &opts()).unwrap();
        let v: Map<String, Value> = serde_json::from_slice(&bytes).unwrap();
        let keys: Vec<&str> = v.keys().map(String::as_str).collect();
        assert_eq!(keys, ["log", "outbounds", "route"]);
    }

    #[test]
    fn opaque_nodes_are_skipped() {
        let doc = "proxies:\n  - {name: s, type: snell, server: h, port: 1}\n  - {name: t, type: trojan, server: h, port: 2, password: p}\n";
        let nodes = crate::document::parse_clash_proxies(doc, &ParseOptions::for_dialect(Dialect::SingBox)).unwrap().nodes;
        let out: Value = serde_json::from_slice(&merge(nodes, Map::new(), &opts()).unwrap()).unwrap();
        assert_eq!(tags(&out), ["t"]);
    }
}
