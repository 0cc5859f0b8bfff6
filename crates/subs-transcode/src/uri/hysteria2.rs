use super::{ParseOptions, UriParts};
use crate::error::NodeError;
use crate::node::{Bandwidth, Hysteria2Options, Node, NodeOptions, Obfs, PortRange};
use serde_json::Map;

const PROTO: &str = "hysteria2";
const PLACEHOLDER: &str = "Hysteria2 node";

/// Port-hopping brackets: `[1000,2000]`, `[3000,4000]` ... `[19000,20000]`,
/// both ends inclusive. Ports in the gaps get no hint.
const HOPPING_BRACKETS: usize = 10;

/// The hopping range `port` falls into, if any.
pub fn port_hopping_range(port: u16) -> Option<PortRange> {
    (0..HOPPING_BRACKETS)
        .map(|i| {
            let start = 1000 + 2000 * i as u16;
            PortRange::new(start, start + 1000)
        })
        .find(|r| r.contains(port))
}

/// Parse `hysteria2://password@host:port?params#name` (or `hy2://`).
///
/// `up`/`upmbps` and `down`/`downmbps` override the dialect's bandwidth
/// default field by field.
pub fn parse_hysteria2(uri: &str, opts: &ParseOptions) -> Result<Node, NodeError> {
    let parts = UriParts::split(uri, &["hysteria2://", "hy2://"], PROTO)?;
    let password = parts.require_user(PROTO, "password")?;
    let server = parts.require_host(PROTO)?;
    let port = parts.require_port(PROTO)?;

    let rate = |keys: &[&str], default: u32| -> Result<u32, NodeError> {
        match parts.query.get_any(keys) {
            Some(v) => Bandwidth::parse_rate(v).ok_or_else(|| NodeError::invalid(PROTO, "bandwidth", v)),
            None => Ok(default),
        }
    };
    let bandwidth = Bandwidth {
        up_mbps: rate(&["upmbps", "up"], opts.hysteria2_bandwidth.up_mbps)?,
        down_mbps: rate(&["downmbps", "down"], opts.hysteria2_bandwidth.down_mbps)?,
    };

    let mut tls = parts.tls(true);
    tls.server_name.get_or_insert_with(|| server.clone());
    tls.insecure = parts.query.flag("insecure").unwrap_or(false);

    let obfs = parts.query.get("obfs").map(|kind| Obfs {
        kind: kind.to_string(),
        password: parts.query.get("obfs-password").map(String::from),
    });

    Ok(Node {
        tag: parts.name_or(PLACEHOLDER),
        server,
        port,
        udp: Some(true),
        options: NodeOptions::Hysteria2(Hysteria2Options {
            password,
            ports: port_hopping_range(port),
            bandwidth: Some(bandwidth),
            obfs,
            tls,
        }),
        extra: Map::new(),
    })
}
