use super::{ParseOptions, UriParts};
use crate::error::NodeError;
use crate::node::{Node, NodeOptions, RealityOptions, VlessOptions};
use serde_json::Map;

const PROTO: &str = "vless";
const PLACEHOLDER: &str = "VLESS node";

/// Parse `vless://uuid@host:port?params#name`.
///
/// TLS is on when `security=tls|reality` or when the dialect enables it by
/// default; reality keys are attached only for `security=reality`.
pub fn parse_vless(uri: &str, opts: &ParseOptions) -> Result<Node, NodeError> {
    let parts = UriParts::split(uri, &["vless://"], PROTO)?;
    let uuid = parts.require_user(PROTO, "uuid")?;
    let server = parts.require_host(PROTO)?;
    let port = parts.require_port(PROTO)?;

    let security = parts.query.get("security").unwrap_or_default();
    let tls_on = opts.vless_tls_default || matches!(security, "tls" | "reality");
    let tls = tls_on.then(|| {
        let mut tls = parts.tls(true);
        tls.insecure = parts.query.flag("allowInsecure").unwrap_or(false);
        if security == "reality" {
            tls.reality = parts.query.get("pbk").map(|pbk| RealityOptions {
                public_key: pbk.to_string(),
                short_id: parts.query.get("sid").map(String::from),
            });
        }
        tls
    });

    Ok(Node {
        tag: parts.name_or(PLACEHOLDER),
        server,
        port,
        udp: Some(true),
        options: NodeOptions::Vless(VlessOptions {
            uuid,
            flow: parts.query.get("flow").map(String::from),
            packet_encoding: Some(
                parts
                    .query
                    .get_any(&["packet_encoding", "packetEncoding"])
                    .unwrap_or("xudp")
                    .to_string(),
            ),
            tls,
            transport: parts.transport(),
        }),
        extra: Map::new(),
    })
}
