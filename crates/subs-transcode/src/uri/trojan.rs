use super::UriParts;
use crate::error::NodeError;
use crate::node::{Node, NodeOptions, TrojanOptions};
use serde_json::Map;

const PROTO: &str = "trojan";
const PLACEHOLDER: &str = "Trojan node";

/// Parse `trojan://password@host:port?params#name`.
///
/// TLS is always on. Certificate checks are skipped unless the URI says
/// `allowInsecure=false` (or `0`); SNI falls back to the host.
pub fn parse_trojan(uri: &str) -> Result<Node, NodeError> {
    let parts = UriParts::split(uri, &["trojan://"], PROTO)?;
    let password = parts.require_user(PROTO, "password")?;
    let server = parts.require_host(PROTO)?;
    let port = parts.require_port(PROTO)?;

    let mut tls = parts.tls(true);
    tls.server_name.get_or_insert_with(|| server.clone());
    tls.insecure = parts.query.flag("allowInsecure").unwrap_or(true);

    Ok(Node {
        tag: parts.name_or(PLACEHOLDER),
        server,
        port,
        udp: Some(true),
        options: NodeOptions::Trojan(TrojanOptions {
            password,
            tls,
            transport: parts.transport(),
        }),
        extra: Map::new(),
    })
}
