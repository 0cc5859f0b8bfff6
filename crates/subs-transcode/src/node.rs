//! Canonical node record shared by every parser and both output dialects.
//!
//! A [`Node`] carries the fields every endpoint has (tag, server, port) and a
//! per-protocol [`NodeOptions`] payload. Parsers guarantee that server, port
//! and the protocol credential are present; nothing here is defaulted.

use crate::error::NodeFailure;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Protocol discriminant of a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Shadowsocks,
    Vless,
    Hysteria2,
    Trojan,
    /// Any other upstream type, carried opaquely.
    Other,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Shadowsocks => "shadowsocks",
            Self::Vless => "vless",
            Self::Hysteria2 => "hysteria2",
            Self::Trojan => "trojan",
            Self::Other => "other",
        }
    }
}

/// One proxy endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Display name, unique within one merge.
    pub tag: String,
    pub server: String,
    pub port: u16,
    /// UDP relay flag (`udp:` in Clash).
    pub udp: Option<bool>,
    pub options: NodeOptions,
    /// Source fields without a canonical slot, in source order.
    /// Re-emitted by the Clash dialect only.
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeOptions {
    Shadowsocks(ShadowsocksOptions),
    Vless(VlessOptions),
    Hysteria2(Hysteria2Options),
    Trojan(TrojanOptions),
    Other(OtherOptions),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShadowsocksOptions {
    pub method: String,
    pub password: String,
    pub plugin: Option<SsPlugin>,
}

/// SIP003 plugin attached to a shadowsocks node.
#[derive(Debug, Clone, PartialEq)]
pub enum SsPlugin {
    /// simple-obfs / obfs-local.
    Obfs { mode: String, host: Option<String> },
    V2ray {
        mode: Option<String>,
        host: Option<String>,
        path: Option<String>,
        tls: bool,
    },
    /// Unrecognized plugin string, kept verbatim.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VlessOptions {
    pub uuid: String,
    pub flow: Option<String>,
    pub packet_encoding: Option<String>,
    pub tls: Option<TlsOptions>,
    pub transport: Option<Transport>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrojanOptions {
    pub password: String,
    pub tls: TlsOptions,
    pub transport: Option<Transport>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hysteria2Options {
    pub password: String,
    /// Port-hopping range, if any.
    pub ports: Option<PortRange>,
    /// `None` when the source carried no bandwidth; mergers fill it in.
    pub bandwidth: Option<Bandwidth>,
    pub obfs: Option<Obfs>,
    pub tls: TlsOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Obfs {
    /// Obfuscation type, `salamander` in practice.
    pub kind: String,
    pub password: Option<String>,
}

/// Opaque entry of a type without a typed variant.
#[derive(Debug, Clone, PartialEq)]
pub struct OtherOptions {
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TlsOptions {
    pub enabled: bool,
    pub server_name: Option<String>,
    /// Skip certificate verification.
    pub insecure: bool,
    /// uTLS client fingerprint.
    pub fingerprint: Option<String>,
    pub alpn: Vec<String>,
    pub reality: Option<RealityOptions>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RealityOptions {
    pub public_key: String,
    pub short_id: Option<String>,
}

/// Non-TCP transports. Plain TCP is the absence of a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Transport {
    Ws {
        path: Option<String>,
        host: Option<String>,
    },
    Grpc {
        service_name: Option<String>,
    },
}

impl Transport {
    pub fn network(&self) -> &'static str {
        match self {
            Self::Ws { .. } => "ws",
            Self::Grpc { .. } => "grpc",
        }
    }
}

/// Bandwidth hint in Mbps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bandwidth {
    pub up_mbps: u32,
    pub down_mbps: u32,
}

impl Bandwidth {
    pub const fn new(up_mbps: u32, down_mbps: u32) -> Self {
        Self { up_mbps, down_mbps }
    }

    /// Parses a rate such as `50`, `50 Mbps`, `100mbps` or `1 Gbps` into Mbps.
    pub fn parse_rate(s: &str) -> Option<u32> {
        let s = s.trim();
        let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let value: u32 = s[..digits_end].parse().ok()?;
        let unit = s[digits_end..].trim().to_ascii_lowercase();
        match unit.as_str() {
            "" | "m" | "mbps" => Some(value),
            "g" | "gbps" => value.checked_mul(1000),
            "k" | "kbps" => Some(value / 1000),
            _ => None,
        }
    }
}

/// Inclusive port range, written `start-end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    /// `start:end`, the sing-box spelling.
    pub fn colon_form(&self) -> String {
        format!("{}:{}", self.start, self.end)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for PortRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s
            .split_once('-')
            .or_else(|| s.split_once(':'))
            .ok_or_else(|| format!("not a port range: {s}"))?;
        let start = a.trim().parse::<u16>().map_err(|e| format!("{s}: {e}"))?;
        let end = b.trim().parse::<u16>().map_err(|e| format!("{s}: {e}"))?;
        if start > end {
            return Err(format!("descending port range: {s}"));
        }
        Ok(Self { start, end })
    }
}

impl Node {
    pub fn protocol(&self) -> Protocol {
        match &self.options {
            NodeOptions::Shadowsocks(_) => Protocol::Shadowsocks,
            NodeOptions::Vless(_) => Protocol::Vless,
            NodeOptions::Hysteria2(_) => Protocol::Hysteria2,
            NodeOptions::Trojan(_) => Protocol::Trojan,
            NodeOptions::Other(_) => Protocol::Other,
        }
    }

    /// Primary credential: password, uuid, or `method:password` for shadowsocks.
    pub fn credential(&self) -> Option<String> {
        match &self.options {
            NodeOptions::Shadowsocks(o) => Some(format!("{}:{}", o.method, o.password)),
            NodeOptions::Vless(o) => Some(o.uuid.clone()),
            NodeOptions::Hysteria2(o) => Some(o.password.clone()),
            NodeOptions::Trojan(o) => Some(o.password.clone()),
            NodeOptions::Other(_) => None,
        }
    }

    /// Fields that identify the endpoint regardless of presentation.
    pub fn identity(&self) -> (Protocol, &str, u16, Option<String>) {
        (self.protocol(), self.server.as_str(), self.port, self.credential())
    }

    /// Hysteria2 bandwidth, if this is a hysteria2 node.
    pub fn bandwidth(&self) -> Option<Bandwidth> {
        match &self.options {
            NodeOptions::Hysteria2(o) => o.bandwidth,
            _ => None,
        }
    }
}

/// Result of parsing a batch: the nodes that parsed plus per-node failures.
#[derive(Debug, Clone, Default)]
pub struct NodeBatch {
    pub nodes: Vec<Node>,
    pub failures: Vec<NodeFailure>,
}

impl NodeBatch {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total entries seen, parsed or not.
    pub fn total(&self) -> usize {
        self.nodes.len() + self.failures.len()
    }
}
