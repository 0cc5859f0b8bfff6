// crates/subs-transcode/tests/uri_parse.rs
use proptest::prelude::*;
use subs_transcode::document::{self, DocumentShape};
use subs_transcode::node::{NodeOptions, PortRange};
use subs_transcode::uri::{self, ParseOptions};
use subs_transcode::{Dialect, NodeError};

fn opts(d: Dialect) -> ParseOptions {
    ParseOptions::for_dialect(d)
}

#[test]
fn hysteria2_port_hint_uses_fixed_brackets() {
    let hint = |port: u16| {
        let n = uri::parse(&format!("hy2://pw@h.example:{port}#x"), &opts(Dialect::Clash)).unwrap();
        match n.options {
            NodeOptions::Hysteria2(o) => o.ports,
            other => panic!("not hysteria2: {other:?}"),
        }
    };
    assert_eq!(hint(15005), Some(PortRange::new(15000, 16000)));
    assert_eq!(hint(1000), Some(PortRange::new(1000, 2000)));
    assert_eq!(hint(19999), Some(PortRange::new(19000, 20000)));
    // gaps between brackets and everything outside them carry no hint
    assert_eq!(hint(2500), None);
    assert_eq!(hint(443), None);
    assert_eq!(hint(20001), None);
}

#[test]
fn hysteria2_bandwidth_default_is_per_dialect() {
    let bw = |d: Dialect, q: &str| {
        uri::parse(&format!("hysteria2://pw@h:443{q}"), &opts(d))
            .unwrap()
            .bandwidth()
            .map(|b| (b.up_mbps, b.down_mbps))
    };
    assert_eq!(bw(Dialect::Clash, ""), Some((40, 200)));
    assert_eq!(bw(Dialect::SingBox, ""), Some((20, 40)));
    assert_eq!(bw(Dialect::SingBox, "?upmbps=100"), Some((100, 40)));
    assert_eq!(bw(Dialect::Clash, "?up=10&down=1%20Gbps"), Some((10, 1000)));
}

#[test]
fn placeholder_names_when_fragment_missing() {
    let n = uri::parse("hysteria2://pw@h:443", &opts(Dialect::Clash)).unwrap();
    assert_eq!(n.tag, "Hysteria2 node");
    let n = uri::parse("trojan://pw@h:443#%E9%A6%99%E6%B8%AF%2001", &opts(Dialect::Clash)).unwrap();
    assert_eq!(n.tag, "香港 01");
}

#[test]
fn shadowsocks_credential_fallback() {
    // base64 "aes-128-gcm:secret"
    let b64 = uri::parse("ss://YWVzLTEyOC1nY206c2VjcmV0@h:8388#a", &opts(Dialect::Clash)).unwrap();
    let plain = uri::parse("ss://aes-128-gcm:secret@h:8388#a", &opts(Dialect::Clash)).unwrap();
    assert_eq!(b64, plain);
    assert!(matches!(
        uri::parse("ss://nocolon@h:8388", &opts(Dialect::Clash)),
        Err(NodeError::InvalidValue { .. })
    ));
}

#[test]
fn scheme_and_field_errors() {
    assert!(matches!(
        uri::parse("vmess://abc", &opts(Dialect::Clash)),
        Err(NodeError::MalformedUri(_))
    ));
    assert!(matches!(
        uri::parse("trojan://pw@host-only", &opts(Dialect::Clash)),
        Err(NodeError::MissingField { field: "port", .. })
    ));
}

#[test]
fn uri_list_collects_failures_without_aborting() {
    let body = "\u{feff}trojan://a@h1:443#one\r\n\
                vmess://ignored\r\n\
                trojan://@h2:443#broken\r\n\
                hy2://b@h3:443#three\r\n";
    let batch = document::parse_document(body, DocumentShape::UriList, &opts(Dialect::SingBox)).unwrap();
    let tags: Vec<_> = batch.nodes.iter().map(|n| n.tag.as_str()).collect();
    assert_eq!(tags, ["one", "three"]);
    assert_eq!(batch.failures.len(), 1);
    assert_eq!(batch.total(), 3);
}

fn host() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,8}\\.example\\.(com|net)"
}

fn name() -> impl Strategy<Value = String> {
    "[A-Za-z0-9][A-Za-z0-9 _-]{0,12}"
}

fn secret() -> impl Strategy<Value = String> {
    "[A-Za-z0-9]{1,20}"
}

fn any_uri() -> impl Strategy<Value = String> {
    let trojan = (secret(), host(), 1u16..=65535, name(), prop::option::of(host()), any::<bool>()).prop_map(
        |(pw, h, port, n, sni, strict)| {
            let mut q = Vec::new();
            if let Some(s) = sni {
                q.push(format!("sni={s}"));
            }
            if strict {
                q.push("allowInsecure=0".into());
            }
            format!("trojan://{pw}@{h}:{port}?{}#{}", q.join("&"), urlencoding::encode(&n))
        },
    );
    let hy2 = (
        secret(),
        host(),
        1u16..=65535,
        name(),
        prop::option::of(1u32..2000),
        prop::option::of(secret()),
    )
        .prop_map(|(pw, h, port, n, up, obfs)| {
            let mut q = Vec::new();
            if let Some(up) = up {
                q.push(format!("upmbps={up}"));
            }
            if let Some(o) = obfs {
                q.push(format!("obfs=salamander&obfs-password={o}"));
            }
            format!("hysteria2://{pw}@{h}:{port}?{}#{}", q.join("&"), urlencoding::encode(&n))
        });
    let vless = (
        "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
        host(),
        1u16..=65535,
        name(),
        prop_oneof![Just("none"), Just("tls"), Just("reality")],
        prop_oneof![Just(""), Just("&type=ws&path=%2Fws"), Just("&type=grpc&serviceName=svc")],
    )
        .prop_map(|(id, h, port, n, sec, transport)| {
            format!(
                "vless://{id}@{h}:{port}?security={sec}&pbk=KEY&sid=01{transport}#{}",
                urlencoding::encode(&n)
            )
        });
    let ss = (
        prop_oneof![Just("aes-128-gcm"), Just("chacha20-ietf-poly1305"), Just("2022-blake3-aes-256-gcm")],
        secret(),
        host(),
        1u16..=65535,
        name(),
    )
        .prop_map(|(m, pw, h, port, n)| format!("ss://{m}:{pw}@{h}:{port}#{}", urlencoding::encode(&n)));
    prop_oneof![trojan, hy2, vless, ss]
}

proptest! {
    #[test]
    fn reserialized_identity_parses_to_same_record(
        uri_text in any_uri(),
        clash in any::<bool>(),
    ) {
        let o = opts(if clash { Dialect::Clash } else { Dialect::SingBox });
        let first = uri::parse(&uri_text, &o).unwrap();
        let again = uri::to_uri(&first).unwrap();
        let second = uri::parse(&again, &o).unwrap();
        prop_assert_eq!(first.identity(), second.identity());
        prop_assert_eq!(first, second);
    }
}
