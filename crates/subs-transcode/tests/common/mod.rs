#![allow(dead_code)]
//! Shared helpers for the transcoder integration tests
//!
//! - `fixture`: templates and a sample upstream document under `tests/fixtures`
//! - `upstream`: a throwaway HTTP server answering from a canned script
//! - `config`: a `TranscoderConfig` wired to a temp dir

use std::fs;
use std::path::{Path, PathBuf};
use subs_transcode::TranscoderConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

pub fn fixture(name: &str) -> String {
    fs::read_to_string(fixtures_dir().join(name)).unwrap_or_else(|e| panic!("fixture {name}: {e}"))
}

/// One canned reply.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: "upstream error".into(),
        }
    }
}

/// Serve `replies` in order, one connection each, then stop listening.
/// Returns the subscription URL.
pub async fn upstream(replies: Vec<Reply>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        for reply in replies {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let mut buf = vec![0u8; 8192];
            let mut read = 0;
            while read < buf.len() {
                let n = sock.read(&mut buf[read..]).await.unwrap_or(0);
                read += n;
                if n == 0 || buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let resp = format!(
                "HTTP/1.1 {} Canned\r\n\
                 Content-Type: text/plain; charset=utf-8\r\n\
                 Subscription-Userinfo: upload=1; download=2; total=10\r\n\
                 X-Upstream-Secret: do-not-forward\r\n\
                 Content-Length: {}\r\n\
                 Connection: close\r\n\
                 \r\n{}",
                reply.status,
                reply.body.len(),
                reply.body
            );
            let _ = sock.write_all(resp.as_bytes()).await;
            let _ = sock.shutdown().await;
        }
    });
    format!("http://{addr}/api/sub?token=abc")
}

/// A URL nothing listens on.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/sub")
}

/// Copy the templates into `dir` and write a config pointing at `url`.
pub fn config(dir: &Path, url: &str) -> TranscoderConfig {
    for name in ["clash.yaml", "singbox.json", "custom.yaml"] {
        fs::copy(fixtures_dir().join(name), dir.join(name)).unwrap();
    }
    let text = format!(
        r#"
cache_dir: cache
http:
  connect_timeout_ms: 2000
  timeout_ms: 5000
classify:
  include: [香港, 日本, HK, JP]
  exclude: [剩余, 过期]
  rename:
    - {{from: 香港, to: HK}}
    - {{from: 日本, to: JP}}
    - {{from: 美国, to: US}}
sources:
  main: {{url: "{url}"}}
profiles:
  - name: singbox
    dialect: singbox
    template: singbox.json
    signatures: [SFA, sing-box]
    bandwidth: {{up_mbps: 20, down_mbps: 40}}
  - name: clash
    dialect: clash
    template: clash.yaml
    signatures: [clash, mihomo]
    bandwidth: {{up_mbps: 50, down_mbps: 200}}
    inject: true
inject:
  path: custom.yaml
  target_groups: [Google]
"#
    );
    let path = dir.join("subs.yaml");
    fs::write(&path, text).unwrap();
    TranscoderConfig::load(&path).unwrap()
}
