// app/tests/cli.rs
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use subs_transcode::fetch::{CacheEntry, CacheStore, FsCacheStore, HeaderSubset};

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../crates/subs-transcode/tests/fixtures")
}

fn subs() -> Command {
    let mut cmd = Command::cargo_bin("subs").expect("subs bin");
    cmd.env_remove("SUBS_CACHE_DIR").env_remove("SUBS_FRESHNESS_SECS");
    cmd
}

/// Config whose only source points nowhere, with a fresh cache entry for it.
fn workspace(dir: &Path) -> PathBuf {
    for name in ["clash.yaml", "singbox.json"] {
        fs::copy(fixtures().join(name), dir.join(name)).unwrap();
    }
    let config = dir.join("subs.json");
    fs::write(
        &config,
        r#"{
  "classify": {"include": ["香港", "日本"], "rename": [{"from": "香港", "to": "HK"}, {"from": "日本", "to": "JP"}]},
  "sources": {"main": {"url": "http://127.0.0.1:9/unreachable"}},
  "profiles": [
    {"name": "clash", "dialect": "clash", "template": "clash.yaml", "signatures": ["clash"], "bandwidth": {"up_mbps": 50, "down_mbps": 200}},
    {"name": "sfa", "dialect": "sing-box", "template": "singbox.json", "signatures": ["SFA"], "bandwidth": {"up_mbps": 20, "down_mbps": 40}}
  ]
}"#,
    )
    .unwrap();
    let mut headers = HeaderSubset::new();
    headers.insert("Subscription-Userinfo".into(), "upload=0; download=5; total=100".into());
    let doc = fs::read_to_string(fixtures().join("subscription.yaml")).unwrap();
    FsCacheStore::new(dir.join("cache"))
        .store("main", &CacheEntry::new(doc, headers))
        .unwrap();
    config
}

#[test]
fn help_lists_subcommands() {
    subs()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("transcode").and(predicate::str::contains("parse-uri")));
}

#[test]
fn parse_uri_renders_clash_proxies() {
    subs()
        .args(["parse-uri", "trojan://pw@hk.example.com:443?sni=hk.example.com#HK%2001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("name: HK 01").and(predicate::str::contains("type: trojan")));
}

#[test]
fn parse_uri_renders_singbox_outbounds() {
    subs()
        .args(["parse-uri", "--dialect", "sing-box", "hy2://pw@h.example.com:15005#hy"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"server_ports\"").and(predicate::str::contains("15000:16000")));
}

#[test]
fn parse_uri_reports_bad_input() {
    subs()
        .args(["parse-uri", "vmess://whatever"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("malformed uri"));
}

#[test]
fn transcode_from_fresh_cache_by_user_agent() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path());
    let out = dir.path().join("out").join("config.yaml");
    subs()
        .args(["transcode", "--source", "main", "--user-agent", "clash-verge/v1.7", "--print-headers"])
        .arg("-c")
        .arg(&config)
        .arg("-o")
        .arg(&out)
        .assert()
        .success()
        .stderr(predicate::str::contains("Subscription-Userinfo: upload=0; download=5; total=100"));
    let text = fs::read_to_string(out).unwrap();
    assert!(text.contains("proxy-groups:"));
    assert!(text.contains("HK 01"));
    assert!(text.contains("dns-out"));
}

#[test]
fn transcode_singbox_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path());
    subs()
        .args(["transcode", "--source", "main", "--profile", "sfa"])
        .arg("-c")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("{").and(predicate::str::contains("\"tag\":\"JP 01\"")));
}

#[test]
fn pipeline_errors_print_payload_and_exit_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path());
    subs()
        .args(["transcode", "--source", "main", "--user-agent", "curl/8.4"])
        .arg("-c")
        .arg(&config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("\"error\":\"unknown_profile\""));
    subs()
        .args(["transcode", "--source", "nope", "--profile", "clash"])
        .arg("-c")
        .arg(&config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown_source"));
}

#[test]
fn fetch_reports_cache_origin() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path());
    subs()
        .args(["fetch", "--source", "main"])
        .arg("-c")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"origin\": \"fresh_cache\"").and(predicate::str::contains("\"nodes\": 5")));
}
