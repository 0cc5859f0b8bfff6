// crates/subs-transcode/tests/fetch_cache.rs
mod common;

use common::{config, dead_url, fixture, upstream, Reply};
use std::fs;
use std::time::{Duration, SystemTime};
use subs_transcode::document::DocumentShape;
use subs_transcode::fetch::{CacheEntry, CacheStore, FetchOrigin, FsCacheStore, HeaderSubset};
use subs_transcode::groups::MergeOptions;
use subs_transcode::pipeline::{load_template, render};
use subs_transcode::{Dialect, TranscodeError, Transcoder, TranscoderConfig};

fn transcoder(cfg: TranscoderConfig) -> Transcoder {
    Transcoder::from_config(cfg).unwrap()
}

#[tokio::test]
async fn fetch_persists_raw_text_and_allowed_headers() {
    let dir = tempfile::tempdir().unwrap();
    let body = fixture("subscription.yaml");
    let url = upstream(vec![Reply::ok(body.clone())]).await;
    let t = transcoder(config(dir.path(), &url));

    let out = t.transcode("main", "clash", false).await.unwrap();
    assert_eq!(out.origin, FetchOrigin::Upstream);
    assert_eq!(out.content_type(), "text/yaml; charset=utf-8");
    assert_eq!(
        out.headers.get("Subscription-Userinfo").map(String::as_str),
        Some("upload=1; download=2; total=10")
    );
    assert_eq!(out.headers.len(), 1);
    assert_eq!(out.failures.len(), 1);

    let store = FsCacheStore::new(dir.path().join("cache"));
    assert_eq!(fs::read_to_string(store.document_path("main")).unwrap(), body);
    let meta = fs::read_to_string(store.meta_path("main")).unwrap();
    assert!(meta.contains("Subscription-Userinfo"));
    assert!(!meta.contains("X-Upstream-Secret"));
}

#[tokio::test]
async fn http_500_falls_back_to_byte_identical_output() {
    let dir = tempfile::tempdir().unwrap();
    let body = fixture("subscription.yaml");
    let url = upstream(vec![Reply::ok(body.clone()), Reply::status(500)]).await;
    let cfg = config(dir.path(), &url);
    let t = transcoder(cfg.clone());

    let fresh = t.transcode("main", "singbox", false).await.unwrap();
    assert_eq!(fresh.origin, FetchOrigin::Upstream);

    let degraded = t.transcode("main", "singbox", true).await.unwrap();
    assert_eq!(degraded.origin, FetchOrigin::Fallback);
    assert_eq!(degraded.headers, fresh.headers);

    let profile = cfg.profile("singbox").unwrap();
    let template = load_template(&profile.template, Dialect::SingBox).unwrap();
    let cached = FsCacheStore::new(&cfg.cache_dir).load("main").unwrap().unwrap();
    let (direct, _) = render(
        &cached.text,
        DocumentShape::Clash,
        Dialect::SingBox,
        template,
        &cfg.classify,
        &MergeOptions::new(profile.bandwidth),
    )
    .unwrap();
    assert_eq!(degraded.body, direct);
    assert_eq!(degraded.body, fresh.body);
}

#[tokio::test]
async fn fresh_cache_answers_without_network() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), &dead_url().await);
    FsCacheStore::new(&cfg.cache_dir)
        .store("main", &CacheEntry::new(fixture("subscription.yaml"), HeaderSubset::new()))
        .unwrap();

    let out = transcoder(cfg).transcode("main", "clash", false).await.unwrap();
    assert_eq!(out.origin, FetchOrigin::FreshCache);
}

#[tokio::test]
async fn stale_cache_survives_invalid_upstream_body() {
    let dir = tempfile::tempdir().unwrap();
    let url = upstream(vec![Reply::ok("<html>under maintenance</html>")]).await;
    let mut cfg = config(dir.path(), &url);
    cfg.freshness_secs = 60;

    let store = FsCacheStore::new(&cfg.cache_dir);
    let mut old = CacheEntry::new(fixture("subscription.yaml"), HeaderSubset::new());
    old.fetched_at = SystemTime::now() - Duration::from_secs(3600);
    store.store("main", &old).unwrap();

    let out = transcoder(cfg).transcode("main", "clash", false).await.unwrap();
    assert_eq!(out.origin, FetchOrigin::Fallback);
    assert_eq!(store.load("main").unwrap().unwrap().text, old.text);
}

#[tokio::test]
async fn no_network_and_no_cache_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let url = upstream(vec![Reply::status(500)]).await;
    let t = transcoder(config(dir.path(), &url));

    let err = t.transcode("main", "clash", false).await.unwrap_err();
    assert!(matches!(err, TranscodeError::UpstreamUnavailable { .. }));
    assert_eq!(err.status_code(), 503);
    assert_eq!(err.payload()["error"], "upstream_unavailable");
    assert!(!dir.path().join("cache").join("main.raw").exists());
}

#[tokio::test]
async fn unknown_source_and_profile() {
    let dir = tempfile::tempdir().unwrap();
    let t = transcoder(config(dir.path(), &dead_url().await));
    let err = t.transcode("other", "clash", false).await.unwrap_err();
    assert!(matches!(err, TranscodeError::UnknownSource(_)));
    let err = t.transcode_for_client("main", "curl/8.0", false).await.unwrap_err();
    assert!(matches!(err, TranscodeError::UnknownProfile(_)));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn client_signature_selects_dialect_and_injection() {
    let dir = tempfile::tempdir().unwrap();
    let url = upstream(vec![Reply::ok(fixture("subscription.yaml"))]).await;
    let t = transcoder(config(dir.path(), &url));

    let out = t.transcode_for_client("main", "ClashMetaForAndroid/2.10 mihomo", false).await.unwrap();
    assert_eq!(out.profile, "clash");
    assert_eq!(out.dialect, Dialect::Clash);
    let yaml: serde_json::Value = serde_yaml::from_slice(&out.body).unwrap();
    let google = yaml["proxy-groups"]
        .as_array()
        .unwrap()
        .iter()
        .find(|g| g["name"] == "Google")
        .unwrap();
    assert_eq!(google["proxies"][3], "My Home");

    // second request is served from the fresh cache written by the first
    let out = t.transcode_for_client("main", "SFA/1.9 (sing-box 1.9)", false).await.unwrap();
    assert_eq!(out.profile, "singbox");
    assert_eq!(out.origin, FetchOrigin::FreshCache);
    let json: serde_json::Value = serde_json::from_slice(&out.body).unwrap();
    assert!(json["outbounds"].as_array().unwrap().iter().all(|o| o["tag"] != "My Home"));
}
