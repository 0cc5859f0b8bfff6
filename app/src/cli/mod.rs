pub mod fetch;
pub mod parse;
pub mod transcode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use subs_transcode::{Transcoder, TranscoderConfig};

#[derive(Parser, Debug)]
#[command(name = "subs")]
#[command(about = "Subscription proxy config transcoder", long_about = None)]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a subscription for one client profile
    Transcode(transcode::TranscodeArgs),
    /// Parse node URIs and print them in a dialect
    ParseUri(parse::ParseUriArgs),
    /// 刷新或查看某个订阅源的缓存
    Fetch(fetch::FetchArgs),
}

/// Load the config file and build a transcoder with a filesystem cache.
pub(crate) fn open(config: &Path) -> Result<Transcoder> {
    let cfg = TranscoderConfig::load(config).with_context(|| format!("load config {}", config.display()))?;
    Transcoder::from_config(cfg).context("build upstream http client")
}

/// Pipeline failures go to stderr as the structured payload; exit code 1.
pub(crate) fn report(err: &subs_transcode::TranscodeError) -> i32 {
    tracing::error!(kind = err.kind(), status = err.status_code(), error = %err, "request failed");
    eprintln!("{}", err.payload());
    1
}
