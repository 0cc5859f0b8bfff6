//! `subs transcode`: what the dispatcher does for one client request

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "transcode")]
#[command(group(ArgGroup::new("client").required(true).args(["profile", "user_agent"])))]
pub struct TranscodeArgs {
    /// Transcoder configuration (YAML or JSON)
    #[arg(short = 'c', long = "config", env = "SUBS_CONFIG")]
    pub config: PathBuf,

    /// Subscription source key
    #[arg(long)]
    pub source: String,

    /// Profile name
    #[arg(long)]
    pub profile: Option<String>,

    /// Pick the profile by client user agent instead
    #[arg(long = "user-agent")]
    pub user_agent: Option<String>,

    /// Skip the fresh cache and go to upstream
    #[arg(long)]
    pub refresh: bool,

    /// Write the rendered config here instead of stdout
    #[arg(short = 'o', long = "output", value_name = "OUTPUT_PATH")]
    pub output: Option<PathBuf>,

    /// Print forwarded upstream headers to stderr as `Name: value`
    #[arg(long = "print-headers")]
    pub print_headers: bool,
}

pub async fn run(args: TranscodeArgs) -> Result<i32> {
    let transcoder = super::open(&args.config)?;
    let result = match (&args.profile, &args.user_agent) {
        (Some(name), _) => transcoder.transcode(&args.source, name, args.refresh).await,
        (None, Some(ua)) => transcoder.transcode_for_client(&args.source, ua, args.refresh).await,
        (None, None) => anyhow::bail!("either --profile or --user-agent is required"),
    };
    let rendered = match result {
        Ok(r) => r,
        Err(e) => return Ok(super::report(&e)),
    };

    if args.print_headers {
        for (name, value) in &rendered.headers {
            eprintln!("{name}: {value}");
        }
    }

    match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
            }
            fs::write(path, &rendered.body).with_context(|| format!("write {}", path.display()))?;
            eprintln!("{}", path.display());
        }
        None => {
            let mut out = std::io::stdout().lock();
            out.write_all(&rendered.body).context("write stdout")?;
            out.flush().context("flush stdout")?;
        }
    }
    tracing::info!(
        profile = %rendered.profile,
        dialect = %rendered.dialect,
        origin = rendered.origin.as_str(),
        bytes = rendered.body.len(),
        "config rendered"
    );
    Ok(0)
}
