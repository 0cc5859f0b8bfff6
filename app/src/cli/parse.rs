//! `subs parse-uri`: render node URIs without a template

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use std::io::BufRead;
use subs_transcode::groups::MergeOptions;
use subs_transcode::uri::{self, ParseOptions};
use subs_transcode::{clash, singbox, Dialect};

#[derive(Parser, Debug, Clone)]
#[command(name = "parse-uri")]
pub struct ParseUriArgs {
    /// Output dialect: clash | singbox
    #[arg(long, default_value = "clash")]
    pub dialect: Dialect,

    /// Node URIs; read from stdin, one per line, when omitted
    pub uris: Vec<String>,
}

pub fn run(args: ParseUriArgs) -> Result<i32> {
    let uris = if args.uris.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<Result<Vec<_>, _>>()
            .context("read stdin")?
    } else {
        args.uris
    };

    let opts = ParseOptions::for_dialect(args.dialect);
    let merge_opts = MergeOptions::new(opts.hysteria2_bandwidth);
    let mut rendered = Vec::new();
    let mut failed = 0usize;
    for line in uris.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
        match uri::parse(line, &opts) {
            Ok(node) => {
                let v = match args.dialect {
                    Dialect::Clash => Some(clash::render_proxy(&node)),
                    Dialect::SingBox => singbox::render_outbound(&node, &merge_opts),
                };
                rendered.extend(v.map(Value::Object));
            }
            Err(e) => {
                failed += 1;
                eprintln!("error: {e}");
            }
        }
    }

    match args.dialect {
        Dialect::Clash => {
            let text = serde_yaml::to_string(&json!({ "proxies": rendered })).context("encode yaml")?;
            print!("{text}");
        }
        Dialect::SingBox => {
            let text = serde_json::to_string_pretty(&json!({ "outbounds": rendered })).context("encode json")?;
            println!("{text}");
        }
    }
    Ok(if failed == 0 { 0 } else { 1 })
}
