//! subs: subscription transcoder CLI
//! - tracing 初始化（stderr）
//! - transcode / parse-uri / fetch

mod cli;
mod logging;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    logging::init_logging()?;

    let code = match args.command {
        cli::Commands::Transcode(a) => cli::transcode::run(a).await?,
        cli::Commands::ParseUri(a) => cli::parse::run(a)?,
        cli::Commands::Fetch(a) => cli::fetch::run(a).await?,
    };
    std::process::exit(code);
}
