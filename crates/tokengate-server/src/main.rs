//! tokengate entry point

#![warn(clippy::all)]

use clap::Parser;
use tokengate_server::ServerArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    args.logging().init()?;

    let config = args.into_config()?;
    tokengate_server::serve(config).await
}
