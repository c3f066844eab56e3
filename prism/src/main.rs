use std::net::{Ipv4Addr, SocketAddr};

use args::Args;
use clap::Parser;
use config::Config;
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

mod args;

const DEFAULT_LISTEN_ADDRESS: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8000);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    let listen_address = args
        .listen
        .or(config.server.listen_address)
        .unwrap_or(DEFAULT_LISTEN_ADDRESS);

    let shutdown_signal = CancellationToken::new();

    {
        let shutdown_signal = shutdown_signal.clone();

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown_signal.cancel();
            }
        });
    }

    server::serve(ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter: args.log_filter.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        bound_addr_sender: None,
    })
    .await
}
