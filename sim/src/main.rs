// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::{net::SocketAddr, sync::Arc};

use clap::Parser;
use log::{debug, info, warn, LevelFilter};
use tokio::net::TcpListener;

use microwallet_sim::*;

/// Microwallet device simulator
///
/// Serves the device side of the line protocol over TCP so hosts
/// can be exercised without hardware (see `microwallet-cli --addr`).
#[derive(Clone, Debug, PartialEq, Parser)]
pub struct Args {
    /// Listen address
    #[clap(long, env, default_value = "127.0.0.1:1237")]
    listen: SocketAddr,

    #[clap(flatten)]
    sim_opts: Options,

    /// Log level
    #[clap(long, default_value = "debug")]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging
    let _ = simplelog::SimpleLogger::init(args.log_level, simplelog::Config::default());

    // Slots persist across host connections
    let sim = Arc::new(Simulator::new(args.sim_opts));

    let listener = TcpListener::bind(args.listen).await?;

    info!("Simulator listening on {}", args.listen);

    loop {
        tokio::select!(
            // Accept host connections
            r = listener.accept() => {
                let (stream, addr) = r?;
                debug!("Host connected: {}", addr);

                let sim = sim.clone();
                tokio::spawn(async move {
                    if let Err(e) = sim.serve(stream).await {
                        warn!("Connection {} failed: {}", addr, e);
                    }
                });
            }
            // Exit on ctrl + c
            _ = tokio::signal::ctrl_c() => {
                debug!("Exit!");
                return Ok(());
            },
        );
    }
}
