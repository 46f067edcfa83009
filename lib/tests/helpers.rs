use std::str::FromStr;

use log::{debug, LevelFilter};
use simplelog::SimpleLogger;
use tokio::io::DuplexStream;

use microwallet::DeviceBank;
use microwallet_sim::{Options, Simulator};

/// Setup an in-process simulator connected to a [DeviceBank]
pub fn setup(opts: Options) -> DeviceBank<DuplexStream> {
    // Setup logging
    let log_level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Debug,
    };

    let _ = SimpleLogger::init(log_level, simplelog::Config::default());

    let (host, device) = tokio::io::duplex(4096);
    let sim = Simulator::new(opts);

    tokio::spawn(async move {
        if let Err(e) = sim.serve(device).await {
            debug!("Simulator exited: {}", e);
        }
    });

    DeviceBank::new(host)
}
