// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Command line utility for interacting with microwallet devices

use clap::{Parser, Subcommand};
use log::{debug, error, info, LevelFilter};

use microwallet::{
    transport::{GenericTransport, SerialOptions, TcpOptions},
    Connect, Curve, DeviceBank, DeviceInfo, Filter, Provider, Signature, Transport,
};

mod helpers;
use helpers::*;

/// Microwallet command line utility
#[derive(Clone, PartialEq, Debug, Parser)]
struct Options {
    /// Supported transports for device discovery
    #[clap(long, value_enum, default_value = "any")]
    target: Filter,

    /// Device index (where more than one device is available)
    #[clap(long, default_value = "0")]
    device_index: usize,

    /// Serial settings, an explicit port bypasses discovery
    #[clap(flatten)]
    serial: SerialOptions,

    /// Explicit simulator address, bypasses discovery
    #[clap(long, conflicts_with = "port")]
    addr: Option<std::net::SocketAddr>,

    /// Key slot index
    #[clap(long, default_value = "0")]
    slot: u32,

    /// Subcommand to execute
    #[clap(subcommand)]
    cmd: Actions,

    /// Enable verbose logging
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, PartialEq, Debug, Subcommand)]
#[non_exhaustive]
enum Actions {
    /// List available devices
    List,

    /// Fetch the slot public key
    Pubkey,

    /// Fetch the slot curve name
    Curve,

    /// Sign a message hash
    Sign {
        /// hex-encoded message hash
        #[clap(long)]
        msghash: HexData,
    },

    /// Verify a signature against the slot public key
    Verify {
        /// hex-encoded message hash
        #[clap(long)]
        msghash: HexData,

        /// hex-encoded signature (R ‖ S)
        #[clap(long)]
        signature: String,
    },

    /// Provision an explicit private key
    SetKey {
        /// Curve name
        #[clap(long, default_value = "secp256k1")]
        curve: String,

        /// hex-encoded private key
        #[clap(long)]
        privkey: HexData,
    },

    /// Generate a random private key on the device
    GenKey {
        /// Curve name
        #[clap(long, default_value = "secp256k1")]
        curve: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Options::parse();

    // Setup logging
    simplelog::SimpleLogger::init(args.log_level, simplelog::Config::default()).unwrap();

    let p = Provider::new().with_serial_options(args.serial.clone());

    // Explicit transports skip discovery
    let device = match (&args.serial.port, &args.addr) {
        (Some(_), _) => Some(DeviceInfo::Serial(args.serial.clone())),
        (_, Some(addr)) => Some(DeviceInfo::Tcp(TcpOptions { addr: *addr })),
        _ => None,
    };

    let device = match device {
        Some(d) if args.cmd != Actions::List => d,
        _ => {
            debug!("Using transport: {:?}", args.target);

            // List available devices
            let devices = p.list_devices(args.target).await;
            if devices.is_empty() {
                return Err(anyhow::anyhow!("No devices found"));
            }

            // Handle list command
            if args.cmd == Actions::List {
                info!("Devices:");
                for (i, d) in devices.iter().enumerate() {
                    info!("  {}: {}", i, d);
                }

                return Ok(());
            }

            // Select device by index
            if args.device_index >= devices.len() {
                return Err(anyhow::anyhow!(
                    "Invalid device index: {} (max: {})",
                    args.device_index,
                    devices.len() - 1
                ));
            }

            devices[args.device_index].clone()
        }
    };

    debug!("Using device: {}", device);

    // Connect to device
    let b = match Connect::<GenericTransport>::connect(&p, &device).await {
        Ok(v) => v,
        Err(e) => {
            error!("Failed to connect to device: {}", device);
            return Err(e.into());
        }
    };

    // Execute command
    execute(b, args.slot, args.cmd).await?;

    Ok(())
}

/// Execute a command against the provided slot
async fn execute<T: Transport>(b: DeviceBank<T>, slot: u32, cmd: Actions) -> anyhow::Result<()> {
    debug!("Executing command: {:?}", cmd);

    let w = b.open(slot);

    match cmd {
        Actions::Pubkey => {
            info!("requesting public key for slot: {}", slot);

            let p = w.public_key().await?;

            info!("curve: {}", p.curve);
            info!("pubkey: {}", p.to_hex()?);
        }
        Actions::Curve => {
            let c = w.curve_name().await?;

            info!("curve: {}", c);
        }
        Actions::Sign { msghash } => {
            info!("signing hash: {} with slot: {}", msghash, slot);

            let sig = w.sign(msghash.as_ref()).await?;

            info!("signature: {}", sig.to_hex(Curve::Secp256k1)?);
        }
        Actions::Verify { msghash, signature } => {
            let sig = Signature::from_hex(Curve::Secp256k1, &signature)?;

            match w.verify(msghash.as_ref(), &sig).await {
                true => info!("signature valid"),
                false => return Err(anyhow::anyhow!("signature verification failed")),
            }
        }
        Actions::SetKey { curve, privkey } => {
            info!("setting {} private key for slot: {}", curve, slot);

            w.set_curve_private_key(&curve, privkey.as_ref()).await?;
        }
        Actions::GenKey { curve } => {
            info!("generating {} private key for slot: {}", curve, slot);

            w.set_random_private_key(&curve).await?;

            let p = w.public_key().await?;
            info!("pubkey: {}", p.to_hex()?);
        }
        Actions::List => unreachable!(),
    }

    Ok(())
}
