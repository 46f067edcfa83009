// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Microwallet hardware key custody driver (and CLI)
//!
//! The device holds private keys indexed by slot and performs key generation,
//! signing and public key export internally. This crate speaks the device's
//! key-value line protocol over any async byte stream and maps it onto wallet
//! operations.

use std::fmt::Debug;

use async_trait::async_trait;

pub mod codec;

/// Re-export transports for consumer use
pub mod transport;
use transport::*;

mod bank;
pub use bank::DeviceBank;

mod channel;
pub use channel::Transport;

mod error;
pub use error::Error;

mod handle;
pub use handle::WalletHandle;

mod types;
pub use types::{Curve, CurvePoint, Signature, Uint};

/// Outcome of a key update that may not be supported by the device
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[must_use]
pub enum KeyUpdate {
    /// Key was written to the device
    ///
    /// Returned by [Wallet] implementations whose backend accepts keys without
    /// a curve. [WalletHandle] always reports [KeyUpdate::Unsupported] as the
    /// line protocol requires a curve name.
    Applied,
    /// Operation is not supported, no device interaction took place
    Unsupported,
}

/// Signing capability of a single key slot
#[async_trait]
pub trait Wallet {
    /// Fetch the slot's public key
    async fn public_key(&self) -> Result<CurvePoint, Error>;

    /// Sign a message hash
    async fn sign(&self, msghash: &[u8]) -> Result<Signature, Error>;

    /// Check a signature against the slot's public key
    async fn verify(&self, msghash: &[u8], signature: &Signature) -> bool;

    /// Set raw private key bytes
    async fn set_private_key(&self, key: &[u8]) -> Result<KeyUpdate, Error>;
}

/// Key provisioning capability of a single key slot
#[async_trait]
pub trait WriteableWallet: Wallet {
    /// Fetch the curve name of the slot's key
    async fn curve_name(&self) -> Result<String, Error>;

    /// Generate a new random key for the named curve
    async fn set_random_private_key(&self, curve: &str) -> Result<(), Error>;

    /// Provision an explicit key for the named curve
    async fn set_curve_private_key(&self, curve: &str, key: &[u8]) -> Result<(), Error>;
}

/// Source of wallets by slot index
pub trait Bank {
    type Wallet: WriteableWallet;

    /// Open the wallet in the provided slot
    fn open(&self, index: u32) -> Self::Wallet;
}

/// Provider manages device discovery and connections
pub struct Provider {
    serial: SerialOptions,
}

/// Device discovery filter
#[derive(Copy, Clone, Debug, PartialEq, clap::ValueEnum, strum::Display)]
#[non_exhaustive]
pub enum Filter {
    /// List all devices available using supported transports
    Any,
    /// List only serial devices
    Serial,
    /// List only TCP (simulated) devices
    Tcp,
}

/// Device information for listing, used by connect
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceInfo {
    Serial(SerialOptions),
    Tcp(TcpOptions),
}

impl Default for Provider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider {
    /// Create a new provider using default serial settings
    pub fn new() -> Self {
        Self {
            serial: SerialOptions::default(),
        }
    }

    /// Set the baud rate for discovered serial devices
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.serial.baud_rate = baud_rate;
        self
    }

    /// Set the serial settings (baud rate and framing) for discovered
    /// devices, the port is replaced per device
    pub fn with_serial_options(mut self, opts: SerialOptions) -> Self {
        self.serial = opts;
        self
    }

    /// List available devices
    pub async fn list_devices(&self, filter: Filter) -> Vec<DeviceInfo> {
        let mut devices = vec![];

        #[cfg(feature = "transport_serial")]
        if filter == Filter::Any || filter == Filter::Serial {
            match tokio_serial::available_ports() {
                Ok(ports) => ports.into_iter().for_each(|p| {
                    devices.push(DeviceInfo::Serial(SerialOptions {
                        port: Some(p.port_name),
                        ..self.serial.clone()
                    }))
                }),
                Err(e) => log::warn!("Serial port enumeration failed: {}", e),
            }
        }

        #[cfg(feature = "transport_tcp")]
        if filter == Filter::Any || filter == Filter::Tcp {
            // Try connecting to default simulator port
            let o = TcpOptions::default();
            if let Ok(_t) = o.connect().await {
                devices.push(DeviceInfo::Tcp(o));
            }
        }

        log::debug!("Found {} devices: {:?}", devices.len(), devices);

        devices
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceInfo::Serial(o) => write!(
                f,
                "{:24} (Serial, {} baud)",
                o.port.as_deref().unwrap_or("default"),
                o.baud_rate
            ),
            DeviceInfo::Tcp(o) => write!(f, "{:24} (TCP, simulator)", o.addr),
        }
    }
}

/// Connect trait for supported transports
#[async_trait]
pub trait Connect<T: Transport> {
    type Options: Debug;

    /// Connect to the specified device
    async fn connect(&self, opts: &Self::Options) -> Result<DeviceBank<T>, Error>;
}

/// Generic connect implementation
#[cfg(any(feature = "transport_serial", feature = "transport_tcp"))]
#[async_trait]
impl Connect<GenericTransport> for Provider {
    type Options = DeviceInfo;

    async fn connect(&self, opts: &Self::Options) -> Result<DeviceBank<GenericTransport>, Error> {
        let t = match opts {
            #[cfg(feature = "transport_serial")]
            DeviceInfo::Serial(o) => GenericTransport::Serial(o.open()?),
            #[cfg(feature = "transport_tcp")]
            DeviceInfo::Tcp(o) => GenericTransport::Tcp(o.connect().await?),
            #[allow(unreachable_patterns)]
            _ => return Err(Error::NoDevice),
        };

        Ok(DeviceBank::from(t))
    }
}

/// Connect implementation for serial devices
#[cfg(feature = "transport_serial")]
#[async_trait]
impl Connect<SerialStream> for Provider {
    type Options = SerialOptions;

    async fn connect(&self, opts: &Self::Options) -> Result<DeviceBank<SerialStream>, Error> {
        Ok(DeviceBank::from(opts.open()?))
    }
}

/// Connect implementation for TCP (simulated) devices
#[cfg(feature = "transport_tcp")]
#[async_trait]
impl Connect<TcpStream> for Provider {
    type Options = TcpOptions;

    async fn connect(&self, opts: &Self::Options) -> Result<DeviceBank<TcpStream>, Error> {
        Ok(DeviceBank::from(opts.connect().await?))
    }
}
