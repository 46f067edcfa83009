//! Generic transport abstraction for hiding underlying transport types
//!
// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

#[cfg(feature = "transport_serial")]
pub use tokio_serial::SerialStream;

#[cfg(feature = "transport_tcp")]
pub use tokio::net::TcpStream;

#[cfg(feature = "transport_serial")]
use crate::Error;

/// Default serial port on unix hosts (CP210x USB to UART bridge)
pub const DEFAULT_SERIAL_PORT: &str = "/dev/tty.SLAB_USBtoUART";

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default simulator TCP port
pub const DEFAULT_TCP_PORT: u16 = 1237;

/// Default serial data bits
pub const DEFAULT_DATA_BITS: u8 = 8;

/// Default serial stop bits
pub const DEFAULT_STOP_BITS: u8 = 1;

/// Serial port options, no parity
#[derive(Clone, PartialEq, Debug, clap::Args)]
pub struct SerialOptions {
    /// Serial port (defaults to the platform device)
    #[clap(long)]
    pub port: Option<String>,

    /// Serial baud rate
    #[clap(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud_rate: u32,

    /// Serial data bits (5-8)
    #[clap(long, default_value_t = DEFAULT_DATA_BITS)]
    pub data_bits: u8,

    /// Serial stop bits (1 or 2)
    #[clap(long, default_value_t = DEFAULT_STOP_BITS)]
    pub stop_bits: u8,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            stop_bits: DEFAULT_STOP_BITS,
        }
    }
}

#[cfg(feature = "transport_serial")]
impl SerialOptions {
    /// Open the configured (or platform default) serial port
    pub fn open(&self) -> Result<SerialStream, Error> {
        use tokio_serial::{Parity, SerialPortBuilderExt};

        // Validate framing before touching the port
        let (data_bits, stop_bits) = (self.data_bits()?, self.stop_bits()?);

        let port = match &self.port {
            Some(p) => p.clone(),
            None => default_port()?,
        };

        log::debug!(
            "Opening serial port: {} ({} baud, {}N{})",
            port,
            self.baud_rate,
            self.data_bits,
            self.stop_bits
        );

        let s = tokio_serial::new(&port, self.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(Parity::None)
            .open_native_async()?;

        Ok(s)
    }

    fn data_bits(&self) -> Result<tokio_serial::DataBits, Error> {
        use tokio_serial::DataBits;

        match self.data_bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            _ => Err(Error::InvalidArgument("data_bits")),
        }
    }

    fn stop_bits(&self) -> Result<tokio_serial::StopBits, Error> {
        use tokio_serial::StopBits;

        match self.stop_bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            _ => Err(Error::InvalidArgument("stop_bits")),
        }
    }
}

/// Resolve the platform default serial port
#[cfg(all(feature = "transport_serial", not(windows)))]
pub fn default_port() -> Result<String, Error> {
    Ok(DEFAULT_SERIAL_PORT.to_string())
}

/// Resolve the platform default serial port (first enumerated COM port)
#[cfg(all(feature = "transport_serial", windows))]
pub fn default_port() -> Result<String, Error> {
    tokio_serial::available_ports()?
        .into_iter()
        .next()
        .map(|p| p.port_name)
        .ok_or(Error::NoDevice)
}

/// TCP options for connecting to a simulated device
#[derive(Clone, PartialEq, Debug, clap::Args)]
pub struct TcpOptions {
    /// Simulator address
    #[clap(long, default_value_t = std::net::SocketAddr::from(([127, 0, 0, 1], DEFAULT_TCP_PORT)))]
    pub addr: std::net::SocketAddr,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            addr: ([127, 0, 0, 1], DEFAULT_TCP_PORT).into(),
        }
    }
}

#[cfg(feature = "transport_tcp")]
impl TcpOptions {
    /// Connect to the configured simulator
    pub async fn connect(&self) -> io::Result<TcpStream> {
        log::debug!("Connecting to {}", self.addr);

        let s = TcpStream::connect(self.addr).await?;
        s.set_nodelay(true)?;

        Ok(s)
    }
}

/// Generic device transport (abstract over transport types)
#[derive(strum::Display)]
#[non_exhaustive]
pub enum GenericTransport {
    #[cfg(feature = "transport_serial")]
    Serial(SerialStream),
    #[cfg(feature = "transport_tcp")]
    Tcp(TcpStream),
}

/// Convert a serial stream into a generic transport
#[cfg(feature = "transport_serial")]
impl From<SerialStream> for GenericTransport {
    fn from(t: SerialStream) -> Self {
        Self::Serial(t)
    }
}

/// Convert a TCP stream into a generic transport
#[cfg(feature = "transport_tcp")]
impl From<TcpStream> for GenericTransport {
    fn from(t: TcpStream) -> Self {
        Self::Tcp(t)
    }
}

impl AsyncRead for GenericTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            #[cfg(feature = "transport_serial")]
            Self::Serial(t) => Pin::new(t).poll_read(cx, buf),
            #[cfg(feature = "transport_tcp")]
            Self::Tcp(t) => Pin::new(t).poll_read(cx, buf),
            #[cfg(not(all(feature = "transport_serial", feature = "transport_tcp")))]
            t => panic!("Transport {} unavailable", t),
        }
    }
}

impl AsyncWrite for GenericTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            #[cfg(feature = "transport_serial")]
            Self::Serial(t) => Pin::new(t).poll_write(cx, buf),
            #[cfg(feature = "transport_tcp")]
            Self::Tcp(t) => Pin::new(t).poll_write(cx, buf),
            #[cfg(not(all(feature = "transport_serial", feature = "transport_tcp")))]
            t => panic!("Transport {} unavailable", t),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            #[cfg(feature = "transport_serial")]
            Self::Serial(t) => Pin::new(t).poll_flush(cx),
            #[cfg(feature = "transport_tcp")]
            Self::Tcp(t) => Pin::new(t).poll_flush(cx),
            #[cfg(not(all(feature = "transport_serial", feature = "transport_tcp")))]
            t => panic!("Transport {} unavailable", t),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            #[cfg(feature = "transport_serial")]
            Self::Serial(t) => Pin::new(t).poll_shutdown(cx),
            #[cfg(feature = "transport_tcp")]
            Self::Tcp(t) => Pin::new(t).poll_shutdown(cx),
            #[cfg(not(all(feature = "transport_serial", feature = "transport_tcp")))]
            t => panic!("Transport {} unavailable", t),
        }
    }
}
