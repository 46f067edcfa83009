// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Bank of key slots over a single device transport

use std::{sync::Arc, time::Duration};

use crate::{
    channel::{Channel, Transport},
    Bank, WalletHandle,
};

/// Factory for [WalletHandle]s sharing one device transport.
///
/// This is generic over [Transport] types to support serial, TCP,
/// and in-memory connections
pub struct DeviceBank<T> {
    t: Arc<Channel<T>>,
    timeout: Option<Duration>,
}

impl<T> Clone for DeviceBank<T> {
    fn clone(&self) -> Self {
        Self {
            t: self.t.clone(),
            timeout: self.timeout,
        }
    }
}

/// Create a [DeviceBank] from a type implementing [Transport]
impl<T: Transport> From<T> for DeviceBank<T> {
    fn from(t: T) -> Self {
        Self {
            t: Arc::new(Channel::new(t)),
            timeout: None,
        }
    }
}

impl<T: Transport> DeviceBank<T> {
    pub fn new(t: T) -> Self {
        Self::from(t)
    }

    /// Bound each request / response round-trip by `timeout`.
    ///
    /// A request that times out leaves any late response unread on the
    /// transport, so the bank is then desynchronized and every further
    /// request fails with [Error::Desynchronized][crate::Error::Desynchronized]
    /// until a new bank is connected.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Open a handle for the provided slot index.
    ///
    /// This does not contact the device, a missing slot is reported by the
    /// device on the first operation.
    pub fn open(&self, index: u32) -> WalletHandle<T> {
        WalletHandle {
            index,
            timeout: self.timeout,
            t: self.t.clone(),
        }
    }

    /// Number of responses terminated by a bare tagged token rather than an
    /// empty line
    pub fn bare_terminations(&self) -> u64 {
        self.t.bare_terminations()
    }

    /// Check whether an incomplete exchange has desynchronized the transport
    pub fn is_desynchronized(&self) -> bool {
        self.t.is_desynchronized()
    }
}

impl<T: Transport> Bank for DeviceBank<T> {
    type Wallet = WalletHandle<T>;

    fn open(&self, index: u32) -> Self::Wallet {
        DeviceBank::open(self, index)
    }
}
