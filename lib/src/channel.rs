// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Shared request / response channel over a single transport

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{trace, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite, BufStream},
    sync::Mutex,
};

use crate::{
    codec::{read_frame, write_frame, KeyValueFrame, Terminator},
    Error,
};

/// Byte stream connecting host and device
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Transport shared between wallet handles, one round-trip at a time
pub(crate) struct Channel<T> {
    stream: Mutex<BufStream<T>>,
    bare_terminations: AtomicU64,
    desynced: AtomicBool,
}

/// Marks the channel desynchronized when dropped before completion
struct Pending<'a> {
    desynced: &'a AtomicBool,
    complete: bool,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.complete {
            warn!("Exchange abandoned mid-flight, transport desynchronized");
            self.desynced.store(true, Ordering::Release);
        }
    }
}

impl<T: Transport> Channel<T> {
    pub(crate) fn new(t: T) -> Self {
        Self {
            stream: Mutex::new(BufStream::new(t)),
            bare_terminations: AtomicU64::new(0),
            desynced: AtomicBool::new(false),
        }
    }

    /// Write a request and read the matching response
    ///
    /// The transport lock is held across both halves so concurrent handles
    /// cannot interleave frames. An exchange that fails or is cancelled
    /// before its response is fully read (eg. on timeout) leaves the stream
    /// position unknown, every later exchange then fails with
    /// [Error::Desynchronized].
    pub(crate) async fn exchange(&self, req: &KeyValueFrame) -> Result<KeyValueFrame, Error> {
        let mut s = self.stream.lock().await;

        if self.desynced.load(Ordering::Acquire) {
            return Err(Error::Desynchronized);
        }

        // Dropped before the lock guard, so waiters observe the flag
        let mut pending = Pending {
            desynced: &self.desynced,
            complete: false,
        };

        write_frame(&mut *s, req).await?;

        let (resp, terminator) = read_frame(&mut *s).await?;

        pending.complete = true;

        trace!("RX: {:?} ({})", resp, terminator);

        if terminator == Terminator::BareToken {
            let n = self.bare_terminations.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                "Response to '{}' ended by bare tagged token ({} so far)",
                req.get("method").map(String::as_str).unwrap_or("?"),
                n
            );
        }

        Ok(resp)
    }

    pub(crate) fn bare_terminations(&self) -> u64 {
        self.bare_terminations.load(Ordering::Relaxed)
    }

    pub(crate) fn is_desynchronized(&self) -> bool {
        self.desynced.load(Ordering::Acquire)
    }
}
