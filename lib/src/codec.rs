// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Line protocol codec
//!
//! Requests are written as `<key> <value>` lines followed by an empty line.
//! Responses are `>>><key> <value>` lines, terminated by either an empty line
//! or a tagged line with no space. Lines without the response tag are device
//! diagnostics and are skipped.
//!
//! ## Example exchange:
//! ```text
//! host   -> method getpubkey
//! host   -> index 0
//! host   ->
//! device <- boot: ok
//! device <- >>>curve secp256k1
//! device <- >>>pubkey 79be667e...
//! device <-
//! ```

use std::collections::HashMap;

use log::trace;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::Error;

/// Prefix marking protocol lines in the device response stream
pub const RESPONSE_TAG: &str = ">>>";

/// Maximum accepted response line length in bytes, including the newline
pub const MAX_LINE_LEN: usize = 4096;

/// Unordered key-value payload for a single request or response
pub type KeyValueFrame = HashMap<String, String>;

/// Condition that ended a response frame
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
pub enum Terminator {
    /// Empty line, the normal terminator
    Blank,
    /// Tagged line containing no space, accepted for compatibility
    BareToken,
}

/// Render a request frame to its wire representation
pub fn encode(frame: &KeyValueFrame) -> String {
    let mut s = String::new();

    for (k, v) in frame {
        s.push_str(k);
        s.push(' ');
        s.push_str(v);
        s.push('\n');
    }
    s.push('\n');

    s
}

/// Write a request frame to the provided stream and flush
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    frame: &KeyValueFrame,
) -> Result<(), Error> {
    let s = encode(frame);

    trace!("TX: {:?}", s);

    w.write_all(s.as_bytes()).await?;
    w.flush().await?;

    Ok(())
}

/// Read a response frame from the provided stream
///
/// Read failures (including end of stream) are returned as [Error::Io] and
/// discard any partially accumulated pairs. Lines longer than
/// [MAX_LINE_LEN] fail with [std::io::ErrorKind::InvalidData].
pub async fn read_frame<R: AsyncBufRead + Unpin>(
    r: &mut R,
) -> Result<(KeyValueFrame, Terminator), Error> {
    let mut frame = KeyValueFrame::new();
    let mut buff = Vec::with_capacity(256);

    loop {
        buff.clear();

        let n = (&mut *r)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', &mut buff)
            .await?;

        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }

        if n == MAX_LINE_LEN && buff.last() != Some(&b'\n') {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("response line exceeds {MAX_LINE_LEN} bytes"),
            )
            .into());
        }

        let raw = String::from_utf8_lossy(&buff);
        let line = raw.strip_suffix('\n').unwrap_or(&raw);
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return Ok((frame, Terminator::Blank));
        }

        let Some(tagged) = line.strip_prefix(RESPONSE_TAG) else {
            trace!("Skipping untagged line: {:?}", line);
            continue;
        };

        match tagged.split_once(' ') {
            Some((k, v)) => {
                frame.insert(k.to_string(), v.to_string());
            }
            None => return Ok((frame, Terminator::BareToken)),
        }
    }
}
