// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Software key custody device for testing microwallet hosts
//!
//! Implements the device side of the line protocol: requests arrive as
//! `<key> <value>` lines ended by an empty line, responses are written as
//! `>>><key> <value>` lines ended by an empty line. Slots hold secp256k1 keys.

use std::collections::HashMap;

use k256::ecdsa::{
    signature::hazmat::{PrehashSigner, PrehashVerifier},
    Signature, SigningKey, VerifyingKey,
};
use log::{debug, trace};
use rand_core::OsRng;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream},
    sync::Mutex,
};

/// Curve name reported for every populated slot
pub const CURVE: &str = "secp256k1";

/// Simulator options
#[derive(Clone, Debug, PartialEq, clap::Args)]
pub struct Options {
    /// Number of key slots
    #[clap(long, default_value_t = 4)]
    pub slots: u32,

    /// Interleave untagged diagnostic lines with responses
    #[clap(long)]
    pub noise: bool,

    /// End responses with a bare `>>>end` token instead of an empty line
    #[clap(long)]
    pub bare_terminator: bool,

    /// Generate keys for every slot at startup
    #[clap(long)]
    pub populate: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            slots: 4,
            noise: false,
            bare_terminator: false,
            populate: false,
        }
    }
}

/// Device request handling failure, reported to the host as `>>>error <msg>`
#[derive(Copy, Clone, Debug, PartialEq, strum::Display)]
pub enum DeviceError {
    #[strum(serialize = "bad index")]
    BadIndex,
    #[strum(serialize = "slot empty")]
    SlotEmpty,
    #[strum(serialize = "unknown method")]
    UnknownMethod,
    #[strum(serialize = "unsupported curve")]
    UnsupportedCurve,
    #[strum(serialize = "bad argument")]
    BadArgument,
    #[strum(serialize = "signing failed")]
    SignFailed,
    #[strum(serialize = "invalid signature")]
    InvalidSignature,
}

/// Ordered response fields
pub type Response = Vec<(&'static str, String)>;

/// Simulated device state
pub struct Simulator {
    opts: Options,
    slots: Mutex<Vec<Option<SigningKey>>>,
}

impl Simulator {
    /// Create a new simulator with the provided options
    pub fn new(opts: Options) -> Self {
        let slots = (0..opts.slots)
            .map(|_| opts.populate.then(|| SigningKey::random(&mut OsRng)))
            .collect();

        Self {
            opts,
            slots: Mutex::new(slots),
        }
    }

    /// Serve requests on the provided stream until the host disconnects
    pub async fn serve<S: AsyncRead + AsyncWrite + Unpin>(&self, s: S) -> anyhow::Result<()> {
        let mut s = BufStream::new(s);
        let mut req = HashMap::new();
        let mut line = String::new();

        loop {
            line.clear();
            if s.read_line(&mut line).await? == 0 {
                debug!("Host disconnected");
                return Ok(());
            }

            let l = line.trim_end_matches(['\r', '\n']);
            if !l.is_empty() {
                match l.split_once(' ') {
                    Some((k, v)) => {
                        req.insert(k.to_string(), v.to_string());
                    }
                    None => trace!("Ignoring malformed request line: {:?}", l),
                }
                continue;
            }

            let resp = match self.handle(&req).await {
                Ok(r) => r,
                Err(e) => vec![("error", e.to_string())],
            };
            req.clear();

            self.write_response(&mut s, &resp).await?;
        }
    }

    async fn write_response<W: AsyncWrite + Unpin>(
        &self,
        w: &mut W,
        resp: &Response,
    ) -> anyhow::Result<()> {
        let mut out = String::new();

        if self.opts.noise {
            out.push_str("sim: processing request\n");
        }

        for (k, v) in resp {
            out.push_str(&format!(">>>{k} {v}\n"));
            if self.opts.noise {
                out.push_str("sim: tick\n");
            }
        }

        match self.opts.bare_terminator {
            true => out.push_str(">>>end\n"),
            false => out.push('\n'),
        }

        trace!("TX: {:?}", out);

        w.write_all(out.as_bytes()).await?;
        w.flush().await?;

        Ok(())
    }

    /// Execute a single parsed request
    pub async fn handle(&self, req: &HashMap<String, String>) -> Result<Response, DeviceError> {
        let method = req.get("method").map(String::as_str).unwrap_or_default();

        debug!("Handling '{}' request", method);

        match method {
            "getpubkey" => {
                let key = self.key(req).await?;
                Ok(vec![
                    ("curve", CURVE.to_string()),
                    ("pubkey", encode_pubkey(key.verifying_key())),
                ])
            }
            "getcurve" => {
                self.key(req).await?;
                Ok(vec![("curve", CURVE.to_string())])
            }
            "signdeterministic" => {
                let key = self.key(req).await?;
                let hash = hex_arg(req, "msghash")?;

                let sig: Signature = key
                    .sign_prehash(&hash)
                    .map_err(|_| DeviceError::SignFailed)?;

                Ok(vec![("signature", hex::encode(sig.to_bytes()))])
            }
            "verify" => {
                check_curve(req)?;

                let mut sec1 = vec![0x04];
                sec1.extend(hex_arg(req, "pubkey")?);
                let key =
                    VerifyingKey::from_sec1_bytes(&sec1).map_err(|_| DeviceError::BadArgument)?;

                let sig = Signature::from_slice(&hex_arg(req, "signature")?)
                    .map_err(|_| DeviceError::BadArgument)?;

                key.verify_prehash(&hex_arg(req, "msghash")?, &sig)
                    .map_err(|_| DeviceError::InvalidSignature)?;

                Ok(vec![("status", "ok".to_string())])
            }
            "setprivkey" => {
                check_curve(req)?;

                let key = SigningKey::from_slice(&hex_arg(req, "privkey")?)
                    .map_err(|_| DeviceError::BadArgument)?;
                self.set_key(req, key).await?;

                Ok(vec![("status", "ok".to_string())])
            }
            "genprivkey" => {
                check_curve(req)?;

                self.set_key(req, SigningKey::random(&mut OsRng)).await?;

                Ok(vec![("status", "ok".to_string())])
            }
            _ => Err(DeviceError::UnknownMethod),
        }
    }

    /// Fetch the key held in the requested slot
    async fn key(&self, req: &HashMap<String, String>) -> Result<SigningKey, DeviceError> {
        let i = index(req)?;

        match self.slots.lock().await.get(i) {
            Some(Some(k)) => Ok(k.clone()),
            Some(None) => Err(DeviceError::SlotEmpty),
            None => Err(DeviceError::BadIndex),
        }
    }

    async fn set_key(
        &self,
        req: &HashMap<String, String>,
        key: SigningKey,
    ) -> Result<(), DeviceError> {
        let i = index(req)?;

        match self.slots.lock().await.get_mut(i) {
            Some(slot) => {
                *slot = Some(key);
                Ok(())
            }
            None => Err(DeviceError::BadIndex),
        }
    }
}

fn index(req: &HashMap<String, String>) -> Result<usize, DeviceError> {
    req.get("index")
        .and_then(|v| v.parse().ok())
        .ok_or(DeviceError::BadIndex)
}

fn check_curve(req: &HashMap<String, String>) -> Result<(), DeviceError> {
    match req.get("curve").map(String::as_str) {
        Some(CURVE) => Ok(()),
        _ => Err(DeviceError::UnsupportedCurve),
    }
}

fn hex_arg(req: &HashMap<String, String>, name: &str) -> Result<Vec<u8>, DeviceError> {
    req.get(name)
        .and_then(|v| hex::decode(v).ok())
        .ok_or(DeviceError::BadArgument)
}

/// Encode a public key as fixed-width `X ‖ Y` hex
pub fn encode_pubkey(key: &VerifyingKey) -> String {
    // Uncompressed SEC1 encoding: 0x04 ‖ X ‖ Y
    let p = key.to_encoded_point(false);
    hex::encode(&p.as_bytes()[1..])
}
