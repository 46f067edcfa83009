// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Handle for a single key slot on a connected device
//!
//! Each operation issues one request frame carrying `method` and `index`,
//! waits for the response, and maps an `error` field to
//! [Error::DeviceRejected] before decoding the result fields.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, warn};

use crate::{
    channel::{Channel, Transport},
    codec::KeyValueFrame,
    Curve, CurvePoint, Error, KeyUpdate, Signature, Wallet, WriteableWallet,
};

/// Device method names
mod method {
    pub const GET_PUBKEY: &str = "getpubkey";
    pub const SIGN: &str = "signdeterministic";
    pub const VERIFY: &str = "verify";
    pub const SET_PRIVKEY: &str = "setprivkey";
    pub const GEN_PRIVKEY: &str = "genprivkey";
    pub const GET_CURVE: &str = "getcurve";
}

/// Wallet handle bound to a key slot on a shared transport.
///
/// See [DeviceBank::open][crate::DeviceBank::open] to create a [WalletHandle]
pub struct WalletHandle<T> {
    pub(crate) index: u32,
    pub(crate) timeout: Option<Duration>,
    pub(crate) t: Arc<Channel<T>>,
}

impl<T> Clone for WalletHandle<T> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            timeout: self.timeout,
            t: self.t.clone(),
        }
    }
}

impl<T: Transport> WalletHandle<T> {
    /// Slot index addressed by this handle
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Fetch the public key held in this slot
    pub async fn public_key(&self) -> Result<CurvePoint, Error> {
        debug!("Requesting public key for slot: {}", self.index);

        let mut resp = self.call(self.request(method::GET_PUBKEY)).await?;

        let curve = Curve::from_name(&take(&mut resp, "curve")?)?;
        CurvePoint::from_hex(curve, &take(&mut resp, "pubkey")?)
    }

    /// Sign a message hash with the key held in this slot
    pub async fn sign(&self, msghash: &[u8]) -> Result<Signature, Error> {
        debug!(
            "Requesting signature for slot: {}, hash: {}",
            self.index,
            hex::encode(msghash)
        );

        let mut req = self.request(method::SIGN);
        req.insert("msghash".into(), hex::encode(msghash));

        let mut resp = self.call(req).await?;

        // Signature halves are split at the secp256k1 field width
        Signature::from_hex(Curve::Secp256k1, &take(&mut resp, "signature")?)
    }

    /// Verify a signature against this slot's current public key
    ///
    /// Any failure to fetch the public key or complete the round-trip yields `false`.
    pub async fn verify(&self, msghash: &[u8], signature: &Signature) -> bool {
        match self.try_verify(msghash, signature).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Verification failed for slot {}: {}", self.index, e);
                false
            }
        }
    }

    async fn try_verify(&self, msghash: &[u8], signature: &Signature) -> Result<(), Error> {
        let pubkey = self.public_key().await?;

        debug!("Requesting verification for slot: {}", self.index);

        let mut req = self.request(method::VERIFY);
        req.insert("curve".into(), pubkey.curve.to_string());
        req.insert("pubkey".into(), pubkey.to_hex()?);
        req.insert("msghash".into(), hex::encode(msghash));
        req.insert("signature".into(), signature.to_hex(pubkey.curve)?);

        self.call(req).await.map(|_| ())
    }

    /// Set raw private key bytes without a curve
    ///
    /// The device protocol has no such operation, this performs no device
    /// interaction and always returns [KeyUpdate::Unsupported].
    pub async fn set_private_key(&self, _key: &[u8]) -> Result<KeyUpdate, Error> {
        warn!(
            "Ignoring curve-less private key for slot {}, use set_curve_private_key",
            self.index
        );

        Ok(KeyUpdate::Unsupported)
    }

    /// Provision an explicit private key for the named curve
    pub async fn set_curve_private_key(&self, curve: &str, key: &[u8]) -> Result<(), Error> {
        debug!("Setting {} private key for slot: {}", curve, self.index);

        let mut req = self.request(method::SET_PRIVKEY);
        req.insert("curve".into(), curve_arg(curve)?);
        req.insert("privkey".into(), hex::encode(key));

        self.call(req).await.map(|_| ())
    }

    /// Have the device generate a random private key for the named curve
    pub async fn set_random_private_key(&self, curve: &str) -> Result<(), Error> {
        debug!("Generating {} private key for slot: {}", curve, self.index);

        let mut req = self.request(method::GEN_PRIVKEY);
        req.insert("curve".into(), curve_arg(curve)?);

        self.call(req).await.map(|_| ())
    }

    /// Fetch the curve name of the key held in this slot
    pub async fn curve_name(&self) -> Result<String, Error> {
        debug!("Requesting curve for slot: {}", self.index);

        let mut resp = self.call(self.request(method::GET_CURVE)).await?;

        take(&mut resp, "curve")
    }

    /// Build a request frame with `method` and `index` set
    fn request(&self, method: &str) -> KeyValueFrame {
        let mut req = KeyValueFrame::new();
        req.insert("method".into(), method.to_string());
        req.insert("index".into(), self.index.to_string());
        req
    }

    /// Execute a request, mapping device `error` responses
    async fn call(&self, req: KeyValueFrame) -> Result<KeyValueFrame, Error> {
        let mut resp = match self.timeout {
            Some(d) => tokio::time::timeout(d, self.t.exchange(&req)).await??,
            None => self.t.exchange(&req).await?,
        };

        if let Some(e) = resp.remove("error") {
            return Err(Error::DeviceRejected(e));
        }

        Ok(resp)
    }
}

/// Check a caller supplied curve name fits on a single request line
fn curve_arg(curve: &str) -> Result<String, Error> {
    match curve.contains(['\n', '\r']) {
        true => Err(Error::InvalidArgument("curve")),
        false => Ok(curve.to_string()),
    }
}

/// Remove a required field from a response frame
fn take(resp: &mut KeyValueFrame, field: &'static str) -> Result<String, Error> {
    resp.remove(field).ok_or(Error::MissingField(field))
}

#[async_trait]
impl<T: Transport> Wallet for WalletHandle<T> {
    async fn public_key(&self) -> Result<CurvePoint, Error> {
        WalletHandle::public_key(self).await
    }

    async fn sign(&self, msghash: &[u8]) -> Result<Signature, Error> {
        WalletHandle::sign(self, msghash).await
    }

    async fn verify(&self, msghash: &[u8], signature: &Signature) -> bool {
        WalletHandle::verify(self, msghash, signature).await
    }

    async fn set_private_key(&self, key: &[u8]) -> Result<KeyUpdate, Error> {
        WalletHandle::set_private_key(self, key).await
    }
}

#[async_trait]
impl<T: Transport> WriteableWallet for WalletHandle<T> {
    async fn curve_name(&self) -> Result<String, Error> {
        WalletHandle::curve_name(self).await
    }

    async fn set_random_private_key(&self, curve: &str) -> Result<(), Error> {
        WalletHandle::set_random_private_key(self, curve).await
    }

    async fn set_curve_private_key(&self, curve: &str, key: &[u8]) -> Result<(), Error> {
        WalletHandle::set_curve_private_key(self, curve, key).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream},
        sync::mpsc,
    };

    use super::*;
    use crate::DeviceBank;

    const PUBKEY: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798\
                          483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8";

    /// Scripted device answering request `n` with `reply(n)` after the
    /// given delay, hanging up on `None`. Parsed requests are forwarded for
    /// inspection.
    fn sequenced<F>(
        mut reply: F,
    ) -> (
        DeviceBank<DuplexStream>,
        mpsc::UnboundedReceiver<HashMap<String, String>>,
    )
    where
        F: FnMut(usize) -> Option<(Duration, String)> + Send + 'static,
    {
        let (host, device) = tokio::io::duplex(4096);
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (r, mut w) = tokio::io::split(device);
            let mut lines = BufReader::new(r).lines();
            let mut req = HashMap::new();
            let mut n = 0;

            while let Ok(Some(l)) = lines.next_line().await {
                if !l.is_empty() {
                    let (k, v) = l.split_once(' ').unwrap();
                    req.insert(k.to_string(), v.to_string());
                    continue;
                }

                let _ = tx.send(std::mem::take(&mut req));

                let Some((delay, resp)) = reply(n) else {
                    break;
                };
                n += 1;

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if w.write_all(resp.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        (DeviceBank::new(host), rx)
    }

    /// Scripted device replying to every request with the same response
    fn scripted(
        response: impl Into<String>,
    ) -> (
        DeviceBank<DuplexStream>,
        mpsc::UnboundedReceiver<HashMap<String, String>>,
    ) {
        let response = response.into();
        sequenced(move |_| Some((Duration::ZERO, response.clone())))
    }

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn fetch_public_key() {
        let resp = format!(">>>curve secp256k1\n>>>pubkey {PUBKEY}\n\n");
        let (bank, mut rx) = scripted(resp);

        let p = bank.open(0).public_key().await.unwrap();

        assert_eq!(p.curve, Curve::Secp256k1);
        assert_eq!(p.x.as_be_bytes(), hex::decode(&PUBKEY[..64]).unwrap());
        assert_eq!(p.y.as_be_bytes(), hex::decode(&PUBKEY[64..]).unwrap());

        assert_eq!(
            rx.recv().await.unwrap(),
            fields(&[("method", "getpubkey"), ("index", "0")])
        );
    }

    #[tokio::test]
    async fn unknown_curve_rejected() {
        let (bank, _rx) = scripted(">>>curve p521\n>>>pubkey 00\n\n");

        let e = bank.open(0).public_key().await.unwrap_err();
        assert!(matches!(e, Error::UnsupportedCurve(c) if c == "p521"));
    }

    #[tokio::test]
    async fn short_pubkey_rejected() {
        let (bank, _rx) = scripted(">>>curve secp256k1\n>>>pubkey abcdef\n\n");

        let e = bank.open(0).public_key().await.unwrap_err();
        assert!(matches!(e, Error::InvalidLength { field: "pubkey", .. }));
    }

    #[tokio::test]
    async fn missing_field_rejected() {
        let (bank, _rx) = scripted(">>>pubkey abcdef\n\n");

        let e = bank.open(0).public_key().await.unwrap_err();
        assert!(matches!(e, Error::MissingField("curve")));
    }

    #[tokio::test]
    async fn sign_request_frame() {
        let resp = format!(">>>signature {PUBKEY}\n\n");
        let (bank, mut rx) = scripted(resp);

        let hash = [0xa5u8; 32];
        let sig = bank.open(2).sign(&hash).await.unwrap();

        assert_eq!(sig.r.as_be_bytes(), hex::decode(&PUBKEY[..64]).unwrap());
        assert_eq!(sig.s.as_be_bytes(), hex::decode(&PUBKEY[64..]).unwrap());

        let req = rx.recv().await.unwrap();
        assert_eq!(
            req,
            fields(&[
                ("method", "signdeterministic"),
                ("index", "2"),
                ("msghash", &"a5".repeat(32)),
            ])
        );
        assert_eq!(req["msghash"].len(), 64);
    }

    #[tokio::test]
    async fn device_errors_reject_every_operation() {
        let (bank, _rx) = scripted(">>>error bad index\n\n");
        let w = bank.open(9);

        let check = |e: Error| assert!(matches!(e, Error::DeviceRejected(m) if m == "bad index"));

        check(w.public_key().await.unwrap_err());
        check(w.sign(&[0u8; 32]).await.unwrap_err());
        check(w.curve_name().await.unwrap_err());
        check(w.set_random_private_key("secp256k1").await.unwrap_err());
        check(
            w.set_curve_private_key("secp256k1", &[1u8; 32])
                .await
                .unwrap_err(),
        );

        assert!(!w.verify(&[0u8; 32], &Signature::new(1u64, 1u64)).await);
    }

    #[tokio::test]
    async fn error_supersedes_result_fields() {
        let resp = format!(">>>curve secp256k1\n>>>pubkey {PUBKEY}\n>>>error locked\n\n");
        let (bank, _rx) = scripted(resp);

        let e = bank.open(0).public_key().await.unwrap_err();
        assert!(matches!(e, Error::DeviceRejected(m) if m == "locked"));
    }

    #[tokio::test]
    async fn verify_request_frame() {
        // Same response serves both the pubkey fetch and the verify round-trip
        let resp = format!(">>>curve secp256k1\n>>>pubkey {PUBKEY}\n\n");
        let (bank, mut rx) = scripted(resp);

        let sig = Signature::new(0x01u64, [0x22u8; 32]);
        assert!(bank.open(1).verify(&[0x33u8; 32], &sig).await);

        assert_eq!(rx.recv().await.unwrap()["method"], "getpubkey");

        let req = rx.recv().await.unwrap();
        assert_eq!(req["method"], "verify");
        assert_eq!(req["index"], "1");
        assert_eq!(req["curve"], "secp256k1");
        assert_eq!(req["pubkey"], PUBKEY);
        assert_eq!(req["msghash"], "33".repeat(32));
        assert_eq!(
            req["signature"],
            format!("{}01{}", "0".repeat(62), "22".repeat(32))
        );
    }

    #[tokio::test]
    async fn verify_false_on_closed_transport() {
        let (host, device) = tokio::io::duplex(64);
        drop(device);

        let bank = DeviceBank::new(host);
        assert!(!bank.open(0).verify(&[0u8; 32], &Signature::new(1u64, 1u64)).await);
    }

    #[tokio::test]
    async fn verify_false_when_device_hangs_up_mid_call() {
        // Answer the public key fetch, then drop the connection on verify
        let (bank, mut rx) = sequenced(|n| match n {
            0 => Some((
                Duration::ZERO,
                format!(">>>curve secp256k1\n>>>pubkey {PUBKEY}\n\n"),
            )),
            _ => None,
        });

        assert!(!bank.open(0).verify(&[0u8; 32], &Signature::new(1u64, 1u64)).await);

        assert_eq!(rx.recv().await.unwrap()["method"], "getpubkey");
        assert_eq!(rx.recv().await.unwrap()["method"], "verify");
    }

    #[tokio::test]
    async fn closed_transport_is_io_error() {
        let (host, device) = tokio::io::duplex(64);
        drop(device);

        let e = DeviceBank::new(host).open(0).curve_name().await.unwrap_err();
        assert!(matches!(e, Error::Io(_)));
    }

    #[tokio::test]
    async fn provisioning_requests() {
        let (bank, mut rx) = scripted(">>>status ok\n\n");
        let w = bank.open(3);

        w.set_curve_private_key("secp256k1", &[0x0fu8; 32])
            .await
            .unwrap();
        w.set_random_private_key("secp256k1").await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            fields(&[
                ("method", "setprivkey"),
                ("index", "3"),
                ("curve", "secp256k1"),
                ("privkey", &"0f".repeat(32)),
            ])
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            fields(&[
                ("method", "genprivkey"),
                ("index", "3"),
                ("curve", "secp256k1"),
            ])
        );
    }

    #[tokio::test]
    async fn curve_name_passes_through_unknown_curves() {
        let (bank, _rx) = scripted(">>>curve ed25519\n\n");
        assert_eq!(bank.open(0).curve_name().await.unwrap(), "ed25519");
    }

    #[tokio::test]
    async fn curveless_private_key_is_unsupported() {
        let (bank, mut rx) = scripted(">>>status ok\n\n");

        let r = bank.open(0).set_private_key(&[1u8; 32]).await.unwrap();
        assert_eq!(r, KeyUpdate::Unsupported);

        // No request reached the device
        drop(bank);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn bare_token_terminations_are_counted() {
        let (bank, _rx) = scripted(">>>curve secp256k1\n>>>end\n");
        let w = bank.open(0);

        assert_eq!(w.curve_name().await.unwrap(), "secp256k1");
        assert_eq!(w.curve_name().await.unwrap(), "secp256k1");
        assert_eq!(bank.bare_terminations(), 2);
    }

    #[tokio::test]
    async fn stalled_device_times_out() {
        let (host, _device) = tokio::io::duplex(4096);
        let bank = DeviceBank::new(host).with_timeout(Duration::from_millis(50));

        let e = bank.open(0).curve_name().await.unwrap_err();
        assert!(matches!(e, Error::RequestTimeout));
    }

    #[tokio::test]
    async fn late_response_is_never_paired_with_next_request() {
        let (bank, mut rx) = sequenced(|n| {
            let delay = match n {
                0 => Duration::from_millis(100),
                _ => Duration::ZERO,
            };
            Some((delay, format!(">>>curve reply-to-request-{}\n\n", n + 1)))
        });
        let bank = bank.with_timeout(Duration::from_millis(50));

        let e = bank.open(0).curve_name().await.unwrap_err();
        assert!(matches!(e, Error::RequestTimeout));
        assert!(bank.is_desynchronized());

        // Late reply to the first request is now sitting on the transport
        tokio::time::sleep(Duration::from_millis(100)).await;

        let e = bank.open(1).curve_name().await.unwrap_err();
        assert!(matches!(e, Error::Desynchronized));

        // Second request was never written
        assert_eq!(rx.recv().await.unwrap()["index"], "0");
        drop(bank);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn failed_exchange_desynchronizes_transport() {
        // Partial response then hang up
        let (host, device) = tokio::io::duplex(4096);
        let bank = DeviceBank::new(host);

        tokio::spawn(async move {
            let (r, mut w) = tokio::io::split(device);
            let mut lines = BufReader::new(r).lines();
            while let Ok(Some(l)) = lines.next_line().await {
                if l.is_empty() {
                    break;
                }
            }
            let _ = w.write_all(b">>>curve secp").await;
        });

        let w = bank.open(0);
        assert!(matches!(w.curve_name().await, Err(Error::Io(_))));
        assert!(matches!(w.curve_name().await, Err(Error::Desynchronized)));
    }

    #[tokio::test]
    async fn line_breaks_in_curve_rejected() {
        let (bank, mut rx) = scripted(">>>status ok\n\n");
        let w = bank.open(0);

        let e = w
            .set_random_private_key("secp256k1\nindex 3")
            .await
            .unwrap_err();
        assert!(matches!(e, Error::InvalidArgument("curve")));

        let e = w
            .set_curve_private_key("secp256k1\r", &[1u8; 32])
            .await
            .unwrap_err();
        assert!(matches!(e, Error::InvalidArgument("curve")));

        // Nothing was written and the transport is still usable
        assert!(!bank.is_desynchronized());
        drop(w);
        drop(bank);
        assert!(rx.recv().await.is_none());
    }
}
