// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Curve, point, and signature types with their fixed-width hex encodings

use std::fmt;

use crate::Error;

/// Elliptic curves recognised by the driver
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[non_exhaustive]
pub enum Curve {
    #[strum(serialize = "secp256k1")]
    Secp256k1,
}

impl Curve {
    /// Field element width in bytes
    pub const fn field_bytes(&self) -> usize {
        match self {
            Curve::Secp256k1 => 32,
        }
    }

    /// Parse a device-reported curve identifier
    pub fn from_name(name: &str) -> Result<Self, Error> {
        name.parse()
            .map_err(|_| Error::UnsupportedCurve(name.to_string()))
    }
}

/// Big-endian unsigned integer, stored without leading zero bytes
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Uint(Vec<u8>);

impl Uint {
    /// Create from big-endian bytes of any length
    pub fn from_be_bytes(b: &[u8]) -> Self {
        let start = b.iter().position(|v| *v != 0).unwrap_or(b.len());
        Self(b[start..].to_vec())
    }

    /// Minimal big-endian representation (empty for zero)
    pub fn as_be_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Big-endian representation left-padded to `width` bytes
    pub fn to_be_padded(&self, width: usize) -> Result<Vec<u8>, Error> {
        if self.0.len() > width {
            return Err(Error::Overflow(width));
        }

        let mut b = vec![0u8; width - self.0.len()];
        b.extend_from_slice(&self.0);

        Ok(b)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[u8; N]> for Uint {
    fn from(b: [u8; N]) -> Self {
        Self::from_be_bytes(&b)
    }
}

impl From<u64> for Uint {
    fn from(v: u64) -> Self {
        Self::from_be_bytes(&v.to_be_bytes())
    }
}

impl fmt::LowerHex for Uint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.split_first() {
            None => write!(f, "0"),
            Some((first, rest)) => {
                write!(f, "{:x}", first)?;
                for b in rest {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Uint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self)
    }
}

impl fmt::Debug for Uint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uint(0x{:x})", self)
    }
}

/// Public key as a point on a named curve
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurvePoint {
    pub curve: Curve,
    pub x: Uint,
    pub y: Uint,
}

impl CurvePoint {
    pub fn new(curve: Curve, x: impl Into<Uint>, y: impl Into<Uint>) -> Self {
        Self {
            curve,
            x: x.into(),
            y: y.into(),
        }
    }

    /// Decode a `pubkey` field (`X ‖ Y`, each at the curve field width)
    pub fn from_hex(curve: Curve, s: &str) -> Result<Self, Error> {
        let (x, y) = split_pair("pubkey", curve.field_bytes(), s)?;
        Ok(Self { curve, x, y })
    }

    /// Encode as a `pubkey` field, padding each coordinate to the field width
    pub fn to_hex(&self) -> Result<String, Error> {
        join_pair(self.curve.field_bytes(), &self.x, &self.y)
    }
}

/// ECDSA signature over a single message hash
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub r: Uint,
    pub s: Uint,
}

impl Signature {
    pub fn new(r: impl Into<Uint>, s: impl Into<Uint>) -> Self {
        Self {
            r: r.into(),
            s: s.into(),
        }
    }

    /// Decode a `signature` field (`R ‖ S`, each at the curve field width)
    pub fn from_hex(curve: Curve, s: &str) -> Result<Self, Error> {
        let (r, s) = split_pair("signature", curve.field_bytes(), s)?;
        Ok(Self { r, s })
    }

    /// Encode as a `signature` field for the provided curve
    pub fn to_hex(&self, curve: Curve) -> Result<String, Error> {
        join_pair(curve.field_bytes(), &self.r, &self.s)
    }
}

/// Split a fixed-width hex field into two big-endian integers
fn split_pair(field: &'static str, width: usize, s: &str) -> Result<(Uint, Uint), Error> {
    let expected = width * 4;
    if s.len() != expected {
        return Err(Error::InvalidLength {
            field,
            expected,
            actual: s.len(),
        });
    }

    let b = hex::decode(s)?;
    let (a, b) = b.split_at(width);

    Ok((Uint::from_be_bytes(a), Uint::from_be_bytes(b)))
}

fn join_pair(width: usize, a: &Uint, b: &Uint) -> Result<String, Error> {
    let mut buff = a.to_be_padded(width)?;
    buff.extend(b.to_be_padded(width)?);

    Ok(hex::encode(buff))
}
