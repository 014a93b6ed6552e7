//! Content fingerprints and thumbnail cache keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 256-bit content digest, rendered as lowercase hex.
///
/// The digest itself is computed by the scanner (BLAKE3); this type only
/// carries and formats it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Wraps raw digest bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the digest as 64 lowercase hex characters.
    #[must_use]
    pub fn to_hex(&self) -> String {
        use fmt::Write;

        let mut out = String::with_capacity(64);
        for byte in self.0 {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Error returned when parsing a malformed hex fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid fingerprint: expected 64 hex characters")]
pub struct ParseFingerprintError;

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 || !s.is_ascii() {
            return Err(ParseFingerprintError);
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| ParseFingerprintError)?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Key of one rendered thumbnail: source content fingerprint plus width.
///
/// # Examples
///
/// ```
/// use shelf_core::{Fingerprint, ThumbKey};
///
/// let key = ThumbKey::new(Fingerprint::from_bytes([0xab; 32]), 300);
/// assert!(key.file_name().ends_with("-300.jpg"));
/// assert_eq!(ThumbKey::from_file_name(&key.file_name()), Some(key));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThumbKey {
    /// Fingerprint of the source file (bytes + mtime).
    pub fingerprint: Fingerprint,
    /// Target width in pixels.
    pub width: u32,
}

impl ThumbKey {
    /// Creates a key.
    #[inline]
    #[must_use]
    pub const fn new(fingerprint: Fingerprint, width: u32) -> Self {
        Self { fingerprint, width }
    }

    /// File name used by on-disk caches: `<hex>-<width>.jpg`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}-{}.jpg", self.fingerprint, self.width)
    }

    /// Parses a name produced by [`file_name`](Self::file_name).
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".jpg")?;
        let (hex, width) = stem.split_once('-')?;
        Some(Self {
            fingerprint: hex.parse().ok()?,
            width: width.parse().ok()?,
        })
    }
}

impl fmt::Display for ThumbKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.fingerprint, self.width)
    }
}
