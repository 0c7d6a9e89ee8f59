//! Device keys and key generation.
//!
//! A [`DeviceKey`] is the short identifier a device is published under and a
//! client presents to join it.  Keys are a lowercase hexadecimal rendering of
//! a few random bytes (3 bytes → 6 characters by default), so collisions are
//! possible and the registry must detect them.  The generator itself never
//! checks for collisions; [`generate_free_key`] layers the bounded retry on
//! top of any [`KeyGenerator`].

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Number of random bytes drawn for each key.
pub const DEFAULT_KEY_BYTES: usize = 3;

/// Opaque, printable identifier naming one device session.
///
/// Keys issued by [`OsKeyGenerator`] are lowercase hex, but keys arriving from
/// a client request path are taken verbatim: an unknown or malformed key
/// simply fails to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DeviceKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DeviceKey {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Source of candidate device keys.
///
/// Implementations must be shareable across connection tasks.
#[cfg_attr(test, mockall::automock)]
pub trait KeyGenerator: Send + Sync {
    /// Draws one candidate key.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::EntropyUnavailable`] if the random source fails.
    fn generate(&self) -> Result<DeviceKey, RelayError>;
}

/// Key generator backed by the operating system's CSPRNG.
#[derive(Debug, Clone)]
pub struct OsKeyGenerator {
    key_bytes: usize,
}

impl OsKeyGenerator {
    /// Creates a generator that draws `key_bytes` random bytes per key.
    ///
    /// A value of 0 is bumped to 1 so that a key is never empty.
    pub fn new(key_bytes: usize) -> Self {
        Self {
            key_bytes: key_bytes.max(1),
        }
    }
}

impl Default for OsKeyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_BYTES)
    }
}

impl KeyGenerator for OsKeyGenerator {
    fn generate(&self) -> Result<DeviceKey, RelayError> {
        let mut bytes = vec![0u8; self.key_bytes];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| RelayError::EntropyUnavailable(e.to_string()))?;
        Ok(DeviceKey(hex::encode(bytes)))
    }
}

/// Draws keys from `generator` until one is not `taken`, giving up after
/// `attempts` draws.
///
/// Entropy failures are returned immediately; they are not retried.
///
/// # Errors
///
/// - [`RelayError::EntropyUnavailable`] from the generator.
/// - [`RelayError::KeySpaceExhausted`] if every candidate was taken.
pub fn generate_free_key<F>(
    generator: &dyn KeyGenerator,
    attempts: usize,
    mut taken: F,
) -> Result<DeviceKey, RelayError>
where
    F: FnMut(&DeviceKey) -> bool,
{
    for _ in 0..attempts {
        let candidate = generator.generate()?;
        if !taken(&candidate) {
            return Ok(candidate);
        }
    }
    Err(RelayError::KeySpaceExhausted { attempts })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
