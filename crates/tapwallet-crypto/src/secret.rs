//! Owned activation-secret buffer with a wipe-after-use contract.

use std::fmt;

use zeroize::Zeroizing;

/// An activation code held in memory between digitization and the engine's
/// secure-input request.
///
/// The buffer is zeroed when dropped, and consuming it via [`into_bytes`]
/// keeps the zeroing guarantee on the returned buffer. The enrollment flow
/// feeds the bytes into the engine one at a time and drops the buffer
/// immediately afterwards; no copy survives the feed.
///
/// [`into_bytes`]: ActivationSecret::into_bytes
pub struct ActivationSecret {
    bytes: Zeroizing<Vec<u8>>,
}

impl ActivationSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes.into()),
        }
    }

    pub fn from_zeroizing(bytes: Zeroizing<Vec<u8>>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consume the secret, yielding the self-wiping buffer for the feed.
    pub fn into_bytes(self) -> Zeroizing<Vec<u8>> {
        self.bytes
    }
}

impl From<&str> for ActivationSecret {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for ActivationSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActivationSecret({} bytes)", self.bytes.len())
    }
}
