//! Single-owner secret buffer.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Secret bytes collected from an authorizer.
///
/// The buffer is not `Clone`, never prints its contents, and is zeroed on
/// drop. Call [`Secret::scrub`] to wipe it as soon as it has been used.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Secret {
    bytes: Vec<u8>,
}

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }

    /// Overwrites the whole allocation, spare capacity included, with zeroes
    /// and leaves the buffer empty. The allocation itself is kept.
    pub fn scrub(&mut self) {
        self.bytes.zeroize();
    }

    /// True once [`Secret::scrub`] has run: no readable bytes remain.
    pub fn is_scrubbed(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}
