//! Key material wrappers. Both types wipe themselves on drop.

use rand::RngCore;
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// A 256-bit cipher key (KEK, device key, or a borrowed view of the master secret).
#[derive(Clone)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The device master secret that keys every passcode-bound record.
///
/// All-zero means "not available" (locked, or never unwrapped).
pub struct MasterSecret {
    bytes: [u8; KEY_SIZE],
}

impl MasterSecret {
    pub fn zeroed() -> Self {
        Self {
            bytes: [0u8; KEY_SIZE],
        }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Draw a fresh secret from `rng`, retrying in the (astronomically
    /// unlikely) case it comes out all-zero.
    pub fn generate<R: RngCore>(rng: &mut R) -> Self {
        let mut secret = Self::zeroed();
        while secret.is_zero() {
            rng.fill_bytes(&mut secret.bytes);
        }
        secret
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn is_zero(&self) -> bool {
        self.bytes.iter().fold(0u8, |acc, b| acc | b) == 0
    }

    pub fn clear(&mut self) {
        self.bytes.zeroize();
    }

    /// Copy out as a cipher key for record encryption.
    pub fn to_key(&self) -> SecretKey {
        SecretKey::from_bytes(self.bytes)
    }

    /// FNV-1a (32-bit) over the secret bytes. Used to confirm that the same
    /// secret comes back after a lock/unlock cycle without revealing it.
    pub fn fingerprint(&self) -> u32 {
        const OFFSET_BASIS: u32 = 0x811C_9DC5;
        const PRIME: u32 = 0x0100_0193;
        self.bytes
            .iter()
            .fold(OFFSET_BASIS, |h, &b| (h ^ b as u32).wrapping_mul(PRIME))
    }
}

impl Drop for MasterSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSecret")
            .field("bytes", &"[REDACTED]")
            .field("available", &!self.is_zero())
            .finish()
    }
}
