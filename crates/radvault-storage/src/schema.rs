//! On-flash layout of the passcode config record.
//!
//! 128 bytes, little-endian, no padding:
//!
//! ```text
//! off  size  field
//!   0     4  magic
//!   4    16  verifier
//!  20    16  nonce
//!  36     1  failed attempts
//!  37     1  passcode length (0 = no passcode)
//!  38     1  max attempts (0 = default)
//!  39     1  expose length flag
//!  40     1  stealth mode flag
//!  41     4  KDF iterations
//!  45    32  wrapped master secret
//!  77     8  migration mask
//!  85    43  reserved
//! ```

use crate::mask::MigrationMask;
use radvault_crypto::{KEY_SIZE, VERIFIER_SIZE};

pub const CONFIG_SIZE: usize = 128;

/// "PHSQ" read as a little-endian u32
pub const MAGIC: u32 = 0x5153_4850;

pub const NONCE_LEN: usize = 16;

/// Longest passcode that contributes to the key
pub const MAX_PASSCODE_LEN: u8 = KEY_SIZE as u8;

const OFF_MAGIC: usize = 0;
const OFF_VERIFIER: usize = 4;
const OFF_NONCE: usize = 20;
const OFF_TRIES: usize = 36;
const OFF_LENGTH: usize = 37;
const OFF_MAX_TRIES: usize = 38;
const OFF_EXPOSE_LENGTH: usize = 39;
const OFF_STEALTH: usize = 40;
const OFF_ITERATIONS: usize = 41;
const OFF_WRAPPED_KEY: usize = 45;
/// Byte offset of the migration mask within the record
pub const MASK_OFFSET: usize = 77;
const OFF_RESERVED: usize = 85;

#[derive(Clone, PartialEq, Eq)]
pub struct PasscodeConfig {
    pub magic: u32,
    pub verifier: [u8; VERIFIER_SIZE],
    pub nonce: [u8; NONCE_LEN],
    pub failed_attempts: u8,
    pub length: u8,
    pub max_tries: u8,
    pub expose_length: bool,
    pub stealth_mode: bool,
    pub iterations: u32,
    pub wrapped_master: [u8; KEY_SIZE],
    pub migration_mask: MigrationMask,
    pub reserved: [u8; CONFIG_SIZE - OFF_RESERVED],
}

impl Default for PasscodeConfig {
    fn default() -> Self {
        Self {
            magic: 0,
            verifier: [0; VERIFIER_SIZE],
            nonce: [0; NONCE_LEN],
            failed_attempts: 0,
            length: 0,
            max_tries: 0,
            expose_length: false,
            stealth_mode: false,
            iterations: 0,
            wrapped_master: [0; KEY_SIZE],
            migration_mask: MigrationMask::default(),
            reserved: [0; CONFIG_SIZE - OFF_RESERVED],
        }
    }
}

fn u32_at(bytes: &[u8; CONFIG_SIZE], off: usize) -> u32 {
    u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
}

fn array_at<const N: usize>(bytes: &[u8; CONFIG_SIZE], off: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[off..off + N]);
    out
}

impl PasscodeConfig {
    pub fn decode(bytes: &[u8; CONFIG_SIZE]) -> Self {
        Self {
            magic: u32_at(bytes, OFF_MAGIC),
            verifier: array_at(bytes, OFF_VERIFIER),
            nonce: array_at(bytes, OFF_NONCE),
            failed_attempts: bytes[OFF_TRIES],
            length: bytes[OFF_LENGTH],
            max_tries: bytes[OFF_MAX_TRIES],
            expose_length: bytes[OFF_EXPOSE_LENGTH] != 0,
            stealth_mode: bytes[OFF_STEALTH] != 0,
            iterations: u32_at(bytes, OFF_ITERATIONS),
            wrapped_master: array_at(bytes, OFF_WRAPPED_KEY),
            migration_mask: MigrationMask::from_bits(u64::from_le_bytes(array_at(
                bytes,
                MASK_OFFSET,
            ))),
            reserved: array_at(bytes, OFF_RESERVED),
        }
    }

    pub fn encode(&self) -> [u8; CONFIG_SIZE] {
        let mut out = [0u8; CONFIG_SIZE];
        out[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(&self.magic.to_le_bytes());
        out[OFF_VERIFIER..OFF_NONCE].copy_from_slice(&self.verifier);
        out[OFF_NONCE..OFF_TRIES].copy_from_slice(&self.nonce);
        out[OFF_TRIES] = self.failed_attempts;
        out[OFF_LENGTH] = self.length;
        out[OFF_MAX_TRIES] = self.max_tries;
        out[OFF_EXPOSE_LENGTH] = self.expose_length as u8;
        out[OFF_STEALTH] = self.stealth_mode as u8;
        out[OFF_ITERATIONS..OFF_WRAPPED_KEY].copy_from_slice(&self.iterations.to_le_bytes());
        out[OFF_WRAPPED_KEY..MASK_OFFSET].copy_from_slice(&self.wrapped_master);
        out[MASK_OFFSET..OFF_RESERVED].copy_from_slice(&self.migration_mask.bits().to_le_bytes());
        out[OFF_RESERVED..].copy_from_slice(&self.reserved);
        out
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic == MAGIC
    }

    /// Clamp fields a corrupted or foreign record could carry out of range.
    ///
    /// Erased flash reads back as 0xFF, so an all-ones iteration count means
    /// "never set" and falls back to `default_iterations`, as does zero.
    pub fn sanitize(&mut self, default_iterations: u32) {
        if self.length > MAX_PASSCODE_LEN {
            self.length = MAX_PASSCODE_LEN;
        }
        if self.iterations == 0 || self.iterations == u32::MAX {
            self.iterations = default_iterations;
        }
    }
}

impl std::fmt::Debug for PasscodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasscodeConfig")
            .field("magic", &format_args!("{:#010x}", self.magic))
            .field("failed_attempts", &self.failed_attempts)
            .field("length", &self.length)
            .field("max_tries", &self.max_tries)
            .field("iterations", &self.iterations)
            .field("migration_mask", &format_args!("{:#018x}", self.migration_mask.bits()))
            .finish_non_exhaustive()
    }
}
