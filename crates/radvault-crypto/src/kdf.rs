//! Passcode stretching: passcode → KEK and stored verifier.
//!
//! Both derivations key a ChaCha20 state with the zero-padded passcode and
//! fold each output block back into the key words, `iterations` times. The
//! KEK nonce is the hardware ID; the verifier nonce mixes a random stored
//! nonce with the hardware ID so the verifier reveals nothing about the KEK.

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::cipher::{ChaChaState, COUNTER_WORD, KEY_WORDS};
use crate::secret::{MasterSecret, SecretKey};
use crate::{BLOCK_SIZE, HARDWARE_ID_SIZE, KEY_SIZE, NONCE_SIZE, VERIFIER_SIZE};

/// Stretching iterations when none is configured
pub const DEFAULT_ITERATIONS: u32 = 8192;

/// The stretch loop calls its watchdog hook every this many iterations
pub const WATCHDOG_INTERVAL: u32 = 256;

/// Appended to the hardware ID to form the 16-byte KEK salt. Only the first
/// 12 salt bytes reach the cipher nonce, so the marker does not affect output.
const SALT_MARKER: [u8; 4] = [0xAA, 0xBB, 0xCC, 0xDD];

/// Nonce for the per-device key
const DEVICE_KEY_NONCE: &[u8; NONCE_SIZE] = b"radvaultdevk";

pub type Verifier = [u8; VERIFIER_SIZE];

fn effective_iterations(iterations: u32) -> u32 {
    if iterations == 0 {
        DEFAULT_ITERATIONS
    } else {
        iterations
    }
}

/// Passcode bytes truncated or zero-padded to one key.
fn passcode_key(passcode: &SecretString) -> Zeroizing<[u8; KEY_SIZE]> {
    let bytes = passcode.expose_secret().as_bytes();
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    let n = bytes.len().min(KEY_SIZE);
    key[..n].copy_from_slice(&bytes[..n]);
    key
}

fn nonce_prefix(bytes: &[u8; HARDWARE_ID_SIZE]) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&bytes[..NONCE_SIZE]);
    nonce
}

/// Iterated block folding. Returns the final iteration's output block.
fn stretch(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    iterations: u32,
    mut watchdog: impl FnMut(),
) -> Zeroizing<[u8; BLOCK_SIZE]> {
    let mut state = ChaChaState::new(key, nonce, 0);
    let mut last = Zeroizing::new([0u8; BLOCK_SIZE]);
    for i in 0..effective_iterations(iterations) {
        last = state.block();
        let words = state.words_mut();
        for (w, chunk) in words[KEY_WORDS].iter_mut().zip(last.chunks_exact(4)) {
            *w ^= u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        words[COUNTER_WORD] = words[COUNTER_WORD].wrapping_add(1);
        if i % WATCHDOG_INTERVAL == WATCHDOG_INTERVAL - 1 {
            watchdog();
        }
    }
    last
}

/// Derive the key-encryption key for the master secret.
pub fn derive_kek(
    passcode: &SecretString,
    hardware_id: &[u8; HARDWARE_ID_SIZE],
    iterations: u32,
    watchdog: impl FnMut(),
) -> SecretKey {
    let mut salt = Zeroizing::new([0u8; HARDWARE_ID_SIZE]);
    salt[..NONCE_SIZE].copy_from_slice(&hardware_id[..NONCE_SIZE]);
    salt[NONCE_SIZE..].copy_from_slice(&SALT_MARKER);

    let key = passcode_key(passcode);
    let block = stretch(&key, &nonce_prefix(&salt), iterations, watchdog);
    let mut kek = Zeroizing::new([0u8; KEY_SIZE]);
    kek.copy_from_slice(&block[..KEY_SIZE]);
    SecretKey::from_bytes(*kek)
}

/// Compute the verifier stored alongside the passcode config.
pub fn compute_verifier(
    passcode: &SecretString,
    stored_nonce: &[u8; 16],
    hardware_id: &[u8; HARDWARE_ID_SIZE],
    iterations: u32,
    watchdog: impl FnMut(),
) -> Verifier {
    let mut nonce = Zeroizing::new([0u8; NONCE_SIZE]);
    for (n, (a, b)) in nonce.iter_mut().zip(stored_nonce.iter().zip(hardware_id)) {
        *n = a ^ b;
    }
    let key = passcode_key(passcode);
    let block = stretch(&key, &nonce, iterations, watchdog);
    let mut verifier = [0u8; VERIFIER_SIZE];
    verifier.copy_from_slice(&block[..VERIFIER_SIZE]);
    verifier
}

/// Constant-time verifier comparison.
pub fn verifiers_match(a: &Verifier, b: &Verifier) -> bool {
    a[..].ct_eq(&b[..]).into()
}

fn wrap_pad(kek: &SecretKey, hardware_id: &[u8; HARDWARE_ID_SIZE]) -> Zeroizing<[u8; BLOCK_SIZE]> {
    ChaChaState::new(kek.as_bytes(), &nonce_prefix(hardware_id), 0).block()
}

/// Encrypt the master secret under the KEK for storage.
pub fn wrap_master_secret(
    kek: &SecretKey,
    hardware_id: &[u8; HARDWARE_ID_SIZE],
    secret: &MasterSecret,
) -> [u8; KEY_SIZE] {
    let pad = wrap_pad(kek, hardware_id);
    let mut wrapped = [0u8; KEY_SIZE];
    for (w, (s, p)) in wrapped.iter_mut().zip(secret.as_bytes().iter().zip(pad.iter())) {
        *w = s ^ p;
    }
    wrapped
}

/// Inverse of [`wrap_master_secret`]. A wrong KEK yields a wrong secret,
/// never an error; the verifier is what rejects bad passcodes.
pub fn unwrap_master_secret(
    kek: &SecretKey,
    hardware_id: &[u8; HARDWARE_ID_SIZE],
    wrapped: &[u8; KEY_SIZE],
) -> MasterSecret {
    let pad = wrap_pad(kek, hardware_id);
    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    for (b, (w, p)) in bytes.iter_mut().zip(wrapped.iter().zip(pad.iter())) {
        *b = w ^ p;
    }
    MasterSecret::from_bytes(*bytes)
}

/// Key for device-bound records: one block keyed by the hardware ID.
pub fn derive_device_key(hardware_id: &[u8; HARDWARE_ID_SIZE]) -> SecretKey {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key[..HARDWARE_ID_SIZE].copy_from_slice(hardware_id);
    let block = ChaChaState::new(&key, DEVICE_KEY_NONCE, 0).block();
    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    out.copy_from_slice(&block[..KEY_SIZE]);
    SecretKey::from_bytes(*out)
}
