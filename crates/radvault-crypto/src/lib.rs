//! radvault-crypto: cipher core for the radio's secret store
//!
//! Everything here is built on one primitive, the ChaCha20 block function.
//!
//! ```text
//! ChaCha20 block (RFC 8439 state layout)
//!   ├── Address keystream: key=record key, nonce=0, counter=addr/64, skip addr%64
//!   ├── Forward-secret DRBG: output words 4..11 become the next key
//!   └── Passcode KDF: iterated block folding
//!       ├── KEK      = stretch(passcode, nonce=hardware ID) -> 32 bytes
//!       ├── Verifier = stretch(passcode, nonce=stored nonce ^ hardware ID) -> 16 bytes
//!       └── Master secret wrap: XOR with one block under the KEK
//! ```

pub mod cipher;
pub mod kdf;
pub mod keystream;
pub mod rng;
pub mod secret;

pub use cipher::ChaChaState;
pub use kdf::{
    compute_verifier, derive_device_key, derive_kek, unwrap_master_secret, verifiers_match,
    wrap_master_secret, Verifier,
};
pub use keystream::apply_at;
pub use rng::{AnalogChannel, EntropySource, ForwardSecretRng};
pub use secret::{MasterSecret, SecretKey};

/// Size of a cipher key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the cipher nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of one keystream block
pub const BLOCK_SIZE: usize = 64;

/// Size of the microcontroller's unique hardware ID
pub const HARDWARE_ID_SIZE: usize = 16;

/// Size of the stored passcode verifier digest
pub const VERIFIER_SIZE: usize = 16;
