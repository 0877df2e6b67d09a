//! radvault-storage: the radio's external-flash record store
//!
//! Records are addressed by (record ID, element index) and resolved through a
//! static layout table. Every record carries a security policy:
//!
//! ```text
//! Plain          stored as-is (calibration, voice prompts, passcode config)
//! DeviceBound    keystream under a key derived from the hardware ID
//! PasscodeBound  keystream under the master secret; unavailable while locked
//! ```
//!
//! Records written by older firmware start out as plaintext and are
//! converted in place the first time a key is available; a 64-bit mask in
//! the passcode config tracks which records have been converted.

pub mod flash;
pub mod mask;
pub mod record;
pub mod schema;
pub mod secure;

pub use flash::{FlashDriver, FlashError, MemFlash};
pub use mask::MigrationMask;
pub use record::{Allocation, GridIndex, Policy, RecordDescriptor, RecordId};
pub use schema::PasscodeConfig;
pub use secure::{KeySource, RecordKey, SecureStore, StorageError, MAX_SEALED_WRITE};
