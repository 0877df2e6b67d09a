//! radvault-secrets: device identity and the passcode manager
//!
//! The passcode manager owns the master secret and the persistent passcode
//! config, and drives the secure store's migration and lock state:
//!
//! ```text
//! Uninitialized ──init──► UnlockedNoPasscode ──set_passcode──► Unlocked
//!                                                               │    ▲
//!                                                             lock  validate(ok)
//!                                                               ▼    │
//!                                                              Locked
//! ```

pub mod device;
pub mod lockout;
pub mod passcode;
pub mod platform;

pub use device::DeviceIdentity;
pub use passcode::{KeyRing, PasscodeError, PasscodeManager, SessionState};
pub use platform::Platform;
