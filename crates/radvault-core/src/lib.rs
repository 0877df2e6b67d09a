pub mod config;
pub mod error;

pub use config::VaultConfig;
pub use error::{VaultError, VaultResult};
