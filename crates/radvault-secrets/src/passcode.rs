//! Passcode and master-secret lifecycle.
//!
//! The manager is the only owner of the master secret. It persists the
//! passcode config record, hands record keys to the secure store through
//! [`KeyRing`], and drives the migration sweep whenever a key becomes
//! available.

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use zeroize::Zeroizing;

use radvault_core::config::SecurityConfig;
use radvault_crypto::{
    compute_verifier, derive_device_key, derive_kek, unwrap_master_secret, verifiers_match,
    wrap_master_secret, EntropySource, ForwardSecretRng, MasterSecret, SecretKey,
};
use radvault_storage::schema::{CONFIG_SIZE, MAGIC, MAX_PASSCODE_LEN};
use radvault_storage::{
    FlashDriver, KeySource, MigrationMask, PasscodeConfig, Policy, RecordId, RecordKey,
    SecureStore, StorageError,
};

use crate::device::DeviceIdentity;
use crate::lockout;
use crate::platform::Platform;

#[derive(Debug, Error)]
pub enum PasscodeError {
    #[error("incorrect passcode ({attempts} of {max_tries} attempts used)")]
    Rejected { attempts: u8, max_tries: u8 },

    #[error("passcode attempts exhausted; restart requested")]
    Exhausted,

    #[error("operation requires an unlocked session")]
    Locked,

    #[error("passcode manager used before init")]
    Uninitialized,

    #[error("invalid security settings: {0}")]
    InvalidSettings(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Locked,
    Unlocked,
    UnlockedNoPasscode,
}

/// The in-RAM security context: passcode config, master secret, device key
/// and lock flag. The secure store borrows it for key decisions.
pub struct KeyRing {
    config: PasscodeConfig,
    master: MasterSecret,
    device_key: SecretKey,
    locked: bool,
}

impl KeyRing {
    fn new(device_key: SecretKey) -> Self {
        Self {
            config: PasscodeConfig::default(),
            master: MasterSecret::zeroed(),
            device_key,
            locked: true,
        }
    }

    pub fn config(&self) -> &PasscodeConfig {
        &self.config
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    fn passcode_key_available(&self) -> bool {
        !self.locked && !self.master.is_zero()
    }
}

impl KeySource for KeyRing {
    fn record_key(&self, policy: Policy) -> RecordKey {
        match policy {
            Policy::Plain => RecordKey::Plain,
            Policy::DeviceBound => RecordKey::Sealed(self.device_key.clone()),
            Policy::PasscodeBound if self.passcode_key_available() => {
                RecordKey::Sealed(self.master.to_key())
            }
            Policy::PasscodeBound => RecordKey::Unavailable,
        }
    }

    fn migration_mask(&self) -> MigrationMask {
        self.config.migration_mask
    }

    fn mark_migrated(&mut self, record: RecordId) -> bool {
        self.config.migration_mask.insert(record)
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing")
            .field("config", &self.config)
            .field("master", &self.master)
            .field("locked", &self.locked)
            .finish_non_exhaustive()
    }
}

pub struct PasscodeManager<F, P, E> {
    store: SecureStore<F>,
    keys: KeyRing,
    identity: DeviceIdentity,
    platform: P,
    rng: ForwardSecretRng<E>,
    settings: SecurityConfig,
    initialized: bool,
}

impl<F, P, E> PasscodeManager<F, P, E>
where
    F: FlashDriver,
    P: Platform,
    E: EntropySource,
{
    /// Nothing touches flash until [`init`](Self::init).
    pub fn new(
        flash: F,
        identity: DeviceIdentity,
        platform: P,
        entropy: E,
        settings: SecurityConfig,
    ) -> Result<Self, PasscodeError> {
        if settings.min_max_tries == 0 || settings.min_max_tries > settings.max_max_tries {
            return Err(PasscodeError::InvalidSettings(format!(
                "attempt limit range {}..={}",
                settings.min_max_tries, settings.max_max_tries
            )));
        }
        let cpu_id = *identity.cpu_id();
        Ok(Self {
            store: SecureStore::new(flash),
            keys: KeyRing::new(derive_device_key(&cpu_id)),
            identity,
            platform,
            rng: ForwardSecretRng::new(cpu_id, entropy),
            settings,
            initialized: false,
        })
    }

    // ── Boot ─────────────────────────────────────────────────────────────────

    /// Load (or provision) the passcode config and bring the session up.
    pub fn init(&mut self) -> Result<SessionState, PasscodeError> {
        let mut config = self.load_config()?;
        self.keys.master.clear();

        if config.has_valid_magic() {
            config.sanitize(self.settings.kdf_iterations);
            self.keys.config = config;
            self.keys.locked = self.keys.config.length > 0;
            if !self.keys.locked {
                let kek = self.kek(&SecretString::from(""));
                self.keys.master = unwrap_master_secret(
                    &kek,
                    self.identity.cpu_id(),
                    &self.keys.config.wrapped_master,
                );
            }
        } else {
            tracing::info!("no valid passcode config, provisioning");
            self.provision()?;
        }

        self.initialized = true;
        self.migrate_all()?;
        self.platform.set_debug_port(!self.keys.locked);

        let state = self.state();
        tracing::info!(?state, failed_attempts = self.keys.config.failed_attempts, "passcode manager ready");
        Ok(state)
    }

    /// Fresh config with a new master secret wrapped under the empty passcode.
    fn provision(&mut self) -> Result<(), PasscodeError> {
        let mask = self.keys.config.migration_mask;
        let mut config = PasscodeConfig {
            magic: MAGIC,
            iterations: self.settings.kdf_iterations,
            ..PasscodeConfig::default()
        };
        config.migration_mask = mask;
        self.rng.fill(&mut config.nonce);
        self.keys.config = config;

        self.keys.master = MasterSecret::generate(&mut self.rng);
        let kek = self.kek(&SecretString::from(""));
        self.keys.config.wrapped_master =
            wrap_master_secret(&kek, self.identity.cpu_id(), &self.keys.master);
        self.keys.locked = false;
        self.save_config()
    }

    fn load_config(&mut self) -> Result<PasscodeConfig, PasscodeError> {
        let mut bytes = Zeroizing::new([0u8; CONFIG_SIZE]);
        self.store
            .read(&self.keys, RecordId::Passcode, 0, 0, &mut bytes[..])?;
        Ok(PasscodeConfig::decode(&bytes))
    }

    fn save_config(&mut self) -> Result<(), PasscodeError> {
        let bytes = Zeroizing::new(self.keys.config.encode());
        self.store
            .write(&mut self.keys, RecordId::Passcode, 0, 0, &bytes[..])?;
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<(), PasscodeError> {
        if self.initialized {
            Ok(())
        } else {
            Err(PasscodeError::Uninitialized)
        }
    }

    fn kek(&mut self, passcode: &SecretString) -> SecretKey {
        let platform = &mut self.platform;
        derive_kek(
            passcode,
            self.identity.cpu_id(),
            self.keys.config.iterations,
            || platform.service_watchdog(),
        )
    }

    // ── Passcode operations ──────────────────────────────────────────────────

    /// Check `candidate` against the stored verifier.
    ///
    /// Success unlocks the session and restores the master secret. Failure
    /// wipes the master secret and counts the attempt; reaching the limit
    /// requests a restart and returns [`PasscodeError::Exhausted`].
    pub fn validate(&mut self, candidate: &SecretString) -> Result<(), PasscodeError> {
        self.ensure_initialized()?;
        if !self.is_set() {
            return Ok(());
        }

        let computed = {
            let platform = &mut self.platform;
            compute_verifier(
                candidate,
                &self.keys.config.nonce,
                self.identity.cpu_id(),
                self.keys.config.iterations,
                || platform.service_watchdog(),
            )
        };

        if verifiers_match(&computed, &self.keys.config.verifier) {
            self.keys.config.failed_attempts = 0;
            self.keys.locked = false;
            let kek = self.kek(candidate);
            self.keys.master = unwrap_master_secret(
                &kek,
                self.identity.cpu_id(),
                &self.keys.config.wrapped_master,
            );
            drop(kek);
            self.migrate_all()?;
            self.platform.set_debug_port(true);
            self.save_config()?;
            tracing::info!("passcode accepted");
            return Ok(());
        }

        self.keys.master.clear();
        self.keys.locked = true;
        self.keys.config.failed_attempts = self.keys.config.failed_attempts.saturating_add(1);
        self.save_config()?;

        let attempts = self.keys.config.failed_attempts;
        let max_tries = self.max_tries();
        if attempts >= max_tries {
            tracing::error!(attempts, max_tries, "passcode attempts exhausted, restarting");
            self.platform.trigger_restart();
            return Err(PasscodeError::Exhausted);
        }
        tracing::warn!(attempts, max_tries, "passcode rejected");
        Err(PasscodeError::Rejected {
            attempts,
            max_tries,
        })
    }

    /// Set, change, or (with an empty passcode) remove the passcode.
    ///
    /// The master secret is kept, so passcode-bound records stay readable.
    pub fn set_passcode(&mut self, passcode: &SecretString) -> Result<(), PasscodeError> {
        self.ensure_initialized()?;
        if self.is_set() && self.keys.locked {
            return Err(PasscodeError::Locked);
        }
        if self.keys.master.is_zero() {
            self.keys.master = MasterSecret::generate(&mut self.rng);
        }

        let mut nonce = [0u8; 16];
        self.rng.fill(&mut nonce);
        self.keys.config.nonce = nonce;
        self.keys.config.iterations = self.settings.kdf_iterations;

        let verifier = {
            let platform = &mut self.platform;
            compute_verifier(
                passcode,
                &nonce,
                self.identity.cpu_id(),
                self.keys.config.iterations,
                || platform.service_watchdog(),
            )
        };
        self.keys.config.verifier = verifier;

        let kek = self.kek(passcode);
        self.keys.config.wrapped_master =
            wrap_master_secret(&kek, self.identity.cpu_id(), &self.keys.master);
        drop(kek);

        let len = passcode.expose_secret().len().min(MAX_PASSCODE_LEN as usize);
        self.keys.config.magic = MAGIC;
        self.keys.config.failed_attempts = 0;
        self.keys.config.length = len as u8;
        self.keys.locked = false;
        self.save_config()?;
        self.migrate_all()?;
        tracing::info!(length = len, "passcode updated");
        Ok(())
    }

    /// Wipe the master secret and re-lock. No-op without a passcode.
    pub fn lock(&mut self) {
        if !self.is_set() {
            return;
        }
        self.keys.master.clear();
        self.keys.locked = true;
        self.platform.set_debug_port(false);
        tracing::info!("session locked");
    }

    /// Convert every record whose key is currently available. Returns the
    /// number of encrypted records converted.
    pub fn migrate_all(&mut self) -> Result<usize, PasscodeError> {
        self.ensure_initialized()?;
        let mut changed = false;
        let mut converted = 0;
        for &record in RecordId::ALL {
            if self.keys.migration_mask().contains(record) {
                continue;
            }
            if record.policy() == Policy::PasscodeBound && !self.keys.passcode_key_available() {
                continue;
            }
            if self.store.migrate_record(&mut self.keys, record)? {
                changed = true;
                if record.policy() != Policy::Plain {
                    converted += 1;
                }
            }
            self.platform.service_watchdog();
        }
        if changed {
            self.store
                .persist_migration_mask(self.keys.migration_mask())?;
            tracing::debug!(converted, mask = self.keys.migration_mask().bits(), "migration sweep");
        }
        Ok(converted)
    }

    /// Discard the passcode and master secret and provision afresh.
    pub fn factory_reset(&mut self) -> Result<(), PasscodeError> {
        tracing::warn!("factory reset");
        self.keys.master.clear();
        self.provision()?;
        self.initialized = true;
        self.platform.set_debug_port(true);
        self.migrate_all()?;
        Ok(())
    }

    // ── Lockout ──────────────────────────────────────────────────────────────

    /// Seconds the prompt must wait before the next attempt, if any.
    pub fn lockout_remaining(&self) -> Option<u32> {
        lockout::wait_secs(self.keys.config.failed_attempts, self.max_tries())
    }

    /// Block for the owed lockout, reporting each remaining second to
    /// `countdown`, then allow one more attempt. Returns seconds waited.
    pub fn serve_lockout(
        &mut self,
        mut countdown: impl FnMut(u32),
    ) -> Result<u32, PasscodeError> {
        self.ensure_initialized()?;
        let Some(total) = self.lockout_remaining() else {
            return Ok(0);
        };
        tracing::warn!(seconds = total, "passcode lockout");
        for remaining in (1..=total).rev() {
            countdown(remaining);
            for tick in 0..lockout::TICKS_PER_SECOND {
                self.platform.delay_ms(lockout::TICK_MS);
                if tick % lockout::WATCHDOG_TICKS == 0 {
                    self.platform.service_watchdog();
                }
            }
        }
        self.keys.config.failed_attempts = lockout::attempts_after_wait(self.max_tries());
        self.save_config()?;
        Ok(total)
    }

    // ── Queries and settings ─────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        if !self.initialized {
            SessionState::Uninitialized
        } else if !self.is_set() {
            SessionState::UnlockedNoPasscode
        } else if self.keys.locked {
            SessionState::Locked
        } else {
            SessionState::Unlocked
        }
    }

    pub fn is_set(&self) -> bool {
        self.keys.config.has_valid_magic() && self.keys.config.length > 0
    }

    pub fn is_locked(&self) -> bool {
        self.is_set() && self.keys.locked
    }

    pub fn passcode_length(&self) -> u8 {
        self.keys.config.length
    }

    pub fn failed_attempts(&self) -> u8 {
        self.keys.config.failed_attempts
    }

    /// Attempt limit, with 0 meaning the configured default.
    pub fn max_tries(&self) -> u8 {
        match self.keys.config.max_tries {
            0 => self.settings.default_max_tries,
            n => n,
        }
    }

    /// Store a new attempt limit, clamped to the configured range.
    pub fn set_max_tries(&mut self, max_tries: u8) -> Result<u8, PasscodeError> {
        self.ensure_initialized()?;
        let clamped = max_tries.clamp(self.settings.min_max_tries, self.settings.max_max_tries);
        self.keys.config.max_tries = clamped;
        self.save_config()?;
        Ok(clamped)
    }

    pub fn expose_length(&self) -> bool {
        self.keys.config.expose_length
    }

    pub fn set_expose_length(&mut self, enabled: bool) -> Result<(), PasscodeError> {
        self.ensure_initialized()?;
        self.keys.config.expose_length = enabled;
        self.save_config()
    }

    pub fn stealth_mode(&self) -> bool {
        self.keys.config.stealth_mode
    }

    pub fn set_stealth_mode(&mut self, enabled: bool) -> Result<(), PasscodeError> {
        self.ensure_initialized()?;
        self.keys.config.stealth_mode = enabled;
        self.save_config()
    }

    /// FNV-1a of the in-RAM master secret; `None` while it is unavailable.
    pub fn master_key_fingerprint(&self) -> Option<u32> {
        if self.keys.master.is_zero() {
            None
        } else {
            Some(self.keys.master.fingerprint())
        }
    }

    pub fn migration_mask(&self) -> MigrationMask {
        self.keys.migration_mask()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn key_ring(&self) -> &KeyRing {
        &self.keys
    }

    // ── Record access ────────────────────────────────────────────────────────

    pub fn read(
        &mut self,
        record: RecordId,
        index: u16,
        offset: u16,
        buf: &mut [u8],
    ) -> Result<(), StorageError> {
        self.store.read(&self.keys, record, index, offset, buf)
    }

    pub fn write(
        &mut self,
        record: RecordId,
        index: u16,
        offset: u16,
        data: &[u8],
    ) -> Result<(), StorageError> {
        self.store.write(&mut self.keys, record, index, offset, data)
    }

    pub fn sector_erase(&mut self, record: RecordId) -> Result<(), StorageError> {
        self.store.sector_erase(record)
    }

    pub fn store(&self) -> &SecureStore<F> {
        &self.store
    }

    pub fn flash(&self) -> &F {
        self.store.flash()
    }

    pub fn into_flash(self) -> F {
        self.store.into_flash()
    }
}

impl<F, P, E> std::fmt::Debug for PasscodeManager<F, P, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasscodeManager")
            .field("identity", &self.identity)
            .field("keys", &self.keys)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}
