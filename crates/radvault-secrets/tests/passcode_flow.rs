//! End-to-end passcode manager scenarios over an in-memory flash image.

use radvault_core::config::SecurityConfig;
use radvault_crypto::{AnalogChannel, EntropySource};
use radvault_secrets::{DeviceIdentity, PasscodeError, PasscodeManager, Platform, SessionState};
use radvault_storage::schema::{PasscodeConfig, CONFIG_SIZE};
use radvault_storage::{MemFlash, RecordId, StorageError};
use secrecy::SecretString;

const CPU_ID: [u8; 16] = [
    0x30, 0x00, 0x21, 0x00, 0x11, 0x51, 0x33, 0x36, 0x38, 0x37, 0x32, 0x39, 0x00, 0x00, 0x00, 0x00,
];

#[derive(Debug, Default)]
struct MockPlatform {
    watchdog_kicks: u32,
    restarts: u32,
    debug_port: Option<bool>,
    slept_ms: u64,
}

impl Platform for MockPlatform {
    fn service_watchdog(&mut self) {
        self.watchdog_kicks += 1;
    }
    fn trigger_restart(&mut self) {
        self.restarts += 1;
    }
    fn set_debug_port(&mut self, enabled: bool) {
        self.debug_port = Some(enabled);
    }
    fn delay_ms(&mut self, ms: u32) {
        self.slept_ms += ms as u64;
    }
}

struct Jitter(u32);

impl EntropySource for Jitter {
    fn radio_noise(&mut self) -> u16 {
        self.0 = self.0.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (self.0 >> 16) as u16
    }
    fn analog(&mut self, channel: AnalogChannel) -> u16 {
        0x600 + channel as u16 + (self.0 & 0xF) as u16
    }
    fn timer(&mut self) -> u32 {
        self.0 = self.0.wrapping_add(0x9E37_79B9);
        self.0
    }
}

type Manager = PasscodeManager<MemFlash, MockPlatform, Jitter>;

fn settings() -> SecurityConfig {
    SecurityConfig {
        // Use few iterations for testing
        kdf_iterations: 300,
        ..SecurityConfig::default()
    }
}

fn boot(flash: MemFlash, seed: u32) -> Manager {
    let mut manager = PasscodeManager::new(
        flash,
        DeviceIdentity::from_cpu_id(CPU_ID),
        MockPlatform::default(),
        Jitter(seed),
        settings(),
    )
    .unwrap();
    manager.init().unwrap();
    manager
}

fn fresh() -> Manager {
    boot(MemFlash::new(0x20_0000), 1)
}

fn pass(s: &str) -> SecretString {
    SecretString::from(s)
}

fn stored_config(manager: &Manager) -> PasscodeConfig {
    let mut bytes = [0u8; CONFIG_SIZE];
    bytes.copy_from_slice(&manager.flash().image()[0x7100..0x7100 + CONFIG_SIZE]);
    PasscodeConfig::decode(&bytes)
}

#[test]
fn fresh_device_is_unlocked_without_passcode() {
    let manager = fresh();
    assert_eq!(manager.state(), SessionState::UnlockedNoPasscode);
    assert!(manager.master_key_fingerprint().is_some());
    assert!(!manager.is_set());
    assert_eq!(manager.platform().debug_port, Some(true));

    let cfg = stored_config(&manager);
    assert!(cfg.has_valid_magic());
    assert_eq!(cfg.length, 0);
    assert_eq!(cfg.iterations, 300);
    assert_ne!(cfg.wrapped_master, [0u8; 32]);
}

#[test]
fn uninitialized_manager_refuses_operations() {
    let mut manager: Manager = PasscodeManager::new(
        MemFlash::new(0x20_0000),
        DeviceIdentity::from_cpu_id(CPU_ID),
        MockPlatform::default(),
        Jitter(9),
        settings(),
    )
    .unwrap();
    assert_eq!(manager.state(), SessionState::Uninitialized);
    assert!(matches!(
        manager.set_passcode(&pass("1234")),
        Err(PasscodeError::Uninitialized)
    ));
}

#[test]
fn inverted_attempt_range_is_rejected() {
    let inverted = SecurityConfig {
        min_max_tries: 10,
        max_max_tries: 3,
        ..settings()
    };
    let result: Result<Manager, _> = PasscodeManager::new(
        MemFlash::new(0x20_0000),
        DeviceIdentity::from_cpu_id(CPU_ID),
        MockPlatform::default(),
        Jitter(9),
        inverted,
    );
    assert!(matches!(result, Err(PasscodeError::InvalidSettings(_))));

    let zero_floor = SecurityConfig {
        min_max_tries: 0,
        ..settings()
    };
    let result: Result<Manager, _> = PasscodeManager::new(
        MemFlash::new(0x20_0000),
        DeviceIdentity::from_cpu_id(CPU_ID),
        MockPlatform::default(),
        Jitter(9),
        zero_floor,
    );
    assert!(matches!(result, Err(PasscodeError::InvalidSettings(_))));
}

#[test]
fn set_lock_validate_restores_master_secret() {
    let mut manager = fresh();
    let original = manager.master_key_fingerprint().unwrap();

    manager.set_passcode(&pass("1234")).unwrap();
    assert_eq!(manager.state(), SessionState::Unlocked);
    assert_eq!(manager.passcode_length(), 4);
    assert_eq!(manager.master_key_fingerprint(), Some(original));

    manager.lock();
    assert_eq!(manager.state(), SessionState::Locked);
    assert_eq!(manager.master_key_fingerprint(), None);
    assert_eq!(manager.platform().debug_port, Some(false));

    manager.validate(&pass("1234")).unwrap();
    assert_eq!(manager.state(), SessionState::Unlocked);
    assert_eq!(manager.master_key_fingerprint(), Some(original));
    assert_eq!(manager.platform().debug_port, Some(true));
}

#[test]
fn wrong_passcode_zeroes_master_secret() {
    let mut manager = fresh();
    manager.set_passcode(&pass("1234")).unwrap();
    manager.lock();

    let err = manager.validate(&pass("0000")).unwrap_err();
    assert!(matches!(
        err,
        PasscodeError::Rejected {
            attempts: 1,
            max_tries: 10
        }
    ));
    assert_eq!(manager.master_key_fingerprint(), None);
    assert_eq!(manager.failed_attempts(), 1);
    assert_eq!(stored_config(&manager).failed_attempts, 1);

    // a correct attempt clears the counter
    manager.validate(&pass("1234")).unwrap();
    assert_eq!(manager.failed_attempts(), 0);
    assert_eq!(stored_config(&manager).failed_attempts, 0);
}

#[test]
fn wrong_passcode_while_unlocked_relocks() {
    let mut manager = fresh();
    manager.set_passcode(&pass("1234")).unwrap();
    assert!(manager.validate(&pass("4321")).is_err());
    assert_eq!(manager.state(), SessionState::Locked);
    assert!(matches!(
        manager.set_passcode(&pass("9999")),
        Err(PasscodeError::Locked)
    ));
}

#[test]
fn passcode_records_survive_reboot() {
    let mut manager = fresh();
    manager.set_passcode(&pass("2468")).unwrap();
    manager
        .write(RecordId::ChannelNames, 4, 0, b"MARINE CH16     ")
        .unwrap();
    manager
        .write(RecordId::SettingsMain, 0, 0, &[7u8; 16])
        .unwrap();

    let mut manager = boot(manager.into_flash(), 2);
    assert_eq!(manager.state(), SessionState::Locked);

    // device-bound settings are readable before unlock
    let mut settings = [0u8; 16];
    manager
        .read(RecordId::SettingsMain, 0, 0, &mut settings)
        .unwrap();
    assert_eq!(settings, [7u8; 16]);

    let mut name = [0u8; 16];
    assert!(matches!(
        manager.read(RecordId::ChannelNames, 4, 0, &mut name),
        Err(StorageError::Locked(_))
    ));

    manager.validate(&pass("2468")).unwrap();
    manager
        .read(RecordId::ChannelNames, 4, 0, &mut name)
        .unwrap();
    assert_eq!(&name, b"MARINE CH16     ");
}

#[test]
fn locked_write_leaves_flash_unchanged() {
    let mut manager = fresh();
    manager.set_passcode(&pass("1234")).unwrap();
    manager.lock();
    let before = manager.flash().image().to_vec();

    let err = manager
        .write(RecordId::ChannelData, 0, 0, &[0xAB; 16])
        .unwrap_err();
    assert!(matches!(err, StorageError::Locked(RecordId::ChannelData)));
    assert_eq!(manager.flash().image(), &before[..]);
}

#[test]
fn migrate_all_is_idempotent() {
    let mut flash = MemFlash::new(0x20_0000);
    // legacy plaintext settings
    radvault_storage::FlashDriver::write(&mut flash, 0x4000, b"legacy settings!", false).unwrap();

    let mut manager = boot(flash, 3);
    let mut buf = [0u8; 16];
    manager.read(RecordId::SettingsMain, 0, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"legacy settings!");
    assert_ne!(&manager.flash().image()[0x4000..0x4010], b"legacy settings!");

    let image = manager.flash().image().to_vec();
    let mask = manager.migration_mask();
    assert_eq!(manager.migrate_all().unwrap(), 0);
    assert_eq!(manager.migrate_all().unwrap(), 0);
    assert_eq!(manager.flash().image(), &image[..]);
    assert_eq!(manager.migration_mask(), mask);
    for &record in RecordId::ALL {
        assert!(mask.contains(record), "{record} not migrated");
    }
}

#[test]
fn locked_boot_defers_passcode_records() {
    // a passcode set by this firmware, then the mask bits for passcode
    // records cleared as if written by an older build
    let mut manager = fresh();
    manager.set_passcode(&pass("1111")).unwrap();
    let mut flash = manager.into_flash();
    let mut cfg = {
        let mut bytes = [0u8; CONFIG_SIZE];
        bytes.copy_from_slice(&flash.image()[0x7100..0x7100 + CONFIG_SIZE]);
        PasscodeConfig::decode(&bytes)
    };
    cfg.migration_mask = radvault_storage::MigrationMask::default();
    radvault_storage::FlashDriver::write(&mut flash, 0x7100, &cfg.encode(), false).unwrap();
    radvault_storage::FlashDriver::write(&mut flash, 0x0000, b"plaintext chan 0", false).unwrap();

    let mut manager = boot(flash, 4);
    assert_eq!(manager.state(), SessionState::Locked);
    let mask = manager.migration_mask();
    assert!(mask.contains(RecordId::SettingsMain));
    assert!(mask.contains(RecordId::CalibMisc));
    assert!(!mask.contains(RecordId::ChannelData));
    assert_eq!(&manager.flash().image()[0..16], b"plaintext chan 0");

    manager.validate(&pass("1111")).unwrap();
    assert!(manager.migration_mask().contains(RecordId::ChannelData));
    assert_ne!(&manager.flash().image()[0..16], b"plaintext chan 0");
    let mut buf = [0u8; 16];
    manager.read(RecordId::ChannelData, 0, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"plaintext chan 0");
}

#[test]
fn exhausting_attempts_requests_restart() {
    let mut manager = fresh();
    manager.set_max_tries(3).unwrap();
    manager.set_passcode(&pass("1234")).unwrap();
    manager.lock();

    assert!(matches!(
        manager.validate(&pass("a")),
        Err(PasscodeError::Rejected { attempts: 1, .. })
    ));
    assert!(matches!(
        manager.validate(&pass("b")),
        Err(PasscodeError::Rejected { attempts: 2, .. })
    ));
    assert!(matches!(
        manager.validate(&pass("c")),
        Err(PasscodeError::Exhausted)
    ));
    assert_eq!(manager.platform().restarts, 1);
    assert_eq!(manager.lockout_remaining(), Some(30));
}

#[test]
fn lockout_wait_and_reset() {
    let mut manager = fresh();
    manager.set_passcode(&pass("1234")).unwrap();
    manager.lock();

    // twelve failures against the default limit of ten
    for _ in 0..12 {
        assert!(manager.validate(&pass("nope")).is_err());
    }
    assert_eq!(manager.failed_attempts(), 12);
    assert_eq!(manager.lockout_remaining(), Some(90));

    // the counter persists across a reboot
    let mut manager = boot(manager.into_flash(), 5);
    assert_eq!(manager.lockout_remaining(), Some(90));

    let mut shown = Vec::new();
    let waited = manager.serve_lockout(|s| shown.push(s)).unwrap();
    assert_eq!(waited, 90);
    assert_eq!(shown.first(), Some(&90));
    assert_eq!(shown.last(), Some(&1));
    assert_eq!(shown.len(), 90);
    assert_eq!(manager.platform().slept_ms, 90_000);
    assert!(manager.platform().watchdog_kicks >= 90 * 5);

    assert_eq!(manager.failed_attempts(), 9);
    assert_eq!(manager.lockout_remaining(), None);
    assert_eq!(stored_config(&manager).failed_attempts, 9);

    // exactly one more try before the formula applies again
    assert!(matches!(
        manager.validate(&pass("still wrong")),
        Err(PasscodeError::Exhausted)
    ));
    assert_eq!(manager.lockout_remaining(), Some(30));
}

#[test]
fn max_tries_clamped_and_persisted() {
    let mut manager = fresh();
    assert_eq!(manager.max_tries(), 10);
    assert_eq!(manager.set_max_tries(1).unwrap(), 3);
    assert_eq!(manager.set_max_tries(200).unwrap(), 50);
    assert_eq!(manager.set_max_tries(7).unwrap(), 7);

    let manager = boot(manager.into_flash(), 6);
    assert_eq!(manager.max_tries(), 7);
}

#[test]
fn ui_flags_persist() {
    let mut manager = fresh();
    manager.set_expose_length(true).unwrap();
    manager.set_stealth_mode(true).unwrap();
    let manager = boot(manager.into_flash(), 7);
    assert!(manager.expose_length());
    assert!(manager.stealth_mode());
}

#[test]
fn removing_passcode_with_empty_string() {
    let mut manager = fresh();
    let fp = manager.master_key_fingerprint();
    manager.set_passcode(&pass("1234")).unwrap();
    manager.set_passcode(&pass("")).unwrap();
    assert_eq!(manager.state(), SessionState::UnlockedNoPasscode);

    let manager = boot(manager.into_flash(), 8);
    assert_eq!(manager.state(), SessionState::UnlockedNoPasscode);
    assert_eq!(manager.master_key_fingerprint(), fp);
}

#[test]
fn long_passcode_length_is_capped() {
    let mut manager = fresh();
    manager
        .set_passcode(&pass("0123456789abcdef0123456789abcdef-and-more"))
        .unwrap();
    assert_eq!(manager.passcode_length(), 32);
    manager.lock();
    // only the first 32 bytes take part in the key
    manager
        .validate(&pass("0123456789abcdef0123456789abcdef"))
        .unwrap();
}

#[test]
fn factory_reset_discards_master_secret() {
    let mut manager = fresh();
    manager.set_passcode(&pass("1234")).unwrap();
    manager
        .write(RecordId::ChannelData, 0, 0, b"146.520 FM simpl")
        .unwrap();
    manager.write(RecordId::FmConfig, 0, 0, &[3u8; 8]).unwrap();
    let old = manager.master_key_fingerprint();

    manager.factory_reset().unwrap();
    assert_eq!(manager.state(), SessionState::UnlockedNoPasscode);
    assert_ne!(manager.master_key_fingerprint(), old);

    // device-bound data is still readable, passcode-bound data is gone
    let mut fm = [0u8; 8];
    manager.read(RecordId::FmConfig, 0, 0, &mut fm).unwrap();
    assert_eq!(fm, [3u8; 8]);
    let mut chan = [0u8; 16];
    manager.read(RecordId::ChannelData, 0, 0, &mut chan).unwrap();
    assert_ne!(&chan, b"146.520 FM simpl");
}

#[test]
fn kdf_services_watchdog() {
    let mut manager = fresh();
    let before = manager.platform().watchdog_kicks;
    manager.set_passcode(&pass("1234")).unwrap();
    assert!(manager.platform().watchdog_kicks > before);
}
