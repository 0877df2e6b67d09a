//! Transparent encryption layer over the raw flash driver.
//!
//! Callers read and write records in plaintext; this layer applies the
//! record's keystream, denies passcode-bound access while locked, and
//! converts legacy plaintext records the first time a key is available.

use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use radvault_crypto::{apply_at, SecretKey};

use crate::flash::{FlashDriver, FlashError};
use crate::mask::MigrationMask;
use crate::record::{Policy, RecordId};
use crate::schema::MASK_OFFSET;

/// Largest single write to an encrypted record
pub const MAX_SEALED_WRITE: usize = 128;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no such record element: {record}[{index:#06x}]")]
    NoSuchRecord { record: RecordId, index: u16 },

    #[error("access {offset}+{len} exceeds {record} element size {size}")]
    OutOfRange {
        record: RecordId,
        offset: u16,
        len: usize,
        size: u16,
    },

    #[error("write of {len} bytes exceeds the {max}-byte limit for encrypted records")]
    TooLarge { len: usize, max: usize },

    #[error("{0} is passcode-protected and the device is locked")]
    Locked(RecordId),

    #[error("flash error: {0}")]
    Flash(#[from] FlashError),
}

/// Key decision for one record policy.
pub enum RecordKey {
    /// Stored as plaintext
    Plain,
    Sealed(SecretKey),
    /// Passcode-bound while locked
    Unavailable,
}

/// Supplies record keys and owns the persistent migration mask.
pub trait KeySource {
    fn record_key(&self, policy: Policy) -> RecordKey;

    fn migration_mask(&self) -> MigrationMask;

    /// Set the record's bit; returns whether it changed.
    fn mark_migrated(&mut self, record: RecordId) -> bool;

    /// Plain records count as migrated regardless of their bit.
    fn is_migrated(&self, record: RecordId) -> bool {
        record.policy() == Policy::Plain || self.migration_mask().contains(record)
    }
}

/// Pending-write markers for records with deferred persistence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFlags(u64);

impl DirtyFlags {
    pub fn contains(self, record: RecordId) -> bool {
        self.0 & (1 << record.ordinal()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = RecordId> {
        RecordId::ALL.iter().copied().filter(move |r| self.contains(*r))
    }
}

pub struct SecureStore<F> {
    flash: F,
    dirty: DirtyFlags,
}

impl<F: FlashDriver> SecureStore<F> {
    pub fn new(flash: F) -> Self {
        Self {
            flash,
            dirty: DirtyFlags::default(),
        }
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn into_flash(self) -> F {
        self.flash
    }

    /// Resolve and bounds-check an access. Unsized (stream) records accept
    /// any length.
    fn locate(
        &self,
        record: RecordId,
        index: u16,
        offset: u16,
        len: usize,
    ) -> Result<u32, StorageError> {
        let base = record
            .resolve(index)
            .ok_or(StorageError::NoSuchRecord { record, index })?;
        let size = record.element_size();
        if size > 0 && offset as usize + len > size as usize {
            return Err(StorageError::OutOfRange {
                record,
                offset,
                len,
                size,
            });
        }
        Ok(base + offset as u32)
    }

    /// Read `buf.len()` plaintext bytes at `offset` within element `index`.
    pub fn read(
        &mut self,
        keys: &impl KeySource,
        record: RecordId,
        index: u16,
        offset: u16,
        buf: &mut [u8],
    ) -> Result<(), StorageError> {
        let address = self.locate(record, index, offset, buf.len())?;
        let key = match keys.record_key(record.policy()) {
            RecordKey::Unavailable => {
                buf.zeroize();
                return Err(StorageError::Locked(record));
            }
            RecordKey::Sealed(key) if keys.is_migrated(record) => Some(key),
            _ => None,
        };
        self.flash.read(address, buf)?;
        if let Some(key) = key {
            apply_at(key.as_bytes(), address, buf);
        }
        Ok(())
    }

    /// Write plaintext `data` at `offset` within element `index`.
    ///
    /// A record that has not been converted yet is converted first, so the
    /// new bytes never land next to plaintext neighbours.
    pub fn write(
        &mut self,
        keys: &mut impl KeySource,
        record: RecordId,
        index: u16,
        offset: u16,
        data: &[u8],
    ) -> Result<(), StorageError> {
        if record.policy() != Policy::Plain && data.len() > MAX_SEALED_WRITE {
            return Err(StorageError::TooLarge {
                len: data.len(),
                max: MAX_SEALED_WRITE,
            });
        }
        let address = self.locate(record, index, offset, data.len())?;
        if record.policy() == Policy::Plain {
            self.flash.write(address, data, false)?;
            return Ok(());
        }

        let key = match keys.record_key(record.policy()) {
            RecordKey::Sealed(key) => key,
            RecordKey::Unavailable => {
                tracing::warn!(%record, "write denied while locked");
                return Err(StorageError::Locked(record));
            }
            RecordKey::Plain => {
                self.flash.write(address, data, false)?;
                return Ok(());
            }
        };

        if !keys.is_migrated(record) {
            self.convert(record, &key)?;
            if keys.mark_migrated(record) {
                self.persist_migration_mask(keys.migration_mask())?;
            }
        }

        let mut sealed = Zeroizing::new([0u8; MAX_SEALED_WRITE]);
        let sealed = &mut sealed[..data.len()];
        sealed.copy_from_slice(data);
        apply_at(key.as_bytes(), address, sealed);
        self.flash.write(address, sealed, false)?;
        Ok(())
    }

    /// Convert a plaintext record to its protected form and set its mask
    /// bit. Returns whether anything changed; the mask is not persisted.
    pub fn migrate_record(
        &mut self,
        keys: &mut impl KeySource,
        record: RecordId,
    ) -> Result<bool, StorageError> {
        if keys.is_migrated(record) {
            if record.policy() == Policy::Plain {
                return Ok(keys.mark_migrated(record));
            }
            return Ok(false);
        }
        match keys.record_key(record.policy()) {
            RecordKey::Sealed(key) => self.convert(record, &key)?,
            RecordKey::Unavailable => return Err(StorageError::Locked(record)),
            RecordKey::Plain => {}
        }
        tracing::debug!(%record, "record migrated");
        Ok(keys.mark_migrated(record))
    }

    /// Apply the keystream to every element of `record` in place.
    fn convert(&mut self, record: RecordId, key: &SecretKey) -> Result<(), StorageError> {
        let descriptor = record.descriptor();
        let size = descriptor.size as usize;
        let mut buf = Zeroizing::new([0u8; MAX_SEALED_WRITE]);
        let buf = &mut buf[..size];
        for index in descriptor.indices() {
            let Some(address) = descriptor.resolve(index) else {
                continue;
            };
            self.flash.read(address, buf)?;
            apply_at(key.as_bytes(), address, buf);
            self.flash.write(address, buf, false)?;
        }
        Ok(())
    }

    /// Write only the mask bytes of the passcode config record.
    pub fn persist_migration_mask(&mut self, mask: MigrationMask) -> Result<(), StorageError> {
        let address = self.locate(RecordId::Passcode, 0, MASK_OFFSET as u16, 8)?;
        self.flash.write(address, &mask.bits().to_le_bytes(), false)?;
        Ok(())
    }

    /// Erase the flash sector holding element 0 of `record`.
    ///
    /// The whole 4 KiB sector goes, including any other record sharing it:
    /// erasing `settings-extra` (0x7000) also wipes the passcode config at
    /// 0x7100. The record's migration bit is left set, so an erased sealed
    /// record reads back as keystream rather than 0xFF until it is rewritten.
    pub fn sector_erase(&mut self, record: RecordId) -> Result<(), StorageError> {
        let address = self.locate(record, 0, 0, 0)?;
        tracing::info!(%record, address = format_args!("{address:#08x}"), "sector erase");
        self.flash.sector_erase(address)?;
        Ok(())
    }

    pub fn set_dirty(&mut self, record: RecordId) {
        self.dirty.0 |= 1 << record.ordinal();
    }

    pub fn is_dirty(&self, record: RecordId) -> bool {
        self.dirty.contains(record)
    }

    pub fn clear_dirty(&mut self, record: RecordId) {
        self.dirty.0 &= !(1 << record.ordinal());
    }

    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    /// Writes go straight to flash, so committing only settles the marker.
    pub fn commit(&mut self, record: RecordId) {
        if self.is_dirty(record) {
            tracing::debug!(%record, "commit");
        }
        self.clear_dirty(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::MemFlash;

    struct Keys {
        mask: MigrationMask,
        locked: bool,
    }

    impl KeySource for Keys {
        fn record_key(&self, policy: Policy) -> RecordKey {
            match policy {
                Policy::Plain => RecordKey::Plain,
                Policy::DeviceBound => RecordKey::Sealed(SecretKey::from_bytes([1; 32])),
                Policy::PasscodeBound if self.locked => RecordKey::Unavailable,
                Policy::PasscodeBound => RecordKey::Sealed(SecretKey::from_bytes([2; 32])),
            }
        }
        fn migration_mask(&self) -> MigrationMask {
            self.mask
        }
        fn mark_migrated(&mut self, record: RecordId) -> bool {
            self.mask.insert(record)
        }
    }

    #[test]
    fn test_bounds() {
        let mut store = SecureStore::new(MemFlash::new(0x20_0000));
        let keys = Keys {
            mask: MigrationMask::default(),
            locked: false,
        };
        let mut buf = [0u8; 4];
        assert!(matches!(
            store.read(&keys, RecordId::SettingsMain, 0, 14, &mut buf),
            Err(StorageError::OutOfRange { .. })
        ));
        assert!(matches!(
            store.read(&keys, RecordId::ChannelData, 200, 0, &mut buf),
            Err(StorageError::NoSuchRecord { .. })
        ));
        // stream regions are unsized
        let mut big = [0u8; 300];
        store
            .read(&keys, RecordId::VoiceClipData, 0, 0, &mut big)
            .unwrap();
    }

    #[test]
    fn test_dirty_flags() {
        let mut store = SecureStore::new(MemFlash::new(0x1000));
        assert!(store.dirty().is_empty());
        store.set_dirty(RecordId::ChannelData);
        store.set_dirty(RecordId::FmConfig);
        assert!(store.is_dirty(RecordId::ChannelData));
        store.clear_dirty(RecordId::ChannelData);
        let pending: Vec<_> = store.dirty().iter().collect();
        assert_eq!(pending, vec![RecordId::FmConfig]);
        store.commit(RecordId::FmConfig);
        assert!(store.dirty().is_empty());
    }

    #[test]
    fn test_plain_migrate_only_sets_bit() {
        let mut store = SecureStore::new(MemFlash::new(0x20_0000));
        let mut keys = Keys {
            mask: MigrationMask::default(),
            locked: true,
        };
        assert!(store.migrate_record(&mut keys, RecordId::CalibMisc).unwrap());
        assert!(!store.migrate_record(&mut keys, RecordId::CalibMisc).unwrap());
        let mut buf = [0u8; 8];
        store.read(&keys, RecordId::CalibMisc, 0, 0, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 8]);
    }

    #[test]
    fn test_too_large_sealed_write() {
        let mut store = SecureStore::new(MemFlash::new(0x20_0000));
        let mut keys = Keys {
            mask: MigrationMask::default(),
            locked: false,
        };
        let data = [0u8; MAX_SEALED_WRITE + 1];
        assert!(matches!(
            store.write(&mut keys, RecordId::ChannelData, 0, 0, &data),
            Err(StorageError::TooLarge { len: 129, max: 128 })
        ));
        assert!(!keys.mask.contains(RecordId::ChannelData));

        // plain stream regions have no such limit
        let voice = [0x11u8; 300];
        store
            .write(&mut keys, RecordId::VoiceClipData, 0, 0, &voice)
            .unwrap();
    }
}
