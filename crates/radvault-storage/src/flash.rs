//! Flash driver abstraction and an in-memory emulation.

use thiserror::Error;

/// Erase granularity of the SPI flash
pub const SECTOR_SIZE: u32 = 4096;

/// Value of an erased byte
pub const ERASED: u8 = 0xFF;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlashError {
    #[error("flash access out of bounds: {address:#08x}+{len} (size {size:#08x})")]
    OutOfBounds { address: u32, len: usize, size: u32 },
}

/// Byte-addressable raw flash.
///
/// Writes are byte-programmable: the driver takes care of any erase/rewrite
/// cycle. `append` hints that the target range is known to be erased.
pub trait FlashDriver {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError>;
    fn write(&mut self, address: u32, data: &[u8], append: bool) -> Result<(), FlashError>;
    /// Erase the whole sector containing `address`.
    fn sector_erase(&mut self, address: u32) -> Result<(), FlashError>;
}

impl<T: FlashDriver + ?Sized> FlashDriver for &mut T {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(address, buf)
    }
    fn write(&mut self, address: u32, data: &[u8], append: bool) -> Result<(), FlashError> {
        (**self).write(address, data, append)
    }
    fn sector_erase(&mut self, address: u32) -> Result<(), FlashError> {
        (**self).sector_erase(address)
    }
}

/// Flash image held in memory, erased to 0xFF.
#[derive(Clone)]
pub struct MemFlash {
    bytes: Vec<u8>,
}

impl MemFlash {
    pub fn new(size: u32) -> Self {
        Self {
            bytes: vec![ERASED; size as usize],
        }
    }

    pub fn from_image(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn image(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_image(self) -> Vec<u8> {
        self.bytes
    }

    pub fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn range(&self, address: u32, len: usize) -> Result<std::ops::Range<usize>, FlashError> {
        let start = address as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(start..end),
            _ => Err(FlashError::OutOfBounds {
                address,
                len,
                size: self.size(),
            }),
        }
    }
}

impl FlashDriver for MemFlash {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let range = self.range(address, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8], _append: bool) -> Result<(), FlashError> {
        let range = self.range(address, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    fn sector_erase(&mut self, address: u32) -> Result<(), FlashError> {
        let start = address - address % SECTOR_SIZE;
        let range = self.range(start, SECTOR_SIZE as usize)?;
        self.bytes[range].fill(ERASED);
        Ok(())
    }
}

impl std::fmt::Debug for MemFlash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemFlash")
            .field("size", &self.bytes.len())
            .finish()
    }
}
