//! Flash image persistence for the simulator.
//!
//! Every invocation boots the simulated radio from an image file and writes
//! it back afterwards, so the file plays the role of the SPI flash chip.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use radvault_storage::MemFlash;

/// Load `path`, or a fully erased image of `size` bytes if it does not exist.
///
/// A short file is padded with erased bytes; a longer one is rejected.
pub fn load(path: &Path, size: u32) -> Result<MemFlash> {
    if !path.exists() {
        tracing::info!(path = %path.display(), size, "no flash image, starting erased");
        return Ok(MemFlash::new(size));
    }
    let mut bytes = std::fs::read(path)
        .with_context(|| format!("reading flash image {}", path.display()))?;
    if bytes.len() > size as usize {
        anyhow::bail!(
            "flash image {} is {} bytes, larger than the configured {} bytes",
            path.display(),
            bytes.len(),
            size
        );
    }
    bytes.resize(size as usize, radvault_storage::flash::ERASED);
    Ok(MemFlash::from_image(bytes))
}

/// Write the image next to `path` and rename it into place.
pub fn save(path: &Path, flash: &MemFlash) -> Result<()> {
    let tmp = tmp_path(path);
    std::fs::write(&tmp, flash.image())
        .with_context(|| format!("writing flash image {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("replacing flash image {}", path.display()))?;
    tracing::debug!(path = %path.display(), "flash image saved");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
