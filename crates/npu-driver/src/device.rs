//! NPU device handle
//!
//! Owns the two physical windows of one board: the control bridge (NPU block
//! and dispatcher CSRs) and the shared staging RAM. Both are unmapped when the
//! handle is dropped.

use rustix::fs::OFlags;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::config::NpuConfig;
use crate::error::Result;
use crate::mmio::MappedWindow;
use crate::sequencer::Sequencer;
use crate::staging::SharedBuffer;

/// Physical memory device.
pub const DEV_MEM: &str = "/dev/mem";

/// An NPU reached through `/dev/mem`
#[derive(Debug)]
pub struct NpuDevice {
    path: PathBuf,
    config: NpuConfig,
    control: MappedWindow,
    shared: MappedWindow,
}

impl NpuDevice {
    /// Map the windows of `config.profile` from `/dev/mem`
    ///
    /// # Errors
    ///
    /// Returns error if `/dev/mem` cannot be opened (usually missing
    /// privileges) or either window fails to map.
    pub fn open(config: &NpuConfig) -> Result<Self> {
        Self::open_at(DEV_MEM, config)
    }

    /// Map the windows from an explicit memory device
    ///
    /// # Errors
    ///
    /// See [`Self::open`].
    pub fn open_at(path: impl AsRef<Path>, config: &NpuConfig) -> Result<Self> {
        let path = path.as_ref();
        let profile = config.profile;
        tracing::debug!("Opening {} for profile {}", path.display(), profile.name);

        // OFlags::SYNC bits are a small positive value
        #[allow(clippy::cast_possible_wrap)]
        let sync_flag = OFlags::SYNC.bits() as i32;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync_flag)
            .open(path)?;

        let control = MappedWindow::map(&file, profile.control_window)?;
        let shared = MappedWindow::map(&file, profile.shared_window)?;
        // The mappings stay valid once the descriptor is closed

        tracing::info!("Opened NPU ({}) via {}", profile.name, path.display());

        Ok(Self {
            path: path.to_path_buf(),
            config: *config,
            control,
            shared,
        })
    }

    /// Configuration the device was opened with
    #[must_use]
    pub const fn config(&self) -> &NpuConfig {
        &self.config
    }

    /// Memory device path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sequencer over the control window and a buffer over the shared window
    pub fn split(&mut self) -> (Sequencer<&MappedWindow>, SharedBuffer<&mut MappedWindow>) {
        (
            self.config.sequencer(&self.control),
            SharedBuffer::new(&mut self.shared),
        )
    }
}

impl Drop for NpuDevice {
    fn drop(&mut self) {
        tracing::info!("Closing NPU ({})", self.config.profile.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_is_an_io_error() {
        let err = NpuDevice::open_at("/nonexistent/mem", &NpuConfig::default()).unwrap_err();
        assert!(matches!(err, crate::NpuError::Io { .. }));
    }

    #[test]
    #[ignore] // Requires hardware
    fn open_hardware() {
        let mut dev = NpuDevice::open(&NpuConfig::default()).unwrap();
        let (seq, _buf) = dev.split();
        assert!(!seq.is_busy());
    }
}
