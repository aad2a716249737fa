//! Sysfs access to the meter's pulse pin.
//!
//! The kernel exposes exported pins under `/sys/class/gpio/gpio<N>/`.
//! Once the pin's `edge` attribute is set, poll(2) flags the `value` file
//! with an exceptional condition on every matching transition; clearing
//! that condition requires seeking back to the start and reading the
//! file, otherwise the next wait returns immediately.
//!
//! All functions here are setup/teardown plumbing around those attribute
//! files plus the [`EdgePin`] wrapper that registers the value descriptor
//! with the tokio reactor.

use std::fs::{File, OpenOptions};
use std::io::{self, Read as _, Seek as _, SeekFrom};
use std::os::unix::fs::OpenOptionsExt as _;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tracing::{debug, info};

use crate::server::EdgeSource;

/// BCM number of the pin wired to the meter's pulse output.
pub const PULSE_PIN: u32 = 4;

/// Transition that counts as a pulse.
pub const TRIGGER_EDGE: &str = "rising";

/// How long to give udev to fix up ownership of freshly exported
/// attribute files before touching them.
const UDEV_SETTLE: Duration = Duration::from_secs(1);

/// Errors that can occur in GPIO setup and edge handling.
#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("failed to write {}: {source}", path.display())]
    Attribute { path: PathBuf, source: io::Error },

    #[error("failed to open {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to register {} with the reactor: {source}", path.display())]
    Register { path: PathBuf, source: io::Error },

    #[error("pull-up setup failed: {0}")]
    Pullup(String),
}

/// Handle on the sysfs GPIO control tree.
///
/// The base path is injectable so tests can run against a temp directory
/// instead of `/sys/class/gpio`.
pub struct GpioChip {
    base: PathBuf,
}

impl GpioChip {
    /// Opens the system GPIO tree.
    pub fn new() -> Self {
        Self::at("/sys/class/gpio")
    }

    /// Opens a GPIO tree rooted at `base`.
    pub fn at(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Makes the pin visible under the sysfs tree.
    pub fn export(&self, pin: u32) -> Result<(), GpioError> {
        self.write_attr(self.base.join("export"), &pin.to_string())
    }

    /// Returns the pin to the kernel.
    pub fn unexport(&self, pin: u32) -> Result<(), GpioError> {
        self.write_attr(self.base.join("unexport"), &pin.to_string())
    }

    /// Selects which transitions flag the value file as priority-ready.
    pub fn set_edge(&self, pin: u32, edge: &str) -> Result<(), GpioError> {
        self.write_attr(self.pin_dir(pin).join("edge"), edge)
    }

    /// Path of the pin's value attribute.
    pub fn value_path(&self, pin: u32) -> PathBuf {
        self.pin_dir(pin).join("value")
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.base.join(format!("gpio{pin}"))
    }

    fn write_attr(&self, path: PathBuf, value: &str) -> Result<(), GpioError> {
        debug!(path = %path.display(), value, "writing gpio attribute");
        std::fs::write(&path, value).map_err(|source| GpioError::Attribute { path, source })
    }
}

impl Default for GpioChip {
    fn default() -> Self {
        Self::new()
    }
}

/// The pulse pin's value descriptor, registered with the reactor for
/// priority readiness.
///
/// Sysfs edge notification surfaces as an exceptional condition, not
/// ordinary readability, so the descriptor is registered with
/// [`Interest::PRIORITY`].
#[derive(Debug)]
pub struct EdgePin {
    value: AsyncFd<File>,
}

impl EdgePin {
    /// Exports and configures the pin, then opens its value file.
    ///
    /// A pin left exported by an unclean shutdown is reused as-is. The
    /// per-pin attribute files appear immediately after a fresh export,
    /// but udev fixes up their ownership asynchronously; the settle pause
    /// sits between the two steps for that reason.
    pub async fn configure(chip: &GpioChip, pin: u32, edge: &str) -> Result<Self, GpioError> {
        if !is_exported(chip, pin) {
            chip.export(pin)?;
            tokio::time::sleep(UDEV_SETTLE).await;
        }
        chip.set_edge(pin, edge)?;
        Self::open(chip.value_path(pin))
    }

    /// Opens an already-configured value file and registers it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GpioError> {
        let path = path.into();

        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| GpioError::Open {
                path: path.clone(),
                source,
            })?;

        let value = AsyncFd::with_interest(file, Interest::PRIORITY)
            .map_err(|source| GpioError::Register {
                path: path.clone(),
                source,
            })?;

        info!(path = %path.display(), "pulse pin registered");
        Ok(Self { value })
    }
}

impl EdgeSource for EdgePin {
    async fn edge_ready(&mut self) -> io::Result<()> {
        let mut guard = self.value.ready_mut(Interest::PRIORITY).await?;
        guard.clear_ready();
        Ok(())
    }

    fn rearm(&mut self) -> io::Result<()> {
        let file = self.value.get_mut();
        file.seek(SeekFrom::Start(0))?;
        let mut level = [0u8; 8];
        let _ = file.read(&mut level)?;
        Ok(())
    }
}

/// Enables the internal pull-up on the pulse pin.
///
/// The sysfs interface cannot change pull state, so this shells out to
/// the WiringPi `gpio` utility. Platform setup only: pass or fail.
pub fn enable_pullup(pin: u32) -> Result<(), GpioError> {
    let status = Command::new("gpio")
        .args(["-g", "mode", &pin.to_string(), "up"])
        .status()
        .map_err(|e| GpioError::Pullup(format!("failed to run gpio utility: {e}")))?;

    if !status.success() {
        return Err(GpioError::Pullup(format!("gpio utility exited with {status}")));
    }

    Ok(())
}

/// Checks whether a pin is already exported.
pub fn is_exported(chip: &GpioChip, pin: u32) -> bool {
    chip.value_path(pin).exists()
}
