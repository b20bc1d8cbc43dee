//! Copying a firmware image onto a UF2 bootloader volume

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{FlashError, ProcessError};
use crate::process;

/// The filename the bootloader expects the firmware image under
pub const DESTINATION_FIRMWARE_NAME: &str = "CURRENT.UF2";
/// Time to give the bootloader to consume the image and reset
pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_secs(20);
/// Unmount attempts before giving up
pub const DEFAULT_UNMOUNT_ATTEMPTS: usize = 3;

/// Operations on a mountable volume
pub trait Volume {
    fn mount(&mut self, device: &Path, mount_point: &Path) -> Result<(), ProcessError>;
    fn copy(&mut self, source: &Path, destination: &Path) -> Result<(), ProcessError>;
    fn unmount(&mut self, mount_point: &Path) -> Result<(), ProcessError>;
}

/// Mounts and copies with the system `mount`, `cp` and `umount` utilities
#[derive(Debug, Clone, Copy)]
pub struct SystemVolume {
    /// Run the utilities through `sudo`
    pub sudo: bool,
}

impl Default for SystemVolume {
    fn default() -> SystemVolume {
        SystemVolume { sudo: true }
    }
}

impl Volume for SystemVolume {
    fn mount(&mut self, device: &Path, mount_point: &Path) -> Result<(), ProcessError> {
        process::run(
            process::command("mount", self.sudo)
                .arg(device)
                .arg(mount_point),
        )
        .map(drop)
    }

    fn copy(&mut self, source: &Path, destination: &Path) -> Result<(), ProcessError> {
        process::run(
            process::command("cp", self.sudo)
                .arg(source)
                .arg(destination),
        )
        .map(drop)
    }

    fn unmount(&mut self, mount_point: &Path) -> Result<(), ProcessError> {
        process::run(process::command("umount", self.sudo).arg(mount_point)).map(drop)
    }
}

#[derive(Debug, Clone)]
pub struct FlashOptions {
    /// Where the bootloader volume gets mounted. Created if missing.
    pub mount_point: PathBuf,
    pub settle_time: Duration,
    pub destination_name: String,
    pub unmount_attempts: usize,
    /// Pause between unmount attempts
    pub retry_delay: Duration,
}

impl FlashOptions {
    pub fn new<P: Into<PathBuf>>(mount_point: P) -> FlashOptions {
        FlashOptions {
            mount_point: mount_point.into(),
            settle_time: DEFAULT_SETTLE_TIME,
            destination_name: DESTINATION_FIRMWARE_NAME.to_owned(),
            unmount_attempts: DEFAULT_UNMOUNT_ATTEMPTS,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn destination(&self) -> PathBuf {
        self.mount_point.join(&self.destination_name)
    }
}

/// The result of a completed flash
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FlashOutcome {
    /// False if the volume was left mounted. The image was still delivered.
    pub unmounted: bool,
}

/// Unmounts, retrying up to `attempts` times. Returns whether it succeeded.
fn unmount_with_retries<V: Volume + ?Sized>(
    volume: &mut V,
    mount_point: &Path,
    attempts: usize,
    retry_delay: Duration,
) -> bool {
    for attempt in 1..=attempts.max(1) {
        match volume.unmount(mount_point) {
            Ok(()) => return true,
            Err(err) => {
                warn!(
                    "Could not unmount {} (attempt {}/{}): {}",
                    mount_point.display(),
                    attempt,
                    attempts.max(1),
                    err
                );

                if attempt < attempts {
                    thread::sleep(retry_delay);
                }
            }
        }
    }

    false
}

/// Best-effort unmount after a failed step
fn cleanup<V: Volume + ?Sized>(volume: &mut V, mount_point: &Path) {
    if let Err(err) = volume.unmount(mount_point) {
        debug!("Cleanup unmount of {} failed: {}", mount_point.display(), err);
    }
}

/// Flashes `firmware` onto the bootloader volume at `device`.
///
/// The image is copied as `options.destination_name`, then the bootloader is given
/// `options.settle_time` before the volume is unmounted. A failed unmount is logged and reported
/// in the outcome but does not fail the flash, since the image was already delivered.
pub fn flash<V: Volume + ?Sized>(
    volume: &mut V,
    device: &Path,
    firmware: &Path,
    options: &FlashOptions,
) -> Result<FlashOutcome, FlashError> {
    if !firmware.is_file() {
        return Err(FlashError::FirmwareNotFound(firmware.to_path_buf()));
    }

    let mount_point = options.mount_point.as_path();

    fs::create_dir_all(mount_point)
        .map_err(|err: io::Error| FlashError::MountPoint(mount_point.to_path_buf(), err))?;

    info!("Mounting {} to {}", device.display(), mount_point.display());

    if let Err(err) = volume.mount(device, mount_point) {
        cleanup(volume, mount_point);

        return Err(FlashError::MountFailed(
            device.to_path_buf(),
            mount_point.to_path_buf(),
            err.to_string(),
        ));
    }

    let destination = options.destination();

    info!(
        "Copying firmware from {} to {}",
        firmware.display(),
        destination.display()
    );

    if let Err(err) = volume.copy(firmware, &destination) {
        cleanup(volume, mount_point);

        return Err(FlashError::CopyFailed(destination, err.to_string()));
    }

    info!(
        "Flashing firmware... please wait {} seconds",
        options.settle_time.as_secs()
    );
    thread::sleep(options.settle_time);

    info!("Unmounting device");

    let unmounted = unmount_with_retries(
        volume,
        mount_point,
        options.unmount_attempts,
        options.retry_delay,
    );

    if !unmounted {
        warn!(
            "{} is still mounted; the firmware was copied, unmount it manually",
            mount_point.display()
        );
    }

    info!("Flashing complete!");

    Ok(FlashOutcome { unmounted })
}
