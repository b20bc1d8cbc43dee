//! Block device enumeration
//!
//! A scan lists the block devices the host currently exposes and describes each of them through
//! a [`MetadataSource`]. Devices whose metadata cannot be read are skipped; that never aborts the
//! scan. Every scan re-queries the OS.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::vec;

use log::{debug, warn};

use crate::device::{DeviceDescriptor, UdevProperties};
use crate::error::DeviceError;
use crate::process;

/// Provides the host's block devices and their metadata
pub trait MetadataSource {
    /// Lists candidate block device paths in a stable order
    fn block_devices(&self) -> io::Result<Vec<PathBuf>>;

    /// Queries the metadata of a single device
    fn describe(&self, device: &Path) -> Result<DeviceDescriptor, DeviceError>;
}

/// Reads devices from sysfs and their properties from `udevadm`
#[derive(Debug, Clone)]
pub struct SystemSource {
    /// The sysfs block class directory, normally `/sys/block`
    pub sys_block: PathBuf,
    /// The device node directory, normally `/dev`
    pub dev_dir: PathBuf,
    /// Only block devices whose name starts with this prefix are considered. USB mass storage
    /// shows up as SCSI disks.
    pub name_prefix: String,
}

impl Default for SystemSource {
    fn default() -> SystemSource {
        SystemSource {
            sys_block: PathBuf::from("/sys/block"),
            dev_dir: PathBuf::from("/dev"),
            name_prefix: "sd".to_owned(),
        }
    }
}

impl SystemSource {
    fn sysfs_entry(&self, device: &Path) -> Option<PathBuf> {
        device.file_name().map(|name| self.sys_block.join(name))
    }

    fn removable(&self, device: &Path) -> Result<bool, DeviceError> {
        let unavailable = |reason: String| DeviceError::MetadataUnavailable(device.into(), reason);
        let attribute = self
            .sysfs_entry(device)
            .ok_or_else(|| unavailable("not a device path".to_owned()))?
            .join("removable");
        let value = fs::read_to_string(&attribute)
            .map_err(|err| unavailable(format!("{}: {}", attribute.display(), err)))?;

        Ok(value.trim() == "1")
    }

    fn properties(&self, device: &Path) -> Result<UdevProperties, DeviceError> {
        let output = process::capture(
            Command::new("udevadm")
                .arg("info")
                .arg("--query=property")
                .arg("--name")
                .arg(device),
        )
        .map_err(|err| DeviceError::MetadataUnavailable(device.into(), err.to_string()))?;

        Ok(UdevProperties::parse(&output))
    }
}

impl MetadataSource for SystemSource {
    fn block_devices(&self) -> io::Result<Vec<PathBuf>> {
        let mut names: Vec<String> = fs::read_dir(&self.sys_block)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(&self.name_prefix))
            .collect();

        names.sort();

        Ok(names.iter().map(|name| self.dev_dir.join(name)).collect())
    }

    fn describe(&self, device: &Path) -> Result<DeviceDescriptor, DeviceError> {
        let removable = self.removable(device)?;
        let properties = self.properties(device)?;

        Ok(DeviceDescriptor::from_properties(
            device, removable, &properties,
        ))
    }
}

/// A lazy pass over the devices of a [`MetadataSource`]
pub struct Scan<'a, S: ?Sized> {
    source: &'a S,
    devices: vec::IntoIter<PathBuf>,
}

impl<'a, S: MetadataSource + ?Sized> Iterator for Scan<'a, S> {
    type Item = DeviceDescriptor;

    fn next(&mut self) -> Option<DeviceDescriptor> {
        for device in &mut self.devices {
            match self.source.describe(&device) {
                Ok(descriptor) => {
                    debug!(
                        "Checking block device {} (vendor_id={:?}, product_id={:?}, removable={}, usb={})",
                        device.display(),
                        descriptor.vendor_id,
                        descriptor.product_id,
                        descriptor.removable,
                        descriptor.is_usb_bus
                    );

                    return Some(descriptor);
                }
                Err(err) => debug!("Skipping block device: {}", err),
            }
        }

        None
    }
}

/// Starts a scan of every block device `source` exposes.
///
/// If the device list itself cannot be read, a warning is logged and the scan is empty.
pub fn scan<S: MetadataSource + ?Sized>(source: &S) -> Scan<'_, S> {
    let devices = source.block_devices().unwrap_or_else(|err| {
        warn!("Could not list block devices: {}", err);

        Vec::new()
    });

    debug!("Found {} candidate block device(s)", devices.len());

    Scan {
        source,
        devices: devices.into_iter(),
    }
}

/// Scans `source` and keeps only devices that look like a bootloader volume
pub fn bootloader_candidates<S: MetadataSource + ?Sized>(source: &S) -> Vec<DeviceDescriptor> {
    scan(source)
        .filter(DeviceDescriptor::is_bootloader_candidate)
        .collect()
}
