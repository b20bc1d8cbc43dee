//! Block device descriptors and the bootloader heuristic

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// udev property holding the bus a device is attached through
const PROP_BUS: &str = "ID_BUS";
/// udev properties holding the USB vendor id, in order of preference
const PROP_VENDOR_ID: &[&str] = &["ID_VENDOR_ID", "ID_USB_VENDOR_ID"];
/// udev properties holding the USB product id, in order of preference
const PROP_PRODUCT_ID: &[&str] = &["ID_MODEL_ID", "ID_USB_MODEL_ID"];
/// udev properties holding the model string, in order of preference
const PROP_MODEL: &[&str] = &["ID_MODEL", "ID_USB_MODEL"];

/// Device properties as reported by `udevadm info --query=property` (or `--query=all`)
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct UdevProperties {
    properties: BTreeMap<String, String>,
}

impl UdevProperties {
    /// Parses `KEY=VALUE` lines. The `E: ` prefix used by `--query=all` and surrounding quotes
    /// are stripped; lines without a `=` are ignored.
    pub fn parse(output: &str) -> UdevProperties {
        let properties = output
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                let line = line.strip_prefix("E: ").unwrap_or(line);
                let (key, value) = line.split_at(line.find('=')?);
                let value = value[1..].trim_matches('"');

                Some((key.to_owned(), value.to_owned()))
            })
            .collect();

        UdevProperties { properties }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Returns the value of the first of `keys` that is present
    fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }
}

/// Normalizes a USB id as given by the OS: lowercased, and only if it is made of hex digits.
/// Leading zeros are kept.
fn hex_id(value: &str) -> Option<String> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    Some(value.to_ascii_lowercase())
}

/// Runtime-observed metadata for one attached block device
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeviceDescriptor {
    /// Lowercase hex USB vendor id
    pub vendor_id: Option<String>,
    /// Lowercase hex USB product id
    pub product_id: Option<String>,
    pub removable: bool,
    pub is_usb_bus: bool,
    pub model: Option<String>,
    /// OS device path, e.g. `/dev/sdb`
    pub block_path: PathBuf,
}

impl DeviceDescriptor {
    /// Builds a descriptor for `block_path` from its udev `properties` and sysfs `removable`
    /// attribute.
    pub fn from_properties<P: AsRef<Path>>(
        block_path: P,
        removable: bool,
        properties: &UdevProperties,
    ) -> DeviceDescriptor {
        DeviceDescriptor {
            vendor_id: properties.first_of(PROP_VENDOR_ID).and_then(hex_id),
            product_id: properties.first_of(PROP_PRODUCT_ID).and_then(hex_id),
            removable,
            is_usb_bus: properties.get(PROP_BUS) == Some("usb"),
            model: properties
                .first_of(PROP_MODEL)
                .filter(|model| !model.is_empty())
                .map(str::to_owned),
            block_path: block_path.as_ref().to_path_buf(),
        }
    }

    /// Returns the (vendor id, product id) pair if both are known
    pub fn ids(&self) -> Option<(&str, &str)> {
        match (&self.vendor_id, &self.product_id) {
            (Some(vendor_id), Some(product_id)) => Some((vendor_id.as_str(), product_id.as_str())),
            _ => None,
        }
    }

    pub fn is_bootloader_candidate(&self) -> bool {
        is_bootloader_candidate(self)
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (vendor_id={}, product_id={}) - {}",
            self.block_path.display(),
            self.vendor_id.as_deref().unwrap_or("N/A"),
            self.product_id.as_deref().unwrap_or("N/A"),
            self.model.as_deref().unwrap_or("Unknown")
        )
    }
}

/// Returns true if `descriptor` has the shape of a UF2 bootloader volume: a removable device on
/// the USB bus with both a vendor and product id.
///
/// This is a heuristic. A device matching it is not guaranteed to be in bootloader mode; USB
/// thumb drives match it too.
pub fn is_bootloader_candidate(descriptor: &DeviceDescriptor) -> bool {
    descriptor.removable && descriptor.is_usb_bus && descriptor.ids().is_some()
}
