//! Raw USB enumeration through `lsusb`

use std::process::Command;

use crate::error::ProcessError;
use crate::process;

/// One line of `lsusb` output
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UsbDevice {
    pub bus: String,
    pub device: String,
    /// Lowercase hex vendor id
    pub vendor_id: String,
    /// Lowercase hex product id
    pub product_id: String,
    pub description: String,
}

impl UsbDevice {
    /// Parses a line such as
    /// `Bus 001 Device 012: ID 239a:0029 Adafruit Feather nRF52840 Express`
    pub fn parse_line(line: &str) -> Option<UsbDevice> {
        let mut words = line.split_whitespace();

        if words.next()? != "Bus" {
            return None;
        }

        let bus = words.next()?.to_owned();

        if words.next()? != "Device" {
            return None;
        }

        let device = words.next()?.trim_end_matches(':').to_owned();

        if words.next()? != "ID" {
            return None;
        }

        let mut ids = words.next()?.splitn(2, ':');
        let vendor_id = ids.next()?.to_ascii_lowercase();
        let product_id = ids.next()?.to_ascii_lowercase();
        let description = words.collect::<Vec<_>>().join(" ");

        Some(UsbDevice {
            bus,
            device,
            vendor_id,
            product_id,
            description,
        })
    }
}

/// Parses every recognizable line of `lsusb` output
pub fn parse_lsusb(output: &str) -> Vec<UsbDevice> {
    output.lines().filter_map(UsbDevice::parse_line).collect()
}

/// Runs `lsusb` and returns its raw output
pub fn lsusb() -> Result<String, ProcessError> {
    process::capture(&mut Command::new("lsusb"))
}
