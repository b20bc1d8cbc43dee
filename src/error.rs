use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Errors from loading or querying the device inventory
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Could not find device inventory at {}", _0.display())]
    ConfigNotFound(PathBuf),
    #[error("Error parsing device inventory {}: {}", _0.display(), _1)]
    ConfigParse(PathBuf, serde_yaml::Error),
    #[error("I/O error when reading device inventory {}: {}", _0.display(), _1)]
    ConfigRead(PathBuf, io::Error),
    #[error("Device '{}' not found in inventory (available: {})", _0, _1.join(", "))]
    UnknownDevice(String, Vec<String>),
    #[error("No keyboard_name specified for device '{}'", _0)]
    MissingKeyboardName(String),
    #[error("No firmware file specified for {} side with variant {}", _0, _1)]
    MissingFirmware(String, String),
}

/// Per-device metadata failures. These never abort a scan.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Metadata for {} is unavailable: {}", _0.display(), _1)]
    MetadataUnavailable(PathBuf, String),
}

/// Errors when running an external program
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Could not spawn {}: {}", _0, _1)]
    Spawn(String, io::Error),
    #[error("{} exited with {}: {}", program, status, stderr.trim())]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Errors that are fatal to a flash operation
#[derive(Debug, Error)]
pub enum FlashError {
    #[error("Firmware file not found at {}", _0.display())]
    FirmwareNotFound(PathBuf),
    #[error("Could not create mount point {}: {}", _0.display(), _1)]
    MountPoint(PathBuf, io::Error),
    #[error("Could not mount {} at {}: {}", _0.display(), _1.display(), _2)]
    MountFailed(PathBuf, PathBuf, String),
    #[error("Could not copy firmware to {}: {}", _0.display(), _1)]
    CopyFailed(PathBuf, String),
    #[error("{} is not a valid UF2 image: {}", _0.display(), _1)]
    InvalidImage(PathBuf, String),
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Workspace root {} is not a directory", _0.display())]
    NotFound(PathBuf),
    #[error("Could not determine the current directory: {}", _0)]
    CurrentDir(io::Error),
}

