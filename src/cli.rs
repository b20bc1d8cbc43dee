use std::path::PathBuf;

use structopt::StructOpt;

use corne::inventory::{Side, Variant};

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Find keyboards in bootloader mode that are listed in devices.conf
    #[structopt(name = "find-devices")]
    FindDevices(FindDevicesOpts),
    /// Flash a built firmware image onto a keyboard in bootloader mode
    Flash(FlashOpts),
    /// List the devices configured in devices.conf
    Devices,
}

#[derive(StructOpt, Debug)]
pub struct FindDevicesOpts {
    /// Enable debug output
    #[structopt(long)]
    pub debug: bool,
    /// List all bootloader devices, matched or not
    #[structopt(long = "list-all")]
    pub list_all: bool,
    /// Show the parsed device configuration
    #[structopt(long = "show-config")]
    pub show_config: bool,
    /// Show raw USB device information
    #[structopt(long = "raw-usb")]
    pub raw_usb: bool,
}

#[derive(StructOpt, Debug)]
pub struct FlashOpts {
    /// Keyboard side to flash (left or right)
    #[structopt(long, default_value = "left")]
    pub side: Side,
    /// Firmware variant (default or gem)
    #[structopt(long, default_value = "default")]
    pub variant: Variant,
    /// Device to flash, as named in devices.conf
    #[structopt(
        env = "CORNE_DEVICE",
        long = "device",
        default_value = "corne_ergokeeb"
    )]
    pub device: String,
    /// Mount point for the bootloader volume [default: ~/mnt/corne]
    #[structopt(env = "CORNE_MOUNT_POINT", long = "mount-point")]
    pub mount_point: Option<PathBuf>,
    /// Seconds to wait for the bootloader to consume the image
    #[structopt(env = "CORNE_READY_TIME", long = "ready-time", default_value = "20")]
    pub ready_time: u64,
    /// Seconds to keep scanning for the device in bootloader mode
    #[structopt(long, default_value = "0")]
    pub wait: u64,
    /// Flash without asking when the device found is not the one requested
    #[structopt(short = "y", long)]
    pub yes: bool,
    /// Run mount, cp and umount without sudo
    #[structopt(long = "no-sudo")]
    pub no_sudo: bool,
    /// Enable debug output
    #[structopt(long)]
    pub debug: bool,
}

#[derive(StructOpt, Debug)]
#[structopt(name = "corne", about = "Find and flash ZMK keyboards in UF2 bootloader mode")]
pub struct Opts {
    #[structopt(subcommand)]
    pub command: Command,

    /// The workspace root holding etc/devices.conf and results/ [default: current directory]
    #[structopt(env = "CORNE_ROOT", short = "r", long = "root")]
    pub root: Option<PathBuf>,
}

impl Opts {
    /// Whether the selected command asked for debug output
    pub fn debug(&self) -> bool {
        match &self.command {
            Command::FindDevices(opts) => opts.debug,
            Command::Flash(opts) => opts.debug,
            Command::Devices => false,
        }
    }
}
