use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use log::{debug, info, warn, LevelFilter};
use structopt::StructOpt;

use corne::enumerate::{self, MetadataSource, SystemSource};
use corne::matcher::{self, Match, Selection};
use corne::uf2::Uf2Image;
use corne::{usb, DeviceDescriptor, FlashOptions, Inventory, InventoryEntry, SystemVolume, Workspace};

mod cli;

/// Delay between scans while waiting for a device to enter bootloader mode
const SCAN_INTERVAL: Duration = Duration::from_secs(1);

fn init_logger(debug: bool) {
    let mut builder = pretty_env_logger::formatted_timed_builder();

    match std::env::var("RUST_LOG") {
        Ok(filters) if !debug => {
            builder.parse_filters(&filters);
        }
        _ => {
            builder.filter_level(if debug {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            });
        }
    }

    builder.init();
}

fn load_inventory(workspace: &Workspace) -> Result<Inventory, anyhow::Error> {
    let path = workspace.inventory_path();
    let inventory = Inventory::load(&path)
        .with_context(|| format!("Failed to load device inventory '{}'", path.display()))?;

    matcher::warn_ambiguous(&inventory);

    Ok(inventory)
}

fn print_inventory(inventory: &Inventory) {
    println!("\nLoaded device configurations:");

    for entry in inventory.entries() {
        println!(
            "  {}: vendor_id={} product_id={}",
            entry.nickname,
            or_na(&entry.vendor_id),
            or_na(&entry.product_id)
        );
    }
}

fn or_na(value: &str) -> &str {
    if value.is_empty() {
        "N/A"
    } else {
        value
    }
}

fn print_raw_usb() {
    println!("\nRaw USB device information:");

    match usb::lsusb() {
        Ok(output) => {
            print!("{}", output);

            for device in usb::parse_lsusb(&output) {
                debug!(
                    "Found USB device: vendor_id={}, product_id={} ({})",
                    device.vendor_id, device.product_id, device.description
                );
            }
        }
        Err(err) => println!("Failed to run lsusb command: {}", err),
    }
}

/// Scans for bootloader devices and matches them against `inventory`
fn scan<S: MetadataSource>(
    source: &S,
    inventory: &Inventory,
) -> (Vec<DeviceDescriptor>, Vec<Match>) {
    let candidates = enumerate::bootloader_candidates(source);
    let matches = corne::match_devices(&candidates, inventory);

    (candidates, matches)
}

fn find_devices(workspace: &Workspace, opts: &cli::FindDevicesOpts) -> Result<(), anyhow::Error> {
    let inventory = load_inventory(workspace)?;

    if opts.show_config || opts.debug {
        print_inventory(&inventory);
    }

    if opts.raw_usb || opts.debug {
        print_raw_usb();
    }

    debug!("Scanning for bootloader devices...");

    let (candidates, matches) = scan(&SystemSource::default(), &inventory);

    for found in &matches {
        if opts.debug {
            println!("{}", found);
        } else {
            println!("{}", found.block_path.display());
        }
    }

    if matches.is_empty() && opts.debug {
        println!("No matching bootloader devices found");
    }

    if opts.list_all && !candidates.is_empty() {
        println!("\nAll bootloader devices:");

        for candidate in &candidates {
            println!("{}", candidate);
        }
    }

    if opts.debug && matches.is_empty() {
        println!("\nNo matches found. Check if the device is in bootloader mode and properly connected.");
        println!("Also verify that the vendor_id and product_id in devices.conf match your device.");
        println!("You can use 'lsusb' to see connected USB devices and their IDs.");
    }

    Ok(())
}

/// Asks the operator a yes/no question on the terminal
fn confirm(question: &str) -> Result<bool, anyhow::Error> {
    print!("{} (y/n): ", question);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;

    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

/// Waits up to `wait` for a bootloader device for `entry` and picks the device to flash. When
/// only another inventory device is found the operator is asked to confirm, unless `assume_yes`.
fn find_bootloader<S: MetadataSource>(
    source: &S,
    inventory: &Inventory,
    entry: &InventoryEntry,
    wait: Duration,
    assume_yes: bool,
) -> Result<PathBuf, anyhow::Error> {
    let matches = matcher::wait_for(source, inventory, &entry.nickname, wait, SCAN_INTERVAL);

    let found = match matcher::select(&matches, &entry.nickname) {
        Selection::Requested(found) => {
            info!("Found bootloader device: {}", found.block_path.display());

            return Ok(found.block_path.clone());
        }
        Selection::Other(found) => found,
        Selection::NotFound => bail!("No bootloader device found"),
    };

    let other = inventory.get(&found.nickname)?;

    warn!(
        "Device at {} does not match expected configuration",
        found.block_path.display()
    );
    warn!(
        "Found: {} (vendor_id={}, product_id={})",
        other.nickname, other.vendor_id, other.product_id
    );
    warn!(
        "Expected: {} (vendor_id={}, product_id={})",
        entry.nickname, entry.vendor_id, entry.product_id
    );

    if !assume_yes && !confirm("Continue anyway?")? {
        bail!("Flashing aborted");
    }

    Ok(found.block_path.clone())
}

fn flash(workspace: &Workspace, opts: &cli::FlashOpts) -> Result<(), anyhow::Error> {
    let inventory = load_inventory(workspace)?;
    let entry = inventory.get(&opts.device)?;
    let firmware_file = entry.firmware_file(opts.side, opts.variant)?;
    let firmware = workspace.results_dir().join(firmware_file);

    info!(
        "Flashing {} side with {} firmware: {}",
        opts.side,
        opts.variant,
        firmware.display()
    );

    let image = Uf2Image::inspect(&firmware).with_context(|| {
        format!(
            "Make sure you've built the firmware first ('{}')",
            firmware.display()
        )
    })?;

    info!(
        "Firmware image has {} blocks ({} bytes) for {}, sha256 {}",
        image.blocks,
        image.payload_size,
        image
            .family()
            .map(|family| family.to_string())
            .unwrap_or_else(|| "no declared family".to_owned()),
        image.sha256
    );

    let mount_point = match &opts.mount_point {
        Some(mount_point) => mount_point.clone(),
        None => dirs::home_dir()
            .map(|home| home.join("mnt").join("corne"))
            .ok_or_else(|| anyhow!("Could not determine the home directory, use --mount-point"))?,
    };

    let device = find_bootloader(
        &SystemSource::default(),
        &inventory,
        entry,
        Duration::from_secs(opts.wait),
        opts.yes,
    )?;

    let mut options = FlashOptions::new(mount_point);
    options.settle_time = Duration::from_secs(opts.ready_time);

    let mut volume = SystemVolume {
        sudo: !opts.no_sudo,
    };

    corne::flash(&mut volume, &device, &firmware, &options)
        .with_context(|| format!("Error flashing firmware to {}", device.display()))?;

    Ok(())
}

fn list_devices(workspace: &Workspace) -> Result<(), anyhow::Error> {
    let inventory = load_inventory(workspace)?;

    for entry in inventory.entries() {
        println!(
            "{}: keyboard_name={} vendor_id={} product_id={}",
            entry.nickname,
            entry.keyboard_name.as_deref().unwrap_or("N/A"),
            or_na(&entry.vendor_id),
            or_na(&entry.product_id)
        );
    }

    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    use cli::Command;

    // Parse the command-line arguments
    let opts = cli::Opts::from_args();

    // Log with timestamps at Info level, or Debug when asked for
    init_logger(opts.debug());

    let workspace = Workspace::resolve(opts.root.clone())?;

    match &opts.command {
        Command::FindDevices(find_opts) => find_devices(&workspace, find_opts)?,
        Command::Flash(flash_opts) => flash(&workspace, flash_opts)?,
        Command::Devices => list_devices(&workspace)?,
    }

    Ok(())
}
