//! Correlation of discovered devices with the inventory

use std::fmt;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::device::DeviceDescriptor;
use crate::enumerate::{self, MetadataSource};
use crate::inventory::Inventory;

/// A discovered block device that belongs to an inventory entry
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Match {
    pub nickname: String,
    pub block_path: PathBuf,
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.nickname, self.block_path.display())
    }
}

/// Matches bootloader-shaped `descriptors` against `inventory`.
///
/// Results are ordered by descriptor, then by inventory order. Nothing is deduplicated: an id
/// pair claimed by several entries yields one match per entry, and identical devices at
/// different paths each yield their own match.
pub fn match_devices(descriptors: &[DeviceDescriptor], inventory: &Inventory) -> Vec<Match> {
    let mut matches = Vec::new();

    for descriptor in descriptors.iter().filter(|d| d.is_bootloader_candidate()) {
        let (vendor_id, product_id) = match descriptor.ids() {
            Some(ids) => ids,
            None => continue,
        };

        for entry in inventory.entries() {
            debug!(
                "Comparing {} ({}:{}) with {} ({}:{})",
                descriptor.block_path.display(),
                vendor_id,
                product_id,
                entry.nickname,
                entry.vendor_id,
                entry.product_id
            );

            if entry.has_ids(vendor_id, product_id) {
                debug!(
                    "Found bootloader device: {} -> {}",
                    entry.nickname,
                    descriptor.block_path.display()
                );

                matches.push(Match {
                    nickname: entry.nickname.clone(),
                    block_path: descriptor.block_path.clone(),
                });
            }
        }
    }

    matches
}

/// Logs a warning for every id pair that more than one inventory entry claims
pub fn warn_ambiguous(inventory: &Inventory) {
    for ((vendor_id, product_id), nicknames) in inventory.ambiguous_ids() {
        warn!(
            "Devices {} share vendor_id={} product_id={}; a matching device will be reported for each of them",
            nicknames.join(", "),
            vendor_id,
            product_id
        );
    }
}

/// Returns the first match for `nickname`, in scan order
pub fn first_for<'a>(matches: &'a [Match], nickname: &str) -> Option<&'a Match> {
    matches.iter().find(|m| m.nickname == nickname)
}

/// The device chosen to flash for a requested nickname
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Selection<'a> {
    /// The first match for the requested nickname
    Requested(&'a Match),
    /// No match for the requested nickname, but another inventory device matched
    Other(&'a Match),
    NotFound,
}

/// Picks the device to flash for `nickname` from `matches`
pub fn select<'a>(matches: &'a [Match], nickname: &str) -> Selection<'a> {
    if let Some(found) = first_for(matches, nickname) {
        return Selection::Requested(found);
    }

    match matches.first() {
        Some(other) => Selection::Other(other),
        None => Selection::NotFound,
    }
}

/// Scans `source` every `interval` until a bootloader device for `nickname` matches or `wait`
/// has elapsed, and returns the matches of the last scan.
///
/// There is always at least one scan. Matches for other inventory devices do not end the wait.
pub fn wait_for<S: MetadataSource + ?Sized>(
    source: &S,
    inventory: &Inventory,
    nickname: &str,
    wait: Duration,
    interval: Duration,
) -> Vec<Match> {
    let started = Instant::now();

    loop {
        let candidates = enumerate::bootloader_candidates(source);
        let matches = match_devices(&candidates, inventory);

        if first_for(&matches, nickname).is_some() || started.elapsed() >= wait {
            return matches;
        }

        debug!("No bootloader device for {} yet, scanning again", nickname);
        thread::sleep(interval);
    }
}
