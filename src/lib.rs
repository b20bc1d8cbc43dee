//! Bootloader discovery and UF2 flashing for ZMK split keyboards
//!
//! Keyboards in UF2 bootloader mode show up as small removable USB mass storage volumes. This
//! crate finds those volumes, correlates them with the configured device inventory by USB
//! vendor and product id, and copies a firmware image onto the right one.
//!
//! # Examples
//!
//! ```no_run
//! use corne::enumerate::{self, SystemSource};
//! use corne::{match_devices, Inventory};
//!
//! let inventory = Inventory::load("etc/devices.conf")?;
//! let candidates = enumerate::bootloader_candidates(&SystemSource::default());
//!
//! for found in match_devices(&candidates, &inventory) {
//!     println!("{}", found.block_path.display());
//! }
//!
//! # Ok::<(), corne::InventoryError>(())
//! ```

pub mod device;
pub mod enumerate;
mod error;
pub mod flash;
pub mod inventory;
pub mod matcher;
pub mod process;
pub mod uf2;
pub mod usb;
pub mod workspace;

pub use device::{is_bootloader_candidate, DeviceDescriptor};
pub use error::{DeviceError, FlashError, InventoryError, ProcessError, WorkspaceError};
pub use flash::{flash, FlashOptions, FlashOutcome, SystemVolume, Volume};
pub use inventory::{Inventory, InventoryEntry, Side, Variant};
pub use matcher::{match_devices, Match};
pub use workspace::Workspace;
