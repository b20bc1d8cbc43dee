//! Device inventory (`etc/devices.conf`)
//!
//! The inventory maps a device nickname to its USB identifiers and build metadata:
//!
//! ```yaml
//! devices:
//!   corne_left:
//!     vendor_id: "1d50"
//!     product_id: "615e"
//!     keyboard_name: corne
//!     firmware:
//!       standard:
//!         left: corne_left.uf2
//!         right: corne_right.uf2
//!       with_dongle: corne_dongle.uf2
//! ```
//!
//! Entries are kept in file order, which is the order matches are reported in.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

use log::{debug, warn};
use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::error::InventoryError;

/// Which half of a split keyboard
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            _ => Err(format!("Side must be 'left' or 'right', got '{}'", s)),
        }
    }
}

/// Firmware variant, selecting a key in the entry's `firmware` table
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Variant {
    Default,
    Gem,
}

impl Variant {
    /// The key in the `firmware` table this variant is stored under
    pub fn firmware_key(self) -> &'static str {
        match self {
            Variant::Default => "standard",
            Variant::Gem => "nice_view_gem",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Default => f.write_str("default"),
            Variant::Gem => f.write_str("gem"),
        }
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Variant::Default),
            "gem" => Ok(Variant::Gem),
            _ => Err(format!("Variant must be 'default' or 'gem', got '{}'", s)),
        }
    }
}

/// Firmware filenames for one variant
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FirmwareNames {
    /// A single image used for both sides, e.g. for a dongle
    Single(String),
    Split {
        left: Option<String>,
        right: Option<String>,
    },
}

/// Reads a USB id, which must be a YAML string.
///
/// Unquoted ids such as `2886`, `0x1d50` or `1e50` are read by YAML as numbers, which loses how
/// they were written. They are rejected instead of being rendered back to text.
fn usb_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(id) => Ok(Some(id)),
        serde_yaml::Value::Null => Ok(None),
        serde_yaml::Value::Number(n) => Err(de::Error::custom(format!(
            "USB id was read as the number {}; quote USB ids in devices.conf, e.g. vendor_id: \"1d50\"",
            n
        ))),
        other => Err(de::Error::custom(format!(
            "USB id must be a quoted hex string, got {:?}",
            other
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default, deserialize_with = "usb_id")]
    vendor_id: Option<String>,
    #[serde(default, deserialize_with = "usb_id")]
    product_id: Option<String>,
    keyboard_name: Option<String>,
    #[serde(default)]
    firmware: BTreeMap<String, FirmwareNames>,
}

#[derive(Debug, Default, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    devices: serde_yaml::Mapping,
}

/// A single configured device
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InventoryEntry {
    pub nickname: String,
    /// USB vendor id, as a hex string
    pub vendor_id: String,
    /// USB product id, as a hex string
    pub product_id: String,
    pub keyboard_name: Option<String>,
    pub firmware: BTreeMap<String, FirmwareNames>,
}

impl InventoryEntry {
    pub fn new<N, V, P>(nickname: N, vendor_id: V, product_id: P) -> InventoryEntry
    where
        N: Into<String>,
        V: Into<String>,
        P: Into<String>,
    {
        InventoryEntry {
            nickname: nickname.into(),
            vendor_id: vendor_id.into(),
            product_id: product_id.into(),
            keyboard_name: None,
            firmware: BTreeMap::new(),
        }
    }

    /// Returns true if the given ids equal this entry's, ignoring ASCII case
    pub fn has_ids(&self, vendor_id: &str, product_id: &str) -> bool {
        self.vendor_id.eq_ignore_ascii_case(vendor_id)
            && self.product_id.eq_ignore_ascii_case(product_id)
    }

    /// Resolves the firmware filename to flash for `side` with `variant`.
    ///
    /// When the variant has no entry in the `firmware` table the conventional
    /// `<keyboard_name>_<side>.uf2` name is used.
    pub fn firmware_file(&self, side: Side, variant: Variant) -> Result<String, InventoryError> {
        match self.firmware.get(variant.firmware_key()) {
            Some(FirmwareNames::Single(filename)) => Ok(filename.clone()),
            Some(FirmwareNames::Split { left, right }) => {
                let filename = match side {
                    Side::Left => left,
                    Side::Right => right,
                };

                filename.clone().ok_or_else(|| {
                    InventoryError::MissingFirmware(side.to_string(), variant.to_string())
                })
            }
            None => {
                let keyboard_name = self
                    .keyboard_name
                    .as_ref()
                    .ok_or_else(|| InventoryError::MissingKeyboardName(self.nickname.clone()))?;

                Ok(format!("{}_{}.uf2", keyboard_name, side))
            }
        }
    }
}

/// The set of configured devices, in file order
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Inventory {
    entries: Vec<InventoryEntry>,
}

impl Inventory {
    pub fn new(entries: Vec<InventoryEntry>) -> Inventory {
        Inventory { entries }
    }

    /// Loads the inventory from the YAML file at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Inventory, InventoryError> {
        let path = path.as_ref();

        debug!("Loading device inventory from {}", path.display());

        let contents = fs::read_to_string(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => InventoryError::ConfigNotFound(path.to_path_buf()),
            _ => InventoryError::ConfigRead(path.to_path_buf(), err),
        })?;

        Inventory::from_yaml(&contents)
            .map_err(|err| InventoryError::ConfigParse(path.to_path_buf(), err))
    }

    /// Parses an inventory from YAML text
    pub fn from_yaml(contents: &str) -> Result<Inventory, serde_yaml::Error> {
        let is_blank = contents
            .lines()
            .map(str::trim)
            .all(|line| line.is_empty() || line.starts_with('#'));

        let file: InventoryFile = if is_blank {
            InventoryFile::default()
        } else {
            serde_yaml::from_str(contents)?
        };
        let mut entries = Vec::with_capacity(file.devices.len());

        for (key, value) in file.devices {
            let nickname = match key {
                serde_yaml::Value::String(nickname) => nickname,
                other => {
                    warn!("Ignoring inventory entry with non-string name {:?}", other);
                    continue;
                }
            };

            let raw: RawEntry = serde_yaml::from_value(value).map_err(|err| {
                <serde_yaml::Error as de::Error>::custom(format!("device '{}': {}", nickname, err))
            })?;

            entries.push(InventoryEntry {
                nickname,
                vendor_id: raw.vendor_id.unwrap_or_default(),
                product_id: raw.product_id.unwrap_or_default(),
                keyboard_name: raw.keyboard_name,
                firmware: raw.firmware,
            });
        }

        Ok(Inventory { entries })
    }

    pub fn entries(&self) -> &[InventoryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn nicknames(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.nickname.as_str())
    }

    /// Looks up an entry by nickname
    pub fn get(&self, nickname: &str) -> Result<&InventoryEntry, InventoryError> {
        self.entries
            .iter()
            .find(|entry| entry.nickname == nickname)
            .ok_or_else(|| {
                InventoryError::UnknownDevice(
                    nickname.to_owned(),
                    self.nicknames().map(str::to_owned).collect(),
                )
            })
    }

    /// Returns every (vendor id, product id) pair claimed by more than one entry, together with
    /// the nicknames claiming it. Ids are lowercased.
    pub fn ambiguous_ids(&self) -> Vec<((String, String), Vec<String>)> {
        let mut groups: Vec<((String, String), Vec<String>)> = Vec::new();

        for entry in &self.entries {
            if entry.vendor_id.is_empty() || entry.product_id.is_empty() {
                continue;
            }

            let ids = (
                entry.vendor_id.to_ascii_lowercase(),
                entry.product_id.to_ascii_lowercase(),
            );

            match groups.iter_mut().find(|(group_ids, _)| *group_ids == ids) {
                Some((_, nicknames)) => nicknames.push(entry.nickname.clone()),
                None => groups.push((ids, vec![entry.nickname.clone()])),
            }
        }

        groups.retain(|(_, nicknames)| nicknames.len() > 1);
        groups
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const DEVICES_CONF: &str = r#"
# Device inventory
devices:
  corne_ergokeeb:
    vendor_id: "239A"
    product_id: "0029"
    keyboard_name: corne_choc_pro
    firmware:
      standard:
        left: corne_choc_pro_left.uf2
        right: corne_choc_pro_right.uf2
      nice_view_gem:
        left: corne_gem_left.uf2
      with_dongle: corne_dongle.uf2
  eyelash:
    vendor_id: 1d50
    product_id: 615e
    keyboard_name: eyelash_corne
"#;

    #[test]
    fn it_should_parse_entries_in_file_order() {
        let inventory = Inventory::from_yaml(DEVICES_CONF).unwrap();
        let nicknames: Vec<&str> = inventory.nicknames().collect();

        assert_eq!(nicknames, vec!["corne_ergokeeb", "eyelash"]);

        let entry = inventory.get("eyelash").unwrap();

        assert_eq!(entry.vendor_id, "1d50");
        assert_eq!(entry.product_id, "615e");
        assert_eq!(entry.keyboard_name.as_deref(), Some("eyelash_corne"));
    }

    #[test]
    fn it_should_compare_ids_case_insensitively() {
        let inventory = Inventory::from_yaml(DEVICES_CONF).unwrap();
        let entry = inventory.get("corne_ergokeeb").unwrap();

        assert!(entry.has_ids("239a", "0029"));
        assert!(!entry.has_ids("239a", "29"));
    }

    #[test]
    fn it_should_keep_quoted_ids_as_written() {
        let inventory = Inventory::from_yaml(
            "devices:\n  seeed:\n    vendor_id: \"2886\"\n    product_id: \"0045\"\n",
        )
        .unwrap();
        let entry = inventory.get("seeed").unwrap();

        assert_eq!(entry.vendor_id, "2886");
        assert_eq!(entry.product_id, "0045");
    }

    #[test]
    fn it_should_reject_unquoted_numeric_ids() {
        let cases = [
            "devices:\n  corne:\n    vendor_id: 0x1d50\n    product_id: \"615e\"\n",
            "devices:\n  corne:\n    vendor_id: \"1d50\"\n    product_id: 1e50\n",
            "devices:\n  corne:\n    vendor_id: 2886\n    product_id: \"0045\"\n",
            "devices:\n  corne:\n    vendor_id: \"239a\"\n    product_id: 29\n",
        ];

        for yaml in &cases {
            let err = Inventory::from_yaml(yaml).unwrap_err().to_string();

            assert!(err.contains("device 'corne'"), "{}", err);
            assert!(err.contains("quote USB ids"), "{}", err);
        }
    }

    #[test]
    fn it_should_allow_missing_ids() {
        let inventory =
            Inventory::from_yaml("devices:\n  dongle:\n    keyboard_name: corne\n").unwrap();
        let entry = inventory.get("dongle").unwrap();

        assert_eq!(entry.vendor_id, "");
        assert_eq!(entry.product_id, "");
    }

    #[test]
    fn it_should_resolve_firmware_files() {
        let inventory = Inventory::from_yaml(DEVICES_CONF).unwrap();
        let entry = inventory.get("corne_ergokeeb").unwrap();

        assert_eq!(
            entry.firmware_file(Side::Left, Variant::Default).unwrap(),
            "corne_choc_pro_left.uf2"
        );
        assert_eq!(
            entry.firmware_file(Side::Right, Variant::Default).unwrap(),
            "corne_choc_pro_right.uf2"
        );
        assert_eq!(
            entry.firmware_file(Side::Left, Variant::Gem).unwrap(),
            "corne_gem_left.uf2"
        );
        assert!(matches!(
            entry.firmware_file(Side::Right, Variant::Gem),
            Err(InventoryError::MissingFirmware(_, _))
        ));
    }

    #[test]
    fn it_should_fall_back_to_conventional_firmware_name() {
        let inventory = Inventory::from_yaml(DEVICES_CONF).unwrap();
        let entry = inventory.get("eyelash").unwrap();

        assert_eq!(
            entry.firmware_file(Side::Right, Variant::Gem).unwrap(),
            "eyelash_corne_right.uf2"
        );

        let bare = InventoryEntry::new("bare", "1d50", "615e");

        assert!(matches!(
            bare.firmware_file(Side::Left, Variant::Default),
            Err(InventoryError::MissingKeyboardName(name)) if name == "bare"
        ));
    }

    #[test]
    fn it_should_report_unknown_devices_with_available_names() {
        let inventory = Inventory::from_yaml(DEVICES_CONF).unwrap();

        match inventory.get("nope") {
            Err(InventoryError::UnknownDevice(name, available)) => {
                assert_eq!(name, "nope");
                assert_eq!(available, vec!["corne_ergokeeb", "eyelash"]);
            }
            other => panic!("expected UnknownDevice, got {:?}", other),
        }
    }

    #[test]
    fn it_should_detect_ambiguous_ids() {
        let inventory = Inventory::new(vec![
            InventoryEntry::new("a", "1D50", "615E"),
            InventoryEntry::new("b", "239a", "0029"),
            InventoryEntry::new("c", "1d50", "615e"),
        ]);

        assert_eq!(
            inventory.ambiguous_ids(),
            vec![(
                ("1d50".to_owned(), "615e".to_owned()),
                vec!["a".to_owned(), "c".to_owned()]
            )]
        );
    }

    #[test]
    fn it_should_treat_empty_document_as_empty_inventory() {
        assert!(Inventory::from_yaml("").unwrap().is_empty());
        assert!(Inventory::from_yaml("# nothing here\n").unwrap().is_empty());
        assert!(Inventory::from_yaml("devices: {}\n").unwrap().is_empty());
    }

    #[test]
    fn it_should_fail_on_missing_or_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("devices.conf");

        assert!(matches!(
            Inventory::load(&missing),
            Err(InventoryError::ConfigNotFound(_))
        ));

        let mut file = fs::File::create(&missing).unwrap();
        file.write_all(b"devices: [unterminated").unwrap();

        assert!(matches!(
            Inventory::load(&missing),
            Err(InventoryError::ConfigParse(_, _))
        ));
    }

    #[test]
    fn it_should_parse_sides_and_variants() {
        assert_eq!("left".parse::<Side>().unwrap(), Side::Left);
        assert_eq!("right".parse::<Side>().unwrap(), Side::Right);
        assert!("middle".parse::<Side>().is_err());
        assert_eq!("gem".parse::<Variant>().unwrap(), Variant::Gem);
        assert!("fancy".parse::<Variant>().is_err());
    }
}
