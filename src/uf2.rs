//! UF2 image inspection
//!
//! Bootloaders only act on well-formed UF2 blocks, so an image is checked before it is copied to
//! a device. See <https://github.com/microsoft/uf2> for the format.

use std::fmt;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use num_enum::{FromPrimitive, IntoPrimitive};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::FlashError;

/// Size of a single UF2 block
pub const BLOCK_SIZE: usize = 512;
/// Maximum payload carried by a single block
pub const MAX_PAYLOAD_SIZE: u32 = 476;

pub const MAGIC_START0: u32 = 0x0A32_4655;
pub const MAGIC_START1: u32 = 0x9E5D_5157;
pub const MAGIC_END: u32 = 0x0AB1_6F30;

/// Block is not meant for main flash
pub const FLAG_NOT_MAIN_FLASH: u32 = 0x0000_0001;
/// The `file_size` field holds a family id
pub const FLAG_FAMILY_ID_PRESENT: u32 = 0x0000_2000;

/// Known UF2 family ids
#[repr(u32)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive, FromPrimitive)]
pub enum Family {
    #[num_enum(default)]
    Unknown = 0,
    Samd21 = 0x68ed_2b88,
    Samd51 = 0x5511_4460,
    Nrf52 = 0x1b57_745f,
    Nrf52833 = 0x621e_937a,
    Nrf52840 = 0xada5_2840,
    Rp2040 = 0xe48b_ff56,
    Stm32F4 = 0x5775_5a57,
    Esp32S2 = 0xbfdd_4eee,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Family::Unknown => "unknown",
            Family::Samd21 => "ATSAMD21",
            Family::Samd51 => "ATSAMD51",
            Family::Nrf52 => "nRF52",
            Family::Nrf52833 => "nRF52833",
            Family::Nrf52840 => "nRF52840",
            Family::Rp2040 => "RP2040",
            Family::Stm32F4 => "STM32F4",
            Family::Esp32S2 => "ESP32-S2",
        };

        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Uf2Error {
    #[error("The image is empty")]
    Empty,
    #[error("The image size {} is not a multiple of {} bytes", _0, BLOCK_SIZE)]
    Truncated(usize),
    #[error("Block {} has an invalid {} magic value: {:#010x}", _0, _1, _2)]
    InvalidMagic(usize, &'static str, u32),
    #[error("Block {} has an invalid payload size of {} bytes", _0, _1)]
    InvalidPayloadSize(usize, u32),
    #[error("I/O error: {}", _0)]
    IoError(#[from] io::Error),
}

/// The header fields of a single UF2 block
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Block {
    pub flags: u32,
    pub target_addr: u32,
    pub payload_size: u32,
    pub block_no: u32,
    pub num_blocks: u32,
    /// The file size, or the family id when `FLAG_FAMILY_ID_PRESENT` is set
    pub file_size: u32,
}

impl Block {
    /// Reads and validates the block at `index` from a 512-byte buffer
    pub fn from_bytes(index: usize, bytes: &[u8; BLOCK_SIZE]) -> Result<Block, Uf2Error> {
        let mut cursor = Cursor::new(&bytes[..]);

        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != MAGIC_START0 {
            return Err(Uf2Error::InvalidMagic(index, "start", magic));
        }

        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != MAGIC_START1 {
            return Err(Uf2Error::InvalidMagic(index, "second start", magic));
        }

        let block = Block {
            flags: cursor.read_u32::<LittleEndian>()?,
            target_addr: cursor.read_u32::<LittleEndian>()?,
            payload_size: cursor.read_u32::<LittleEndian>()?,
            block_no: cursor.read_u32::<LittleEndian>()?,
            num_blocks: cursor.read_u32::<LittleEndian>()?,
            file_size: cursor.read_u32::<LittleEndian>()?,
        };

        if block.payload_size > MAX_PAYLOAD_SIZE {
            return Err(Uf2Error::InvalidPayloadSize(index, block.payload_size));
        }

        let mut end = Cursor::new(&bytes[BLOCK_SIZE - 4..]);
        let magic = end.read_u32::<LittleEndian>()?;
        if magic != MAGIC_END {
            return Err(Uf2Error::InvalidMagic(index, "end", magic));
        }

        Ok(block)
    }

    pub fn family_id(&self) -> Option<u32> {
        if self.flags & FLAG_FAMILY_ID_PRESENT != 0 {
            Some(self.file_size)
        } else {
            None
        }
    }
}

/// Summary of a validated UF2 image
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Uf2Image {
    /// Number of blocks in the file
    pub blocks: usize,
    /// Bytes destined for main flash
    pub payload_size: u64,
    /// The family id of the first block that declares one
    pub family_id: Option<u32>,
    /// Hex encoded SHA-256 of the whole file
    pub sha256: String,
}

impl Uf2Image {
    /// Validates every block of the UF2 image read from `reader`
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Uf2Image, Uf2Error> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;

        if bytes.is_empty() {
            return Err(Uf2Error::Empty);
        }

        if bytes.len() % BLOCK_SIZE != 0 {
            return Err(Uf2Error::Truncated(bytes.len()));
        }

        let mut image = Uf2Image {
            blocks: 0,
            payload_size: 0,
            family_id: None,
            sha256: format!("{:x}", Sha256::digest(&bytes)),
        };

        for (index, chunk) in bytes.chunks_exact(BLOCK_SIZE).enumerate() {
            let mut buf = [0u8; BLOCK_SIZE];
            buf.copy_from_slice(chunk);

            let block = Block::from_bytes(index, &buf)?;

            if block.flags & FLAG_NOT_MAIN_FLASH == 0 {
                image.payload_size += u64::from(block.payload_size);
            }

            if image.family_id.is_none() {
                image.family_id = block.family_id();
            }

            image.blocks += 1;
        }

        Ok(image)
    }

    /// Opens and validates the UF2 image at `path`
    pub fn inspect<P: AsRef<Path>>(path: P) -> Result<Uf2Image, FlashError> {
        let path = path.as_ref();
        let invalid = |err: Uf2Error| FlashError::InvalidImage(path.to_path_buf(), err.to_string());

        match fs::File::open(path) {
            Ok(file) => Uf2Image::from_reader(file).map_err(invalid),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(FlashError::FirmwareNotFound(path.to_path_buf()))
            }
            Err(err) => Err(invalid(err.into())),
        }
    }

    pub fn family(&self) -> Option<Family> {
        self.family_id.map(Family::from)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_hex::*;
    use byteorder::WriteBytesExt;
    use hex_literal::hex;

    use super::*;

    /// Serializes a block with the given header fields and a zero payload
    fn block_bytes(block: &Block) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BLOCK_SIZE);

        for value in &[
            MAGIC_START0,
            MAGIC_START1,
            block.flags,
            block.target_addr,
            block.payload_size,
            block.block_no,
            block.num_blocks,
            block.file_size,
        ] {
            buf.write_u32::<LittleEndian>(*value).unwrap();
        }

        buf.resize(BLOCK_SIZE - 4, 0);
        buf.write_u32::<LittleEndian>(MAGIC_END).unwrap();
        buf
    }

    /// Builds an nRF52840 image of `count` blocks
    fn nrf52840_image(count: u32) -> Vec<u8> {
        (0..count)
            .flat_map(|block_no| {
                block_bytes(&Block {
                    flags: FLAG_FAMILY_ID_PRESENT,
                    target_addr: 0x26000 + block_no * 256,
                    payload_size: 256,
                    block_no,
                    num_blocks: count,
                    file_size: Family::Nrf52840.into(),
                })
            })
            .collect()
    }

    #[test]
    fn it_should_serialize_block_header() {
        let bytes = block_bytes(&Block {
            flags: FLAG_FAMILY_ID_PRESENT,
            target_addr: 0x26000,
            payload_size: 256,
            block_no: 0,
            num_blocks: 2,
            file_size: Family::Nrf52840.into(),
        });

        assert_eq_hex!(
            &bytes[..32],
            &hex!("55 46 32 0A 57 51 5D 9E 00 20 00 00 00 60 02 00 00 01 00 00 00 00 00 00 02 00 00 00 40 28 A5 AD")[..]
        );
        assert_eq_hex!(&bytes[508..], &hex!("30 6F B1 0A")[..]);
    }

    #[test]
    fn it_should_read_block_header() {
        let mut buf = [0u8; BLOCK_SIZE];
        buf.copy_from_slice(&nrf52840_image(1));

        let block = Block::from_bytes(0, &buf).unwrap();

        assert_eq_hex!(block.target_addr, 0x26000);
        assert_eq!(block.payload_size, 256);
        assert_eq!(block.num_blocks, 1);
        assert_eq_hex!(block.family_id().unwrap(), 0xada5_2840);
    }

    #[test]
    fn it_should_summarize_image() {
        let image = Uf2Image::from_reader(Cursor::new(nrf52840_image(4))).unwrap();

        assert_eq!(image.blocks, 4);
        assert_eq!(image.payload_size, 1024);
        assert_eq!(image.family(), Some(Family::Nrf52840));
        assert_eq!(image.sha256.len(), 64);
    }

    #[test]
    fn it_should_map_unknown_families() {
        assert_eq!(Family::from(0x1234_5678), Family::Unknown);
        assert_eq!(Family::from(0xe48b_ff56), Family::Rp2040);
    }

    #[test]
    fn it_should_reject_invalid_images() {
        assert!(matches!(
            Uf2Image::from_reader(Cursor::new(Vec::new())),
            Err(Uf2Error::Empty)
        ));
        assert!(matches!(
            Uf2Image::from_reader(Cursor::new(vec![0u8; 100])),
            Err(Uf2Error::Truncated(100))
        ));

        let mut image = nrf52840_image(2);
        image[BLOCK_SIZE + 4] = 0;

        assert!(matches!(
            Uf2Image::from_reader(Cursor::new(image)),
            Err(Uf2Error::InvalidMagic(1, "second start", _))
        ));

        let mut image = nrf52840_image(1);
        image[BLOCK_SIZE - 1] = 0;

        assert!(matches!(
            Uf2Image::from_reader(Cursor::new(image)),
            Err(Uf2Error::InvalidMagic(0, "end", _))
        ));
    }

    #[test]
    fn it_should_reject_oversized_payloads() {
        let bytes = block_bytes(&Block {
            flags: 0,
            target_addr: 0,
            payload_size: 512,
            block_no: 0,
            num_blocks: 1,
            file_size: 0,
        });

        assert!(matches!(
            Uf2Image::from_reader(Cursor::new(bytes)),
            Err(Uf2Error::InvalidPayloadSize(0, 512))
        ));
    }

    #[test]
    fn it_should_inspect_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corne_left.uf2");

        fs::File::create(&path)
            .unwrap()
            .write_all(&nrf52840_image(3))
            .unwrap();

        assert_eq!(Uf2Image::inspect(&path).unwrap().blocks, 3);
        assert!(matches!(
            Uf2Image::inspect(dir.path().join("missing.uf2")),
            Err(FlashError::FirmwareNotFound(_))
        ));

        fs::write(&path, b"not a firmware image").unwrap();

        assert!(matches!(
            Uf2Image::inspect(&path),
            Err(FlashError::InvalidImage(_, _))
        ));
    }
}
