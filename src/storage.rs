//! Node identity persisted in flash.
//!
//! One 16-byte record at the start of a dedicated 4 KiB sector:
//!   [4 bytes: magic] [2 bytes: layout version] [2 bytes: reserved]
//!   [4 bytes: node id] [4 bytes: CRC32 over version..node id]
//!
//! The record is read once at boot. If it is blank, from a different layout or
//! fails its CRC, the sector is erased and a fresh record written. Provisioning
//! runs before the second core starts, so no cross-core flash handshake is
//! needed.

use core::fmt;

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

use crate::can::MAX_EXTENDED_ID;
use crate::config::{DEFAULT_NODE_ID, TAG};

const RECORD_MAGIC: u32 = 0x434E_4F44; // "CNOD"

/// Current record layout.
pub const LAYOUT_VERSION: u16 = 1;

/// Flash offset of the identity sector (in data partition, after app).
pub const RECORD_OFFSET: u32 = 0x3D_0000;
pub const SECTOR_SIZE: u32 = 0x1000;

pub const RECORD_LEN: usize = 16;

/// CRC-32 (IEEE 802.3, reflected), used to validate the record.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    pub node_id: u32,
}

impl NodeRecord {
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[0..4].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&LAYOUT_VERSION.to_le_bytes());
        buf[6..8].copy_from_slice(&[0xFF, 0xFF]);
        buf[8..12].copy_from_slice(&self.node_id.to_le_bytes());
        let crc = crc32(&buf[4..12]);
        buf[12..16].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; RECORD_LEN]) -> Result<Self, RecordError> {
        if buf.iter().all(|&b| b == 0xFF) {
            return Err(RecordError::Blank);
        }

        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != RECORD_MAGIC {
            return Err(RecordError::Corrupt);
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != LAYOUT_VERSION {
            return Err(RecordError::NewVersion(version));
        }

        let stored_crc = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        if crc32(&buf[4..12]) != stored_crc {
            return Err(RecordError::Corrupt);
        }

        let node_id = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if node_id > MAX_EXTENDED_ID {
            return Err(RecordError::Corrupt);
        }

        Ok(Self { node_id })
    }
}

/// Why a stored record was not usable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordError {
    /// Erased sector, no record yet.
    Blank,
    /// Written by a different firmware layout.
    NewVersion(u16),
    /// Bad magic, CRC mismatch or an id no CAN frame can carry.
    Corrupt,
    /// The flash read itself failed.
    Flash,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::Blank => write!(f, "blank"),
            RecordError::NewVersion(v) => write!(f, "layout version {}", v),
            RecordError::Corrupt => write!(f, "corrupt"),
            RecordError::Flash => write!(f, "unreadable"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageError {
    Read,
    Erase,
    Write,
    /// Record read back after writing did not match.
    Verify,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Read => write!(f, "flash read failed"),
            StorageError::Erase => write!(f, "flash erase failed"),
            StorageError::Write => write!(f, "flash write failed"),
            StorageError::Verify => write!(f, "record verification failed"),
        }
    }
}

pub fn read_record<F: ReadNorFlash>(flash: &mut F, offset: u32) -> Result<NodeRecord, RecordError> {
    let mut buf = [0u8; RECORD_LEN];
    flash.read(offset, &mut buf).map_err(|_| RecordError::Flash)?;
    NodeRecord::decode(&buf)
}

/// Erase the sector at `offset` and write `record` into it.
pub fn write_record<F: NorFlash>(
    flash: &mut F,
    offset: u32,
    record: &NodeRecord,
) -> Result<(), StorageError> {
    flash
        .erase(offset, offset + SECTOR_SIZE)
        .map_err(|_| StorageError::Erase)?;
    flash
        .write(offset, &record.encode())
        .map_err(|_| StorageError::Write)?;
    Ok(())
}

/// Resolve this node's identity and make sure flash agrees with it.
///
/// `build_id` (from `NODE_ID` at compile time) wins over the stored record.
/// Without it the stored id is kept, or [`DEFAULT_NODE_ID`] on a fresh board.
pub fn provision<F: NorFlash>(
    flash: &mut F,
    offset: u32,
    build_id: Option<u32>,
) -> Result<NodeRecord, StorageError> {
    let stored = match read_record(flash, offset) {
        Ok(record) => Some(record),
        Err(RecordError::Flash) => return Err(StorageError::Read),
        Err(e) => {
            log::warn!(target: TAG, "storage: identity record {}, reinitializing", e);
            None
        }
    };

    let node_id = match (build_id, stored) {
        (Some(id), Some(record)) if record.node_id == id => return Ok(record),
        (None, Some(record)) => {
            log::info!(target: TAG, "storage: node id 0x{:X} from flash", record.node_id);
            return Ok(record);
        }
        (Some(id), _) => id,
        (None, None) => DEFAULT_NODE_ID,
    };

    let record = NodeRecord { node_id };
    write_record(flash, offset, &record)?;

    match read_record(flash, offset) {
        Ok(readback) if readback == record => {
            log::info!(target: TAG, "storage: node id 0x{:X} written to flash", node_id);
            Ok(record)
        }
        _ => Err(StorageError::Verify),
    }
}
