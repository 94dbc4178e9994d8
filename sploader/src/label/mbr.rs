//! Master Boot Record: 446 bytes of bootstrap code, four 16-byte primary
//! partition entries, and the 0x55 0xAA signature in the last two bytes.

use alloc::vec::Vec;

use log::debug;

use super::{Partition, PartitionKind};
use crate::error::{SplError, Structure};

pub const MBR_TABLE_OFFSET: usize = 446;
pub const MBR_ENTRY_SIZE: usize = 16;
pub const MBR_ENTRY_COUNT: usize = 4;
pub const MBR_SIGNATURE_OFFSET: usize = 510;
pub const MBR_SIGNATURE: [u8; 2] = [0x55, 0xAA];
pub const MBR_SECTOR_SIZE: usize = 512;

pub const BOOT_INDICATOR_ACTIVE: u8 = 0x80;
/// System ID of the single entry in a GPT protective MBR
pub const SYSTEM_ID_GPT_PROTECTIVE: u8 = 0xEE;

/// Extended partitions chain further tables; this loader does not follow them
pub fn is_extended(system_id: u8) -> bool {
    matches!(system_id, 0x05 | 0x0F | 0x85)
}

/// On-disk primary partition entry. The CHS fields are ignored; only LBA
/// addressing is used.
#[derive(Copy, Clone, Debug)]
struct MbrEntry {
    boot_indicator: u8,
    system_id: u8,
    start_lba: u32,
    sector_count: u32,
}

impl MbrEntry {
    fn decode(raw: &[u8]) -> Self {
        Self {
            boot_indicator: raw[0],
            system_id: raw[4],
            start_lba: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            sector_count: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        }
    }

    fn is_empty(&self) -> bool {
        self.system_id == 0
    }
}

fn entries(sector: &[u8]) -> impl Iterator<Item = MbrEntry> + '_ {
    sector[MBR_TABLE_OFFSET..MBR_SIGNATURE_OFFSET]
        .chunks_exact(MBR_ENTRY_SIZE)
        .map(MbrEntry::decode)
}

pub fn has_signature(sector: &[u8]) -> bool {
    sector.len() >= MBR_SECTOR_SIZE
        && sector[MBR_SIGNATURE_OFFSET..MBR_SIGNATURE_OFFSET + 2] == MBR_SIGNATURE
}

/// Whether the sector is a GPT protective MBR
pub fn has_protective_entry(sector: &[u8]) -> bool {
    has_signature(sector) && entries(sector).any(|e| e.system_id == SYSTEM_ID_GPT_PROTECTIVE)
}

/// Read the primary partitions from a boot sector. Empty slots are left out,
/// but every partition keeps the index of its slot. Extended partitions are
/// reported like any other, and are flagged as unsupported by
/// `Partition::unsupported`.
pub fn read_mbr(sector: &[u8]) -> Result<Vec<Partition>, SplError> {
    if sector.len() < MBR_SECTOR_SIZE {
        return Err(SplError::StructuralInvalid(Structure::DiskTruncated));
    }
    if !has_signature(sector) {
        return Err(SplError::StructuralInvalid(Structure::MbrSignature));
    }

    let mut partitions = Vec::with_capacity(MBR_ENTRY_COUNT);
    for (index, entry) in entries(sector).enumerate() {
        if entry.is_empty() {
            continue;
        }
        let active = match entry.boot_indicator {
            BOOT_INDICATOR_ACTIVE => true,
            0 => false,
            _ => return Err(SplError::StructuralInvalid(Structure::MbrEntry)),
        };
        if entry.sector_count == 0 {
            return Err(SplError::StructuralInvalid(Structure::MbrEntry));
        }
        if is_extended(entry.system_id) {
            debug!(
                "MBR slot {} is an extended partition ({:#04x})",
                index, entry.system_id
            );
        }
        partitions.push(Partition {
            index: index as u32,
            first_lba: entry.start_lba as u64,
            sector_count: entry.sector_count as u64,
            active,
            kind: PartitionKind::Mbr {
                system_id: entry.system_id,
            },
        });
    }
    debug!("MBR: {} partitions", partitions.len());
    Ok(partitions)
}
