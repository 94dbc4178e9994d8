//! GUID Partition Table. LBA 0 holds a protective MBR, LBA 1 the GPT header,
//! and the header points at an array of partition entries. Both the header
//! and the entry array carry a CRC32; a mismatch in either is reported as
//! disk corruption rather than tolerated.
//!
//! Only the primary header is read. The backup header at the end of the disk
//! is the concern of partitioning tools, not of the loader.

use alloc::vec;
use alloc::vec::Vec;

use bitflags::bitflags;
use log::debug;

use super::{check_sector_size, mbr, DiskRead, Guid, Partition, PartitionKind};
use crate::crc::{crc32, Crc32};
use crate::error::{Integrity, SplError, Structure, Unsupported};

pub const GPT_SIGNATURE: [u8; 8] = *b"EFI PART";
pub const GPT_HEADER_LBA: u64 = 1;
pub const GPT_REVISION_MAJOR: u32 = 1;
pub const GPT_HEADER_MIN_SIZE: usize = 92;
pub const GPT_ENTRY_MIN_SIZE: usize = 128;
/// Upper bound on the entry array, to reject headers pointing at absurd
/// amounts of data
pub const GPT_ENTRY_ARRAY_MAX_BYTES: usize = 1 << 20;

const HEADER_CRC_OFFSET: usize = 16;

bitflags! {
    /// Partition entry attribute bits defined by UEFI. Bits 48-63 are type
    /// specific and are kept as-is.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct GptAttributes: u64 {
        const PLATFORM_REQUIRED = 1 << 0;
        const NO_BLOCK_IO_PROTOCOL = 1 << 1;
        const LEGACY_BIOS_BOOTABLE = 1 << 2;
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn read_guid(bytes: &[u8], at: usize) -> Guid {
    let mut raw = [0; 16];
    raw.copy_from_slice(&bytes[at..at + 16]);
    Guid(raw)
}

/// Fields of the GPT header that the loader uses
#[derive(Copy, Clone, Debug)]
struct GptHeader {
    revision: u32,
    header_size: usize,
    header_crc: u32,
    my_lba: u64,
    entries_lba: u64,
    entry_count: usize,
    entry_size: usize,
    entries_crc: u32,
}

impl GptHeader {
    fn decode(sector: &[u8]) -> Result<Self, SplError> {
        if sector[0..8] != GPT_SIGNATURE {
            return Err(SplError::StructuralInvalid(Structure::GptSignature));
        }
        Ok(Self {
            revision: read_u32(sector, 8),
            header_size: read_u32(sector, 12) as usize,
            header_crc: read_u32(sector, HEADER_CRC_OFFSET),
            my_lba: read_u64(sector, 24),
            entries_lba: read_u64(sector, 72),
            entry_count: read_u32(sector, 80) as usize,
            entry_size: read_u32(sector, 84) as usize,
            entries_crc: read_u32(sector, 88),
        })
    }

    /// CRC32 over `header_size` bytes, with the checksum field read as zero
    fn compute_crc(&self, sector: &[u8]) -> u32 {
        let mut crc = Crc32::new();
        crc.add_slice(&sector[..HEADER_CRC_OFFSET]);
        crc.add_zeroes(4);
        crc.add_slice(&sector[HEADER_CRC_OFFSET + 4..self.header_size]);
        crc.compute()
    }

    fn entry_array_bytes(&self) -> Result<usize, SplError> {
        let geometry = SplError::StructuralInvalid(Structure::GptEntryGeometry);
        if self.entry_size < GPT_ENTRY_MIN_SIZE || self.entry_size % 8 != 0 {
            return Err(geometry);
        }
        if self.entry_count == 0 || self.entries_lba <= GPT_HEADER_LBA {
            return Err(geometry);
        }
        match self.entry_count.checked_mul(self.entry_size) {
            Some(bytes) if bytes <= GPT_ENTRY_ARRAY_MAX_BYTES => Ok(bytes),
            _ => Err(geometry),
        }
    }
}

/// Read the partitions of a GPT disk. Unused entries (zero type GUID) are
/// left out; every partition keeps its index in the entry array.
pub fn read_gpt<D: DiskRead + ?Sized>(disk: &mut D) -> Result<Vec<Partition>, SplError> {
    let sector_size = disk.sector_size();
    check_sector_size(sector_size)?;

    let mut sector = vec![0u8; sector_size];
    disk.read_sectors(0, &mut sector)?;
    if !mbr::has_protective_entry(&sector) {
        return Err(SplError::StructuralInvalid(Structure::ProtectiveMbr));
    }

    disk.read_sectors(GPT_HEADER_LBA, &mut sector)?;
    let header = GptHeader::decode(&sector)?;
    // the checksum covers header_size bytes, so only the signature and size
    // can be judged before it
    if header.header_size < GPT_HEADER_MIN_SIZE || header.header_size > sector_size {
        return Err(SplError::StructuralInvalid(Structure::GptHeaderSize));
    }
    if header.compute_crc(&sector) != header.header_crc {
        return Err(SplError::IntegrityMismatch(Integrity::GptHeader));
    }
    if header.revision >> 16 != GPT_REVISION_MAJOR {
        return Err(SplError::Unsupported(Unsupported::GptRevision(header.revision)));
    }
    if header.my_lba != GPT_HEADER_LBA {
        return Err(SplError::StructuralInvalid(Structure::GptHeaderLocation));
    }

    let array_bytes = header.entry_array_bytes()?;
    let array_sectors = array_bytes.div_ceil(sector_size);
    let mut array = vec![0u8; array_sectors * sector_size];
    disk.read_sectors(header.entries_lba, &mut array)?;
    if crc32(&array[..array_bytes]) != header.entries_crc {
        return Err(SplError::IntegrityMismatch(Integrity::GptEntries));
    }

    let mut partitions = Vec::new();
    for (index, raw) in array[..array_bytes]
        .chunks_exact(header.entry_size)
        .enumerate()
    {
        let type_guid = read_guid(raw, 0);
        if type_guid.is_zero() {
            continue;
        }
        let first_lba = read_u64(raw, 32);
        let last_lba = read_u64(raw, 40);
        if last_lba < first_lba {
            return Err(SplError::StructuralInvalid(Structure::GptEntryGeometry));
        }
        let attributes = GptAttributes::from_bits_retain(read_u64(raw, 48));
        let mut name = [0u16; 36];
        for (slot, pair) in name.iter_mut().zip(raw[56..128].chunks_exact(2)) {
            *slot = u16::from_le_bytes([pair[0], pair[1]]);
        }
        partitions.push(Partition {
            index: index as u32,
            first_lba,
            sector_count: last_lba - first_lba + 1,
            active: attributes.contains(GptAttributes::LEGACY_BIOS_BOOTABLE),
            kind: PartitionKind::Gpt {
                type_guid,
                unique_guid: read_guid(raw, 16),
                attributes,
                name,
            },
        });
    }
    debug!(
        "GPT: {} partitions in {} entries",
        partitions.len(),
        header.entry_count
    );
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::tests::mbr_sector;
    use crate::label::{probe, SliceDisk};
    use crate::header::DiskLabelKind;

    const LINUX_FS: [u8; 16] = [
        0xAF, 0x3D, 0xC6, 0x0F, 0x83, 0x84, 0x72, 0x47, 0x8E, 0x79, 0x3D, 0x69, 0xD8, 0x47, 0x7D,
        0xE4,
    ];

    /// A 64-sector disk with a GPT of 128 entries at LBA 2. Entries are
    /// (first, last, attributes, name).
    fn gpt_disk(entries: &[(u64, u64, u64, &str)]) -> Vec<u8> {
        let mut disk = vec![0u8; 64 * 512];
        disk[..512].copy_from_slice(&mbr_sector(&[(0x00, 0xEE, 1, 63)]));

        let array_start = 2 * 512;
        for (i, (first, last, attributes, name)) in entries.iter().enumerate() {
            let at = array_start + i * 128;
            disk[at..at + 16].copy_from_slice(&LINUX_FS);
            disk[at + 16] = i as u8 + 1;
            disk[at + 32..at + 40].copy_from_slice(&first.to_le_bytes());
            disk[at + 40..at + 48].copy_from_slice(&last.to_le_bytes());
            disk[at + 48..at + 56].copy_from_slice(&attributes.to_le_bytes());
            for (j, unit) in name.encode_utf16().enumerate() {
                disk[at + 56 + j * 2..at + 58 + j * 2].copy_from_slice(&unit.to_le_bytes());
            }
        }
        let entries_crc = crc32(&disk[array_start..array_start + 128 * 128]);

        let header = &mut disk[512..1024];
        header[0..8].copy_from_slice(&GPT_SIGNATURE);
        header[8..12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
        header[12..16].copy_from_slice(&92u32.to_le_bytes());
        header[24..32].copy_from_slice(&1u64.to_le_bytes());
        header[32..40].copy_from_slice(&63u64.to_le_bytes());
        header[40..48].copy_from_slice(&34u64.to_le_bytes());
        header[48..56].copy_from_slice(&62u64.to_le_bytes());
        header[72..80].copy_from_slice(&2u64.to_le_bytes());
        header[80..84].copy_from_slice(&128u32.to_le_bytes());
        header[84..88].copy_from_slice(&128u32.to_le_bytes());
        header[88..92].copy_from_slice(&entries_crc.to_le_bytes());
        restamp_header(&mut disk);
        disk
    }

    fn restamp_header(disk: &mut [u8]) {
        disk[512 + 16..512 + 20].copy_from_slice(&[0; 4]);
        let header_crc = crc32(&disk[512..512 + 92]);
        disk[512 + 16..512 + 20].copy_from_slice(&header_crc.to_le_bytes());
    }

    fn read(disk: &[u8]) -> Result<Vec<Partition>, SplError> {
        let mut disk = SliceDisk::new(disk, 512).unwrap();
        read_gpt(&mut disk)
    }

    #[test]
    fn reads_partitions() {
        let disk = gpt_disk(&[(34, 47, 0, "EFI"), (48, 62, 1 << 2, "boot")]);
        let partitions = read(&disk).unwrap();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].first_lba, 34);
        assert_eq!(partitions[0].sector_count, 14);
        assert!(!partitions[0].active);
        assert!(partitions[1].active);
        assert_eq!(partitions[1].index, 1);
        assert_eq!(partitions[1].name().as_deref(), Some("boot"));
        match &partitions[1].kind {
            PartitionKind::Gpt { type_guid, unique_guid, attributes, .. } => {
                assert_eq!(type_guid.0, LINUX_FS);
                assert_eq!(unique_guid.0[0], 2);
                assert!(attributes.contains(GptAttributes::LEGACY_BIOS_BOOTABLE));
            }
            other => panic!("unexpected kind {:?}", other),
        }

        let mut slice = SliceDisk::new(&disk, 512).unwrap();
        assert_eq!(probe(&mut slice).unwrap().kind, DiskLabelKind::Gpt);
    }

    #[test]
    fn corrupted_entry_array() {
        let mut disk = gpt_disk(&[(34, 47, 0, "EFI")]);
        disk[2 * 512 + 40] ^= 0x01;
        assert_eq!(
            read(&disk),
            Err(SplError::IntegrityMismatch(Integrity::GptEntries))
        );
    }

    #[test]
    fn corrupted_header() {
        let mut disk = gpt_disk(&[(34, 47, 0, "EFI")]);
        disk[512 + 40] ^= 0x01;
        assert_eq!(
            read(&disk),
            Err(SplError::IntegrityMismatch(Integrity::GptHeader))
        );
    }

    #[test]
    fn structural_failures() {
        let mut no_protective = gpt_disk(&[(34, 47, 0, "EFI")]);
        no_protective[446 + 4] = 0x83;
        assert_eq!(
            read(&no_protective),
            Err(SplError::StructuralInvalid(Structure::ProtectiveMbr))
        );

        let mut bad_signature = gpt_disk(&[(34, 47, 0, "EFI")]);
        bad_signature[512] = b'X';
        assert_eq!(
            read(&bad_signature),
            Err(SplError::StructuralInvalid(Structure::GptSignature))
        );

        let mut bad_entry_size = gpt_disk(&[(34, 47, 0, "EFI")]);
        bad_entry_size[512 + 84..512 + 88].copy_from_slice(&64u32.to_le_bytes());
        restamp_header(&mut bad_entry_size);
        assert_eq!(
            read(&bad_entry_size),
            Err(SplError::StructuralInvalid(Structure::GptEntryGeometry))
        );

        let mut huge_count = gpt_disk(&[(34, 47, 0, "EFI")]);
        huge_count[512 + 80..512 + 84].copy_from_slice(&0x0010_0000u32.to_le_bytes());
        restamp_header(&mut huge_count);
        assert_eq!(
            read(&huge_count),
            Err(SplError::StructuralInvalid(Structure::GptEntryGeometry))
        );

        let mut bad_size = gpt_disk(&[(34, 47, 0, "EFI")]);
        bad_size[512 + 12..512 + 16].copy_from_slice(&40u32.to_le_bytes());
        assert_eq!(
            read(&bad_size),
            Err(SplError::StructuralInvalid(Structure::GptHeaderSize))
        );
    }

    #[test]
    fn unknown_revision() {
        let mut disk = gpt_disk(&[(34, 47, 0, "EFI")]);
        disk[512 + 8..512 + 12].copy_from_slice(&0x0002_0000u32.to_le_bytes());
        restamp_header(&mut disk);
        assert_eq!(
            read(&disk),
            Err(SplError::Unsupported(Unsupported::GptRevision(0x0002_0000)))
        );
    }

    #[test]
    fn corrupt_revision_is_header_corruption() {
        let mut disk = gpt_disk(&[(34, 47, 0, "EFI")]);
        disk[512 + 10] ^= 0x01;
        assert_eq!(
            read(&disk),
            Err(SplError::IntegrityMismatch(Integrity::GptHeader))
        );
    }

    #[test]
    fn truncated_array() {
        let disk = gpt_disk(&[(34, 47, 0, "EFI")]);
        assert_eq!(
            read(&disk[..4 * 512]),
            Err(SplError::StructuralInvalid(Structure::DiskTruncated))
        );
    }
}
