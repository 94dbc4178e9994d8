//! Disk label (partition table) reading. The loader needs to know which
//! partition holds the next stage, so it reads the first sectors of the boot
//! disk, works out whether the disk is unlabeled, MBR or GPT, and resolves the
//! boot partition from the image header's install-time fields.

pub mod gpt;
pub mod mbr;

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use log::{debug, warn};

use crate::error::{SplError, Structure, Unsupported};
use crate::header::{DiskLabelKind, SplFlags, SplHeader};

pub use gpt::{read_gpt, GptAttributes};
pub use mbr::read_mbr;

/// Trait abstracting raw sector reads from the boot device. During boot this
/// is backed by BIOS disk services; on the host it is a file or a buffer.
pub trait DiskRead {
    fn sector_size(&self) -> usize;

    /// Fill `buffer`, whose length is a multiple of the sector size, with the
    /// sectors starting at `lba`
    fn read_sectors(&mut self, lba: u64, buffer: &mut [u8]) -> Result<(), SplError>;
}

/// Sector sizes must be a power of two between 512 and 4096 bytes
pub fn check_sector_size(sector_size: usize) -> Result<(), SplError> {
    if sector_size.is_power_of_two() && (512..=4096).contains(&sector_size) {
        Ok(())
    } else {
        Err(SplError::Unsupported(Unsupported::SectorSize(sector_size)))
    }
}

/// A disk held entirely in memory
pub struct SliceDisk<'a> {
    bytes: &'a [u8],
    sector_size: usize,
}

impl<'a> SliceDisk<'a> {
    pub fn new(bytes: &'a [u8], sector_size: usize) -> Result<Self, SplError> {
        check_sector_size(sector_size)?;
        Ok(Self { bytes, sector_size })
    }
}

impl DiskRead for SliceDisk<'_> {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn read_sectors(&mut self, lba: u64, buffer: &mut [u8]) -> Result<(), SplError> {
        let start = usize::try_from(lba)
            .ok()
            .and_then(|lba| lba.checked_mul(self.sector_size))
            .ok_or(SplError::StructuralInvalid(Structure::DiskTruncated))?;
        let end = start
            .checked_add(buffer.len())
            .ok_or(SplError::StructuralInvalid(Structure::DiskTruncated))?;
        let source = self
            .bytes
            .get(start..end)
            .ok_or(SplError::StructuralInvalid(Structure::DiskTruncated))?;
        buffer.copy_from_slice(source);
        Ok(())
    }
}

/// GUIDs are stored with the first three groups little-endian
#[derive(Copy, Clone, Eq, PartialEq, Default)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    pub const ZERO: Guid = Guid([0; 16]);

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-",
            b[3], b[2], b[1], b[0], b[5], b[4], b[7], b[6], b[8], b[9],
        )?;
        for byte in &b[10..] {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PartitionKind {
    Mbr {
        system_id: u8,
    },
    Gpt {
        type_guid: Guid,
        unique_guid: Guid,
        attributes: GptAttributes,
        /// UTF-16 name, NUL padded
        name: [u16; 36],
    },
}

/// A partition, independent of the label it was read from
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Partition {
    /// Slot in the partition table. MBR slots are 0-3; empty slots are not
    /// reported but still count.
    pub index: u32,
    pub first_lba: u64,
    pub sector_count: u64,
    /// MBR boot indicator, or the GPT legacy-BIOS-bootable attribute
    pub active: bool,
    pub kind: PartitionKind,
}

impl Partition {
    pub fn byte_offset(&self, sector_size: usize) -> u64 {
        self.first_lba * sector_size as u64
    }

    pub fn byte_len(&self, sector_size: usize) -> u64 {
        self.sector_count * sector_size as u64
    }

    /// Why the loader cannot boot from this partition, if it cannot
    pub fn unsupported(&self) -> Option<Unsupported> {
        match self.kind {
            PartitionKind::Mbr { system_id } if mbr::is_extended(system_id) => {
                Some(Unsupported::ExtendedPartition(system_id))
            }
            _ => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.unsupported().is_none()
    }

    /// GPT partition name; MBR partitions have none
    pub fn name(&self) -> Option<String> {
        match &self.kind {
            PartitionKind::Gpt { name, .. } => {
                let len = name.iter().position(|c| *c == 0).unwrap_or(name.len());
                Some(
                    char::decode_utf16(name[..len].iter().copied())
                        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                        .collect(),
                )
            }
            PartitionKind::Mbr { .. } => None,
        }
    }
}

/// The result of probing a disk
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiskLabel {
    pub kind: DiskLabelKind,
    pub partitions: Vec<Partition>,
}

/// Determine which label a disk carries and read its partitions. A first
/// sector without the boot signature means the disk is unlabeled. So does a
/// signed sector whose partition table does not decode: an unpartitioned FAT
/// volume carries the signature too, with boot code where the entries
/// would be.
pub fn probe<D: DiskRead + ?Sized>(disk: &mut D) -> Result<DiskLabel, SplError> {
    check_sector_size(disk.sector_size())?;
    let mut sector = vec![0u8; disk.sector_size()];
    disk.read_sectors(0, &mut sector)?;

    if !mbr::has_signature(&sector) {
        debug!("disk has no boot signature, treating as unlabeled");
        return Ok(DiskLabel {
            kind: DiskLabelKind::None,
            partitions: Vec::new(),
        });
    }

    if mbr::has_protective_entry(&sector) {
        let partitions = read_gpt(disk)?;
        return Ok(DiskLabel {
            kind: DiskLabelKind::Gpt,
            partitions,
        });
    }

    match read_mbr(&sector) {
        Ok(partitions) => Ok(DiskLabel {
            kind: DiskLabelKind::Mbr,
            partitions,
        }),
        Err(SplError::StructuralInvalid(Structure::MbrEntry)) => {
            debug!("boot sector has no valid partition table, treating as unlabeled");
            Ok(DiskLabel {
                kind: DiskLabelKind::None,
                partitions: Vec::new(),
            })
        }
        Err(e) => Err(e),
    }
}

impl DiskLabel {
    pub fn get(&self, index: u32) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.index == index)
    }

    /// The first partition marked active. Unsupported partitions are skipped
    /// while scanning, since an extended container can never be booted.
    pub fn active(&self) -> Option<&Partition> {
        let mut candidates = self.partitions.iter().filter(|p| p.active);
        let first = candidates.find(|p| {
            if !p.is_supported() {
                debug!("skipping unsupported active partition {}", p.index);
            }
            p.is_supported()
        })?;
        if candidates.any(|p| p.is_supported()) {
            warn!("more than one active partition, using {}", first.index);
        }
        Some(first)
    }

    /// Resolve the partition the header asks to boot from.
    ///
    /// With the ACTIVE flag set, MBR disks use the partition whose boot
    /// indicator is set. GPT has no boot indicator, so the legacy-BIOS-bootable
    /// attribute stands in for it, falling back to the header's explicit
    /// index when no partition carries that attribute. Without the flag, the
    /// explicit index is used directly.
    pub fn boot_partition(&self, header: &SplHeader) -> Result<&Partition, SplError> {
        let expected = header.label();
        if expected != DiskLabelKind::Unknown && expected != self.kind {
            return Err(SplError::StructuralInvalid(Structure::LabelMismatch));
        }
        if self.kind == DiskLabelKind::None {
            return Err(SplError::NotFound);
        }

        let selected = if header.flags().contains(SplFlags::ACTIVE) {
            match (self.active(), self.kind) {
                (Some(partition), _) => partition,
                (None, DiskLabelKind::Gpt) => {
                    warn!(
                        "no legacy bootable GPT partition, using index {}",
                        header.partition()
                    );
                    self.get(header.partition()).ok_or(SplError::NotFound)?
                }
                (None, _) => return Err(SplError::NotFound),
            }
        } else {
            self.get(header.partition()).ok_or(SplError::NotFound)?
        };

        if let Some(reason) = selected.unsupported() {
            return Err(SplError::Unsupported(reason));
        }
        Ok(selected)
    }
}
