//! Boot images as laid out on disk: the header block, padded with zeroes to
//! `SPL_HEADER_BLOCK_SIZE`, immediately followed by the loader binary.
//!
//! The boot stage runs `verify_image` before jumping into the binary. Every
//! error it returns means the image must not be executed.

#[cfg(any(test, feature = "tooling"))]
use alloc::vec::Vec;

use log::debug;

use crate::error::{Integrity, SplError, Structure};
use crate::header::SplHeader;
use crate::label::{probe, DiskRead, Partition};

pub const SPL_HEADER_BLOCK_SIZE: usize = 512;

/// An image whose header and binary have both passed verification
#[derive(Copy, Clone, Debug)]
pub struct VerifiedImage<'a> {
    pub header: SplHeader,
    pub binary: &'a [u8],
}

/// Check the header structure, the header checksum and then the binary
/// checksum of an image, in that order
pub fn verify_image(image: &[u8]) -> Result<VerifiedImage<'_>, SplError> {
    if image.len() < SPL_HEADER_BLOCK_SIZE {
        return Err(SplError::StructuralInvalid(Structure::HeaderLength));
    }
    let header = SplHeader::from_bytes(image)?;
    header.validate()?;

    let end = SPL_HEADER_BLOCK_SIZE
        .checked_add(header.loader_size() as usize)
        .ok_or(SplError::IntegrityMismatch(Integrity::Binary))?;
    let binary = image
        .get(SPL_HEADER_BLOCK_SIZE..end)
        .ok_or(SplError::IntegrityMismatch(Integrity::Binary))?;
    header.verify_binary(binary)?;

    debug!(
        "verified loader v{}, {} bytes",
        header.version_str().unwrap_or("?"),
        binary.len()
    );
    Ok(VerifiedImage { header, binary })
}

/// Probe the boot disk and resolve the partition the header selects
pub fn locate_boot_partition<D: DiskRead + ?Sized>(
    header: &SplHeader,
    disk: &mut D,
) -> Result<Partition, SplError> {
    let label = probe(disk)?;
    let partition = label.boot_partition(header)?;
    debug!(
        "booting from partition {} at LBA {:#X}",
        partition.index, partition.first_lba
    );
    Ok(partition.clone())
}

/// Lay out a complete image. The header is written as given, so it must
/// already be stamped.
#[cfg(any(test, feature = "tooling"))]
pub fn write_image(header: &SplHeader, binary: &[u8]) -> Vec<u8> {
    let mut image = alloc::vec![0u8; SPL_HEADER_BLOCK_SIZE + binary.len()];
    image[..crate::header::SPL_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    image[SPL_HEADER_BLOCK_SIZE..].copy_from_slice(binary);
    image
}
