//! Core of the SPLoader bootloader, shared by the boot stage and the offline
//! image tooling. It covers the three things the loader has to get right
//! before it can trust anything it loads:
//!
//!  - the boot image header and its CRC32 checksums (`header`, `crc`, `image`)
//!  - which partition of the boot disk to load from (`label`)
//!  - which physical memory is free to use (`mem`)
//!
//! This library is compiled twice. The boot stage uses the default features.
//! The tooling enables `tooling`, which adds the operations that write
//! integrity data; the boot stage can verify a header but never stamp one.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod crc;
pub mod error;
pub mod header;
pub mod image;
pub mod label;
pub mod mem;

pub use crc::{crc32, crc32_acc, crc32_end, reverse32, Crc32, SPL_CRC32_INIT, SPL_CRC32_POLYNOMIAL};
pub use error::{HeaderStatus, Integrity, SplError, Structure, Unsupported};
pub use header::{Arch, DiskLabelKind, Endian, SplFlags, SplHeader};
pub use image::{locate_boot_partition, verify_image, VerifiedImage, SPL_HEADER_BLOCK_SIZE};
pub use label::{probe, DiskLabel, DiskRead, Partition, PartitionKind, SliceDisk};
pub use mem::{BlockCursor, Continuation, FreeBlock, MemoryPlatform, NextBlock};
