//! The SplHeader precedes the loader binary in every boot image. It records
//! what the image is (signature, version, architecture), how to prove it has
//! not been altered (a CRC32 over the header itself and one over the attached
//! binary), and which partition the loader should boot from.
//!
//! The header is never accessed through a typed pointer. It is decoded from
//! raw bytes into an `SplHeader` and encoded back out, using the byte order
//! named by its own `endian` field. Field offsets in `offset` are part of the
//! on-disk format, since very early boot code reads them directly; changing
//! them requires a new version string.
//!
//! An older revision of the format stored the signature as a single 64-bit
//! word and placed `flags` ahead of `loader_size`. Those images are not
//! accepted: the field swap would silently misread the binary size.

use core::fmt;

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::crc::{crc32, Crc32};
use crate::error::{HeaderStatus, Integrity, SplError, Structure};

pub const SPL_HEADER_SIGNATURE: [u8; 8] = *b"SPLOADER";
pub const SPL_HEADER_VERSION_LEN: usize = 33;
pub const SPL_HEADER_SIZE: usize = 0x44;

/// Byte offsets of every header field
pub mod offset {
    pub const SIGNATURE: usize = 0x00;
    pub const VERSION: usize = 0x08;
    pub const ENDIAN: usize = 0x29;
    pub const ARCH: usize = 0x2A;
    pub const HEADER_CRC: usize = 0x2C;
    pub const LOADER_CRC: usize = 0x30;
    pub const LOADER_SIZE: usize = 0x34;
    pub const FLAGS: usize = 0x38;
    pub const LABEL: usize = 0x3C;
    pub const PARTITION: usize = 0x40;
}

const_assert_eq!(offset::VERSION, offset::SIGNATURE + SPL_HEADER_SIGNATURE.len());
const_assert_eq!(offset::ENDIAN, offset::VERSION + SPL_HEADER_VERSION_LEN);
const_assert_eq!(offset::ARCH, offset::ENDIAN + 1);
const_assert_eq!(offset::HEADER_CRC, offset::ARCH + 2);
const_assert_eq!(offset::LOADER_CRC, offset::HEADER_CRC + 4);
const_assert_eq!(offset::LOADER_SIZE, offset::LOADER_CRC + 4);
const_assert_eq!(offset::FLAGS, offset::LOADER_SIZE + 4);
const_assert_eq!(offset::LABEL, offset::FLAGS + 4);
const_assert_eq!(offset::PARTITION, offset::LABEL + 4);
const_assert_eq!(SPL_HEADER_SIZE, offset::PARTITION + 4);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Endian {
    Little = 0x01,
    Big = 0x02,
}

impl Endian {
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Endian::Little),
            0x02 => Some(Endian::Big),
            _ => None,
        }
    }

    fn read_u16(self, bytes: &[u8], at: usize) -> u16 {
        let raw = [bytes[at], bytes[at + 1]];
        match self {
            Endian::Little => u16::from_le_bytes(raw),
            Endian::Big => u16::from_be_bytes(raw),
        }
    }

    fn read_u32(self, bytes: &[u8], at: usize) -> u32 {
        let raw = [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
        match self {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        }
    }

    fn write_u16(self, bytes: &mut [u8], at: usize, value: u16) {
        let raw = match self {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        bytes[at..at + 2].copy_from_slice(&raw);
    }

    fn write_u32(self, bytes: &mut [u8], at: usize, value: u32) {
        let raw = match self {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        bytes[at..at + 4].copy_from_slice(&raw);
    }
}

/// Target architecture, using the ELF machine numbers
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum Arch {
    None = 0x0,
    Sparc = 0x2,
    X86 = 0x3,
    Mips = 0x8,
    PowerPc = 0x14,
    Arm = 0x28,
    SuperH = 0x2A,
    Ia64 = 0x32,
    X86_64 = 0x3E,
    Aarch64 = 0xB7,
}

impl Arch {
    pub fn from_raw(value: u16) -> Option<Self> {
        let arch = match value {
            0x0 => Arch::None,
            0x2 => Arch::Sparc,
            0x3 => Arch::X86,
            0x8 => Arch::Mips,
            0x14 => Arch::PowerPc,
            0x28 => Arch::Arm,
            0x2A => Arch::SuperH,
            0x32 => Arch::Ia64,
            0x3E => Arch::X86_64,
            0xB7 => Arch::Aarch64,
            _ => return None,
        };
        Some(arch)
    }
}

bitflags! {
    /// Install-time behavior flags
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct SplFlags: u32 {
        /// Boot the partition the disk label marks as active, instead of the
        /// one named by `SplHeader::partition`
        const ACTIVE = 1 << 0;
    }
}

/// Disk label kinds. Each value is a distinct power of two so that sets of
/// supported labels can be expressed as a mask.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum DiskLabelKind {
    /// Unknown or corrupted
    Unknown = 0x0,
    /// No label at all, as for embedded installs
    None = 0x1,
    Mbr = 0x2,
    /// GPT behind a protective MBR
    Gpt = 0x4,
}

impl DiskLabelKind {
    pub fn from_raw(value: u32) -> Self {
        match value {
            0x1 => DiskLabelKind::None,
            0x2 => DiskLabelKind::Mbr,
            0x4 => DiskLabelKind::Gpt,
            _ => DiskLabelKind::Unknown,
        }
    }
}

/// Decoded boot image header. Fields keep their raw on-disk values, so that a
/// decoded header re-encodes to exactly the bytes it was read from.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct SplHeader {
    signature: [u8; 8],
    version: [u8; SPL_HEADER_VERSION_LEN],
    endian: Endian,
    arch: u16,
    header_crc: u32,
    loader_crc: u32,
    loader_size: u32,

    // Set by the install tool, zero for freshly built images
    flags: u32,
    label: u32,
    partition: u32,
}

impl SplHeader {
    /// Decode a header from the start of `bytes`. Only the shape of the data
    /// is checked here: the buffer must be long enough and the endian byte
    /// must be known. Use `validate` before trusting the contents.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SplError> {
        if bytes.len() < SPL_HEADER_SIZE {
            return Err(SplError::StructuralInvalid(Structure::HeaderLength));
        }
        let endian = Endian::from_raw(bytes[offset::ENDIAN])
            .ok_or(SplError::StructuralInvalid(Structure::HeaderEndian))?;

        let mut signature = [0; 8];
        signature.copy_from_slice(&bytes[offset::SIGNATURE..offset::VERSION]);
        let mut version = [0; SPL_HEADER_VERSION_LEN];
        version.copy_from_slice(&bytes[offset::VERSION..offset::ENDIAN]);

        Ok(Self {
            signature,
            version,
            endian,
            arch: endian.read_u16(bytes, offset::ARCH),
            header_crc: endian.read_u32(bytes, offset::HEADER_CRC),
            loader_crc: endian.read_u32(bytes, offset::LOADER_CRC),
            loader_size: endian.read_u32(bytes, offset::LOADER_SIZE),
            flags: endian.read_u32(bytes, offset::FLAGS),
            label: endian.read_u32(bytes, offset::LABEL),
            partition: endian.read_u32(bytes, offset::PARTITION),
        })
    }

    /// Encode the header in its own byte order
    pub fn to_bytes(&self) -> [u8; SPL_HEADER_SIZE] {
        let mut bytes = [0; SPL_HEADER_SIZE];
        self.encode_into(&mut bytes, self.header_crc);
        bytes
    }

    fn encode_into(&self, bytes: &mut [u8; SPL_HEADER_SIZE], header_crc: u32) {
        let endian = self.endian;
        bytes[offset::SIGNATURE..offset::VERSION].copy_from_slice(&self.signature);
        bytes[offset::VERSION..offset::ENDIAN].copy_from_slice(&self.version);
        bytes[offset::ENDIAN] = endian as u8;
        endian.write_u16(bytes, offset::ARCH, self.arch);
        endian.write_u32(bytes, offset::HEADER_CRC, header_crc);
        endian.write_u32(bytes, offset::LOADER_CRC, self.loader_crc);
        endian.write_u32(bytes, offset::LOADER_SIZE, self.loader_size);
        endian.write_u32(bytes, offset::FLAGS, self.flags);
        endian.write_u32(bytes, offset::LABEL, self.label);
        endian.write_u32(bytes, offset::PARTITION, self.partition);
    }

    /// CRC32 of the encoded header, with the header_crc field zeroed
    fn compute_header_crc(&self) -> u32 {
        let mut bytes = [0; SPL_HEADER_SIZE];
        self.encode_into(&mut bytes, 0);
        let mut crc = Crc32::new();
        crc.add_slice(&bytes);
        crc.compute()
    }

    /// Verify that `header_crc` matches the rest of the header. The signature
    /// and version are not inspected; see `validate`.
    pub fn check(&self) -> bool {
        self.compute_header_crc() == self.header_crc
    }

    /// Verify that `binary` is exactly the loader this header was stamped for
    pub fn check_binary(&self, binary: &[u8]) -> bool {
        binary.len() == self.loader_size as usize && crc32(binary) == self.loader_crc
    }

    pub fn verify_binary(&self, binary: &[u8]) -> Result<(), SplError> {
        if self.check_binary(binary) {
            Ok(())
        } else {
            Err(SplError::IntegrityMismatch(Integrity::Binary))
        }
    }

    /// Full header validation: signature, version string, then checksum.
    /// Structural problems are reported ahead of integrity ones.
    pub fn validate(&self) -> Result<(), SplError> {
        if self.signature != SPL_HEADER_SIGNATURE {
            return Err(SplError::StructuralInvalid(Structure::HeaderSignature));
        }
        if self.version_triple().is_none() {
            return Err(SplError::StructuralInvalid(Structure::HeaderVersion));
        }
        if !self.check() {
            return Err(SplError::IntegrityMismatch(Integrity::Header));
        }
        Ok(())
    }

    pub fn status(&self) -> HeaderStatus {
        HeaderStatus::from_result(&self.validate())
    }

    pub fn signature(&self) -> &[u8; 8] {
        &self.signature
    }

    /// The version string, up to the first NUL. Fails if any byte after the
    /// terminator is not NUL, or if the string is not ASCII.
    pub fn version_str(&self) -> Option<&str> {
        let len = self
            .version
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(SPL_HEADER_VERSION_LEN);
        if self.version[len..].iter().any(|b| *b != 0) {
            return None;
        }
        let text = core::str::from_utf8(&self.version[..len]).ok()?;
        if text.is_ascii() {
            Some(text)
        } else {
            None
        }
    }

    /// Parse the version string as `major.minor.patch`
    pub fn version_triple(&self) -> Option<(u32, u32, u32)> {
        let mut parts = self.version_str()?.split('.');
        let mut next = || -> Option<u32> {
            let part = parts.next()?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            part.parse().ok()
        };
        let triple = (next()?, next()?, next()?);
        if parts.next().is_some() {
            return None;
        }
        Some(triple)
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn arch_raw(&self) -> u16 {
        self.arch
    }

    pub fn arch(&self) -> Option<Arch> {
        Arch::from_raw(self.arch)
    }

    pub fn header_crc(&self) -> u32 {
        self.header_crc
    }

    pub fn loader_crc(&self) -> u32 {
        self.loader_crc
    }

    pub fn loader_size(&self) -> u32 {
        self.loader_size
    }

    /// Flags, including any bits this loader does not know about
    pub fn flags(&self) -> SplFlags {
        SplFlags::from_bits_retain(self.flags)
    }

    pub fn label_raw(&self) -> u32 {
        self.label
    }

    pub fn label(&self) -> DiskLabelKind {
        DiskLabelKind::from_raw(self.label)
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }
}

/// Header construction and stamping. These only exist in tooling builds: the
/// boot stage reads integrity fields but can never produce them.
#[cfg(any(test, feature = "tooling"))]
impl SplHeader {
    /// Create a little-endian header for an image with no binary attached
    /// yet. The version string is truncated so that it always keeps a
    /// terminating NUL.
    pub fn new(version: &str, arch: Arch) -> Self {
        let mut version_bytes = [0; SPL_HEADER_VERSION_LEN];
        let copy_len = version.len().min(SPL_HEADER_VERSION_LEN - 1);
        version_bytes[..copy_len].copy_from_slice(&version.as_bytes()[..copy_len]);
        Self {
            signature: SPL_HEADER_SIGNATURE,
            version: version_bytes,
            endian: Endian::Little,
            arch: arch as u16,
            header_crc: 0,
            loader_crc: 0,
            loader_size: 0,
            flags: 0,
            label: 0,
            partition: 0,
        }
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    /// Record the checksum and size of the binary that follows the header
    pub fn attach_binary(&mut self, binary: &[u8]) {
        self.loader_crc = crc32(binary);
        self.loader_size = binary.len() as u32;
    }

    pub fn set_flags(&mut self, flags: SplFlags) {
        self.flags = flags.bits();
    }

    pub fn set_label(&mut self, label: DiskLabelKind) {
        self.label = label as u32;
    }

    pub fn set_partition(&mut self, partition: u32) {
        self.partition = partition;
    }

    /// Recompute `header_crc` over the current contents. Must be the last
    /// modification made to a header before it is written out.
    pub fn set_checksum(&mut self) {
        self.header_crc = self.compute_header_crc();
    }
}

impl fmt::Debug for SplHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplHeader")
            .field("version", &self.version_str().unwrap_or("<invalid>"))
            .field("endian", &self.endian)
            .field("arch", &format_args!("{:#06x}", self.arch))
            .field("header_crc", &format_args!("{:#010x}", self.header_crc))
            .field("loader_crc", &format_args!("{:#010x}", self.loader_crc))
            .field("loader_size", &self.loader_size)
            .field("flags", &self.flags())
            .field("label", &self.label())
            .field("partition", &self.partition)
            .finish()
    }
}
