use core::fmt;

/// Everything the core can report back to its caller. Nothing in this crate
/// aborts; deciding whether an error is fatal belongs to the boot stage.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SplError {
    /// The data is not the kind of structure it claims to be
    StructuralInvalid(Structure),
    /// The structure is well-formed, but a stored checksum does not match its
    /// contents
    IntegrityMismatch(Integrity),
    /// A search finished without a result: no active or matching partition,
    /// or no usable memory at all
    NotFound,
    /// A valid structure uses a feature this loader does not handle
    Unsupported(Unsupported),
}

impl core::error::Error for SplError {}

/// Identifies which structural check failed
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Structure {
    /// Header buffer is shorter than the fixed header layout
    HeaderLength,
    /// Header does not start with "SPLOADER"
    HeaderSignature,
    /// Endian byte is neither little (0x01) nor big (0x02)
    HeaderEndian,
    /// Version field is not a NUL-padded "major.minor.patch" string
    HeaderVersion,
    /// Boot sector is missing the trailing 0xAA55 signature
    MbrSignature,
    /// A primary partition entry has an invalid boot indicator or extent
    MbrEntry,
    /// The first sector of a GPT disk lacks a protective 0xEE partition
    ProtectiveMbr,
    /// GPT header does not start with "EFI PART"
    GptSignature,
    /// GPT header size is outside the range the header can occupy
    GptHeaderSize,
    /// GPT header claims to live somewhere other than LBA 1
    GptHeaderLocation,
    /// Partition entry count, size or location is implausible
    GptEntryGeometry,
    /// A read went past the end of the disk
    DiskTruncated,
    /// Firmware memory map entries are too small to hold an E820 entry
    MemoryMapStride,
    /// The image header names a disk label different from the one found
    LabelMismatch,
}

/// Identifies which checksum failed to match
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Integrity {
    Header,
    Binary,
    GptHeader,
    GptEntries,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Unsupported {
    /// Extended or chained MBR partition, carrying its type byte
    ExtendedPartition(u8),
    /// GPT header revision with an unknown major version
    GptRevision(u32),
    /// Sector sizes must be a power of two between 512 and 4096 bytes
    SectorSize(usize),
}

impl fmt::Display for SplError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplError::StructuralInvalid(what) => write!(f, "structurally invalid: {}", what),
            SplError::IntegrityMismatch(what) => write!(f, "checksum mismatch: {}", what),
            SplError::NotFound => f.write_str("not found"),
            SplError::Unsupported(what) => write!(f, "unsupported: {}", what),
        }
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Structure::HeaderLength => "header is truncated",
            Structure::HeaderSignature => "bad header signature",
            Structure::HeaderEndian => "bad header endian byte",
            Structure::HeaderVersion => "bad header version string",
            Structure::MbrSignature => "missing boot sector signature",
            Structure::MbrEntry => "bad MBR partition entry",
            Structure::ProtectiveMbr => "missing protective MBR",
            Structure::GptSignature => "bad GPT signature",
            Structure::GptHeaderSize => "bad GPT header size",
            Structure::GptHeaderLocation => "GPT header LBA mismatch",
            Structure::GptEntryGeometry => "bad GPT partition array geometry",
            Structure::DiskTruncated => "read past end of disk",
            Structure::MemoryMapStride => "bad memory map entry stride",
            Structure::LabelMismatch => "disk label does not match header",
        };
        f.write_str(text)
    }
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Integrity::Header => "image header",
            Integrity::Binary => "loader binary",
            Integrity::GptHeader => "GPT header",
            Integrity::GptEntries => "GPT partition array",
        };
        f.write_str(text)
    }
}

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unsupported::ExtendedPartition(kind) => {
                write!(f, "extended partition (type {:#04x})", kind)
            }
            Unsupported::GptRevision(revision) => write!(f, "GPT revision {:#010x}", revision),
            Unsupported::SectorSize(size) => write!(f, "sector size {}", size),
        }
    }
}

/// Result codes for callers that cannot consume a `Result`, such as early
/// boot code inspecting the header from assembly.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum HeaderStatus {
    Success = 0,
    Invalid = 1,
    Integrity = 2,
}

impl HeaderStatus {
    pub fn from_result<T>(result: &Result<T, SplError>) -> Self {
        match result {
            Ok(_) => HeaderStatus::Success,
            Err(SplError::IntegrityMismatch(_)) => HeaderStatus::Integrity,
            Err(_) => HeaderStatus::Invalid,
        }
    }
}
