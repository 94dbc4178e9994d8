use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};
use log::warn;
use sploader::label::check_sector_size;
use sploader::{DiskRead, SplError, Structure};

/// DiskRead implementation backed by a disk image or device on the host
pub struct FileDisk {
    file: File,
    sector_size: usize,
}

impl FileDisk {
    pub fn open(path: &Path, sector_size: usize) -> Result<Self> {
        check_sector_size(sector_size)?;
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self { file, sector_size })
    }
}

impl DiskRead for FileDisk {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn read_sectors(&mut self, lba: u64, buffer: &mut [u8]) -> Result<(), SplError> {
        let truncated = SplError::StructuralInvalid(Structure::DiskTruncated);
        let offset = lba.checked_mul(self.sector_size as u64).ok_or(truncated)?;
        let result = self
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(buffer));
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.kind() != ErrorKind::UnexpectedEof {
                    warn!("read of LBA {} failed: {}", lba, e);
                }
                Err(truncated)
            }
        }
    }
}
