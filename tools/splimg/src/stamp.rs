//! Image operations performed offline: building an image from a loader
//! binary, writing install-time boot selection into it, and checking it the
//! same way the boot stage will.

use anyhow::{bail, Context, Result};
use log::{debug, info};
use sploader::header::SPL_HEADER_SIZE;
use sploader::image::write_image;
use sploader::{verify_image, Arch, DiskLabelKind, SplFlags, SplHeader};

pub struct BuildOptions {
    pub version: String,
    pub arch: Arch,
}

/// How the installed loader picks its boot partition
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootSelection {
    /// The partition the disk label marks active
    Active,
    /// An explicit partition table index
    Index(u32),
}

pub struct InstallOptions {
    pub selection: BootSelection,
    pub label: DiskLabelKind,
}

/// Build a fresh image: header stamped for `loader`, install-time fields
/// left zero
pub fn build_image(loader: &[u8], options: &BuildOptions) -> Result<Vec<u8>> {
    if u32::try_from(loader.len()).is_err() {
        bail!("loader binary is too large ({} bytes)", loader.len());
    }
    let mut header = SplHeader::new(&options.version, options.arch);
    if header.version_triple().is_none() {
        bail!(
            "version {:?} is not of the form major.minor.patch",
            options.version
        );
    }
    header.attach_binary(loader);
    header.set_checksum();
    info!(
        "built image v{} for {:?}: {} byte loader, crc {:#010x}",
        options.version,
        options.arch,
        loader.len(),
        header.loader_crc()
    );
    Ok(write_image(&header, loader))
}

/// Write boot selection into an existing image and re-stamp its header. The
/// image is verified first: the tool will not put a fresh checksum on a
/// header or binary that has already been damaged.
pub fn install(image: &mut [u8], options: &InstallOptions) -> Result<SplHeader> {
    let mut header = verify_image(image)
        .context("refusing to install into an image that fails verification")?
        .header;

    match options.selection {
        BootSelection::Active => {
            header.set_flags(header.flags() | SplFlags::ACTIVE);
            header.set_partition(0);
        }
        BootSelection::Index(index) => {
            header.set_flags(header.flags() - SplFlags::ACTIVE);
            header.set_partition(index);
        }
    }
    header.set_label(options.label);
    header.set_checksum();
    debug!("installed header {:?}", header);

    image[..SPL_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    Ok(header)
}

/// Verify an image exactly as the boot stage does
pub fn check(image: &[u8]) -> Result<SplHeader> {
    let verified = verify_image(image)?;
    Ok(verified.header)
}
