//! splimg prepares SPLoader boot images on the host: it wraps a loader binary
//! in a checksummed header, records which partition the loader should boot
//! from, and verifies images and disk labels the way the boot stage will.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use sploader::{probe, Arch, DiskLabelKind, PartitionKind, SplHeader};

use splimg::stamp::{self, BootSelection, BuildOptions, InstallOptions};
use splimg::{logger, FileDisk};

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum ArchArg {
    X86,
    X86_64,
    Arm,
    Aarch64,
    Mips,
    Powerpc,
    Sparc,
}

impl From<ArchArg> for Arch {
    fn from(arch: ArchArg) -> Self {
        match arch {
            ArchArg::X86 => Arch::X86,
            ArchArg::X86_64 => Arch::X86_64,
            ArchArg::Arm => Arch::Arm,
            ArchArg::Aarch64 => Arch::Aarch64,
            ArchArg::Mips => Arch::Mips,
            ArchArg::Powerpc => Arch::PowerPc,
            ArchArg::Sparc => Arch::Sparc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum LabelArg {
    /// Accept whichever label the boot disk carries
    Any,
    None,
    Mbr,
    Gpt,
}

impl From<LabelArg> for DiskLabelKind {
    fn from(label: LabelArg) -> Self {
        match label {
            LabelArg::Any => DiskLabelKind::Unknown,
            LabelArg::None => DiskLabelKind::None,
            LabelArg::Mbr => DiskLabelKind::Mbr,
            LabelArg::Gpt => DiskLabelKind::Gpt,
        }
    }
}

/// The CLI of the image tool.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Print more detail; repeat for debug output.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors.
    #[arg(short, long, default_value_t = false, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wrap a loader binary in a freshly stamped header.
    Mkbin {
        /// The loader binary.
        loader: PathBuf,

        /// Where to write the image.
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = ArchArg::X86)]
        arch: ArchArg,

        /// Loader version, as major.minor.patch.
        #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
        version: String,
    },

    /// Record the boot partition selection in an image and re-stamp it.
    Install {
        image: PathBuf,

        /// Boot the partition the disk label marks active.
        #[arg(long, conflicts_with = "partition")]
        active: bool,

        /// Boot the partition with this table index.
        #[arg(long)]
        partition: Option<u32>,

        /// Disk label the loader should expect.
        #[arg(long, value_enum, default_value_t = LabelArg::Any)]
        label: LabelArg,
    },

    /// Verify an image the way the boot stage does.
    Check { image: PathBuf },

    /// Show the disk label and partitions of a disk image.
    Probe {
        disk: PathBuf,

        #[arg(long, default_value_t = 512)]
        sector_size: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = match (args.quiet, args.verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Warn,
        (false, 1) => LevelFilter::Info,
        (false, _) => LevelFilter::Debug,
    };
    logger::init(level)?;

    match args.command {
        Command::Mkbin {
            loader,
            output,
            arch,
            version,
        } => {
            let binary = std::fs::read(&loader)
                .with_context(|| format!("failed to read {}", loader.display()))?;
            let options = BuildOptions {
                version,
                arch: arch.into(),
            };
            let image = stamp::build_image(&binary, &options)?;
            std::fs::write(&output, &image)
                .with_context(|| format!("failed to write {}", output.display()))?;
        }
        Command::Install {
            image,
            active,
            partition,
            label,
        } => {
            let selection = match (active, partition) {
                (true, _) => BootSelection::Active,
                (false, Some(index)) => BootSelection::Index(index),
                (false, None) => bail!("either --active or --partition is required"),
            };
            let mut bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            let options = InstallOptions {
                selection,
                label: label.into(),
            };
            let header = stamp::install(&mut bytes, &options)?;
            std::fs::write(&image, &bytes)
                .with_context(|| format!("failed to write {}", image.display()))?;
            print_header(&header);
        }
        Command::Check { image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            let header = stamp::check(&bytes)
                .with_context(|| format!("{} failed verification", image.display()))?;
            print_header(&header);
        }
        Command::Probe { disk, sector_size } => {
            let mut file = FileDisk::open(&disk, sector_size)?;
            let label = probe(&mut file)?;
            println!("label: {:?}", label.kind);
            for partition in &label.partitions {
                let kind = match &partition.kind {
                    PartitionKind::Mbr { system_id } => format!("type {:#04x}", system_id),
                    PartitionKind::Gpt { type_guid, .. } => format!("type {}", type_guid),
                };
                println!(
                    "{:>3} {} start {:#x} sectors {:#x} {}{}{}",
                    partition.index,
                    if partition.active { '*' } else { ' ' },
                    partition.first_lba,
                    partition.sector_count,
                    kind,
                    partition.name().map(|n| format!(" {:?}", n)).unwrap_or_default(),
                    if partition.is_supported() { "" } else { " (unsupported)" },
                );
            }
        }
    }
    Ok(())
}

fn print_header(header: &SplHeader) {
    println!("version:     {}", header.version_str().unwrap_or("<invalid>"));
    match header.arch() {
        Some(arch) => println!("arch:        {:?}", arch),
        None => println!("arch:        {:#06x}", header.arch_raw()),
    }
    println!("endian:      {:?}", header.endian());
    println!("header crc:  {:#010x}", header.header_crc());
    println!("loader crc:  {:#010x}", header.loader_crc());
    println!("loader size: {}", header.loader_size());
    println!("flags:       {:?}", header.flags());
    println!("label:       {:?}", header.label());
    println!("partition:   {}", header.partition());
}
