use std::path::PathBuf;

use sploader::header::offset;
use sploader::{
    crc32, locate_boot_partition, probe, verify_image, Arch, DiskLabelKind, Integrity,
    PartitionKind, SplError, SplFlags, Structure, SPL_HEADER_BLOCK_SIZE,
};
use splimg::{build_image, check, install, BootSelection, BuildOptions, FileDisk, InstallOptions};

const LINUX_FS: [u8; 16] = [
    0xAF, 0x3D, 0xC6, 0x0F, 0x83, 0x84, 0x72, 0x47, 0x8E, 0x79, 0x3D, 0x69, 0xD8, 0x47, 0x7D, 0xE4,
];

fn temp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("splimg_tests");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn loader_binary() -> Vec<u8> {
    (0..5000u32).map(|i| (i * 7) as u8).collect()
}

fn build(version: &str) -> Vec<u8> {
    let options = BuildOptions {
        version: version.to_string(),
        arch: Arch::X86,
    };
    build_image(&loader_binary(), &options).unwrap()
}

/// Boot sector with (boot indicator, type, start, count) primary entries
fn mbr_sector(entries: &[(u8, u8, u32, u32)]) -> Vec<u8> {
    let mut sector = vec![0u8; 512];
    for (slot, (boot, kind, start, count)) in entries.iter().enumerate() {
        let at = 446 + slot * 16;
        sector[at] = *boot;
        sector[at + 4] = *kind;
        sector[at + 8..at + 12].copy_from_slice(&start.to_le_bytes());
        sector[at + 12..at + 16].copy_from_slice(&count.to_le_bytes());
    }
    sector[510] = 0x55;
    sector[511] = 0xAA;
    sector
}

/// 64-sector GPT disk with (first, last, attributes, name) partitions
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
    header[0..8].copy_from_slice(b"EFI PART");
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
    let header_crc = crc32(&disk[512..512 + 92]);
    disk[512 + 16..512 + 20].copy_from_slice(&header_crc.to_le_bytes());
    disk
}

fn write_disk(name: &str, bytes: &[u8]) -> FileDisk {
    let path = temp_path(name);
    std::fs::write(&path, bytes).unwrap();
    FileDisk::open(&path, 512).unwrap()
}

#[test]
fn build_then_check() {
    let image = build("1.2.3");
    assert_eq!(image.len(), SPL_HEADER_BLOCK_SIZE + 5000);

    let header = check(&image).unwrap();
    assert_eq!(header.version_triple(), Some((1, 2, 3)));
    assert_eq!(header.arch(), Some(Arch::X86));
    assert_eq!(header.loader_size(), 5000);
    assert_eq!(header.flags(), SplFlags::empty());
    assert_eq!(header.label(), DiskLabelKind::Unknown);
    assert_eq!(header.partition(), 0);
}

#[test]
fn build_rejects_bad_version() {
    let options = BuildOptions {
        version: "v1".to_string(),
        arch: Arch::X86,
    };
    assert!(build_image(&loader_binary(), &options).is_err());
}

#[test]
fn image_survives_the_filesystem() {
    let path = temp_path("roundtrip.bin");
    std::fs::write(&path, build("0.4.0")).unwrap();
    let mut image = std::fs::read(&path).unwrap();

    let options = InstallOptions {
        selection: BootSelection::Index(2),
        label: DiskLabelKind::Mbr,
    };
    install(&mut image, &options).unwrap();
    std::fs::write(&path, &image).unwrap();

    let reread = std::fs::read(&path).unwrap();
    let header = check(&reread).unwrap();
    assert!(!header.flags().contains(SplFlags::ACTIVE));
    assert_eq!(header.partition(), 2);
    assert_eq!(header.label(), DiskLabelKind::Mbr);
    assert_eq!(verify_image(&reread).unwrap().binary, &loader_binary()[..]);
}

#[test]
fn install_active_then_reinstall_by_index() {
    let mut image = build("1.0.0");
    let original_crc = check(&image).unwrap().header_crc();

    let active = InstallOptions {
        selection: BootSelection::Active,
        label: DiskLabelKind::Gpt,
    };
    let header = install(&mut image, &active).unwrap();
    assert!(header.flags().contains(SplFlags::ACTIVE));
    assert_ne!(header.header_crc(), original_crc);
    assert_eq!(check(&image).unwrap(), header);

    let by_index = InstallOptions {
        selection: BootSelection::Index(1),
        label: DiskLabelKind::Unknown,
    };
    let header = install(&mut image, &by_index).unwrap();
    assert!(!header.flags().contains(SplFlags::ACTIVE));
    assert_eq!(header.partition(), 1);
    assert_eq!(header.label(), DiskLabelKind::Unknown);
    check(&image).unwrap();
}

#[test]
fn install_refuses_damaged_images() {
    let options = InstallOptions {
        selection: BootSelection::Active,
        label: DiskLabelKind::Unknown,
    };

    let mut header_damage = build("1.0.0");
    header_damage[offset::PARTITION] = 9;
    let before = header_damage.clone();
    assert!(install(&mut header_damage, &options).is_err());
    assert_eq!(header_damage, before);

    let mut binary_damage = build("1.0.0");
    binary_damage[SPL_HEADER_BLOCK_SIZE + 10] ^= 0x01;
    let err = install(&mut binary_damage, &options).unwrap_err();
    assert_eq!(
        err.downcast_ref::<SplError>(),
        Some(&SplError::IntegrityMismatch(Integrity::Binary))
    );
}

#[test]
fn check_reports_core_errors() {
    let mut image = build("1.0.0");
    image[SPL_HEADER_BLOCK_SIZE] ^= 0x80;
    let err = check(&image).unwrap_err();
    assert_eq!(
        err.downcast_ref::<SplError>(),
        Some(&SplError::IntegrityMismatch(Integrity::Binary))
    );

    let err = check(&image[..64]).unwrap_err();
    assert_eq!(
        err.downcast_ref::<SplError>(),
        Some(&SplError::StructuralInvalid(Structure::HeaderLength))
    );
}

#[test]
fn probe_mbr_disk_file() {
    let mut bytes = mbr_sector(&[(0x00, 0x0C, 63, 100), (0x80, 0x83, 2048, 4096)]);
    bytes.resize(8 * 512, 0);
    let mut disk = write_disk("mbr.img", &bytes);

    let label = probe(&mut disk).unwrap();
    assert_eq!(label.kind, DiskLabelKind::Mbr);
    assert_eq!(label.partitions.len(), 2);
    match label.partitions[1].kind {
        PartitionKind::Mbr { system_id } => assert_eq!(system_id, 0x83),
        _ => panic!("expected an MBR partition"),
    }

    let mut image = build("1.0.0");
    let options = InstallOptions {
        selection: BootSelection::Active,
        label: DiskLabelKind::Mbr,
    };
    let header = install(&mut image, &options).unwrap();
    let partition = locate_boot_partition(&header, &mut disk).unwrap();
    assert_eq!(partition.index, 1);
    assert_eq!(partition.first_lba, 2048);
}

#[test]
fn probe_gpt_disk_file() {
    let bytes = gpt_disk(&[(34, 47, 0, "EFI"), (48, 62, 1 << 2, "boot")]);
    let mut disk = write_disk("gpt.img", &bytes);

    let label = probe(&mut disk).unwrap();
    assert_eq!(label.kind, DiskLabelKind::Gpt);
    assert_eq!(label.partitions.len(), 2);
    assert_eq!(label.partitions[1].name().as_deref(), Some("boot"));

    let mut image = build("1.0.0");
    let options = InstallOptions {
        selection: BootSelection::Active,
        label: DiskLabelKind::Gpt,
    };
    let header = install(&mut image, &options).unwrap();
    let partition = locate_boot_partition(&header, &mut disk).unwrap();
    assert_eq!(partition.index, 1);
    assert_eq!(partition.first_lba, 48);
    assert_eq!(partition.sector_count, 15);

    let mbr_only = InstallOptions {
        selection: BootSelection::Active,
        label: DiskLabelKind::Mbr,
    };
    let header = install(&mut image, &mbr_only).unwrap();
    assert_eq!(
        locate_boot_partition(&header, &mut disk).unwrap_err(),
        SplError::StructuralInvalid(Structure::LabelMismatch)
    );
}

#[test]
fn corrupt_gpt_array_on_disk() {
    let mut bytes = gpt_disk(&[(34, 62, 1 << 2, "boot")]);
    // name byte inside the first entry; array CRC no longer matches
    bytes[2 * 512 + 60] ^= 0xFF;
    let mut disk = write_disk("gpt_corrupt.img", &bytes);
    assert_eq!(
        probe(&mut disk).unwrap_err(),
        SplError::IntegrityMismatch(Integrity::GptEntries)
    );
}

#[test]
fn truncated_disk_file() {
    let bytes = gpt_disk(&[(34, 62, 0, "data")]);
    let mut disk = write_disk("gpt_truncated.img", &bytes[..4 * 512]);
    assert_eq!(
        probe(&mut disk).unwrap_err(),
        SplError::StructuralInvalid(Structure::DiskTruncated)
    );
}

#[test]
fn rejects_bad_sector_size() {
    let path = temp_path("sector.img");
    std::fs::write(&path, [0u8; 512]).unwrap();
    assert!(FileDisk::open(&path, 1000).is_err());
}
