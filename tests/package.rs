//! Integration tests for patch packages and their installation.

mod common;

use std::fs;

use modstack::package::{Compression, PackageChange};
use modstack::{Error, FileKind, PackageBuilder, PatchPackage, PatchVersion, Timestamp};
use tempfile::TempDir;

use common::{Change, GameFixture, target};

fn full_builder() -> PackageBuilder {
    let version = PatchVersion::new(2, 1, 0);
    let mut builder = PackageBuilder::new("hires-pack", "High resolution pack", version)
        .description("Sharper tiles")
        .author("someone")
        .website("https://example.org/hires")
        .target_game("duke3d")
        .changelog(
            PatchVersion::new(1, 0, 0),
            Timestamp::from_unix_secs(1_600_000_000),
            "First release",
        )
        .changelog(
            PatchVersion::new(2, 1, 0),
            Timestamp::from_unix_secs(1_700_000_000),
            "More tiles",
        )
        .modified(Timestamp::from_unix_secs(1_700_000_100));
    builder
        .add_resource(target("DUKE3D.GRP::TILES000.ART"), vec![7u8; 4096])
        .unwrap();
    builder.add_resource(target("readme.txt"), b"hi".to_vec()).unwrap();
    builder.remove(target("old.cfg")).unwrap();
    builder
}

#[test]
fn test_metadata_and_changes_survive_the_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hires.mspk");
    let written = full_builder().write_to_path(&path).unwrap();
    assert_eq!(written.total_size, 4098);

    let package = PatchPackage::open(&path).unwrap();
    let meta = package.metadata();
    assert_eq!(meta, &written);
    assert_eq!(meta.name, "High resolution pack");
    assert_eq!(package.version(), PatchVersion::new(2, 1, 0));
    assert!(meta.targets_game("duke3d"));
    assert!(!meta.targets_game("quake"));
    assert_eq!(meta.latest_change().unwrap().description, "More tiles");

    assert_eq!(package.removed(), [target("old.cfg")]);
    let tiles = package.resource(&target("DUKE3D.GRP::TILES000.ART")).unwrap();
    assert!(tiles.packed_size < tiles.size);
    assert_eq!(package.read_resource(&target("readme.txt")).unwrap(), b"hi");
    package.verify_payload().unwrap();

    let removals = package
        .changes()
        .filter(|(_, change)| matches!(change, PackageChange::Remove))
        .count();
    assert_eq!(removals, 1);
}

#[test]
fn test_stored_compression() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stored.mspk");
    full_builder()
        .compression(Compression::Stored)
        .write_to_path(&path)
        .unwrap();
    let package = PatchPackage::open(&path).unwrap();
    for resource in package.resources() {
        assert_eq!(resource.compression, Compression::Stored);
        assert_eq!(resource.packed_size, resource.size);
    }
}

#[test]
fn test_newer_format_version_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("future.mspk");
    full_builder().write_to_path(&path).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    bytes[4..6].copy_from_slice(&99u16.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    match PatchPackage::open(&path) {
        Err(Error::UnsupportedFormatVersion { kind, found, .. }) => {
            assert_eq!(kind, FileKind::Package);
            assert_eq!(found, 99);
        }
        other => panic!("expected a version error, got {:?}", other),
    }
}

#[test]
fn test_damaged_payload_detected_on_read() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("damaged.mspk");
    full_builder()
        .compression(Compression::Stored)
        .write_to_path(&path)
        .unwrap();

    // The payload ends with the last resource in target order
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let package = PatchPackage::open(&path).unwrap();
    assert!(package.verify_payload().is_err());
}

#[test]
fn test_truncated_package_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("short.mspk");
    full_builder().write_to_path(&path).unwrap();
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..30]).unwrap();
    assert!(PatchPackage::open(&path).is_err());
}

#[test]
fn test_install_rejects_package_for_other_game() {
    let fx = GameFixture::new();
    let path = fx.downloads.join("hires.mspk");
    full_builder().write_to_path(&path).unwrap();

    let mut install = fx.open();
    let err = install.add_patch(&path).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
    assert!(install.library().entries().is_empty());
    assert!(fx.read("readme.txt").is_none());
}

#[test]
fn test_replace_upgrades_in_place() {
    let fx = GameFixture::new();
    let mut install = fx.open();
    let _ = install
        .add_patch(fx.package("fix", &[Change::Add("a.txt", b"v1"), Change::Add("b.txt", b"v1")]))
        .unwrap();
    let _ = install
        .add_patch(fx.package("other", &[Change::Add("c.txt", b"c")]))
        .unwrap();

    let upgrade = fx.package("fix", &[Change::Add("a.txt", b"v2")]);
    let report = install.replace_patch(&upgrade).unwrap();
    assert_eq!(report.written, vec![target("a.txt")]);
    assert_eq!(report.reverted, vec![target("b.txt")]);
    assert_eq!(fx.read("a.txt").unwrap(), b"v2");
    assert!(fx.read("b.txt").is_none());

    let ids: Vec<&str> = install.library().entries().iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["fix", "other"]);
}
