//! Archive session tests against real container files.

mod common;

use std::fs;

use modstack::progress::{NoProgress, StatisticsProgress};
use modstack::{Archive, CodecRegistry, Error, ResourcePath};
use tempfile::TempDir;

use common::{container_contents, grp_bytes, pak_bytes, wad_bytes};

fn registry() -> CodecRegistry {
    CodecRegistry::with_builtin()
}

#[test]
fn test_stage_one_entry_and_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("GAME.GRP");
    fs::write(&path, grp_bytes(&[("a.bin", b"aaaa"), ("b.bin", b"bbbb")])).unwrap();

    let mut archive = Archive::open_path(&path, &registry()).unwrap();
    archive.stage_import("b.bin", b"replaced".to_vec()).unwrap();
    let result = archive.commit_in_place(&mut NoProgress).unwrap();
    assert_eq!(result.entries_kept, 1);
    assert_eq!(result.entries_replaced, 1);
    assert!(result.is_complete());

    let contents = container_contents(&path);
    assert_eq!(contents.len(), 2);
    assert_eq!(contents["a.bin"], b"aaaa");
    assert_eq!(contents["b.bin"], b"replaced");
}

#[test]
fn test_commit_without_changes_is_identical() {
    let original = pak_bytes(&[("maps/e1m1.bsp", b"bsp"), ("progs.dat", b"progs")]);
    let archive = Archive::open(
        std::io::Cursor::new(original.clone()),
        registry().by_name("PAK").unwrap(),
    )
    .unwrap();
    let mut out = Vec::new();
    let result = archive.commit(&mut out, &mut NoProgress).unwrap();
    assert_eq!(result.entries_kept, 2);
    assert_eq!(out, original);
}

#[test]
fn test_pak_insert_remove_and_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pak0.pak");
    fs::write(
        &path,
        pak_bytes(&[("maps/e1m1.bsp", b"one"), ("maps/e1m2.bsp", b"two")]),
    )
    .unwrap();

    let mut archive = Archive::open_path(&path, &registry()).unwrap();
    assert_eq!(archive.directories(), ["", "maps"]);
    archive.stage_removal("maps/e1m2.bsp").unwrap();
    archive
        .stage_insert(ResourcePath::new("sound/new.wav").unwrap(), b"wav".to_vec())
        .unwrap();
    let mut progress = StatisticsProgress::new();
    let result = archive.commit_in_place(&mut progress).unwrap();
    assert_eq!(result.entries_removed, 1);
    assert_eq!(result.entries_inserted, 1);

    let contents = container_contents(&path);
    assert_eq!(
        contents.keys().collect::<Vec<_>>(),
        ["maps/e1m1.bsp", "sound/new.wav"]
    );
}

#[test]
fn test_failed_conversion_keeps_original_file_readable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("GAME.GRP");
    fs::write(&path, grp_bytes(&[("A.BIN", b"a")])).unwrap();

    let mut archive = Archive::open_path(&path, &registry()).unwrap();
    archive
        .stage_insert(ResourcePath::new("nested/B.BIN").unwrap(), b"b".to_vec())
        .unwrap();
    let result = archive.commit_in_place(&mut NoProgress).unwrap();
    assert_eq!(result.failed.len(), 1);
    assert!(matches!(
        result.failed[0].error,
        Error::UnsupportedConversion { .. }
    ));

    let contents = container_contents(&path);
    assert_eq!(contents.len(), 1);
    assert_eq!(contents["A.BIN"], b"a");
}

#[test]
fn test_wad_replace_preserves_lump_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mod.wad");
    fs::write(
        &path,
        wad_bytes(&[("PLAYPAL", &[0u8; 768]), ("DEMO1", b"demo"), ("ENDOOM", b"end")]),
    )
    .unwrap();

    let mut archive = Archive::open_path(&path, &registry()).unwrap();
    archive.stage_import("DEMO1", b"new demo".to_vec()).unwrap();
    let _ = archive.commit_in_place(&mut NoProgress).unwrap();

    let archive = Archive::open_path(&path, &registry()).unwrap();
    let names: Vec<&str> = archive.entries().map(|e| e.path().as_str()).collect();
    assert_eq!(names, ["PLAYPAL", "DEMO1", "ENDOOM"]);
    assert_eq!(container_contents(&path)["DEMO1"], b"new demo");
}

#[test]
fn test_open_rejects_garbage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.grp");
    fs::write(&path, b"KenSilverman\xff\xff\xff\x00").unwrap();
    let err = Archive::open_path(&path, &registry()).unwrap_err();
    assert!(err.is_format_error());

    let unknown = dir.path().join("notes.txt");
    fs::write(&unknown, b"hello").unwrap();
    assert!(matches!(
        Archive::open_path(&unknown, &registry()).unwrap_err(),
        Error::UnknownContainer { .. }
    ));
}
