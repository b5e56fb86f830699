//! Integration tests for the persisted patch library.

mod common;

use std::fs;

use modstack::library::{BACKUPS_DIR, LIBRARY_FILE_NAME, PACKAGES_DIR};
use modstack::{CodecRegistry, Error, Installation, InstallationConfig, PatchLibrary};
use tempfile::TempDir;

use common::{Change, GameFixture, target};

fn count_files(dir: &std::path::Path) -> usize {
    match fs::read_dir(dir) {
        Ok(listing) => listing
            .map(|e| e.unwrap().path())
            .map(|p| if p.is_dir() { count_files(&p) } else { 1 })
            .sum(),
        Err(_) => 0,
    }
}

#[test]
fn test_state_survives_reopen() {
    let fx = GameFixture::new();
    fx.write("p.txt", b"0");
    {
        let mut install = fx.open();
        let _ = install.add_patch(fx.package("a", &[Change::Add("p.txt", b"1")])).unwrap();
        let _ = install.add_patch(fx.package("b", &[Change::Add("q.txt", b"2")])).unwrap();
        let _ = install.set_enabled("b", false).unwrap();
    }

    let state = fx.root.join(".modstack");
    let library = PatchLibrary::load(&state).unwrap();
    assert_eq!(library.game(), "testgame");
    assert_eq!(library.entries().len(), 2);
    assert_eq!(library.is_enabled("a"), Some(true));
    assert_eq!(library.is_enabled("b"), Some(false));
    assert_eq!(library.history().get(&target("p.txt")).unwrap().contributor, "a");
    assert!(!library.history().contains(&target("q.txt")));

    // Original content must come back even after the process restarted
    let mut install = fx.open();
    let _ = install.remove_patch("a").unwrap();
    assert_eq!(fx.read("p.txt").unwrap(), b"0");
}

#[test]
fn test_custom_state_dir() {
    let fx = GameFixture::new();
    let state = TempDir::new().unwrap();
    let config = fx.config().state_dir(state.path().join("duke"));
    let mut install = Installation::open(config, CodecRegistry::with_builtin()).unwrap();
    let _ = install.add_patch(fx.package("a", &[Change::Add("p.txt", b"1")])).unwrap();

    assert!(state.path().join("duke").join(LIBRARY_FILE_NAME).is_file());
    assert!(!fx.root.join(".modstack").exists());
}

#[test]
fn test_remove_purges_package_and_backups() {
    let fx = GameFixture::new();
    fx.write("p.txt", b"original");
    let mut install = fx.open();
    let _ = install.add_patch(fx.package("a", &[Change::Add("p.txt", b"1")])).unwrap();

    let state = fx.root.join(".modstack");
    assert_eq!(count_files(&state.join(PACKAGES_DIR)), 1);
    assert_eq!(count_files(&state.join(BACKUPS_DIR)), 1);

    let _ = install.remove_patch("a").unwrap();
    assert_eq!(count_files(&state.join(PACKAGES_DIR)), 0);
    assert_eq!(count_files(&state.join(BACKUPS_DIR)), 0);
}

#[test]
fn test_disabled_patch_keeps_its_package() {
    let fx = GameFixture::new();
    let mut install = fx.open();
    let _ = install.add_patch(fx.package("a", &[Change::Add("p.txt", b"1")])).unwrap();
    let _ = install.set_enabled("a", false).unwrap();

    let state = fx.root.join(".modstack");
    assert_eq!(count_files(&state.join(PACKAGES_DIR)), 1);
    let _ = install.set_enabled("a", true).unwrap();
    assert_eq!(fx.read("p.txt").unwrap(), b"1");
}

#[test]
fn test_invalid_mutations_leave_state_alone() {
    let fx = GameFixture::new();
    let mut install = fx.open();
    let package = fx.package("a", &[Change::Add("p.txt", b"1")]);
    let _ = install.add_patch(&package).unwrap();
    let saved = fs::read(fx.root.join(".modstack").join(LIBRARY_FILE_NAME)).unwrap();

    assert!(matches!(install.add_patch(&package), Err(Error::DuplicatePatch { .. })));
    assert!(matches!(install.remove_patch("nope"), Err(Error::PatchNotFound { .. })));
    assert!(matches!(install.reorder(&["a", "a"]), Err(Error::InvalidOperation(_))));

    let after = fs::read(fx.root.join(".modstack").join(LIBRARY_FILE_NAME)).unwrap();
    assert_eq!(saved, after);
}

#[test]
fn test_library_of_other_game_rejected() {
    let fx = GameFixture::new();
    let mut install = fx.open();
    let _ = install.add_patch(fx.package("a", &[Change::Add("p.txt", b"1")])).unwrap();

    let config = InstallationConfig::new("othergame", &fx.root);
    let err = Installation::open(config, CodecRegistry::with_builtin()).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
}
