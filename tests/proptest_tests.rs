//! Property-based tests using proptest.

mod common;

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use modstack::codec::PakCodec;
use modstack::progress::NoProgress;
use modstack::{ApplyStatus, Archive, ResourcePath, Target};
use proptest::prelude::*;

use common::{Change, GameFixture, pak_bytes};

/// Strategy for path strings `ResourcePath::new` accepts unchanged.
fn valid_path_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-z][a-z0-9_-]{0,7}(\\.[a-z]{1,3})?", 1..4)
        .prop_map(|parts| parts.join("/"))
}

/// Entries with unique names and no file/directory clashes.
fn entries_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    proptest::collection::btree_map(
        valid_path_strategy(),
        proptest::collection::vec(any::<u8>(), 0..64),
        0..12,
    )
    .prop_filter("no entry is a prefix directory of another", |map| {
        !map.keys().any(|a| {
            map.keys()
                .any(|b| b.starts_with(&format!("{}/", a)))
        })
    })
}

fn read_all(archive: &mut Archive<Cursor<Vec<u8>>>) -> BTreeMap<String, Vec<u8>> {
    let names: Vec<String> = archive
        .entries()
        .map(|e| e.path().as_str().to_string())
        .collect();
    names
        .into_iter()
        .map(|name| {
            let data = archive.read(&name).unwrap();
            (name, data)
        })
        .collect()
}

proptest! {
    /// Valid paths parse to themselves and survive the target syntax.
    #[test]
    fn valid_paths_round_trip(path in valid_path_strategy()) {
        let parsed = ResourcePath::new(&path).unwrap();
        prop_assert_eq!(parsed.as_str(), path.as_str());

        let target = Target::parse(&format!("pak0.pak::{}", path)).unwrap();
        prop_assert_eq!(target.to_string(), format!("pak0.pak::{}", path));
    }

    /// Paths with a `..` segment are always rejected.
    #[test]
    fn traversal_rejected(prefix in "[a-z]{1,5}", suffix in "[a-z]{1,5}") {
        let path = format!("{}/../{}", prefix, suffix);
        prop_assert!(ResourcePath::new(&path).is_err());
    }

    /// Committed containers re-open with the same entries and bytes.
    #[test]
    fn pak_commit_round_trip(
        entries in entries_strategy(),
        replace_mask in proptest::collection::vec(any::<bool>(), 12),
        replacement in proptest::collection::vec(any::<u8>(), 0..32),
    ) {
        let files: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
            .collect();
        let bytes = pak_bytes(&files);

        let mut archive = Archive::open(Cursor::new(bytes), Arc::new(PakCodec)).unwrap();
        let mut expected = entries.clone();
        for ((name, data), replace) in expected.iter_mut().zip(&replace_mask) {
            if *replace {
                archive.stage_import(name, replacement.clone()).unwrap();
                *data = replacement.clone();
            }
        }
        let mut out = Vec::new();
        let result = archive.commit(&mut out, &mut NoProgress).unwrap();
        prop_assert!(result.is_complete());
        prop_assert_eq!(result.total_entries(), entries.len());

        let mut reopened = Archive::open(Cursor::new(out), Arc::new(PakCodec)).unwrap();
        prop_assert_eq!(read_all(&mut reopened), expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// The highest enabled patch wins every target, and disabling all
    /// patches restores the original tree exactly.
    #[test]
    fn stack_resolution_and_rollback(
        originals in proptest::collection::vec(proptest::option::of("[a-z]{1,6}"), 3),
        patches in proptest::collection::vec(
            proptest::collection::vec(proptest::option::of("[A-Z]{1,6}"), 3),
            1..4,
        ),
        enabled in proptest::collection::vec(any::<bool>(), 4),
    ) {
        let names = ["a.txt", "dir/b.txt", "c.dat"];
        let fx = GameFixture::new();
        for (name, content) in names.iter().zip(&originals) {
            if let Some(content) = content {
                fx.write(name, content.as_bytes());
            }
        }
        let before = fx.snapshot();

        let mut install = fx.open();
        let mut ids = Vec::new();
        for (index, contents) in patches.iter().enumerate() {
            let id = format!("p{}", index);
            let changes: Vec<Change<'_>> = names
                .iter()
                .zip(contents)
                .filter_map(|(name, content)| {
                    content.as_ref().map(|c| Change::Add(name, c.as_bytes()))
                })
                .collect();
            if changes.is_empty() {
                continue;
            }
            let report = install.add_patch(fx.package(&id, &changes)).unwrap();
            prop_assert_eq!(report.status(), ApplyStatus::Complete);
            ids.push((id, contents.clone()));
        }
        for ((id, _), on) in ids.iter().zip(&enabled) {
            let _ = install.set_enabled(id, *on).unwrap();
        }

        for (slot, name) in names.iter().enumerate() {
            let winner = ids
                .iter()
                .zip(&enabled)
                .filter(|(_, on)| **on)
                .filter_map(|((_, contents), _)| contents[slot].clone())
                .last();
            let expected = winner.or_else(|| originals[slot].clone()).map(String::into_bytes);
            prop_assert_eq!(fx.read(name), expected);
        }

        let second = install.reapply().unwrap();
        prop_assert_eq!(second.writes(), 0);

        for (id, _) in &ids {
            let _ = install.set_enabled(id, false).unwrap();
        }
        prop_assert_eq!(fx.snapshot(), before);
        prop_assert!(install.library().history().is_empty());
    }
}
