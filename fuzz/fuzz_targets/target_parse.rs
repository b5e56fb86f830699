//! Fuzz target for `Target::parse` with arbitrary string input.
//!
//! Run with: cargo +nightly fuzz run target_parse
//!
//! Properties checked on every accepted target:
//! - no empty, `.` or `..` segments
//! - not absolute, no NUL bytes
//! - display form parses back to the same target

#![no_main]

use libfuzzer_sys::fuzz_target;
use modstack::{ResourcePath, Target};

fn check(path: &ResourcePath) {
    let s = path.as_str();
    assert!(!s.starts_with('/'), "absolute path accepted: {:?}", s);
    assert!(!s.contains('\0'), "NUL byte accepted: {:?}", s);
    assert!(
        s.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != ".."),
        "bad segment accepted: {:?}",
        s
    );
}

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(target) = Target::parse(text) else {
        return;
    };
    match &target {
        Target::Loose(path) => check(path),
        Target::Entry { container, entry } => {
            check(container);
            check(entry);
        }
    }
    let reparsed = Target::parse(&target.to_string()).expect("display form must parse");
    assert_eq!(reparsed, target);
});
