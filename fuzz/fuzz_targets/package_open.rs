//! Fuzz target for opening patch packages from arbitrary bytes.
//!
//! Run with: cargo +nightly fuzz run package_open
//!
//! Opening must fail cleanly on garbage; a package that opens must read
//! every resource without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use modstack::PatchPackage;

fuzz_target!(|data: &[u8]| {
    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let path = dir.path().join("fuzz.mspk");
    if std::fs::write(&path, data).is_err() {
        return;
    }
    if let Ok(package) = PatchPackage::open(&path) {
        for resource in package.resources() {
            let _ = package.read_resource(&resource.target);
        }
    }
});
