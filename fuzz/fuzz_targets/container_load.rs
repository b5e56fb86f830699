//! Fuzz target for loading GRP, PAK and WAD containers.
//!
//! Run with: cargo +nightly fuzz run container_load
//!
//! The first byte picks the codec, the rest is the container. Loading must
//! never panic or allocate without bound, and every listed entry must be
//! readable or fail with an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use modstack::Archive;
use modstack::codec::{DynCodec, GrpCodec, PakCodec, WadCodec};
use std::io::Cursor;
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, body)) = data.split_first() else {
        return;
    };
    let codec: Arc<dyn DynCodec> = match selector % 3 {
        0 => Arc::new(GrpCodec),
        1 => Arc::new(PakCodec),
        _ => Arc::new(WadCodec),
    };
    let Ok(mut archive) = Archive::open(Cursor::new(body.to_vec()), codec) else {
        return;
    };
    let paths: Vec<String> = archive
        .entries()
        .map(|e| e.path().as_str().to_string())
        .collect();
    for path in paths {
        let _ = archive.read(&path);
    }
});
