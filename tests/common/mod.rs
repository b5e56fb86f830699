//! Shared test utilities for integration tests.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use modstack::codec::{DynCodec, GrpCodec, PakCodec};
use modstack::progress::NoProgress;
use modstack::{
    Archive, CodecRegistry, ContentDigest, Installation, InstallationConfig, PackageBuilder,
    PatchVersion, ResourcePath, Target,
};
use tempfile::TempDir;

// =============================================================================
// Containers
// =============================================================================

/// Builds a container by inserting `files` into an empty one.
pub fn build_container(
    codec: Arc<dyn DynCodec>,
    empty: Vec<u8>,
    files: &[(&str, &[u8])],
) -> Vec<u8> {
    let mut archive = Archive::open(Cursor::new(empty), codec).unwrap();
    for (name, data) in files {
        archive
            .stage_insert(ResourcePath::new(name).unwrap(), data.to_vec())
            .unwrap();
    }
    let mut out = Vec::new();
    let result = archive.commit(&mut out, &mut NoProgress).unwrap();
    assert!(result.is_complete());
    out
}

/// Creates GRP bytes holding `files` in order.
pub fn grp_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut empty = b"KenSilverman".to_vec();
    empty.extend_from_slice(&0u32.to_le_bytes());
    build_container(Arc::new(GrpCodec), empty, files)
}

/// Creates PAK bytes holding `files` in order.
pub fn pak_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut empty = b"PACK".to_vec();
    empty.extend_from_slice(&12u32.to_le_bytes());
    empty.extend_from_slice(&0u32.to_le_bytes());
    build_container(Arc::new(PakCodec), empty, files)
}

/// Creates a PWAD with `lumps` laid out sequentially after the header.
pub fn wad_bytes(lumps: &[(&str, &[u8])]) -> Vec<u8> {
    let data_len: usize = lumps.iter().map(|(_, d)| d.len()).sum();
    let mut out = b"PWAD".to_vec();
    out.extend_from_slice(&(lumps.len() as u32).to_le_bytes());
    out.extend_from_slice(&((12 + data_len) as u32).to_le_bytes());
    for (_, data) in lumps {
        out.extend_from_slice(data);
    }
    let mut offset = 12u32;
    for (name, data) in lumps {
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        let mut field = [0u8; 8];
        field[..name.len()].copy_from_slice(name.as_bytes());
        out.extend_from_slice(&field);
        offset += data.len() as u32;
    }
    out
}

/// Reads every entry of a container file into a map.
pub fn container_contents(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut archive = Archive::open_path(path, &CodecRegistry::with_builtin()).unwrap();
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

// =============================================================================
// Packages
// =============================================================================

/// One change in a test package.
pub enum Change<'a> {
    Add(&'a str, &'a [u8]),
    Remove(&'a str),
}

/// Writes a package with `changes` to `<dir>/<id>.mspk`.
pub fn build_package(dir: &Path, id: &str, changes: &[Change<'_>]) -> PathBuf {
    let path = dir.join(format!("{}.mspk", id));
    let mut builder = PackageBuilder::new(id, format!("Patch {}", id), PatchVersion::new(1, 0, 0));
    for change in changes {
        match change {
            Change::Add(target, data) => builder
                .add_resource(Target::parse(target).unwrap(), data.to_vec())
                .unwrap(),
            Change::Remove(target) => builder.remove(Target::parse(target).unwrap()).unwrap(),
        }
    }
    builder.write_to_path(&path).unwrap();
    path
}

// =============================================================================
// Installations
// =============================================================================

/// A game directory plus a place for packages, both temporary.
pub struct GameFixture {
    dir: TempDir,
    pub root: PathBuf,
    pub downloads: PathBuf,
}

impl GameFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("game");
        let downloads = dir.path().join("downloads");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&downloads).unwrap();
        Self {
            dir,
            root,
            downloads,
        }
    }

    pub fn config(&self) -> InstallationConfig {
        InstallationConfig::new("testgame", &self.root)
    }

    pub fn open(&self) -> Installation {
        Installation::open(self.config(), CodecRegistry::with_builtin()).unwrap()
    }

    pub fn package(&self, id: &str, changes: &[Change<'_>]) -> PathBuf {
        build_package(&self.downloads, id, changes)
    }

    pub fn write(&self, relative: &str, data: &[u8]) {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, data).unwrap();
    }

    pub fn read(&self, relative: &str) -> Option<Vec<u8>> {
        fs::read(self.root.join(relative)).ok()
    }

    /// Digest of every file under the root, ignoring the state directory.
    pub fn snapshot(&self) -> BTreeMap<String, ContentDigest> {
        let mut files = BTreeMap::new();
        collect(&self.root, &self.root, &mut files);
        files
    }
}

fn collect(root: &Path, dir: &Path, files: &mut BTreeMap<String, ContentDigest>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.file_name().is_some_and(|n| n == ".modstack") {
            continue;
        }
        if path.is_dir() {
            collect(root, &path, files);
        } else {
            let relative = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
            files.insert(relative, ContentDigest::of(&fs::read(&path).unwrap()));
        }
    }
}

pub fn target(s: &str) -> Target {
    Target::parse(s).unwrap()
}
