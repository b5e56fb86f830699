//! Writing patch packages.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use super::format::{Compression, Manifest, PackageHeader, ResourceEntry};
use super::metadata::{ChangelogEntry, PackageMetadata, PatchVersion, validate_id};
use crate::atomic_file::write_atomic;
use crate::digest::ContentDigest;
use crate::{Error, Result, Target, Timestamp};

enum Pending {
    Add(Vec<u8>),
    Remove,
}

/// Builds a `.mspk` patch package.
///
/// # Example
///
/// ```rust,no_run
/// use modstack::{PackageBuilder, PatchVersion, Target};
///
/// let mut builder = PackageBuilder::new("hires", "Hi-res textures", PatchVersion::new(1, 0, 0))
///     .author("someone")
///     .target_game("duke3d");
/// let tiles = std::fs::read("TILES000.ART")?;
/// builder.add_resource(Target::parse("DUKE3D.GRP::TILES000.ART")?, tiles)?;
/// builder.remove(Target::parse("maps/old.map")?)?;
/// builder.write_to_path("hires.mspk")?;
/// # Ok::<(), modstack::Error>(())
/// ```
pub struct PackageBuilder {
    metadata: PackageMetadata,
    compression: Compression,
    items: BTreeMap<Target, Pending>,
}

impl std::fmt::Debug for PackageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageBuilder")
            .field("id", &self.metadata.id)
            .field("version", &self.metadata.version)
            .field("items", &self.items.len())
            .finish_non_exhaustive()
    }
}

impl PackageBuilder {
    /// Starts a package with the required metadata.
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: PatchVersion) -> Self {
        Self {
            metadata: PackageMetadata {
                id: id.into(),
                name: name.into(),
                description: String::new(),
                author: String::new(),
                website: String::new(),
                version,
                target_games: Vec::new(),
                changelog: Vec::new(),
                total_size: 0,
                modified: Timestamp::now(),
            },
            compression: Compression::default(),
            items: BTreeMap::new(),
        }
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    /// Sets the author.
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.metadata.author = author.into();
        self
    }

    /// Sets the website.
    pub fn website(mut self, website: impl Into<String>) -> Self {
        self.metadata.website = website.into();
        self
    }

    /// Adds a game id the patch is meant for.
    pub fn target_game(mut self, game: impl Into<String>) -> Self {
        self.metadata.target_games.push(game.into());
        self
    }

    /// Appends a changelog entry.
    pub fn changelog(
        mut self,
        version: PatchVersion,
        date: Timestamp,
        description: impl Into<String>,
    ) -> Self {
        self.metadata.changelog.push(ChangelogEntry {
            version,
            date,
            description: description.into(),
        });
        self
    }

    /// Sets the payload compression for all resources.
    ///
    /// Resources that do not shrink are stored raw regardless.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Overrides the build timestamp (defaults to now).
    pub fn modified(mut self, modified: Timestamp) -> Self {
        self.metadata.modified = modified;
        self
    }

    fn claim(&mut self, target: Target, item: Pending) -> Result<()> {
        if self.items.contains_key(&target) {
            return Err(Error::InvalidOperation(format!(
                "target '{}' is already part of the package",
                target
            )));
        }
        self.items.insert(target, item);
        Ok(())
    }

    /// Adds bytes to install at `target`.
    ///
    /// Fails with [`Error::InvalidOperation`] if the target was already
    /// added or removed.
    pub fn add_resource(&mut self, target: Target, data: Vec<u8>) -> Result<()> {
        self.claim(target, Pending::Add(data))
    }

    /// Adds the contents of a file on disk.
    pub fn add_file(&mut self, target: Target, source: impl AsRef<Path>) -> Result<()> {
        let data = std::fs::read(source)?;
        self.add_resource(target, data)
    }

    /// Marks `target` for deletion.
    pub fn remove(&mut self, target: Target) -> Result<()> {
        self.claim(target, Pending::Remove)
    }

    /// Returns the number of targets added or removed so far.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing was added or removed.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Writes the package to `writer`, returning its final metadata.
    pub fn write_to(self, writer: &mut dyn Write) -> Result<PackageMetadata> {
        let Self {
            mut metadata,
            compression,
            items,
        } = self;
        validate_id(&metadata.id)?;
        if metadata.name.trim().is_empty() {
            metadata.name = metadata.id.clone();
        }

        let mut manifest = Manifest::default();
        let mut payload = Vec::new();
        let mut total_size = 0u64;
        for (target, item) in items {
            match item {
                Pending::Remove => manifest.removed.push(target),
                Pending::Add(data) => {
                    let mut method = compression;
                    let mut packed = method.compress(&data)?;
                    if packed.len() >= data.len() {
                        method = Compression::Stored;
                        packed = data.clone();
                    }
                    manifest.resources.push(ResourceEntry {
                        target,
                        compression: method,
                        offset: payload.len() as u64,
                        packed_size: packed.len() as u64,
                        size: data.len() as u64,
                        digest: ContentDigest::of(&data),
                    });
                    total_size += data.len() as u64;
                    payload.extend_from_slice(&packed);
                }
            }
        }
        metadata.total_size = total_size;

        let metadata_bytes = serde_json::to_vec(&metadata)?;
        let manifest_bytes = manifest.encode()?;
        PackageHeader::for_blocks(&metadata_bytes, &manifest_bytes)?.write(writer)?;
        writer.write_all(&metadata_bytes)?;
        writer.write_all(&manifest_bytes)?;
        writer.write_all(&payload)?;

        log::info!(
            "built package {} {}: {} resources ({}), {} removals",
            metadata.id,
            metadata.version,
            manifest.resources.len(),
            crate::progress::format_bytes_iec(total_size),
            manifest.removed.len()
        );
        Ok(metadata)
    }

    /// Writes the package to a file atomically.
    pub fn write_to_path(self, path: impl AsRef<Path>) -> Result<PackageMetadata> {
        write_atomic(path.as_ref(), |w| self.write_to(w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::PatchPackage;
    use tempfile::TempDir;

    fn target(s: &str) -> Target {
        Target::parse(s).unwrap()
    }

    #[test]
    fn test_build_and_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hires.mspk");

        let big = b"tile ".repeat(500);
        let mut builder = PackageBuilder::new("hires", "Hi-res", PatchVersion::new(1, 2, 3))
            .author("me")
            .target_game("duke3d")
            .changelog(PatchVersion::new(1, 2, 3), Timestamp::from_unix_secs(86_400), "init");
        builder
            .add_resource(target("DUKE3D.GRP::TILES000.ART"), big.clone())
            .unwrap();
        builder.add_resource(target("readme.txt"), b"hi".to_vec()).unwrap();
        builder.remove(target("maps/old.map")).unwrap();
        let meta = builder.write_to_path(&path).unwrap();
        assert_eq!(meta.total_size, big.len() as u64 + 2);

        let package = PatchPackage::open(&path).unwrap();
        assert_eq!(package.id(), "hires");
        assert_eq!(package.version(), PatchVersion::new(1, 2, 3));
        assert_eq!(package.metadata().changelog.len(), 1);
        assert_eq!(package.resources().len(), 2);
        assert_eq!(package.removed(), &[target("maps/old.map")]);
        assert_eq!(
            package.read_resource(&target("DUKE3D.GRP::TILES000.ART")).unwrap(),
            big
        );
        assert_eq!(package.read_resource(&target("readme.txt")).unwrap(), b"hi");
        package.verify_payload().unwrap();

        // Tiny resources never grow through compression.
        let readme = package.resource(&target("readme.txt")).unwrap();
        assert_eq!(readme.compression, Compression::Stored);
    }

    #[test]
    fn test_missing_resource() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.mspk");
        PackageBuilder::new("p", "P", PatchVersion::new(1, 0, 0))
            .write_to_path(&path)
            .unwrap();
        let package = PatchPackage::open(&path).unwrap();
        let err = package.read_resource(&target("x.txt")).unwrap_err();
        assert!(matches!(err, Error::ResourceNotFound { .. }));
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let mut builder = PackageBuilder::new("p", "P", PatchVersion::new(1, 0, 0));
        builder.add_resource(target("a.txt"), Vec::new()).unwrap();
        assert!(matches!(
            builder.remove(target("a.txt")),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_invalid_id_rejected() {
        let mut out: Vec<u8> = Vec::new();
        let err = PackageBuilder::new("../evil", "Evil", PatchVersion::new(1, 0, 0))
            .write_to(&mut out)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.mspk");
        let mut builder = PackageBuilder::new("p", "P", PatchVersion::new(1, 0, 0))
            .compression(Compression::Stored);
        builder
            .add_resource(target("a.txt"), b"payload".to_vec())
            .unwrap();
        builder.write_to_path(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();
        let package = PatchPackage::open(&path).unwrap();
        assert!(matches!(
            package.read_resource(&target("a.txt")),
            Err(Error::DigestMismatch { .. })
        ));

        // Damage inside the metadata block trips the header CRC.
        bytes[30] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();
        assert!(PatchPackage::open(&path).unwrap_err().is_format_error());
    }
}
