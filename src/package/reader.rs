//! Reading patch packages.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::format::{Manifest, PackageHeader, ResourceEntry};
use super::metadata::{PackageMetadata, PatchVersion, validate_id};
use crate::{Error, Result, Target};

/// What a package does to one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageChange<'a> {
    /// Install the resource's bytes.
    Add(&'a ResourceEntry),
    /// Delete the target.
    Remove,
}

/// An opened, immutable patch package.
///
/// Opening reads the header, metadata and manifest; resource bytes are
/// read on demand by [`read_resource`](Self::read_resource).
///
/// # Example
///
/// ```rust,no_run
/// use modstack::PatchPackage;
///
/// let package = PatchPackage::open("hires.mspk")?;
/// let meta = package.metadata();
/// println!("{} {} ({} resources)", meta.name, meta.version, package.resources().len());
/// for entry in &meta.changelog {
///     println!("  {}: {}", entry.version, entry.description);
/// }
/// # Ok::<(), modstack::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct PatchPackage {
    path: PathBuf,
    metadata: PackageMetadata,
    manifest: Manifest,
    payload_start: u64,
}

impl PatchPackage {
    /// Opens a package file and validates its header and manifest.
    ///
    /// Fails with [`Error::UnsupportedFormatVersion`] for packages written
    /// by a newer format version and with a format error for any structural
    /// damage. Never returns a partially loaded package.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let header = PackageHeader::read(&mut reader)?;
        let payload_start = header.payload_start();
        if payload_start > file_len {
            return Err(Error::corrupt_header(
                8,
                format!(
                    "header blocks end at {} but the file has {} bytes",
                    payload_start, file_len
                ),
            ));
        }

        let mut metadata_bytes = vec![0u8; header.metadata_len as usize];
        reader.read_exact(&mut metadata_bytes)?;
        let mut manifest_bytes = vec![0u8; header.manifest_len as usize];
        reader.read_exact(&mut manifest_bytes)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&metadata_bytes);
        hasher.update(&manifest_bytes);
        let crc = hasher.finalize();
        if crc != header.crc {
            return Err(Error::corrupt_header(
                16,
                format!(
                    "header CRC mismatch: expected {:#x}, got {:#x}",
                    header.crc, crc
                ),
            ));
        }

        let metadata: PackageMetadata = serde_json::from_slice(&metadata_bytes)?;
        validate_id(&metadata.id)
            .map_err(|_| Error::InvalidFormat(format!("invalid patch id '{}'", metadata.id)))?;
        let manifest = Manifest::decode(&manifest_bytes)?;

        let payload_len = file_len - payload_start;
        for entry in &manifest.resources {
            let in_bounds = entry
                .offset
                .checked_add(entry.packed_size)
                .is_some_and(|end| end <= payload_len);
            if !in_bounds {
                return Err(Error::corrupt_header(
                    payload_start + entry.offset,
                    format!("payload of '{}' lies outside the file", entry.target),
                ));
            }
        }

        log::debug!(
            "opened package {} {} ({} added, {} removed)",
            metadata.id,
            metadata.version,
            manifest.resources.len(),
            manifest.removed.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            metadata,
            manifest,
            payload_start,
        })
    }

    /// Returns the file the package was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the package metadata.
    pub fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    /// Returns the patch id.
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// Returns the package version.
    pub fn version(&self) -> PatchVersion {
        self.metadata.version
    }

    /// Returns the added resources in payload order.
    pub fn resources(&self) -> &[ResourceEntry] {
        &self.manifest.resources
    }

    /// Returns the targets the package deletes.
    pub fn removed(&self) -> &[Target] {
        &self.manifest.removed
    }

    /// Looks up an added resource.
    pub fn resource(&self, target: &Target) -> Option<&ResourceEntry> {
        self.manifest.resources.iter().find(|e| &e.target == target)
    }

    /// Iterates over every target the package touches.
    pub fn changes(&self) -> impl Iterator<Item = (&Target, PackageChange<'_>)> {
        self.manifest
            .resources
            .iter()
            .map(|e| (&e.target, PackageChange::Add(e)))
            .chain(self.manifest.removed.iter().map(|t| (t, PackageChange::Remove)))
    }

    /// Extracts and verifies one resource.
    ///
    /// Fails with [`Error::ResourceNotFound`] if the package does not add
    /// `target` and with [`Error::DigestMismatch`] if the stored bytes are
    /// damaged.
    pub fn read_resource(&self, target: &Target) -> Result<Vec<u8>> {
        let entry = self.resource(target).ok_or_else(|| Error::ResourceNotFound {
            path: target.to_string(),
        })?;
        let mut file = File::open(&self.path)?;
        self.read_entry(&mut file, entry)
    }

    fn read_entry(&self, file: &mut File, entry: &ResourceEntry) -> Result<Vec<u8>> {
        file.seek(SeekFrom::Start(self.payload_start + entry.offset))?;
        let mut packed = vec![0u8; entry.packed_size as usize];
        file.read_exact(&mut packed)?;
        let data = entry.compression.decompress(&packed, entry.size)?;
        entry.digest.verify(&entry.target.to_string(), &data)?;
        Ok(data)
    }

    /// Reads every resource and checks its digest.
    pub fn verify_payload(&self) -> Result<()> {
        let mut file = File::open(&self.path)?;
        for entry in &self.manifest.resources {
            self.read_entry(&mut file, entry)?;
        }
        Ok(())
    }
}
