//! Workbook package container.
//!
//! A workbook is a ZIP archive of named parts. The whole archive is inflated
//! into memory on open; stages mutate entries in place and the package is
//! written back once, in entry order.

use slimmer_core::{EntryRole, Error, Result, CONTENT_TYPES_PART};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// A single named part of a workbook package.
#[derive(Debug, Clone)]
pub struct PackageEntry {
    path: String,
    data: Vec<u8>,
    compressed: bool,
    modified: Option<DateTime>,
}

impl PackageEntry {
    fn new(path: String, data: Vec<u8>, compressed: bool) -> Self {
        Self {
            path,
            data,
            compressed,
            modified: None,
        }
    }

    /// Slash-separated virtual path.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the entry is written Deflated (otherwise Stored).
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn role(&self) -> EntryRole {
        EntryRole::classify(&self.path)
    }

    fn is_dir(&self) -> bool {
        self.path.ends_with('/')
    }
}

/// Normalize a part name: no leading `/`, forward slashes only.
pub fn normalize_part_name(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

/// An in-memory workbook package.
#[derive(Debug, Clone, Default)]
pub struct WorkbookPackage {
    entries: Vec<PackageEntry>,
}

impl WorkbookPackage {
    /// Open a workbook package from disk.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Open a workbook package from bytes already in memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_reader(Cursor::new(bytes))
    }

    /// Open a workbook package from a reader.
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)
            .map_err(|e| Error::InvalidPackage(format!("Failed to open ZIP: {}", e)))?;

        let mut entries = Vec::with_capacity(archive.len());
        let mut seen = HashSet::new();

        for index in 0..archive.len() {
            let mut file = archive
                .by_index(index)
                .map_err(|e| {
                    Error::InvalidPackage(format!("Failed to read entry {}: {}", index, e))
                })?;

            let path = normalize_part_name(file.name());
            if !seen.insert(path.to_ascii_lowercase()) {
                return Err(Error::InvalidPackage(format!("Duplicate entry '{}'", path)));
            }

            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .map_err(|e| {
                    Error::InvalidPackage(format!("Failed to inflate '{}': {}", path, e))
                })?;

            let compressed = file.compression() != CompressionMethod::Stored;
            let mut entry = PackageEntry::new(path, data, compressed);
            entry.modified = Some(file.last_modified());
            entries.push(entry);
        }

        let package = Self { entries };
        if !package.contains(CONTENT_TYPES_PART) {
            return Err(Error::InvalidPackage(format!(
                "Missing {}",
                CONTENT_TYPES_PART
            )));
        }

        log::debug!("Opened package with {} entries", package.entries.len());
        Ok(package)
    }

    fn position(&self, path: &str) -> Option<usize> {
        let path = normalize_part_name(path);
        self.entries
            .iter()
            .position(|e| e.path.eq_ignore_ascii_case(&path))
    }

    /// Whether an entry exists (part names compare case-insensitively).
    pub fn contains(&self, path: &str) -> bool {
        self.position(path).is_some()
    }

    /// Get an entry by path.
    pub fn entry(&self, path: &str) -> Option<&PackageEntry> {
        self.position(path).map(|i| &self.entries[i])
    }

    /// All entry paths in archive order.
    pub fn paths(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.path.clone()).collect()
    }

    /// Paths of entries with the given role.
    pub fn paths_with_role(&self, role: EntryRole) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.is_dir() && e.role() == role)
            .map(|e| e.path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read an entry's bytes.
    pub fn read_entry(&self, path: &str) -> Result<&[u8]> {
        self.entry(path)
            .map(|e| e.data.as_slice())
            .ok_or_else(|| Error::EntryNotFound(normalize_part_name(path)))
    }

    /// Replace an entry's bytes, or append a new entry.
    pub fn write_entry(&mut self, path: &str, bytes: Vec<u8>, compress: bool) {
        match self.position(path) {
            Some(i) => {
                let entry = &mut self.entries[i];
                entry.data = bytes;
                entry.compressed = compress;
            }
            None => {
                self.entries
                    .push(PackageEntry::new(normalize_part_name(path), bytes, compress));
            }
        }
    }

    /// Replace an entry's bytes, keeping its compression setting.
    pub fn replace_entry(&mut self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let i = self
            .position(path)
            .ok_or_else(|| Error::EntryNotFound(normalize_part_name(path)))?;
        self.entries[i].data = bytes;
        Ok(())
    }

    /// Remove an entry. Returns whether anything was removed.
    pub fn remove_entry(&mut self, path: &str) -> bool {
        match self.position(path) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    /// Rename an entry in place, keeping its position in the archive.
    pub fn rename_entry(&mut self, from: &str, to: &str) -> Result<()> {
        let i = self
            .position(from)
            .ok_or_else(|| Error::EntryNotFound(normalize_part_name(from)))?;
        if let Some(j) = self.position(to) {
            if j != i {
                return Err(Error::InvalidPackage(format!(
                    "Cannot rename '{}': '{}' already exists",
                    from, to
                )));
            }
        }
        self.entries[i].path = normalize_part_name(to);
        Ok(())
    }

    /// Write the package as a ZIP archive.
    pub fn write_to<W: Write + Seek>(&self, writer: W) -> Result<W> {
        if !self.contains(CONTENT_TYPES_PART) {
            return Err(Error::InvalidPackage(format!(
                "Refusing to write a package without {}",
                CONTENT_TYPES_PART
            )));
        }

        let mut zip = ZipWriter::new(writer);
        for entry in &self.entries {
            let method = if entry.compressed {
                CompressionMethod::Deflated
            } else {
                CompressionMethod::Stored
            };
            // Entries created in memory carry the DOS epoch.
            let options = FileOptions::default()
                .compression_method(method)
                .last_modified_time(entry.modified.unwrap_or_default());

            if entry.is_dir() {
                zip.add_directory(entry.path.as_str(), options)
                    .map_err(|e| Error::Zip(format!("Failed to add '{}': {}", entry.path, e)))?;
                continue;
            }

            zip.start_file(entry.path.as_str(), options)
                .map_err(|e| Error::Zip(format!("Failed to start '{}': {}", entry.path, e)))?;
            zip.write_all(&entry.data)?;
        }

        zip.finish()
            .map_err(|e| Error::Zip(format!("Failed to finish archive: {}", e)))
    }

    /// Serialize the package into a byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.write_to(Cursor::new(Vec::new()))?.into_inner())
    }

    /// Serialize the package to a file.
    ///
    /// A failed write leaves `out_path` in an undefined state; write to a
    /// temporary path and rename on success.
    pub fn serialize(&self, out_path: &Path) -> Result<()> {
        let file = File::create(out_path)?;
        let mut writer = self.write_to(BufWriter::new(file))?;
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }
}
