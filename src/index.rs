//! # The VFS Container Format
//!
//! This module defines the in-memory index of a `.vfs` archive and the exact
//! arithmetic of its on-disk layout.
//!
//! ## Format Specification
//!
//! A container is a single file with two regions, index first, payload second:
//!
//! 1.  **Index header** (80 bytes):
//!     - `entry_count: u64`: The number of file records that follow.
//!     - `table_byte_size: u64`: The size of the whole index region,
//!       header included: `80 + 272 * entry_count`. The payload region
//!       begins at exactly this offset.
//!     - `index_digest: [u8; 64]`: SHA-512 over the archive's own file name
//!       and its size totals (see the `hash` module).
//! 2.  **File records** (272 bytes each, one per file):
//!     - `offset: u64`: Absolute byte offset of this file's data.
//!     - `size: u64`: The file's length in bytes.
//!     - `name: [u8; 256]`: The path relative to the packed base directory,
//!       NUL-padded to the full slot.
//! 3.  **Payload**: The raw bytes of every file, back to back, in record
//!     order. No compression, no framing, no trailing metadata.
//!
//! All integers are little-endian. There are no magic bytes; a reader
//! recognizes the format by checking that the stored `table_byte_size`
//! matches the value derived from `entry_count`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::VfsError;

/// Width of the fixed name slot in a file record.
pub const NAME_LEN: usize = 256;
/// Width of a SHA-512 digest.
pub const DIGEST_LEN: usize = 64;
/// Index header size: entry count, table size, index digest.
pub const HEADER_LEN: u64 = 8 + 8 + DIGEST_LEN as u64;
/// On-disk size of one file record: offset, size, name slot.
pub const ENTRY_LEN: u64 = 8 + 8 + NAME_LEN as u64;

/// One file's record within the index.
#[derive(Clone, Debug)]
pub struct FileEntry {
    /// Byte offset of this file's data. Relative to the start of the payload
    /// region while the index is under construction, absolute within the
    /// archive after [`VfsIndex::fix_up_offsets`].
    pub offset: u64,
    /// Source file length, captured at index build time. The copy pass
    /// transfers exactly this many bytes even if the file grows later.
    pub size: u64,
    /// The on-disk name: path relative to the packed base, NUL-padded.
    pub name: [u8; NAME_LEN],
    /// SHA-512 of this entry's hash recipe. Kept in memory and logged, never
    /// serialized into the record.
    pub digest: [u8; DIGEST_LEN],
    /// Absolute path the payload bytes are read from. Never serialized.
    pub source: PathBuf,
}

impl FileEntry {
    /// The name with its NUL/space padding stripped, lossily decoded for
    /// display.
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(trim_name(&self.name)).into_owned()
    }
}

/// Strips the trailing NUL/space padding from a fixed-width name slot.
pub fn trim_name(padded: &[u8]) -> &[u8] {
    let end = padded
        .iter()
        .rposition(|&b| b != 0 && b != b' ')
        .map_or(0, |i| i + 1);
    &padded[..end]
}

/// Encodes a relative path into the fixed name slot.
///
/// On Windows the separators are normalized to `/` so an archive packed there
/// still unpacks elsewhere. Paths longer than the slot are a hard error; the
/// record format has no room for an escape hatch.
pub fn encode_name(relative: &Path) -> Result<[u8; NAME_LEN], VfsError> {
    let text = relative.to_string_lossy();
    #[cfg(windows)]
    let text = text.replace('\\', "/");
    let bytes = text.as_bytes();
    if bytes.len() > NAME_LEN {
        return Err(VfsError::NameOverflow {
            path: relative.to_path_buf(),
            len: bytes.len(),
        });
    }
    let mut buf = [0u8; NAME_LEN];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

/// The full index of an archive under construction.
///
/// Built once from the scan result, then carried through hashing, offset
/// fix-up and the write passes. Sizes are captured here and nowhere else, so
/// every later stage derives its layout from the same numbers.
#[derive(Debug)]
pub struct VfsIndex {
    entries: Vec<FileEntry>,
    index_digest: [u8; DIGEST_LEN],
    fixed_up: bool,
}

impl VfsIndex {
    /// Builds the index for `files` as discovered under `base`: one record
    /// per file in scan order, with offsets assigned relative to the start
    /// of the payload region.
    pub fn build(base: &Path, files: Vec<PathBuf>) -> Result<Self, VfsError> {
        let mut entries = Vec::with_capacity(files.len());
        let mut running: u64 = 0;
        for path in files {
            let meta = fs::metadata(&path).map_err(|e| VfsError::source_read(&path, e))?;
            let relative = path.strip_prefix(base).unwrap_or(path.as_path());
            let name = encode_name(relative)?;
            let size = meta.len();
            entries.push(FileEntry {
                offset: running,
                size,
                name,
                digest: [0; DIGEST_LEN],
                source: path,
            });
            running = running
                .checked_add(size)
                .ok_or_else(|| VfsError::Layout("total payload length overflows u64".into()))?;
        }
        Ok(Self {
            entries,
            index_digest: [0; DIGEST_LEN],
            fixed_up: false,
        })
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [FileEntry] {
        &mut self.entries
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Size of the serialized index region, header included. This is also the
    /// absolute offset where the payload region begins.
    pub fn table_byte_size(&self) -> Result<u64, VfsError> {
        self.entry_count()
            .checked_mul(ENTRY_LEN)
            .and_then(|v| v.checked_add(HEADER_LEN))
            .ok_or_else(|| VfsError::Layout("index table size overflows u64".into()))
    }

    /// Sum of every entry's size: the length of the payload region.
    pub fn payload_bytes(&self) -> Result<u64, VfsError> {
        self.entries
            .iter()
            .try_fold(0u64, |acc, e| acc.checked_add(e.size))
            .ok_or_else(|| VfsError::Layout("total payload length overflows u64".into()))
    }

    pub fn index_digest(&self) -> &[u8; DIGEST_LEN] {
        &self.index_digest
    }

    pub(crate) fn set_index_digest(&mut self, digest: [u8; DIGEST_LEN]) {
        self.index_digest = digest;
    }

    /// True once [`fix_up_offsets`](Self::fix_up_offsets) has run and every
    /// offset is absolute.
    pub fn is_fixed_up(&self) -> bool {
        self.fixed_up
    }

    /// Converts every offset from payload-relative to absolute by adding the
    /// table's on-disk size. Must run exactly once, after the entry list is
    /// frozen and before either write pass starts; a second call is rejected
    /// because it would silently shift every file.
    pub fn fix_up_offsets(&mut self) -> Result<(), VfsError> {
        if self.fixed_up {
            return Err(VfsError::Layout("offset fix-up ran twice".into()));
        }
        let base = self.table_byte_size()?;
        for entry in &mut self.entries {
            entry.offset = entry.offset.checked_add(base).ok_or_else(|| {
                VfsError::Layout(format!("offset fix-up overflows for '{}'", entry.name_lossy()))
            })?;
        }
        self.fixed_up = true;
        Ok(())
    }
}

/// The top-level packing job: destination path plus the owned index.
#[derive(Debug)]
pub struct VfsArchive {
    pub destination: PathBuf,
    pub index: VfsIndex,
}

impl VfsArchive {
    pub fn new(destination: PathBuf, index: VfsIndex) -> Self {
        Self { destination, index }
    }

    /// The exact length the destination file is preallocated to: index table
    /// plus payload.
    pub fn total_file_size(&self) -> Result<u64, VfsError> {
        let table = self.index.table_byte_size()?;
        let payload = self.index.payload_bytes()?;
        table
            .checked_add(payload)
            .ok_or_else(|| VfsError::Layout("archive size overflows u64".into()))
    }
}
