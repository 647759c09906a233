//! Reading archives back: listing and unpacking.
//!
//! Readers here consume only the on-disk layout: the header, the record
//! table and the payload offsets. They share no state with the packer, so
//! they double as an independent check that what the write passes produced
//! actually parses.

use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use crate::error::VfsError;
use crate::hash;
use crate::index::{trim_name, DIGEST_LEN, ENTRY_LEN, HEADER_LEN, NAME_LEN};
use crate::logging::LogSink;

/// One parsed record, with the name padding already stripped.
#[derive(Clone, Debug)]
pub struct RawEntry {
    pub offset: u64,
    pub size: u64,
    pub name: Vec<u8>,
}

impl RawEntry {
    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

/// A validated archive with its whole record table parsed into memory.
#[derive(Debug)]
pub struct VfsReader {
    file: File,
    path: PathBuf,
    file_len: u64,
    pub entry_count: u64,
    pub table_byte_size: u64,
    pub index_digest: [u8; DIGEST_LEN],
    pub entries: Vec<RawEntry>,
}

impl VfsReader {
    /// Opens `path` and parses the full index, validating as it goes.
    ///
    /// The format has no magic bytes; the recognition check is that the
    /// stored table size matches the one derived from the entry count. Any
    /// record whose payload range escapes the file is rejected here rather
    /// than when it is first read.
    pub fn open(path: &Path) -> Result<Self, VfsError> {
        let mut file = File::open(path).map_err(|e| VfsError::io(path, e))?;
        let file_len = file.metadata().map_err(|e| VfsError::io(path, e))?.len();

        // 1. The fixed header.
        if file_len < HEADER_LEN {
            return Err(VfsError::Format {
                path: path.to_path_buf(),
                reason: format!("file is {file_len} bytes, shorter than the {HEADER_LEN}-byte header"),
            });
        }
        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header).map_err(|e| VfsError::io(path, e))?;
        let entry_count = u64::from_le_bytes(header[0..8].try_into().unwrap());
        let table_byte_size = u64::from_le_bytes(header[8..16].try_into().unwrap());
        let mut index_digest = [0u8; DIGEST_LEN];
        index_digest.copy_from_slice(&header[16..16 + DIGEST_LEN]);

        // 2. The table-size identity, which stands in for magic bytes.
        let derived = entry_count
            .checked_mul(ENTRY_LEN)
            .and_then(|v| v.checked_add(HEADER_LEN))
            .ok_or_else(|| VfsError::Format {
                path: path.to_path_buf(),
                reason: format!("entry count {entry_count} overflows the table size"),
            })?;
        if table_byte_size != derived {
            return Err(VfsError::Format {
                path: path.to_path_buf(),
                reason: format!(
                    "stored table size {table_byte_size} does not match {derived} derived from {entry_count} entries"
                ),
            });
        }
        if file_len < table_byte_size {
            return Err(VfsError::Format {
                path: path.to_path_buf(),
                reason: format!("table needs {table_byte_size} bytes but the file has {file_len}"),
            });
        }

        // 3. Every record, bounds-checked against the payload region.
        let mut entries = Vec::with_capacity(entry_count.min(1 << 20) as usize);
        let mut record = [0u8; ENTRY_LEN as usize];
        for i in 0..entry_count {
            file.read_exact(&mut record).map_err(|e| VfsError::io(path, e))?;
            let offset = u64::from_le_bytes(record[0..8].try_into().unwrap());
            let size = u64::from_le_bytes(record[8..16].try_into().unwrap());
            let name = trim_name(&record[16..16 + NAME_LEN]).to_vec();

            let end = offset.checked_add(size).ok_or_else(|| VfsError::Format {
                path: path.to_path_buf(),
                reason: format!("record {i} has an overflowing payload range"),
            })?;
            if offset < table_byte_size || end > file_len {
                return Err(VfsError::Format {
                    path: path.to_path_buf(),
                    reason: format!(
                        "record {i} ('{}') spans [{offset}, {end}) outside the payload region",
                        String::from_utf8_lossy(&name)
                    ),
                });
            }
            entries.push(RawEntry { offset, size, name });
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            file_len,
            entry_count,
            table_byte_size,
            index_digest,
            entries,
        })
    }

    /// Recomputes the whole-index digest from this file's name and sizes and
    /// compares it against the stored one. A mismatch usually means the
    /// archive was renamed after packing or its header was altered.
    pub fn index_digest_matches(&self) -> bool {
        let payload: u64 = self.entries.iter().map(|e| e.size).sum();
        hash::index_digest(&self.path, payload, self.file_len) == self.index_digest
    }

    /// Streams one entry's payload into `out`.
    pub fn copy_entry(&mut self, entry: &RawEntry, out: &mut impl Write) -> Result<(), VfsError> {
        self.file
            .seek(SeekFrom::Start(entry.offset))
            .map_err(|e| VfsError::io(&self.path, e))?;
        let mut chunk = [0u8; 1 << 16];
        let mut remaining = entry.size;
        while remaining > 0 {
            let want = remaining.min(chunk.len() as u64) as usize;
            let got = match self.file.read(&mut chunk[..want]) {
                Ok(0) => {
                    return Err(VfsError::Format {
                        path: self.path.clone(),
                        reason: format!("payload for '{}' is truncated", entry.name_lossy()),
                    })
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(VfsError::io(&self.path, e)),
            };
            out.write_all(&chunk[..got])
                .map_err(|e| VfsError::io(&self.path, e))?;
            remaining -= got as u64;
        }
        Ok(())
    }
}

/// Lists the contents of an archive through the sink.
pub fn list_archive(archive: &Path, sink: &LogSink) -> Result<(), VfsError> {
    let reader = VfsReader::open(archive)?;

    sink.log(&format!(
        "Archive '{}': {} entries, table {} bytes, {} bytes total",
        archive.display(),
        reader.entry_count,
        reader.table_byte_size,
        reader.file_len
    ));
    for entry in &reader.entries {
        sink.log(&format!(
            "- offset:'{}'; size:'{}'; name:'{}'",
            entry.offset,
            entry.size,
            entry.name_lossy()
        ));
    }
    let verdict = if reader.index_digest_matches() {
        "verified".to_string()
    } else {
        "MISMATCH (file renamed or header altered)".to_string()
    };
    sink.log(&format!(
        "index digest {}: {}",
        hash::hex_digest(&reader.index_digest[..8]),
        verdict
    ));
    Ok(())
}

/// Recreates every packed file under `out_dir`, returning how many files
/// were written.
pub fn unpack_archive(archive: &Path, out_dir: &Path, sink: &LogSink) -> Result<usize, VfsError> {
    let mut reader = VfsReader::open(archive)?;
    fs::create_dir_all(out_dir).map_err(|e| VfsError::io(out_dir, e))?;

    let entries = reader.entries.clone();
    let mut written = 0usize;
    for entry in &entries {
        let relative = safe_entry_path(&entry.name).ok_or_else(|| VfsError::Format {
            path: archive.to_path_buf(),
            reason: format!("entry name '{}' is not a safe relative path", entry.name_lossy()),
        })?;
        let target = out_dir.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| VfsError::io(parent, e))?;
        }

        let file = File::create(&target).map_err(|e| VfsError::io(&target, e))?;
        let mut out = BufWriter::new(file);
        reader.copy_entry(entry, &mut out)?;
        out.flush().map_err(|e| VfsError::io(&target, e))?;

        sink.log(&format!("unpacked '{}' ({} bytes)", entry.name_lossy(), entry.size));
        written += 1;
    }
    Ok(written)
}

/// Rebuilds an entry name as a relative path, refusing anything that could
/// land outside the output directory: absolute paths, drive prefixes and
/// parent-directory components.
fn safe_entry_path(name: &[u8]) -> Option<PathBuf> {
    let text = String::from_utf8_lossy(name);
    let mut out = PathBuf::new();
    for part in Path::new(text.as_ref()).components() {
        match part {
            Component::Normal(c) => out.push(c),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}
