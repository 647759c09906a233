//! Two-pass memory-mapped archive writer.
//!
//! The destination is created at its exact final length up front, mapped
//! once, and the mapping is split at the table boundary: pass 1 serializes
//! the index into the head slice while pass 2 streams file payloads into the
//! tail slice. Each pass owns its slice exclusively, so the two threads never
//! touch the same byte and need no locking.

use std::fs::OpenOptions;
use std::io::{self, Read};
use std::thread;

use memmap2::MmapMut;

use crate::error::VfsError;
use crate::index::{FileEntry, VfsArchive, VfsIndex};
use crate::logging::LogSink;

/// Copy granularity for the payload pass.
const COPY_CHUNK_LEN: usize = 1 << 16;

/// A destination file preallocated to its final size and mapped writable.
pub struct ArchiveWriter {
    map: MmapMut,
    table_len: u64,
}

impl ArchiveWriter {
    /// Creates the destination (replacing any existing file), sizes it to the
    /// archive's exact final length, re-stats it to confirm the allocation
    /// took, and maps the whole file writable.
    pub fn allocate(archive: &VfsArchive, sink: &LogSink) -> Result<Self, VfsError> {
        let table_len = archive.index.table_byte_size()?;
        let total_len = archive.total_file_size()?;
        let path = &archive.destination;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| VfsError::io(path, e))?;
        file.set_len(total_len).map_err(|e| VfsError::io(path, e))?;

        let actual = file.metadata().map_err(|e| VfsError::io(path, e))?.len();
        if actual != total_len {
            return Err(VfsError::Allocation {
                path: path.clone(),
                expected: total_len,
                actual,
            });
        }

        // Safety: the file was just created with this handle and is not
        // shared; the mapping stays valid after the handle drops.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| VfsError::io(path, e))?;

        sink.log_from_worker(&format!(
            "created '{}' ({total_len} bytes, table {table_len})",
            path.display()
        ));
        Ok(Self { map, table_len })
    }

    /// Runs pass 1 (index table) and pass 2 (payload) on their own threads
    /// over disjoint halves of the mapping, joins both, then flushes the map
    /// to disk. With no entries there is no payload region and pass 2 is
    /// skipped entirely.
    pub fn write(mut self, archive: &VfsArchive, sink: &LogSink) -> Result<(), VfsError> {
        if !archive.index.is_fixed_up() {
            return Err(VfsError::Layout(
                "write pass started before offset fix-up".into(),
            ));
        }
        let table_len = usize::try_from(self.table_len)
            .map_err(|_| VfsError::Layout("index table exceeds addressable memory".into()))?;
        let payload_base = self.table_len;
        let index = &archive.index;
        let (head, tail) = self.map.split_at_mut(table_len);

        thread::scope(|scope| -> Result<(), VfsError> {
            let table_pass = thread::Builder::new()
                .name("vfs-table".into())
                .spawn_scoped(scope, move || serialize_table(head, index, sink))
                .map_err(|e| VfsError::Other(format!("failed to spawn table pass: {e}")))?;

            let payload_pass = if index.entries().is_empty() {
                None
            } else {
                let handle = thread::Builder::new()
                    .name("vfs-payload".into())
                    .spawn_scoped(scope, move || {
                        stream_payload(tail, index.entries(), payload_base, sink)
                    })
                    .map_err(|e| VfsError::Other(format!("failed to spawn payload pass: {e}")))?;
                Some(handle)
            };

            table_pass
                .join()
                .map_err(|_| VfsError::Other("table pass worker panicked".into()))??;
            if let Some(handle) = payload_pass {
                handle
                    .join()
                    .map_err(|_| VfsError::Other("payload pass worker panicked".into()))??;
            }
            Ok(())
        })?;

        self.map
            .flush()
            .map_err(|e| VfsError::io(&archive.destination, e))?;
        Ok(())
    }
}

/// Pass 1: serializes the header and every record into the table slice.
fn serialize_table(table: &mut [u8], index: &VfsIndex, sink: &LogSink) -> Result<(), VfsError> {
    let table_len = index.table_byte_size()?;
    if table.len() as u64 != table_len {
        return Err(VfsError::Layout(format!(
            "table slice is {} bytes, expected {table_len}",
            table.len()
        )));
    }

    let mut cursor = 0usize;
    put_u64(table, &mut cursor, index.entry_count());
    put_u64(table, &mut cursor, table_len);
    put_bytes(table, &mut cursor, index.index_digest());
    for entry in index.entries() {
        put_u64(table, &mut cursor, entry.offset);
        put_u64(table, &mut cursor, entry.size);
        put_bytes(table, &mut cursor, &entry.name);
        sink.log_from_worker(&format!(
            "VFS table entry: offset:'{}'; size:'{}'; name:'{}'",
            entry.offset,
            entry.size,
            entry.name_lossy()
        ));
    }

    if cursor as u64 != table_len {
        return Err(VfsError::Layout(format!(
            "index serialization wrote {cursor} bytes, expected {table_len}"
        )));
    }
    Ok(())
}

/// Pass 2: streams every source file into the payload slice, in record order.
///
/// Offsets are absolute by now, so each entry's position inside the slice is
/// `offset - payload_base`; the pass checks that these positions line up
/// back-to-back before touching the bytes. A source that ends early is a
/// fatal read error, a source that grew is simply cut at its recorded size.
fn stream_payload(
    payload: &mut [u8],
    entries: &[FileEntry],
    payload_base: u64,
    sink: &LogSink,
) -> Result<(), VfsError> {
    let mut cursor = 0usize;
    let mut chunk = [0u8; COPY_CHUNK_LEN];
    for entry in entries {
        let start = entry.offset.checked_sub(payload_base).ok_or_else(|| {
            VfsError::Layout(format!(
                "entry '{}' offset {} precedes the payload region",
                entry.name_lossy(),
                entry.offset
            ))
        })?;
        if start != cursor as u64 {
            return Err(VfsError::Layout(format!(
                "entry '{}' expected at payload offset {start}, cursor is at {cursor}",
                entry.name_lossy()
            )));
        }

        sink.log_from_worker(&format!(
            "VFS file entry: name:'{}'; size:'{}'",
            entry.name_lossy(),
            entry.size
        ));

        let mut file = std::fs::File::open(&entry.source)
            .map_err(|e| VfsError::source_read(&entry.source, e))?;
        let mut remaining = entry.size;
        while remaining > 0 {
            let want = remaining.min(chunk.len() as u64) as usize;
            let got = match file.read(&mut chunk[..want]) {
                Ok(0) => {
                    return Err(VfsError::source_read(
                        &entry.source,
                        io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "file is shorter than its scanned size",
                        ),
                    ))
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(VfsError::source_read(&entry.source, e)),
            };
            payload[cursor..cursor + got].copy_from_slice(&chunk[..got]);
            cursor += got;
            remaining -= got as u64;
        }
    }

    if cursor != payload.len() {
        return Err(VfsError::Layout(format!(
            "payload pass wrote {cursor} bytes, expected {}",
            payload.len()
        )));
    }
    Ok(())
}

fn put_u64(buf: &mut [u8], cursor: &mut usize, value: u64) {
    buf[*cursor..*cursor + 8].copy_from_slice(&value.to_le_bytes());
    *cursor += 8;
}

fn put_bytes(buf: &mut [u8], cursor: &mut usize, bytes: &[u8]) {
    buf[*cursor..*cursor + bytes.len()].copy_from_slice(bytes);
    *cursor += bytes.len();
}
