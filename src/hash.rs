//! SHA-512 digest recipes for index records and the archive itself.
//!
//! Both recipes hash metadata plus a small sample of content, not the whole
//! payload. A per-entry digest covers the fixed name slot, the sizes and only
//! the first 8 bytes of the file; the whole-index digest covers the archive's
//! own file name and its two size totals. They detect layout corruption and
//! renames cheaply, and do not authenticate file content.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use rayon::prelude::*;
use sha2::{Digest, Sha512};

use crate::error::VfsError;
use crate::index::{VfsArchive, DIGEST_LEN, ENTRY_LEN, NAME_LEN};
use crate::logging::LogSink;

/// How many leading payload bytes an entry digest samples.
pub const CONTENT_PREFIX_LEN: usize = 8;

/// Digest of one index record: the padded name slot, the file size, the
/// record stride and the first [`CONTENT_PREFIX_LEN`] bytes of the file
/// (fewer if the file is shorter).
pub fn entry_digest(
    name: &[u8; NAME_LEN],
    size: u64,
    source: &Path,
) -> Result<[u8; DIGEST_LEN], VfsError> {
    let mut hasher = Sha512::new();
    hasher.update(name);
    hasher.update(size.to_le_bytes());
    hasher.update(ENTRY_LEN.to_le_bytes());

    let mut prefix = [0u8; CONTENT_PREFIX_LEN];
    let sampled = read_content_prefix(source, &mut prefix)?;
    hasher.update(&prefix[..sampled]);

    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&hasher.finalize());
    Ok(digest)
}

/// Digest of the archive as a whole: the destination's file name component
/// (not its directory), the payload total and the final file size.
///
/// Hashing only the name component means the digest still verifies after the
/// archive is moved to another directory; renaming the file breaks it.
pub fn index_digest(
    destination: &Path,
    payload_bytes: u64,
    total_file_size: u64,
) -> [u8; DIGEST_LEN] {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut hasher = Sha512::new();
    hasher.update(name.as_bytes());
    hasher.update(payload_bytes.to_le_bytes());
    hasher.update(total_file_size.to_le_bytes());

    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Fills in every entry digest and the whole-index digest.
///
/// Entry digests fan out across the current rayon pool; the index digest is
/// computed alongside them. The first source file that fails to open or read
/// aborts the whole stage.
pub fn compute_digests(archive: &mut VfsArchive, sink: &LogSink) -> Result<(), VfsError> {
    let payload = archive.index.payload_bytes()?;
    let total = archive.total_file_size()?;
    let destination = archive.destination.clone();

    let (entry_result, whole) = rayon::join(
        || {
            archive
                .index
                .entries_mut()
                .par_iter_mut()
                .try_for_each(|entry| -> Result<(), VfsError> {
                    entry.digest = entry_digest(&entry.name, entry.size, &entry.source)?;
                    sink.log_from_worker(&format!(
                        "hashed '{}' -> {}",
                        entry.name_lossy(),
                        hex_digest(&entry.digest[..8])
                    ));
                    Ok(())
                })
        },
        || index_digest(&destination, payload, total),
    );
    entry_result?;

    archive.index.set_index_digest(whole);
    Ok(())
}

/// Lowercase hex rendering of a digest (or any byte slice).
pub fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn read_content_prefix(path: &Path, buf: &mut [u8]) -> Result<usize, VfsError> {
    let mut file = File::open(path).map_err(|e| VfsError::source_read(path, e))?;
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(VfsError::source_read(path, e)),
        }
    }
    Ok(filled)
}
