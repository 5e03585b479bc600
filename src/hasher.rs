use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Result, VindexError};

/// Bytes hashed from the start of the file, and again from its midpoint for
/// files larger than twice this window.
pub const HASH_WINDOW_BYTES: u64 = 2 * 1024 * 1024;

const READ_BLOCK: usize = 4096;

/// Content fingerprint for a file, stable across moves and renames.
///
/// The digest covers the first window plus a second window starting at the
/// file midpoint (only read when the file is larger than two windows), so
/// multi-gigabyte videos are never read in full. Two distinct files that
/// agree on both windows will collide; see DESIGN.md for the recorded
/// trade-off. A missing or unreadable file is an error, never a partial
/// digest.
pub async fn fingerprint_file(path: &Path) -> Result<String> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint_blocking(&owned))
        .await
        .map_err(|e| VindexError::Io(std::io::Error::new(ErrorKind::Other, e)))?
}

fn fingerprint_blocking(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            VindexError::NotFound(path.display().to_string())
        } else {
            VindexError::Io(e)
        }
    })?;
    let size = file.metadata()?.len();

    let mut hasher = Sha256::new();
    hash_window(&mut file, &mut hasher)?;
    if size > HASH_WINDOW_BYTES * 2 {
        file.seek(SeekFrom::Start(size / 2))?;
        hash_window(&mut file, &mut hasher)?;
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn hash_window(file: &mut File, hasher: &mut Sha256) -> Result<()> {
    let mut block = [0u8; READ_BLOCK];
    let mut read_so_far: u64 = 0;
    while read_so_far < HASH_WINDOW_BYTES {
        let n = file.read(&mut block)?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
        read_so_far += n as u64;
    }
    Ok(())
}
