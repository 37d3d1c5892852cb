//! Zip extraction into a job's scratch directory.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{IngestError, IngestResult};

/// Extract `archive` into `dest`, returning the number of files written.
///
/// Entries whose path would escape `dest` (absolute, `..`) abort the whole
/// extraction with [`IngestError::UnsafeEntry`].
pub async fn unpack_zip(archive: &Path, dest: &Path) -> IngestResult<usize> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || unpack_zip_blocking(&archive, &dest))
        .await
        .map_err(|e| IngestError::Unpack(format!("unpack task failed: {}", e)))?
}

fn unpack_zip_blocking(archive: &Path, dest: &Path) -> IngestResult<usize> {
    let file = File::open(archive)
        .map_err(|e| IngestError::Unpack(format!("{}: {}", archive.display(), e)))?;
    let mut zip = zip::ZipArchive::new(file)?;
    std::fs::create_dir_all(dest)?;

    // Validate every name before writing anything.
    let mut targets: Vec<(usize, PathBuf, bool)> = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        let rel = entry
            .enclosed_name()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| IngestError::UnsafeEntry(entry.name().to_string()))?;
        targets.push((i, dest.join(rel), entry.is_dir()));
    }

    let mut written = 0;
    for (i, target, is_dir) in targets {
        if is_dir {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut entry = zip.by_index(i)?;
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        written += 1;
    }
    debug!(event = "ingest.unpacked", files = written, dest = %dest.display());
    Ok(written)
}
