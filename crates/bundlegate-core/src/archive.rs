//! Deterministic `.tar.gz` snapshots of bundle directories.
//!
//! Entries are walked in sorted order with zeroed mtimes and owners, so the
//! same tree always produces the same archive bytes (and digest).

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{EntryType, Header};
use tracing::debug;

fn archive_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn write_tree<W: Write>(root: &Path, sink: W) -> io::Result<W> {
    let mut builder = tar::Builder::new(sink);
    builder.follow_symlinks(false);

    for entry in walkdir::WalkDir::new(root).sort_by(|a, b| a.path().cmp(b.path())) {
        let entry = entry.map_err(io::Error::other)?;
        let path = entry.path();
        if path == root {
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let name = archive_name(rel);
        let file_type = entry.file_type();

        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, &name, io::empty())?;
        } else if file_type.is_file() {
            let metadata = entry.metadata().map_err(io::Error::other)?;
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(metadata.len());
            builder.append_data(&mut header, &name, File::open(path)?)?;
        } else {
            debug!(path = %path.display(), "skipping non-regular entry during archive");
        }
    }
    builder.into_inner()
}

/// Gzip-compressed tar of everything under `root`, in memory.
pub fn tar_gz_bytes(root: &Path) -> io::Result<Vec<u8>> {
    let encoder = write_tree(root, GzEncoder::new(Vec::new(), Compression::default()))?;
    encoder.finish()
}

/// Write a gzip-compressed tar of `root` to `dest`.
pub fn write_tar_gz(root: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = BufWriter::new(File::create(dest)?);
    let encoder = write_tree(root, GzEncoder::new(file, Compression::default()))?;
    encoder.finish()?.flush()
}
