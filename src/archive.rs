// src/archive.rs

//! Deterministic source archives
//!
//! Sdist archives must be reproducible: packaging the same directory tree
//! with the same file contents twice yields byte-identical output, no
//! matter what filesystem metadata (timestamps, permission bits, owners)
//! the tree happens to carry. Entries are therefore written in sorted
//! order with normalized modes, zeroed timestamps and no ownership.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use walkdir::WalkDir;

/// Create a deterministic `.tar.gz` of `source_dir` at `dest`.
///
/// All paths inside the archive are placed under `root_prefix`, the
/// conventional `{name}-{version}` top-level directory of an sdist.
pub fn create_deterministic_archive(
    source_dir: &Path,
    dest: &Path,
    root_prefix: &str,
) -> Result<()> {
    let file = File::create(dest)?;
    // flate2 writes a zero mtime gzip header, keeping the outer layer
    // reproducible as well
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);

    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(source_dir).min_depth(1) {
        let entry = entry.map_err(|e| Error::Other(format!("walking source tree: {e}")))?;
        entries.push(entry.path().to_path_buf());
    }
    entries.sort();

    for path in entries {
        let relative = path
            .strip_prefix(source_dir)
            .map_err(|e| Error::Other(format!("path outside source tree: {e}")))?;
        let archived = Path::new(root_prefix).join(relative);
        let metadata = std::fs::symlink_metadata(&path)?;

        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if metadata.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, &archived, std::io::empty())?;
        } else if metadata.file_type().is_symlink() {
            let target = std::fs::read_link(&path)?;
            header.set_entry_type(EntryType::Symlink);
            header.set_mode(0o777);
            header.set_size(0);
            builder.append_link(&mut header, &archived, &target)?;
        } else {
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(metadata.len());
            let reader = File::open(&path)?;
            builder.append_data(&mut header, &archived, reader)?;
        }
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?.into_inner().map_err(|e| {
        Error::Other(format!("flushing archive: {}", e.into_error()))
    })?;
    Ok(())
}

/// Extract a `.tar.gz`/`.tgz`/`.tar` archive into `dest`
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let filename = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    std::fs::create_dir_all(dest)?;
    let file = File::open(archive)?;

    if filename.ends_with(".tar.gz") || filename.ends_with(".tgz") {
        Archive::new(GzDecoder::new(file)).unpack(dest)?;
    } else if filename.ends_with(".tar") {
        Archive::new(file).unpack(dest)?;
    } else {
        return Err(Error::Other(format!("unknown archive format: {filename}")));
    }
    Ok(())
}

/// If `dir` contains exactly one subdirectory and nothing else, return
/// it: archives conventionally wrap their content in one top-level dir.
pub fn single_root_dir(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        entries.push(entry?);
    }
    if entries.len() == 1 && entries[0].file_type()?.is_dir() {
        Ok(Some(entries[0].path()))
    } else {
        Ok(None)
    }
}
