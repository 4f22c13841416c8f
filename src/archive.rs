//! Packing a user's cache directory into a single gzip-compressed tar blob.
//!
//! The archive holds `<username>/<entry file>` paths so that unpacking into a
//! cache root recreates the user's directory in place.

use std::fs::{self, File};
use std::io::Write as _;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Header;
use tracing::debug;

use crate::config::atomic_write;
use crate::error::VaultError;

fn archive_err(err: std::io::Error) -> VaultError {
    VaultError::Archive(err.to_string())
}

/// Archives every regular file directly under `root/username`.
pub fn pack_dir(root: &Path, username: &str) -> crate::Result<Vec<u8>> {
    let dir = root.join(username);
    let mut files: Vec<_> = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    files.sort();

    let mut builder = tar::Builder::new(Vec::new());
    let mut dir_header = Header::new_gnu();
    dir_header.set_entry_type(tar::EntryType::Directory);
    dir_header.set_mode(0o755);
    dir_header.set_size(0);
    dir_header.set_mtime(0);
    builder
        .append_data(&mut dir_header, username, std::io::empty())
        .map_err(archive_err)?;

    for path in &files {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let file = File::open(path)?;
        let mut header = Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(file.metadata()?.len());
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        builder
            .append_data(&mut header, format!("{}/{}", username, name), file)
            .map_err(archive_err)?;
    }
    builder.finish().map_err(archive_err)?;
    let tar_bytes = builder.into_inner().map_err(archive_err)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).map_err(archive_err)?;
    let packed = encoder.finish().map_err(archive_err)?;
    debug!(files = files.len(), bytes = packed.len(), "packed archive");
    Ok(packed)
}

/// Packs `root/username` into `archive_path` and returns the bytes.
pub fn write_archive(root: &Path, username: &str, archive_path: &Path) -> crate::Result<Vec<u8>> {
    let packed = pack_dir(root, username)?;
    atomic_write(archive_path, &packed)?;
    Ok(packed)
}

/// Unpacks an archive into `dest`, overwriting files with the same path.
pub fn unpack(bytes: &[u8], dest: &Path) -> crate::Result<()> {
    fs::create_dir_all(dest)?;
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    archive.unpack(dest).map_err(archive_err)?;
    Ok(())
}

/// Unpacks `archive_path` into `dest` when the file exists.
pub fn unpack_file(archive_path: &Path, dest: &Path) -> crate::Result<bool> {
    if !archive_path.exists() {
        return Ok(false);
    }
    let bytes = fs::read(archive_path)?;
    unpack(&bytes, dest)?;
    Ok(true)
}
