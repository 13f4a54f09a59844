//! tar + zstd archives for backups and cluster snapshots.
//!
//! These functions block; async callers run them on the blocking pool.

use fleet_core::{Error, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const ZSTD_LEVEL: i32 = 3;

pub const ARCHIVE_EXTENSION: &str = ".tar.zst";

/// A directory to pack under `name` inside the archive.
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Pack `sources` into a zstd-compressed tar at `dest`. Top-level entries
/// whose file name is in `skip` are left out. Missing sources are skipped.
pub fn create_archive(dest: &Path, sources: &[ArchiveSource], skip: &[&str]) -> Result<ArchiveInfo> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = dest.with_extension("partial");
    let writer = BufWriter::new(File::create(&partial)?);

    let mut encoder = zstd::stream::write::Encoder::new(writer, ZSTD_LEVEL)
        .map_err(|e| Error::Internal(format!("Zstd init failed: {}", e)))?;
    {
        let mut builder = tar::Builder::new(&mut encoder);
        builder.follow_symlinks(false);

        for source in sources {
            if !source.path.exists() {
                warn!(path = %source.path.display(), "Archive source missing, skipping");
                continue;
            }
            for entry in fs::read_dir(&source.path)? {
                let entry = entry?;
                let file_name = entry.file_name();
                if skip.iter().any(|s| file_name.to_str() == Some(*s)) {
                    continue;
                }
                let name = Path::new(&source.name).join(&file_name);
                if entry.file_type()?.is_dir() {
                    builder
                        .append_dir_all(&name, entry.path())
                        .map_err(|e| Error::Internal(format!("Failed to pack dir: {}", e)))?;
                } else {
                    builder
                        .append_path_with_name(entry.path(), &name)
                        .map_err(|e| Error::Internal(format!("Failed to pack file: {}", e)))?;
                }
            }
        }

        builder
            .finish()
            .map_err(|e| Error::Internal(format!("Failed to finish tar: {}", e)))?;
    }
    let mut writer = encoder
        .finish()
        .map_err(|e| Error::Internal(format!("Zstd finish failed: {}", e)))?;
    writer.flush()?;
    drop(writer);

    fs::rename(&partial, dest)?;

    let (size_bytes, sha256) = digest_file(dest)?;
    debug!(path = %dest.display(), size_bytes, "Archive written");

    Ok(ArchiveInfo {
        path: dest.to_path_buf(),
        size_bytes,
        sha256,
    })
}

/// Unpack a zstd-compressed tar into `dest`.
pub fn extract_archive(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let reader = BufReader::new(File::open(src)?);
    let decoder = zstd::stream::read::Decoder::new(reader)
        .map_err(|e| Error::Internal(format!("Failed to create decoder: {}", e)))?;
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(dest)
        .map_err(|e| Error::Internal(format!("Failed to unpack archive: {}", e)))?;
    Ok(())
}

/// Archives in `dir` named `<prefix>*.tar.zst`, oldest first.
pub fn list_archives(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(prefix) && name.ends_with(ARCHIVE_EXTENSION) {
            found.push(entry.path());
        }
    }
    // Names embed a sortable UTC timestamp.
    found.sort();
    Ok(found)
}

/// Keep the newest `keep` archives, delete the rest. Returns what was removed.
pub fn prune_archives(dir: &Path, prefix: &str, keep: usize) -> Result<Vec<PathBuf>> {
    let archives = list_archives(dir, prefix)?;
    let excess = archives.len().saturating_sub(keep);
    let mut removed = Vec::with_capacity(excess);
    for path in archives.into_iter().take(excess) {
        fs::remove_file(&path)?;
        debug!(path = %path.display(), "Pruned archive");
        removed.push(path);
    }
    Ok(removed)
}

/// `<prefix>-<UTC timestamp>.tar.zst`
pub fn archive_name(prefix: &str, at: chrono::DateTime<chrono::Utc>) -> String {
    format!(
        "{}-{}{}",
        prefix,
        at.format("%Y%m%dT%H%M%S%.3fZ"),
        ARCHIVE_EXTENSION
    )
}

fn digest_file(path: &Path) -> Result<(u64, String)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((total, hex::encode(hasher.finalize())))
}
