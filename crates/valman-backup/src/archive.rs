//! Archive codec for backup units.
//!
//! One backup is one zip archive holding the world file pair at the top
//! level, named after its creation minute.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::warn;
use valman_common::{BackupError, BackupResult};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Create a zip archive at `dest` containing the given files (flat, by file
/// name). The destination's parent directory is created if needed.
pub fn create_archive(sources: &[PathBuf], dest: &Path) -> BackupResult<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(dest)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for source in sources {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                BackupError::archive(format!(
                    "source has no usable file name: {}",
                    source.display()
                ))
            })?;

        zip.start_file(name, options)
            .map_err(|e| BackupError::archive(e.to_string()))?;
        let mut input = File::open(source)?;
        std::io::copy(&mut input, &mut zip)?;
    }

    zip.finish().map_err(|e| BackupError::archive(e.to_string()))?;
    Ok(())
}

/// Extract every regular entry of the archive at `src` into `dest_dir`.
///
/// Entries with names that would escape `dest_dir` are skipped.
pub fn extract_archive(src: &Path, dest_dir: &Path) -> BackupResult<()> {
    let file = File::open(src)?;
    let mut archive = ZipArchive::new(file).map_err(|e| BackupError::archive(e.to_string()))?;

    fs::create_dir_all(dest_dir)?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| BackupError::archive(e.to_string()))?;

        if entry.is_dir() {
            continue;
        }

        let Some(relative) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "skipping archive entry with unsafe path");
            continue;
        };

        let out_path = dest_dir.join(relative);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;
    }

    Ok(())
}
