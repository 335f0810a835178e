//! Chunk materialization — best-effort acquisition of missing chunk files.
//!
//! When a resize asks for more chunks than the data directory holds, the
//! loader tries (1) local generation through an external corpus-builder
//! binary, then (2) downloading a pre-built archive and extracting only its
//! `.bin` entries. Both steps are best-effort; the loader surfaces
//! `InsufficientChunks` when neither produces enough files.

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

/// Environment variable naming the corpus-builder binary.
const GENERATOR_ENV: &str = "WORDSERVE_GENERATOR";
/// Environment variable holding the pre-built archive URL.
#[cfg(feature = "download")]
const ARCHIVE_URL_ENV: &str = "WORDSERVE_CHUNK_ARCHIVE";

const DEFAULT_GENERATOR: &str = "wordserve-build";

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("could not inspect data directory {}", .0.display())]
    DataDir(PathBuf, #[source] std::io::Error),
}

/// Where materialization should look for its tools.
#[derive(Debug, Clone, Default)]
pub struct MaterializeOptions {
    /// Corpus-builder binary; falls back to `$WORDSERVE_GENERATOR`, then
    /// `wordserve-build` on `$PATH`.
    pub generator: Option<PathBuf>,
    /// Archive URL; falls back to `$WORDSERVE_CHUNK_ARCHIVE`. No URL means
    /// the download step is skipped.
    pub archive_url: Option<String>,
}

/// Count the `dict_*.bin` files currently on disk.
pub fn chunk_files_present(data_dir: &Path) -> Result<usize, MaterializeError> {
    let entries = std::fs::read_dir(data_dir)
        .map_err(|e| MaterializeError::DataDir(data_dir.to_path_buf(), e))?;
    let mut n = 0;
    for entry in entries.flatten() {
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with("dict_") && name.ends_with(".bin") {
                n += 1;
            }
        }
    }
    Ok(n)
}

/// Try to bring the data directory up to `needed` chunk files of
/// `chunk_size` words each. Returns the number of chunk files present
/// afterwards; the caller compares against `needed`.
pub fn ensure_chunks(
    data_dir: &Path,
    needed: usize,
    chunk_size: usize,
    options: &MaterializeOptions,
) -> Result<usize, MaterializeError> {
    let present = chunk_files_present(data_dir)?;
    if present >= needed {
        return Ok(present);
    }

    info!(present, needed, "Data directory is short on chunks, attempting materialization");

    if run_generator(data_dir, needed, chunk_size, options) {
        let present = chunk_files_present(data_dir)?;
        if present >= needed {
            return Ok(present);
        }
    }

    download_archive(data_dir, options);
    chunk_files_present(data_dir)
}

// ---------------------------------------------------------------------------
// Local generation
// ---------------------------------------------------------------------------

fn run_generator(
    data_dir: &Path,
    needed: usize,
    chunk_size: usize,
    options: &MaterializeOptions,
) -> bool {
    let generator = options
        .generator
        .clone()
        .or_else(|| std::env::var_os(GENERATOR_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_GENERATOR));

    let status = Command::new(&generator)
        .arg("--out")
        .arg(data_dir)
        .arg("--chunks")
        .arg(needed.to_string())
        .arg("--chunk-size")
        .arg(chunk_size.to_string())
        .status();

    match status {
        Ok(s) if s.success() => {
            info!(generator = %generator.display(), "Chunk generation succeeded");
            true
        }
        Ok(s) => {
            warn!(generator = %generator.display(), code = s.code(), "Chunk generator failed");
            false
        }
        Err(e) => {
            warn!(generator = %generator.display(), error = %e, "Could not run chunk generator");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Archive download
// ---------------------------------------------------------------------------

#[cfg(feature = "download")]
fn download_archive(data_dir: &Path, options: &MaterializeOptions) {
    let Some(url) = options.archive_url.clone().or_else(|| std::env::var(ARCHIVE_URL_ENV).ok())
    else {
        return;
    };

    info!(url = url.as_str(), "Downloading chunk archive");
    let bytes = match reqwest::blocking::get(&url).and_then(|r| r.error_for_status()) {
        Ok(resp) => match resp.bytes() {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "Chunk archive download failed mid-body");
                return;
            }
        },
        Err(e) => {
            warn!(error = %e, "Chunk archive download failed");
            return;
        }
    };

    match extract_bin_entries(&bytes, data_dir) {
        Ok(n) => info!(extracted = n, "Chunk archive extracted"),
        Err(e) => warn!(error = %e, "Chunk archive extraction failed"),
    }
}

#[cfg(not(feature = "download"))]
fn download_archive(_data_dir: &Path, _options: &MaterializeOptions) {}

/// Extract only `.bin` entries into `data_dir`, flattened to their file
/// names. Entry paths containing `..` are refused outright.
#[cfg(feature = "download")]
fn extract_bin_entries(bytes: &[u8], data_dir: &Path) -> Result<usize, zip::result::ZipError> {
    use std::io::Read;

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))?;
    let mut extracted = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if !name.ends_with(".bin") || entry.is_dir() {
            continue;
        }
        if name.contains("..") {
            warn!(entry = name.as_str(), "Refusing archive entry with parent-path component");
            continue;
        }
        let Some(file_name) = Path::new(&name).file_name() else {
            continue;
        };
        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut contents)?;
        let dest = data_dir.join(file_name);
        if let Err(e) = std::fs::write(&dest, contents) {
            warn!(dest = %dest.display(), error = %e, "Could not write extracted chunk");
            continue;
        }
        extracted += 1;
    }
    Ok(extracted)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
