//! Tunnel binary installation and resolution.
//!
//! The binary is fetched as a release archive, unpacked into the install
//! directory, and then located by a file-name pattern. Resolution happens once
//! per supervisor run.

use crate::config::{NetworkConfig, SupervisorConfig};
use crate::error::{BurrowError, Result};
use crate::models::TunnelBinary;
use crate::platform;
use futures::StreamExt;
use regex::Regex;
use std::fs;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const ARCHIVE_SUFFIXES: [&str; 4] = [".tar.gz", ".tgz", ".zip", NetworkConfig::DOWNLOAD_TEMP_SUFFIX];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    /// Guess from the URL path; release archives without a suffix are tarballs.
    fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
        if path.ends_with(".zip") {
            ArchiveKind::Zip
        } else {
            ArchiveKind::TarGz
        }
    }
}

/// Find the first file in `dir` (sorted by name) whose name matches `pattern`.
///
/// A missing directory resolves to `None`. Archives and partial downloads are
/// never treated as the binary.
pub fn resolve_binary(dir: &Path, pattern: &str) -> Result<Option<TunnelBinary>> {
    let regex = Regex::new(pattern).map_err(|e| BurrowError::Validation {
        field: "binary_pattern".into(),
        message: e.to_string(),
    })?;

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Install directory {} does not exist", dir.display());
            return Ok(None);
        }
        Err(e) => return Err(BurrowError::io_with_path(e, dir)),
    };

    let mut candidates: Vec<(String, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let name = entry.file_name().to_str()?.to_string();
            if !path.is_file() || !regex.is_match(&name) {
                return None;
            }
            let lower = name.to_lowercase();
            if ARCHIVE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
                return None;
            }
            Some((name, path))
        })
        .collect();
    candidates.sort();

    Ok(candidates
        .into_iter()
        .next()
        .map(|(name, path)| TunnelBinary { path, name }))
}

/// Download `url` and unpack it into `dest_dir`.
///
/// Extracted files without an extension are marked executable.
pub async fn fetch_and_install(url: &str, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest_dir).map_err(|e| BurrowError::io_with_path(e, dest_dir))?;

    info!("Downloading tunnel archive from {}", url);
    let archive = download_to_temp(url, dest_dir).await?;

    let kind = ArchiveKind::from_url(url);
    let dest = dest_dir.to_path_buf();
    let extracted = tokio::task::spawn_blocking(move || extract_archive(archive.path(), kind, &dest))
        .await
        .map_err(|e| BurrowError::Bootstrap {
            message: format!("extraction task failed: {}", e),
        })??;

    for path in &extracted {
        if path.extension().is_none() {
            platform::set_executable(path)?;
        }
    }

    info!(
        "Installed {} file(s) into {}",
        extracted.len(),
        dest_dir.display()
    );
    Ok(extracted)
}

/// Resolve the binary, installing it first when it is missing and a download
/// URL is configured.
pub async fn ensure_installed(config: &SupervisorConfig) -> Result<Option<TunnelBinary>> {
    if let Some(binary) = resolve_binary(&config.install_dir, &config.binary_pattern)? {
        debug!("Tunnel binary already installed: {}", binary.path.display());
        if !platform::permissions::is_executable(&binary.path) {
            platform::set_executable(&binary.path)?;
        }
        return Ok(Some(binary));
    }

    let Some(ref url) = config.download_url else {
        warn!(
            "No tunnel binary in {} and no download URL configured",
            config.install_dir.display()
        );
        return Ok(None);
    };

    fetch_and_install(url, &config.install_dir).await?;

    match resolve_binary(&config.install_dir, &config.binary_pattern)? {
        Some(binary) => Ok(Some(binary)),
        None => Err(BurrowError::Bootstrap {
            message: format!(
                "archive from {} contains no file matching '{}'",
                url, config.binary_pattern
            ),
        }),
    }
}

async fn download_to_temp(url: &str, dest_dir: &Path) -> Result<tempfile::NamedTempFile> {
    let client = reqwest::Client::builder()
        .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
        .timeout(NetworkConfig::DOWNLOAD_REQUEST_TIMEOUT)
        .build()?;

    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| BurrowError::DownloadFailed {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    let mut temp = tempfile::Builder::new()
        .prefix(".burrow-download-")
        .suffix(NetworkConfig::DOWNLOAD_TEMP_SUFFIX)
        .tempfile_in(dest_dir)
        .map_err(|e| BurrowError::io_with_path(e, dest_dir))?;

    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| BurrowError::DownloadFailed {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        temp.write_all(&chunk)
            .map_err(|e| BurrowError::io_with_path(e, temp.path()))?;
        downloaded += chunk.len() as u64;
    }
    temp.flush()
        .map_err(|e| BurrowError::io_with_path(e, temp.path()))?;

    debug!("Downloaded {} bytes from {}", downloaded, url);
    Ok(temp)
}

fn extract_archive(archive_path: &Path, kind: ArchiveKind, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    match kind {
        ArchiveKind::TarGz => extract_tarball(archive_path, dest_dir),
        ArchiveKind::Zip => extract_zip(archive_path, dest_dir),
    }
}

fn extract_tarball(archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let file = fs::File::open(archive_path).map_err(|e| BurrowError::io_with_path(e, archive_path))?;
    let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);

    let bootstrap_err = |e: std::io::Error| BurrowError::Bootstrap {
        message: format!("Failed to extract tarball: {}", e),
    };

    let mut extracted = Vec::new();
    for entry in archive.entries().map_err(bootstrap_err)? {
        let mut entry = entry.map_err(bootstrap_err)?;
        let relative = entry.path().map_err(bootstrap_err)?.into_owned();
        let is_file = entry.header().entry_type().is_file();
        // unpack_in refuses paths that escape dest_dir
        if entry.unpack_in(dest_dir).map_err(bootstrap_err)? && is_file {
            extracted.push(dest_dir.join(relative));
        }
    }
    Ok(extracted)
}

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let file = fs::File::open(archive_path).map_err(|e| BurrowError::io_with_path(e, archive_path))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| BurrowError::Bootstrap {
        message: format!("Failed to read zip: {}", e),
    })?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| BurrowError::Bootstrap {
            message: format!("Failed to read zip entry: {}", e),
        })?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping zip entry with unsafe path: {}", entry.name());
            continue;
        };
        let outpath = dest_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&outpath).map_err(|e| BurrowError::io_with_path(e, &outpath))?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).map_err(|e| BurrowError::io_with_path(e, parent))?;
        }
        let mut outfile =
            fs::File::create(&outpath).map_err(|e| BurrowError::io_with_path(e, &outpath))?;
        std::io::copy(&mut entry, &mut outfile).map_err(|e| BurrowError::io_with_path(e, &outpath))?;
        extracted.push(outpath);
    }
    Ok(extracted)
}
