use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use hex::encode as hex_encode;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::errors::Result;
use crate::registry::Location;

pub const CACHE_DIR_ENV: &str = "PRETRAINING_DATA_CACHE";

#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
    url: String,
    bytes: u64,
}

/// Local cache of downloaded resources, keyed by the SHA-256 of their URL.
#[derive(Debug, Clone)]
pub struct DownloadCache {
    root: PathBuf,
}

impl DownloadCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Uses `$PRETRAINING_DATA_CACHE`, falling back to
    /// `$HOME/.cache/pretraining-data`.
    pub fn from_env() -> Self {
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            return Self::new(dir);
        }
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        Self::new(Path::new(&home).join(".cache").join("pretraining-data"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cached_file_for(&self, url: &str) -> PathBuf {
        self.root.join(hex_encode(Sha256::digest(url.as_bytes())))
    }

    /// Returns a readable local file for `location`, downloading remote
    /// resources on first use and reusing the stored copy afterwards.
    pub fn fetch(&self, location: &Location) -> Result<PathBuf> {
        match location {
            Location::Local(path) => {
                if !path.is_file() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("file {} not found", path.display()),
                    )
                    .into());
                }
                Ok(path.clone())
            }
            Location::Remote(url) => {
                let target = self.cached_file_for(url);
                if target.is_file() {
                    log::debug!("download cache hit for {} -> {}", url, target.display());
                    return Ok(target);
                }
                self.download(url, &target)?;
                Ok(target)
            }
        }
    }

    fn download(&self, url: &str, target: &Path) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        log::info!("downloading {} to {}", url, target.display());

        let mut response = reqwest::blocking::get(url)?.error_for_status()?;
        let progress = ProgressBar::new(response.content_length().unwrap_or(0));
        if let Ok(style) = ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {bytes:>12}/{total_bytes} ({eta})",
        ) {
            progress.set_style(style.progress_chars("=>-"));
        }

        // Partial downloads never land at `target`.
        let mut staging = NamedTempFile::new_in(&self.root)?;
        let mut written = 0u64;
        {
            let mut writer = BufWriter::new(staging.as_file_mut());
            let mut buffer = [0u8; 64 * 1024];
            loop {
                let read = response.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                writer.write_all(&buffer[..read])?;
                written += read as u64;
                progress.inc(read as u64);
            }
            writer.flush()?;
        }
        progress.finish_and_clear();

        staging.persist(target).map_err(|err| err.error)?;

        let meta = CacheMeta {
            url: url.to_string(),
            bytes: written,
        };
        let meta_path = target.with_extension("json");
        let meta_file = File::create(&meta_path)?;
        serde_json::to_writer_pretty(meta_file, &meta)?;

        log::info!("stored {} bytes from {}", written, url);
        Ok(())
    }
}
