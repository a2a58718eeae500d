//! Media file downloads
//!
//! Streams a media URL to `<directory>/<name>.mp3`. Bytes go to a `.part`
//! file unique to that download and are renamed into place only when the
//! whole body arrived within the size and time limits. A failed download
//! never leaves a partial file or clobbers an earlier one, and two downloads
//! of the same name never write into the same file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use api_client::TrackInfo;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::DownloadsConfig;
use crate::error::{Error, Result};

/// Longest file name produced by `sanitize_filename`, in bytes.
///
/// Leaves room under the usual 255-byte limit for the `.mp3` suffix and the
/// per-download `.<uuid>.part` suffix.
pub const MAX_FILENAME_LEN: usize = 200;

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Make `name` safe to use as a file name on common file systems.
///
/// Reserved characters and ASCII control characters become `_`, leading and
/// trailing dots and spaces are dropped, and names longer than `max_len`
/// bytes are cut on a character boundary while keeping the extension.
pub fn sanitize_filename(name: &str, max_len: usize) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if INVALID_CHARS.contains(&c) || (c as u32) < 0x20 {
                '_'
            } else {
                c
            }
        })
        .collect();
    let mut sanitized = replaced
        .trim_matches(|c: char| c == '.' || c == ' ')
        .to_string();

    if sanitized.len() > max_len {
        let (stem, ext) = match split_extension(&sanitized) {
            (stem, ext) if ext.len() < max_len => (stem, ext),
            _ => (sanitized.as_str(), ""),
        };
        let stem = byte_prefix(stem, max_len - ext.len())
            .trim_end_matches(|c: char| c == ' ' || c == '.');
        sanitized = format!("{stem}{ext}");
    }

    if sanitized.is_empty() {
        sanitized = "untitled".to_string();
    }
    sanitized
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a character.
fn byte_prefix(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Downloads media files into one directory with a size cap, a timeout and
/// a bound on concurrent transfers.
pub struct MediaStore {
    http: reqwest::Client,
    directory: PathBuf,
    max_bytes: u64,
    timeout: Duration,
    slots: Semaphore,
}

impl MediaStore {
    /// Create the store, creating `directory` if needed.
    pub fn new(
        http: reqwest::Client,
        directory: impl Into<PathBuf>,
        max_bytes: u64,
        timeout: Duration,
        max_concurrent: usize,
    ) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self {
            http,
            directory,
            max_bytes,
            timeout,
            slots: Semaphore::new(max_concurrent.max(1)),
        })
    }

    pub fn from_config(http: reqwest::Client, config: &DownloadsConfig) -> Result<Self> {
        Self::new(
            http,
            &config.directory,
            config.max_file_size_bytes(),
            Duration::from_secs(config.timeout_secs),
            config.max_concurrent,
        )
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Download slots not currently in use.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Download `url` to a file named after `filename`.
    ///
    /// `progress` is called after every chunk with `(downloaded, total)`;
    /// `total` is 0 when the server did not send a length.
    pub async fn download(
        &self,
        url: &str,
        filename: &str,
        mut progress: impl FnMut(u64, u64) + Send,
    ) -> Result<PathBuf> {
        if url.trim().is_empty() {
            return Err(Error::EmptyUrl);
        }

        let mut name = sanitize_filename(filename, MAX_FILENAME_LEN);
        if !name.ends_with(".mp3") {
            name.push_str(".mp3");
        }
        let path = self.directory.join(&name);
        let part = self
            .directory
            .join(format!("{name}.{}.part", uuid::Uuid::new_v4().as_simple()));

        let _slot = self.slots.acquire().await.map_err(|_| Error::Closed)?;
        info!(path = %path.display(), "downloading media");

        let result = match tokio::time::timeout(
            self.timeout,
            self.fetch_to(url, &part, &mut progress),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.timeout.as_secs())),
        };

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "download failed");
                remove_partial(&part).await;
                crate::metrics::record_download(e.label(), 0);
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&part, &path).await {
            remove_partial(&part).await;
            crate::metrics::record_download("io", 0);
            return Err(e.into());
        }

        info!(path = %path.display(), bytes, "download complete");
        crate::metrics::record_download("ok", bytes);
        Ok(path)
    }

    /// Download a track to "artist - title.mp3".
    pub async fn download_track(
        &self,
        stream_url: &str,
        track: &TrackInfo,
        progress: impl FnMut(u64, u64) + Send,
    ) -> Result<PathBuf> {
        self.download(stream_url, &track.display_name(), progress)
            .await
    }

    async fn fetch_to(
        &self,
        url: &str,
        part: &Path,
        progress: &mut (impl FnMut(u64, u64) + Send),
    ) -> Result<u64> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(Error::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status(status.as_u16()));
        }

        let total = response.content_length().unwrap_or(0);
        if total > self.max_bytes {
            return Err(Error::TooLarge {
                size: total,
                limit: self.max_bytes,
            });
        }

        let mut file = tokio::fs::File::create(part).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(Error::from_reqwest)?;
            downloaded += chunk.len() as u64;
            if downloaded > self.max_bytes {
                return Err(Error::TooLarge {
                    size: downloaded,
                    limit: self.max_bytes,
                });
            }
            file.write_all(&chunk).await?;
            progress(downloaded, total);
        }

        file.flush().await?;
        Ok(downloaded)
    }
}

async fn remove_partial(part: &Path) {
    match tokio::fs::remove_file(part).await {
        Ok(()) => debug!(path = %part.display(), "removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %part.display(), error = %e, "failed to remove partial download"),
    }
}
