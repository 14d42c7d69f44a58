//! Asset download with retry, linear backoff and optional checksum
//! enforcement.
//!
//! Each failed attempt removes the partial file before the next try; after
//! the retry budget is exhausted the destination is guaranteed absent and
//! the last error's message is surfaced. The expected checksum is an
//! extension point: the GitHub release index publishes none, so the
//! pipeline passes `None`, but any caller with a detached digest gets full
//! enforcement.

use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::UpdateError;
use crate::release::{ChunkFn, FetchStats, ReleaseSource};

pub struct Downloader<'a> {
    source: &'a dyn ReleaseSource,
    max_retries: u32,
    base_delay: Duration,
}

impl<'a> Downloader<'a> {
    pub fn new(source: &'a dyn ReleaseSource) -> Self {
        Self {
            source,
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.base_delay = base_delay;
        self
    }

    /// Stream `url` to `dest`. `on_chunk` receives (downloaded, total)
    /// per chunk; total is 0 when the response carries no length.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        expected_sha256: Option<&str>,
        on_chunk: &ChunkFn<'_>,
    ) -> Result<FetchStats, UpdateError> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            if attempt > 1 {
                info!("retrying download (attempt {attempt}/{})", self.max_retries);
            }
            remove_partial(dest);

            match self.source.fetch(url, dest, on_chunk).await {
                Ok(stats) => {
                    match expected_sha256 {
                        Some(expected) if !stats.sha256.eq_ignore_ascii_case(expected) => {
                            last_error = format!(
                                "checksum mismatch: expected {expected}, got {}",
                                stats.sha256
                            );
                        }
                        _ => return Ok(stats),
                    }
                }
                Err(e) => last_error = e.to_string(),
            }

            remove_partial(dest);
            if attempt < self.max_retries {
                // Linear backoff: attempt * base_delay.
                tokio::time::sleep(self.base_delay * attempt).await;
            }
        }

        Err(UpdateError::Download {
            attempts: self.max_retries,
            reason: last_error,
        })
    }
}

fn remove_partial(dest: &Path) {
    if dest.exists() {
        let _ = std::fs::remove_file(dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::Release;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sha2::{Digest, Sha256};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Serves fixed bytes, optionally failing the first N attempts.
    struct FakeTransfer {
        payload: Vec<u8>,
        fail_first: u32,
        attempts: AtomicU32,
    }

    impl FakeTransfer {
        fn new(payload: &[u8], fail_first: u32) -> Self {
            Self {
                payload: payload.to_vec(),
                fail_first,
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ReleaseSource for FakeTransfer {
        async fn list_releases(&self, _: &str, _: &str) -> Result<Vec<Release>> {
            Ok(Vec::new())
        }

        async fn branch_head_time(&self, _: &str, _: &str, _: &str) -> Result<DateTime<Utc>> {
            anyhow::bail!("not used")
        }

        async fn fetch(&self, _: &str, dest: &Path, on_chunk: &ChunkFn<'_>) -> Result<FetchStats> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_first {
                anyhow::bail!("connection reset");
            }
            std::fs::write(dest, &self.payload)?;
            let total = self.payload.len() as u64;
            on_chunk(total, total);
            let mut hasher = Sha256::new();
            hasher.update(&self.payload);
            Ok(FetchStats {
                bytes: total,
                sha256: format!("{:x}", hasher.finalize()),
            })
        }
    }

    fn sha256_hex(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("bundle.zip");
        let source = FakeTransfer::new(b"payload", 0);

        let stats = Downloader::new(&source)
            .download("https://example.com/bundle.zip", &dest, None, &|_, _| {})
            .await
            .unwrap();

        assert_eq!(stats.bytes, 7);
        assert_eq!(stats.sha256, sha256_hex(b"payload"));
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn test_chunk_callback_borrows_caller_state() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("bundle.zip");
        let source = FakeTransfer::new(b"payload", 0);

        // Local, non-'static state captured by reference.
        let seen = std::sync::atomic::AtomicU64::new(0);
        Downloader::new(&source)
            .download("https://example.com/bundle.zip", &dest, None, &|done, _| {
                seen.store(done, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("bundle.zip");
        let source = FakeTransfer::new(b"payload", 2);

        let downloader =
            Downloader::new(&source).with_retries(3, Duration::from_millis(1));
        let stats = downloader
            .download("https://example.com/bundle.zip", &dest, None, &|_, _| {})
            .await
            .unwrap();

        assert_eq!(stats.bytes, 7);
        assert_eq!(source.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_no_file() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("bundle.zip");
        let source = FakeTransfer::new(b"payload", 10);

        let downloader =
            Downloader::new(&source).with_retries(3, Duration::from_millis(1));
        let err = downloader
            .download("https://example.com/bundle.zip", &dest, None, &|_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, UpdateError::Download { attempts: 3, .. }));
        assert!(err.to_string().contains("connection reset"));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_removes_file_and_fails() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("bundle.zip");
        let source = FakeTransfer::new(b"payload", 0);

        let downloader =
            Downloader::new(&source).with_retries(2, Duration::from_millis(1));
        let err = downloader
            .download(
                "https://example.com/bundle.zip",
                &dest,
                Some(&sha256_hex(b"different payload")),
                &|_, _| {},
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("checksum mismatch"));
        assert!(!dest.exists());
        assert_eq!(source.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_matching_checksum_accepted() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("bundle.zip");
        let source = FakeTransfer::new(b"payload", 0);

        let stats = Downloader::new(&source)
            .download(
                "https://example.com/bundle.zip",
                &dest,
                Some(&sha256_hex(b"payload").to_uppercase()),
                &|_, _| {},
            )
            .await
            .unwrap();

        assert_eq!(stats.sha256, sha256_hex(b"payload"));
        assert!(dest.exists());
    }
}
