//! Manifest and artifact retrieval with bounded retry.
//!
//! Networking lives entirely here; resolution and installation only ever see
//! locally materialized files. Transient failures (5xx, connection drops)
//! are retried a fixed number of times with a delay; client errors are not.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use reqwest::StatusCode;

use crate::error::SdkError;
use crate::runtime::Runtime;

/// Mirrors of the signed checksums manifest, tried in order.
pub const CHECKSUMS_URLS: &[&str] = &[
    "https://f-droid.github.io/android-sdk-transparency-log/signed/checksums.json",
    "https://fdroid.gitlab.io/android-sdk-transparency-log/checksums.json",
    "https://raw.githubusercontent.com/f-droid/android-sdk-transparency-log/master/signed/checksums.json",
];

/// Maximum number of attempts for one network operation.
pub const MAX_RETRIES: usize = 3;

/// Delay between retry attempts in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

const USER_AGENT: &str = concat!("sdkmgr/", env!("CARGO_PKG_VERSION"));

/// External signature verifier invoked as a black box.
#[cfg_attr(test, mockall::automock)]
pub trait Verifier: Send + Sync {
    /// Verify `path` against its detached `<path>.asc` signature. On
    /// failure the cached file and its signature must be removed.
    fn verify(&self, path: &Path) -> Result<()>;
}

/// Shells out to gpgv(1) with a dedicated keyring.
pub struct GpgvVerifier {
    keyring: PathBuf,
}

impl GpgvVerifier {
    pub fn new(keyring: PathBuf) -> Self {
        Self { keyring }
    }
}

impl Verifier for GpgvVerifier {
    fn verify(&self, path: &Path) -> Result<()> {
        if !self.keyring.exists() {
            bail!(
                "keyring {:?} not found; provide one or pass --skip-verification",
                self.keyring
            );
        }
        let signature = signature_path(path);
        let output = Command::new("gpgv")
            .arg("--keyring")
            .arg(&self.keyring)
            .arg(&signature)
            .arg(path)
            .output()
            .context("Failed to run gpgv")?;
        if output.status.success() {
            debug!("gpgv accepted {:?}", path);
            return Ok(());
        }
        warn!("{}", String::from_utf8_lossy(&output.stdout));
        warn!("{}", String::from_utf8_lossy(&output.stderr));
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(&signature);
        Err(SdkError::Verification {
            path: path.to_path_buf(),
        }
        .into())
    }
}

/// Disables verification (`--skip-verification`).
pub struct NullVerifier;

impl Verifier for NullVerifier {
    fn verify(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

fn signature_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".asc");
    PathBuf::from(name)
}

/// HTTP client with bounded retry for downloads and manifest fetches.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Download a URL into `dest`, retrying transient failures.
    #[tracing::instrument(skip(self, runtime, dest))]
    pub async fn download_file<R: Runtime>(
        &self,
        runtime: &R,
        url: &str,
        dest: &Path,
    ) -> Result<u64> {
        info!("Downloading {} into {:?}", url, dest);
        let mut last_error = None;
        for attempt in 1..=MAX_RETRIES {
            match self.download_once(runtime, url, dest).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) if is_retryable(&err) && attempt < MAX_RETRIES => {
                    warn!(
                        "Download attempt {}/{} failed ({:#}), retrying...",
                        attempt, MAX_RETRIES, err
                    );
                    last_error = Some(err);
                    tokio::time::sleep(std::time::Duration::from_millis(RETRY_DELAY_MS)).await;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("download failed: {}", url)))
    }

    async fn download_once<R: Runtime>(
        &self,
        runtime: &R,
        url: &str,
        dest: &Path,
    ) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to start download request")?;
        let mut response = response.error_for_status().map_err(anyhow::Error::from)?;

        let mut writer = runtime
            .create_file(dest)
            .with_context(|| format!("Failed to create {:?}", dest))?;
        let mut downloaded: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read from download stream")?
        {
            writer
                .write_all(&chunk)
                .context("Failed to write downloaded chunk")?;
            downloaded += chunk.len() as u64;
        }
        debug!("downloaded {} bytes from {}", downloaded, url);
        Ok(downloaded)
    }

    /// Return the verified checksums manifest bytes, reusing the cached copy
    /// when possible.
    ///
    /// With `refresh` the mirrors are revalidated against the cached ETag;
    /// without it an existing verified cache is used as-is, so installs work
    /// offline once the manifest has been fetched.
    pub async fn checksums<R: Runtime>(
        &self,
        runtime: &R,
        cache_dir: &Path,
        mirrors: &[String],
        verifier: &dyn Verifier,
        refresh: bool,
    ) -> Result<Vec<u8>> {
        let cached = cache_dir.join("checksums.json");
        let signature = signature_path(&cached);
        let etag_file = cache_dir.join("checksums.json.etag");

        if !refresh && runtime.exists(&cached) && runtime.exists(&signature) {
            verifier.verify(&cached)?;
            let bytes = std::fs::read(&cached)
                .with_context(|| format!("Failed to read {:?}", cached))?;
            return Ok(bytes);
        }

        let etag = runtime
            .exists(&etag_file)
            .then(|| runtime.read_to_string(&etag_file).ok())
            .flatten();

        let mut last_error = None;
        for mirror in mirrors {
            match self
                .fetch_checksums_from(runtime, mirror, &cached, &signature, &etag_file, etag.as_deref())
                .await
            {
                Ok(()) => {
                    verifier.verify(&cached)?;
                    let bytes = std::fs::read(&cached)
                        .with_context(|| format!("Failed to read {:?}", cached))?;
                    return Ok(bytes);
                }
                Err(err) => {
                    warn!("manifest fetch from {} failed: {:#}", mirror, err);
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("no checksum mirrors configured")))
    }

    async fn fetch_checksums_from<R: Runtime>(
        &self,
        runtime: &R,
        mirror: &str,
        cached: &Path,
        signature: &Path,
        etag_file: &Path,
        etag: Option<&str>,
    ) -> Result<()> {
        self.download_file(runtime, &format!("{}.asc", mirror), signature)
            .await?;

        let mut request = self.client.get(mirror);
        if let Some(etag) = etag
            && runtime.exists(cached)
        {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }
        let response = request.send().await.context("Failed to fetch manifest")?;
        if response.status() == StatusCode::NOT_MODIFIED {
            debug!("cached manifest still current for {}", mirror);
            return Ok(());
        }
        let response = response.error_for_status()?;
        let new_etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .context("Failed to read manifest body")?;

        info!("Downloading {} into {:?}", mirror, cached);
        runtime.write(cached, &body)?;
        if let Some(new_etag) = new_etag {
            runtime.write(etag_file, new_etag.as_bytes())?;
        }
        Ok(())
    }
}

/// Connection errors and 5xx responses may succeed on retry; everything
/// else will not.
fn is_retryable(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<reqwest::Error>() {
        Some(err) => match err.status() {
            Some(status) => status.is_server_error(),
            None => true,
        },
        None => false,
    }
}
