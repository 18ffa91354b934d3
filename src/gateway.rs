//! Storage client: bundle upload, download with gateway fallback, and
//! transaction status.
//!
//! Uploads pick a dispatcher by size: small bundles ride the subsidized
//! bundler service, larger ones go through the direct path (fund check,
//! sign, submit, optional confirmation wait). Downloads walk the configured
//! gateways in order with exponential backoff per gateway. Both report
//! progress as monotone `[0, 100]` percentages that reach 100 on success.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::process::Tag;
use crate::signer::Signer;

/// Bundles below this ride the free bundler service; no balance check.
pub const FREE_TIER_MAX_BYTES: usize = 100 * 1024;

/// Confirmation polling cadence and horizon.
pub const CONFIRM_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const CONFIRM_HORIZON: Duration = Duration::from_secs(600);

/// Per-request timeout default.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Download retries per gateway (beyond the first attempt).
pub const RETRIES_PER_GATEWAY: u32 = 1;

const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Progress callback: called with `[0, 100]` percentages.
pub type Progress<'a> = &'a mut dyn FnMut(u8);

/// Result of a completed upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    /// 43-char content address of the bundle.
    pub id: String,
    pub bytes: usize,
    /// Winston paid; zero on the free-tier path.
    pub cost: u64,
    /// True when the dispatcher vouches for the data immediately (the
    /// bundler service does; direct uploads confirm separately).
    pub confirmed: bool,
}

/// Transaction status as reported by the gateway.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxStatus {
    pub confirmations: u64,
}

/// The seam every orchestrator talks through; the network implementation is
/// [`StorageClient`], tests provide in-memory stand-ins.
pub trait Storage {
    fn upload(
        &self,
        signer: &Signer,
        bundle: &[u8],
        tags: &[Tag],
        progress: Progress<'_>,
    ) -> impl Future<Output = Result<UploadReceipt>>;

    fn download(
        &self,
        tx_id: &str,
        progress: Progress<'_>,
        cancel: &CancelToken,
    ) -> impl Future<Output = Result<Vec<u8>>>;

    fn status(&self, tx_id: &str) -> impl Future<Output = Result<TxStatus>>;

    /// Estimated upload cost in winston for a payload of `bytes`.
    fn price(&self, bytes: usize) -> impl Future<Output = Result<u64>>;

    /// Wallet balance in winston.
    fn balance(&self, address: &str) -> impl Future<Output = Result<u64>>;
}

/// HTTP storage client over the configured gateway set.
pub struct StorageClient {
    http: reqwest::Client,
    gateways: Vec<String>,
    bundler: String,
    retries_per_gateway: u32,
}

impl StorageClient {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_timeout(config, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(config: &Config, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("permaskill/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::network("failed to build the HTTP client").with_cause(e))?;
        Ok(Self {
            http,
            gateways: config.gateways(),
            bundler: config.bundler.clone(),
            retries_per_gateway: RETRIES_PER_GATEWAY,
        })
    }

    fn primary(&self) -> &str {
        self.gateways
            .first()
            .map(String::as_str)
            .unwrap_or("https://arweave.net")
    }

    async fn upload_free_tier(
        &self,
        signer: &Signer,
        bundle: &[u8],
        tags: &[Tag],
        progress: &mut MonotoneProgress<'_>,
    ) -> Result<UploadReceipt> {
        let item = signer.sign_data_item(bundle, tags).await?;
        progress.emit(10);

        let url = format!("{}/tx", self.bundler);
        let response = self
            .http
            .post(&url)
            .header("content-type", "application/octet-stream")
            .body(item.raw)
            .send()
            .await
            .map_err(|e| {
                Error::network(format!("bundler upload to {url} failed")).with_cause(e)
            })?;
        if !response.status().is_success() {
            return Err(Error::network(format!(
                "bundler upload failed with HTTP {}",
                response.status()
            ))
            .with_solution("retry, or use a wallet with funds for a direct upload"));
        }
        progress.emit(100);

        tracing::info!(id = %item.id, bytes = bundle.len(), "bundle uploaded via bundler service");
        Ok(UploadReceipt {
            id: item.id,
            bytes: bundle.len(),
            cost: 0,
            confirmed: true,
        })
    }

    async fn upload_direct(
        &self,
        signer: &Signer,
        bundle: &[u8],
        tags: &[Tag],
        progress: &mut MonotoneProgress<'_>,
    ) -> Result<UploadReceipt> {
        let cost = self.price(bundle.len()).await?;
        let balance = self.balance(signer.address()).await?;
        if balance < cost {
            return Err(Error::authorization(format!(
                "insufficient funds: balance {balance} winston, upload costs {cost}"
            ))
            .with_solution("fund the wallet or shrink the bundle below 100 KiB"));
        }
        progress.emit(10);

        // Transaction id is the hash of the signature, like a data item's.
        let digest = transaction_digest(signer.owner(), bundle, tags, cost);
        let signature = signer.sign(&digest).await?;
        let id = URL_SAFE_NO_PAD.encode(Sha256::digest(&signature));
        let body = serde_json::json!({
            "format": 2,
            "id": id,
            "owner": URL_SAFE_NO_PAD.encode(signer.owner()),
            "tags": tags,
            "data": URL_SAFE_NO_PAD.encode(bundle),
            "data_size": bundle.len().to_string(),
            "reward": cost.to_string(),
            "signature": URL_SAFE_NO_PAD.encode(&signature),
        });
        progress.emit(25);

        let url = format!("{}/tx", self.primary());
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::network(format!("upload to {url} failed")).with_cause(e))?;
        if !response.status().is_success() {
            return Err(Error::network(format!(
                "upload failed with HTTP {}",
                response.status()
            )));
        }
        progress.emit(100);

        tracing::info!(%id, bytes = bundle.len(), cost, "bundle uploaded directly");
        Ok(UploadReceipt {
            id,
            bytes: bundle.len(),
            cost,
            confirmed: false,
        })
    }

    async fn download_from(
        &self,
        gateway: &str,
        tx_id: &str,
        progress: &mut MonotoneProgress<'_>,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        cancel.check()?;
        let url = format!("{gateway}/{tx_id}");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::network(format!("download from {url} failed")).with_cause(e))?;
        if !response.status().is_success() {
            return Err(Error::network(format!(
                "gateway {gateway} answered HTTP {} for {tx_id}",
                response.status()
            )));
        }

        let total = response.content_length();
        let mut body = Vec::new();
        let mut response = response;
        while let Some(chunk) = tokio::select! {
            chunk = response.chunk() => chunk
                .map_err(|e| Error::network(format!("download from {url} interrupted")).with_cause(e))?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        } {
            body.extend_from_slice(&chunk);
            if let Some(total) = total.filter(|t| *t > 0) {
                progress.emit(((body.len() as u64 * 100) / total).min(99) as u8);
            }
        }
        progress.emit(100);
        Ok(body)
    }
}

impl Storage for StorageClient {
    async fn upload(
        &self,
        signer: &Signer,
        bundle: &[u8],
        tags: &[Tag],
        progress: Progress<'_>,
    ) -> Result<UploadReceipt> {
        let mut progress = MonotoneProgress::new(progress);
        progress.emit(0);
        if is_free_tier(bundle.len()) {
            self.upload_free_tier(signer, bundle, tags, &mut progress)
                .await
        } else {
            self.upload_direct(signer, bundle, tags, &mut progress).await
        }
    }

    async fn download(
        &self,
        tx_id: &str,
        progress: Progress<'_>,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        let mut progress = MonotoneProgress::new(progress);
        progress.emit(0);

        let mut last_error = None;
        for gateway in &self.gateways {
            for attempt in 0..=self.retries_per_gateway {
                match self.download_from(gateway, tx_id, &mut progress, cancel).await {
                    Ok(body) => return Ok(body),
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        tracing::debug!(%gateway, attempt, error = %e, "download attempt failed");
                        last_error = Some(e);
                    }
                }
                if attempt < self.retries_per_gateway {
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
            }
        }

        let mut err = Error::network(format!(
            "failed to download {tx_id} from all {} gateways",
            self.gateways.len()
        ))
        .with_solution("check connectivity or configure a different gateway");
        if let Some(cause) = last_error {
            err = err.with_cause(cause);
        }
        Err(err)
    }

    async fn status(&self, tx_id: &str) -> Result<TxStatus> {
        let url = format!("{}/tx/{tx_id}/status", self.primary());
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::network(format!("status query to {url} failed")).with_cause(e))?;
        if response.status() == reqwest::StatusCode::ACCEPTED {
            // Still pending in the mempool.
            return Ok(TxStatus::default());
        }
        if !response.status().is_success() {
            return Err(Error::network(format!(
                "status query answered HTTP {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::network("status response is not JSON").with_cause(e))?;
        Ok(TxStatus {
            confirmations: body["number_of_confirmations"].as_u64().unwrap_or(0),
        })
    }

    async fn price(&self, bytes: usize) -> Result<u64> {
        let url = format!("{}/price/{bytes}", self.primary());
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::network(format!("price query to {url} failed")).with_cause(e))?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::network("price response unreadable").with_cause(e))?;
        text.trim()
            .parse()
            .map_err(|e| Error::network(format!("price response '{text}' is not a number")).with_cause(e))
    }

    async fn balance(&self, address: &str) -> Result<u64> {
        let url = format!("{}/wallet/{address}/balance", self.primary());
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::network(format!("balance query to {url} failed")).with_cause(e))?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::network("balance response unreadable").with_cause(e))?;
        text.trim().parse().map_err(|e| {
            Error::network(format!("balance response '{text}' is not a number")).with_cause(e)
        })
    }
}

/// True iff a bundle of `bytes` qualifies for the subsidized path.
pub fn is_free_tier(bytes: usize) -> bool {
    bytes < FREE_TIER_MAX_BYTES
}

/// Poll for at least one confirmation, every [`CONFIRM_POLL_INTERVAL`], for
/// at most [`CONFIRM_HORIZON`]. On expiry, warns and returns false; callers
/// proceed anyway.
pub async fn wait_for_confirmation<S: Storage>(storage: &S, tx_id: &str) -> bool {
    let deadline = tokio::time::Instant::now() + CONFIRM_HORIZON;
    loop {
        match storage.status(tx_id).await {
            Ok(status) if status.confirmations >= 1 => return true,
            Ok(_) => {}
            Err(e) => tracing::debug!(%tx_id, error = %e, "status poll failed"),
        }
        if tokio::time::Instant::now() + CONFIRM_POLL_INTERVAL > deadline {
            tracing::warn!(
                %tx_id,
                horizon = CONFIRM_HORIZON.as_secs(),
                "no confirmation within the horizon; proceeding anyway"
            );
            return false;
        }
        tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
    }
}

/// Exponential backoff: `base * 2^attempt`.
fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE * 2u32.saturating_pow(attempt)
}

fn transaction_digest(owner: &[u8], data: &[u8], tags: &[Tag], reward: u64) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(b"transaction");
    hasher.update(owner);
    for tag in tags {
        hasher.update(tag.name.as_bytes());
        hasher.update([0]);
        hasher.update(tag.value.as_bytes());
        hasher.update([0]);
    }
    hasher.update(reward.to_be_bytes());
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Clamps progress emissions to a monotone sequence in `[0, 100]`.
struct MonotoneProgress<'a> {
    callback: &'a mut dyn FnMut(u8),
    last: Option<u8>,
}

impl<'a> MonotoneProgress<'a> {
    fn new(callback: &'a mut dyn FnMut(u8)) -> Self {
        Self {
            callback,
            last: None,
        }
    }

    fn emit(&mut self, percent: u8) {
        let percent = percent.min(100);
        if self.last.is_some_and(|last| percent < last) {
            return;
        }
        self.last = Some(percent);
        (self.callback)(percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_tier_boundary() {
        assert!(is_free_tier(0));
        assert!(is_free_tier(FREE_TIER_MAX_BYTES - 1));
        assert!(!is_free_tier(FREE_TIER_MAX_BYTES));
        assert!(!is_free_tier(FREE_TIER_MAX_BYTES + 1));
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_monotone_progress_never_decreases() {
        let mut seen = Vec::new();
        let mut callback = |p: u8| seen.push(p);
        let mut progress = MonotoneProgress::new(&mut callback);
        progress.emit(0);
        progress.emit(40);
        progress.emit(30);
        progress.emit(40);
        progress.emit(100);
        assert_eq!(seen, vec![0, 40, 40, 100]);
    }

    #[test]
    fn test_monotone_progress_clamps_to_100() {
        let mut seen = Vec::new();
        let mut callback = |p: u8| seen.push(p);
        let mut progress = MonotoneProgress::new(&mut callback);
        progress.emit(250);
        assert_eq!(seen, vec![100]);
    }

    #[test]
    fn test_transaction_digest_sensitive_to_inputs() {
        let tags = vec![Tag::new("Content-Type", "application/gzip")];
        let a = transaction_digest(b"owner", b"data", &tags, 10);
        let b = transaction_digest(b"owner", b"data", &tags, 11);
        let c = transaction_digest(b"owner", b"other", &tags, 10);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_client_builds_from_config() {
        let config = Config::default();
        let client = StorageClient::new(&config).unwrap();
        assert_eq!(client.gateways.len(), 3);
        assert_eq!(client.primary(), crate::config::DEFAULT_GATEWAY);
    }
}
