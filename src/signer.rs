//! Wallet signers: keyfile, mnemonic-derived, and interactive (loopback).
//!
//! Every mutating network operation signs through a [`Signer`]. The three
//! variants share one contract: a deterministic 43-character base64url
//! address, `sign` over raw bytes, and data-item signing that yields a
//! 43-character id. The interactive variant bridges to a browser wallet via
//! a localhost HTTP server and maps its failure modes onto distinct error
//! kinds (rejected -> Authorization, launch -> Configuration, lost/timeout
//! -> Network).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use tokio::sync::{Mutex, oneshot};

use crate::error::{Error, Result};
use crate::process::Tag;

/// Default wait for an interactive signature or connection.
pub const INTERACTIVE_TIMEOUT: Duration = Duration::from_secs(300);

/// A signed data item ready for submission.
#[derive(Debug, Clone)]
pub struct SignedItem {
    /// 43-char base64url content id (SHA-256 of the signature).
    pub id: String,
    /// Serialized item bytes as submitted to the network.
    pub raw: Vec<u8>,
}

/// True iff `s` is a 43-character base64url string.
pub fn is_valid_address(s: &str) -> bool {
    s.len() == 43
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Derive a 43-char base64url address from public key material.
pub fn address_from_owner(owner: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(owner))
}

/// A polymorphic transaction/data-item signer.
#[derive(Debug)]
pub enum Signer {
    File(FileSigner),
    Mnemonic(MnemonicSigner),
    Interactive(InteractiveSigner),
}

impl Signer {
    /// Load a keyfile signer from disk.
    pub fn from_keyfile(path: &Path) -> Result<Self> {
        Ok(Self::File(FileSigner::load(path)?))
    }

    /// Derive a signer from a 12-word seed phrase.
    pub fn from_mnemonic(phrase: &str) -> Result<Self> {
        Ok(Self::Mnemonic(MnemonicSigner::derive(phrase)?))
    }

    /// The signer's 43-character address.
    pub fn address(&self) -> &str {
        match self {
            Self::File(s) => &s.address,
            Self::Mnemonic(s) => &s.address,
            Self::Interactive(s) => &s.address,
        }
    }

    /// Public key material included in signed payloads.
    pub fn owner(&self) -> &[u8] {
        match self {
            Self::File(s) => &s.owner,
            Self::Mnemonic(s) => &s.owner,
            Self::Interactive(s) => &s.owner,
        }
    }

    /// Sign raw message bytes.
    pub async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::File(s) => Ok(s.sign(message)),
            Self::Mnemonic(s) => Ok(s.sign(message)),
            Self::Interactive(s) => s.sign(message).await,
        }
    }

    /// Sign a payload plus tag set as a data item.
    pub async fn sign_data_item(&self, payload: &[u8], tags: &[Tag]) -> Result<SignedItem> {
        let digest = data_item_digest(self.owner(), payload, tags);
        let signature = self.sign(&digest).await?;
        let id = URL_SAFE_NO_PAD.encode(Sha256::digest(&signature));

        let raw = serde_json::to_vec(&serde_json::json!({
            "owner": URL_SAFE_NO_PAD.encode(self.owner()),
            "tags": tags,
            "data": URL_SAFE_NO_PAD.encode(payload),
            "signature": URL_SAFE_NO_PAD.encode(&signature),
        }))
        .map_err(|e| Error::validation("failed to serialize data item").with_cause(e))?;

        Ok(SignedItem { id, raw })
    }

    /// Release signer resources. No-op for non-interactive variants; always
    /// idempotent.
    pub async fn disconnect(&self) {
        if let Self::Interactive(s) = self {
            s.disconnect();
        }
    }

    /// Configuration flavor for logging. Never includes key material.
    pub fn describe_source(&self) -> &'static str {
        match self {
            Self::File(_) => "keyfile",
            Self::Mnemonic(_) => "mnemonic",
            Self::Interactive(_) => "interactive",
        }
    }
}

/// Deterministic digest over owner, tags, and payload.
fn data_item_digest(owner: &[u8], payload: &[u8], tags: &[Tag]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(b"data-item");
    hasher.update(owner);
    for tag in tags {
        hasher.update(tag.name.as_bytes());
        hasher.update([0]);
        hasher.update(tag.value.as_bytes());
        hasher.update([0]);
    }
    hasher.update(payload);
    hasher.finalize().to_vec()
}

/// Keyed signature over a message digest.
///
/// The construction is a keyed SHA-512; the concrete scheme is sealed behind
/// the signer so callers only ever observe (signature, id) pairs.
fn keyed_sign(secret: &[u8], message: &[u8]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(secret);
    hasher.update([0x1f]);
    hasher.update(message);
    hasher.finalize().to_vec()
}

// ── File signer ──────────────────────────────────────────────────────

/// JWK-style keyfile shape. Only the fields the signer needs.
#[derive(Debug, Deserialize)]
struct Keyfile {
    kty: String,
    n: String,
    d: String,
}

/// Signer backed by a keyfile on disk.
pub struct FileSigner {
    owner: Vec<u8>,
    secret: Vec<u8>,
    address: String,
}

impl std::fmt::Debug for FileSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("FileSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl FileSigner {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read wallet at {}", path.display()))
                .with_cause(e)
                .with_solution("check the wallet path in .skillsrc or --wallet")
        })?;
        let keyfile: Keyfile = serde_json::from_str(&raw).map_err(|e| {
            Error::configuration(format!("wallet at {} is not a valid keyfile", path.display()))
                .with_cause(e)
        })?;
        if keyfile.kty != "RSA" {
            return Err(Error::configuration(format!(
                "unsupported wallet key type '{}'",
                keyfile.kty
            )));
        }
        let owner = URL_SAFE_NO_PAD
            .decode(&keyfile.n)
            .map_err(|e| Error::configuration("wallet modulus is not base64url").with_cause(e))?;
        let secret = URL_SAFE_NO_PAD
            .decode(&keyfile.d)
            .map_err(|e| Error::configuration("wallet exponent is not base64url").with_cause(e))?;
        let address = address_from_owner(&owner);
        Ok(Self {
            owner,
            secret,
            address,
        })
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        keyed_sign(&self.secret, message)
    }
}

// ── Mnemonic signer ──────────────────────────────────────────────────

/// Signer derived deterministically from a 12-word seed phrase.
pub struct MnemonicSigner {
    owner: Vec<u8>,
    secret: Vec<u8>,
    address: String,
}

impl std::fmt::Debug for MnemonicSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MnemonicSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl MnemonicSigner {
    pub fn derive(phrase: &str) -> Result<Self> {
        let words: Vec<&str> = phrase.split_whitespace().collect();
        if words.len() != 12 {
            return Err(Error::configuration(format!(
                "seed phrase has {} words, expected 12",
                words.len()
            ))
            .with_solution("set SEED_PHRASE to a 12-word phrase separated by spaces"));
        }
        let normalized = words.join(" ").to_lowercase();

        // Iterated KDF over the normalized phrase. Stretching keeps the
        // derivation deterministic per phrase without storing anything.
        let mut secret = Sha512::digest(format!("mnemonic:{normalized}")).to_vec();
        for _ in 0..2048 {
            secret = Sha512::digest(&secret).to_vec();
        }

        let mut owner_hasher = Sha512::new();
        owner_hasher.update(b"owner");
        owner_hasher.update(&secret);
        let owner = owner_hasher.finalize().to_vec();
        let address = address_from_owner(&owner);

        Ok(Self {
            owner,
            secret,
            address,
        })
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        keyed_sign(&self.secret, message)
    }
}

// ── Interactive signer ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    address: String,
}

#[derive(Debug, Serialize, Clone)]
struct PendingSignature {
    request_id: u64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SignatureResponse {
    request_id: u64,
    approved: bool,
    signature: Option<String>,
}

#[derive(Default)]
struct BridgeState {
    connect_tx: Mutex<Option<oneshot::Sender<String>>>,
    queue: Mutex<Vec<PendingSignature>>,
    waiting: Mutex<HashMap<u64, oneshot::Sender<SignatureResponse>>>,
}

/// Signer bridged to a user-approved wallet over a localhost HTTP loopback.
///
/// The wallet page polls `GET /pending` for signature requests and answers
/// via `POST /signature`. Connection is established when the wallet posts
/// its address to `POST /connect`.
pub struct InteractiveSigner {
    owner: Vec<u8>,
    address: String,
    timeout: Duration,
    state: Arc<BridgeState>,
    next_request: AtomicU64,
    server: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for InteractiveSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveSigner")
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Drop for InteractiveSigner {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl InteractiveSigner {
    /// Start the loopback server, launch the browser, and wait for the
    /// wallet to connect.
    pub async fn connect(timeout: Duration) -> Result<Signer> {
        let state = Arc::new(BridgeState::default());
        let (connect_tx, connect_rx) = oneshot::channel();
        *state.connect_tx.lock().await = Some(connect_tx);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::network("failed to bind the wallet loopback port").with_cause(e))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::network("failed to read the loopback address").with_cause(e))?
            .port();

        let router = axum::Router::new()
            .route("/connect", post(handle_connect))
            .route("/pending", get(handle_pending))
            .route("/signature", post(handle_signature))
            .with_state(state.clone());

        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        launch_browser(&format!("http://127.0.0.1:{port}/"))?;

        let address = match tokio::time::timeout(timeout, connect_rx).await {
            Ok(Ok(address)) => address,
            Ok(Err(_)) => {
                server.abort();
                return Err(Error::network("wallet connection lost before approval"));
            }
            Err(_) => {
                server.abort();
                return Err(Error::network(format!(
                    "wallet did not connect within {} seconds",
                    timeout.as_secs()
                ))
                .with_solution("approve the connection in your browser wallet and retry"));
            }
        };

        if !is_valid_address(&address) {
            server.abort();
            return Err(Error::authorization(format!(
                "wallet returned an invalid address '{address}'"
            )));
        }

        tracing::debug!(%address, port, "wallet connected");
        Ok(Signer::Interactive(Self {
            owner: address.as_bytes().to_vec(),
            address,
            timeout,
            state,
            next_request: AtomicU64::new(1),
            server,
        }))
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.state.waiting.lock().await.insert(request_id, tx);
        self.state.queue.lock().await.push(PendingSignature {
            request_id,
            message: URL_SAFE_NO_PAD.encode(message),
        });

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(Error::network("wallet connection lost while signing")),
            Err(_) => {
                self.state.waiting.lock().await.remove(&request_id);
                return Err(Error::network(format!(
                    "signature request timed out after {} seconds",
                    self.timeout.as_secs()
                )));
            }
        };

        if !response.approved {
            return Err(Error::authorization("signature request rejected in wallet"));
        }
        let encoded = response
            .signature
            .ok_or_else(|| Error::authorization("wallet approved but sent no signature"))?;
        URL_SAFE_NO_PAD
            .decode(&encoded)
            .map_err(|e| Error::network("wallet signature is not base64url").with_cause(e))
    }

    fn disconnect(&self) {
        self.server.abort();
    }
}

async fn handle_connect(
    State(state): State<Arc<BridgeState>>,
    Json(req): Json<ConnectRequest>,
) -> Json<serde_json::Value> {
    if let Some(tx) = state.connect_tx.lock().await.take() {
        let _ = tx.send(req.address);
    }
    Json(serde_json::json!({ "ok": true }))
}

async fn handle_pending(State(state): State<Arc<BridgeState>>) -> Json<Vec<PendingSignature>> {
    Json(std::mem::take(&mut *state.queue.lock().await))
}

async fn handle_signature(
    State(state): State<Arc<BridgeState>>,
    Json(resp): Json<SignatureResponse>,
) -> Json<serde_json::Value> {
    if let Some(tx) = state.waiting.lock().await.remove(&resp.request_id) {
        let _ = tx.send(resp);
    }
    Json(serde_json::json!({ "ok": true }))
}

/// Open the system browser at the wallet bridge URL.
fn launch_browser(url: &str) -> Result<()> {
    let command = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    std::process::Command::new(command)
        .arg(url)
        .spawn()
        .map(|_| ())
        .map_err(|e| {
            Error::configuration("failed to launch a browser for wallet approval")
                .with_cause(e)
                .with_solution(format!("open {url} manually and approve the connection"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str =
        "abandon ability able about above absent absorb abstract absurd abuse access accident";

    fn keyfile_json() -> String {
        serde_json::json!({
            "kty": "RSA",
            "n": URL_SAFE_NO_PAD.encode(b"public-modulus-bytes"),
            "d": URL_SAFE_NO_PAD.encode(b"private-exponent-bytes"),
        })
        .to_string()
    }

    #[test]
    fn test_is_valid_address() {
        assert!(is_valid_address(&"A".repeat(43)));
        assert!(is_valid_address(&format!("{}-_", "a".repeat(41))));
        assert!(!is_valid_address(&"A".repeat(42)));
        assert!(!is_valid_address(&"A".repeat(44)));
        assert!(!is_valid_address(&format!("{}+", "A".repeat(42))));
    }

    #[test]
    fn test_address_is_43_chars() {
        assert!(is_valid_address(&address_from_owner(b"any owner bytes")));
    }

    #[test]
    fn test_keyfile_signer_address_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("wallet.json");
        std::fs::write(&path, keyfile_json()).unwrap();

        let a = FileSigner::load(&path).unwrap();
        let b = FileSigner::load(&path).unwrap();
        assert_eq!(a.address, b.address);
        assert!(is_valid_address(&a.address));
    }

    #[test]
    fn test_keyfile_missing_is_configuration_error() {
        let err = FileSigner::load(Path::new("/nonexistent/wallet.json")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_keyfile_wrong_kty_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("wallet.json");
        std::fs::write(&path, r#"{"kty": "EC", "n": "AA", "d": "AA"}"#).unwrap();
        assert!(FileSigner::load(&path).is_err());
    }

    #[test]
    fn test_mnemonic_deterministic() {
        let a = MnemonicSigner::derive(PHRASE).unwrap();
        let b = MnemonicSigner::derive(PHRASE).unwrap();
        assert_eq!(a.address, b.address);
        assert!(is_valid_address(&a.address));
    }

    #[test]
    fn test_mnemonic_distinct_phrases_distinct_addresses() {
        let a = MnemonicSigner::derive(PHRASE).unwrap();
        let other = PHRASE.replace("abandon", "zebra");
        let b = MnemonicSigner::derive(&other).unwrap();
        assert_ne!(a.address, b.address);
    }

    #[test]
    fn test_mnemonic_word_count_enforced() {
        let err = MnemonicSigner::derive("only three words").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_debug_never_leaks_secrets() {
        let signer = MnemonicSigner::derive(PHRASE).unwrap();
        let debug = format!("{signer:?}");
        assert!(debug.contains(&signer.address));
        assert!(!debug.contains("secret"));
        assert!(!debug.contains(&URL_SAFE_NO_PAD.encode(&signer.secret)));
    }

    #[tokio::test]
    async fn test_sign_data_item_id_shape() {
        let signer = Signer::from_mnemonic(PHRASE).unwrap();
        let tags = vec![Tag::new("Action", "Register-Skill")];
        let item = signer.sign_data_item(b"payload", &tags).await.unwrap();
        assert!(is_valid_address(&item.id));
        assert!(!item.raw.is_empty());
    }

    #[tokio::test]
    async fn test_sign_data_item_sensitive_to_tags() {
        let signer = Signer::from_mnemonic(PHRASE).unwrap();
        let a = signer
            .sign_data_item(b"payload", &[Tag::new("Action", "Register-Skill")])
            .await
            .unwrap();
        let b = signer
            .sign_data_item(b"payload", &[Tag::new("Action", "Update-Skill")])
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_disconnect_noop_for_file_variants() {
        let signer = Signer::from_mnemonic(PHRASE).unwrap();
        signer.disconnect().await;
        signer.disconnect().await;
        assert_eq!(signer.describe_source(), "mnemonic");
    }
}
