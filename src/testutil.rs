//! In-process fakes for exercising orchestrators without a network.
//!
//! Enabled for unit tests and, via the `testutil` feature, for the
//! integration tests under `tests/`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::gateway::{Progress, Storage, TxStatus, UploadReceipt, is_free_tier};
use crate::process::{Message, OutMessage, RegistryProcess, RegistryState, Tag};
use crate::signer::{SignedItem, Signer, address_from_owner};

/// A 12-word phrase for deterministic test signers.
pub const TEST_PHRASE: &str =
    "abandon ability able about above absent absorb abstract absurd abuse access accident";

/// A deterministic test signer.
pub fn test_signer() -> Signer {
    Signer::from_mnemonic(TEST_PHRASE).expect("test phrase is valid")
}

/// A second, distinct test signer.
pub fn other_signer() -> Signer {
    Signer::from_mnemonic(
        "zebra ability able about above absent absorb abstract absurd abuse access accident",
    )
    .expect("test phrase is valid")
}

/// Transport that drives an in-process registry actor synchronously.
pub struct LocalTransport {
    process: Mutex<RegistryProcess>,
    clock: AtomicU64,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            process: Mutex::new(RegistryProcess::new()),
            clock: AtomicU64::new(1_000),
        }
    }

    /// Deliver a raw message to the actor.
    pub fn deliver(&self, from: &str, tags: &[Tag]) -> Option<OutMessage> {
        let msg = Message {
            id: "M".repeat(43),
            from: from.to_string(),
            timestamp: self.clock.fetch_add(1, Ordering::Relaxed),
            tags: tags.to_vec(),
        };
        self.process
            .lock()
            .expect("actor lock poisoned")
            .handle(&msg)
    }

    /// Register a skill directly, bypassing the publish pipeline.
    pub fn seed_skill(
        &self,
        owner: &str,
        name: &str,
        skill_version: &str,
        dependencies: &[&str],
        tx_id: &str,
    ) {
        let mut tags = vec![
            Tag::new("Action", "Register-Skill"),
            Tag::new("Name", name),
            Tag::new("Version", skill_version),
            Tag::new("Description", format!("Seeded skill {name}")),
            Tag::new("Author", "Permamind"),
            Tag::new("ArweaveTxId", tx_id),
        ];
        if !dependencies.is_empty() {
            let deps: Vec<String> = dependencies.iter().map(|d| d.to_string()).collect();
            tags.push(Tag::new(
                "Dependencies",
                serde_json::to_string(&deps).expect("deps encode"),
            ));
        }
        let response = self.deliver(owner, &tags).expect("seed response");
        assert_eq!(
            response.action(),
            "Skill-Registered",
            "seed failed: {:?}",
            response.error_reason()
        );
    }

    /// A clone of the actor's current state.
    pub fn state(&self) -> RegistryState {
        self.process
            .lock()
            .expect("actor lock poisoned")
            .state()
            .clone()
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::client::MessageTransport for LocalTransport {
    async fn send(&self, item: &SignedItem) -> Result<Option<OutMessage>> {
        let body: serde_json::Value = serde_json::from_slice(&item.raw)
            .map_err(|e| Error::validation("unparseable signed item").with_cause(e))?;
        let owner = {
            use base64::Engine;
            base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(body["owner"].as_str().unwrap_or(""))
                .map_err(|e| Error::validation("unparseable item owner").with_cause(e))?
        };
        let tags: Vec<Tag> = serde_json::from_value(body["tags"].clone())
            .map_err(|e| Error::validation("unparseable item tags").with_cause(e))?;
        Ok(self.deliver(&address_from_owner(&owner), &tags))
    }

    async fn dry_run(&self, from: &str, tags: &[Tag]) -> Result<Option<OutMessage>> {
        Ok(self.deliver(from, tags))
    }
}

/// In-memory bundle store standing in for the storage network.
pub struct MemoryStorage {
    store: Mutex<HashMap<String, Vec<u8>>>,
    pub balance: u64,
    pub winston_per_byte: u64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            balance: 1_000_000,
            winston_per_byte: 1,
        }
    }

    /// Place a bundle at a known content address.
    pub fn put_bundle(&self, tx_id: &str, bytes: Vec<u8>) {
        self.store
            .lock()
            .expect("store lock poisoned")
            .insert(tx_id.to_string(), bytes);
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.store
            .lock()
            .expect("store lock poisoned")
            .contains_key(tx_id)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    async fn upload(
        &self,
        signer: &Signer,
        bundle: &[u8],
        tags: &[Tag],
        progress: Progress<'_>,
    ) -> Result<UploadReceipt> {
        progress(0);
        let free = is_free_tier(bundle.len());
        let cost = if free {
            0
        } else {
            let cost = bundle.len() as u64 * self.winston_per_byte;
            if self.balance < cost {
                return Err(Error::authorization(format!(
                    "insufficient funds: balance {} winston, upload costs {cost}",
                    self.balance
                )));
            }
            cost
        };
        let item = signer.sign_data_item(bundle, tags).await?;
        self.put_bundle(&item.id, bundle.to_vec());
        progress(100);
        Ok(UploadReceipt {
            id: item.id,
            bytes: bundle.len(),
            cost,
            confirmed: free,
        })
    }

    async fn download(
        &self,
        tx_id: &str,
        progress: Progress<'_>,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        cancel.check()?;
        progress(0);
        let body = self
            .store
            .lock()
            .expect("store lock poisoned")
            .get(tx_id)
            .cloned()
            .ok_or_else(|| Error::network(format!("no stored bundle for {tx_id}")))?;
        progress(100);
        Ok(body)
    }

    async fn status(&self, tx_id: &str) -> Result<TxStatus> {
        Ok(TxStatus {
            confirmations: if self.contains(tx_id) { 1 } else { 0 },
        })
    }

    async fn price(&self, bytes: usize) -> Result<u64> {
        Ok(bytes as u64 * self.winston_per_byte)
    }

    async fn balance(&self, _address: &str) -> Result<u64> {
        Ok(self.balance)
    }
}

/// Write a skill directory with frontmatter and a body under `root/<name>`.
pub fn write_skill_dir(
    root: &std::path::Path,
    name: &str,
    skill_version: &str,
    dependencies: &[&str],
) -> std::path::PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).expect("create skill dir");
    let mut frontmatter = format!(
        "---\nname: {name}\nversion: {skill_version}\n\
         description: Test skill {name}\nauthor: Permamind\n"
    );
    if !dependencies.is_empty() {
        frontmatter.push_str("dependencies:\n");
        for dep in dependencies {
            frontmatter.push_str(&format!("  - {dep}\n"));
        }
    }
    frontmatter.push_str("---\n");
    std::fs::write(
        dir.join("SKILL.md"),
        format!("{frontmatter}# {name}\n\nSkill body.\n"),
    )
    .expect("write SKILL.md");
    dir
}
