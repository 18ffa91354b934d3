//! Publish orchestrator: manifest -> bundle -> upload -> register.
//!
//! Drives the fixed publish sequence and reports progress through a typed
//! event callback. A duplicate `name@version` surfaces from the registry as
//! a `Validation` error; manifest warnings never block.

use std::path::Path;

use crate::bundle;
use crate::client::{MessageTransport, RegistryClient};
use crate::error::Result;
use crate::gateway::{self, Storage};
use crate::manifest;
use crate::process::Tag;
use crate::signer::Signer;

/// Progress events emitted during a publish, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishEvent {
    Validated { name: String, version: String },
    UploadStart,
    UploadProgress { percent: u8 },
    UploadComplete { tx_id: String },
    WaitConfirmation,
    Registered { message_id: String },
}

/// Publish behavior switches.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub skip_confirmation: bool,
    pub compression_level: u32,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            skip_confirmation: false,
            compression_level: bundle::DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// The final success record of a publish.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub name: String,
    pub version: String,
    pub arweave_tx_id: String,
    pub registry_message_id: String,
    pub bytes: usize,
    pub cost: u64,
    /// Non-blocking manifest warnings, already classified.
    pub warnings: Vec<String>,
}

/// Publish the skill in `directory`.
pub async fn publish<S: Storage, T: MessageTransport>(
    directory: &Path,
    signer: &Signer,
    storage: &S,
    client: &RegistryClient<T>,
    options: &PublishOptions,
    mut events: impl FnMut(PublishEvent),
) -> Result<PublishOutcome> {
    let parsed = manifest::parse_dir(directory)?;
    let skill = &parsed.manifest;
    for warning in &parsed.warnings {
        tracing::warn!(skill = %skill.name, "{warning}");
    }
    events(PublishEvent::Validated {
        name: skill.name.clone(),
        version: skill.version.clone(),
    });
    tracing::debug!(
        skill = %skill.name,
        version = %skill.version,
        signer = signer.describe_source(),
        "publishing"
    );

    let bytes = bundle::create_with_level(directory, options.compression_level)?;

    events(PublishEvent::UploadStart);
    let upload_tags = vec![
        Tag::new("Content-Type", "application/gzip"),
        Tag::new("App-Name", "permaskill"),
        Tag::new("Skill-Name", &skill.name),
        Tag::new("Skill-Version", &skill.version),
    ];
    let receipt = {
        let mut progress =
            |percent: u8| events(PublishEvent::UploadProgress { percent });
        storage.upload(signer, &bytes, &upload_tags, &mut progress).await?
    };
    events(PublishEvent::UploadComplete {
        tx_id: receipt.id.clone(),
    });

    if !options.skip_confirmation && !receipt.confirmed {
        events(PublishEvent::WaitConfirmation);
        gateway::wait_for_confirmation(storage, &receipt.id).await;
    }

    let tags = skill.registration_tags(&receipt.id)?;
    let registration = client.register_skill(signer, tags).await?;
    events(PublishEvent::Registered {
        message_id: registration.message_id.clone(),
    });

    Ok(PublishOutcome {
        name: skill.name.clone(),
        version: skill.version.clone(),
        arweave_tx_id: receipt.id,
        registry_message_id: registration.message_id,
        bytes: receipt.bytes,
        cost: receipt.cost,
        warnings: parsed.warnings,
    })
}
