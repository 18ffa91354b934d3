//! Install orchestrator: resolve, download, extract, lock, record.
//!
//! Follows the fixed sequence: query the registry for the root skill,
//! resolve the dependency graph, then download and extract each node in
//! topological order so a skill never lands before its dependencies. Lock
//! file updates are best-effort; download recording happens last and its
//! failures are swallowed.

use std::path::PathBuf;

use crate::bundle::{self, ExtractOutcome};
use crate::cancel::CancelToken;
use crate::client::{MessageTransport, RegistryClient};
use crate::config;
use crate::error::{Error, Result};
use crate::gateway::Storage;
use crate::lockfile;
use crate::resolver;
use crate::signer::Signer;

/// Progress events emitted during an install, in order. `DownloadBundle`
/// repeats per skill with rising percentages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    QueryRegistry,
    ResolveDependencies,
    DownloadBundle { name: String, percent: u8 },
    ExtractBundle { name: String },
    UpdateLockFile,
    Complete,
}

/// Install behavior switches.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Replace already-installed skills instead of skipping them.
    pub force: bool,
    /// Skip the lock file update.
    pub no_lock: bool,
    /// Directory skills are extracted into.
    pub install_root: PathBuf,
    pub cancel: CancelToken,
}

impl InstallOptions {
    pub fn new(install_root: PathBuf) -> Self {
        Self {
            force: false,
            no_lock: false,
            install_root,
            cancel: CancelToken::never(),
        }
    }
}

/// One extracted skill.
#[derive(Debug, Clone)]
pub struct InstalledSkill {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
}

/// The final record of an install.
#[derive(Debug)]
pub struct InstallOutcome {
    /// Skills extracted this run, dependency order.
    pub installed: Vec<InstalledSkill>,
    /// Skills skipped because they were already present.
    pub skipped: Vec<String>,
    /// MCP servers the user must provision separately.
    pub mcp_servers: Vec<String>,
    pub lock_updated: bool,
}

/// Install `spec` (`name` or `name@version`) and its dependencies.
pub async fn install<S: Storage, T: MessageTransport>(
    spec: &str,
    storage: &S,
    client: &RegistryClient<T>,
    signer: Option<&Signer>,
    options: &InstallOptions,
    mut events: impl FnMut(InstallEvent),
) -> Result<InstallOutcome> {
    events(InstallEvent::QueryRegistry);
    let (name, pinned) = crate::version::split_spec(spec)?;
    if client.get_skill(name, pinned).await?.is_none() {
        return Err(Error::validation(format!(
            "Skill '{name}' not found in the registry"
        ))
        .with_solution("check the name with `permaskill search`"));
    }

    std::fs::create_dir_all(&options.install_root).map_err(|e| {
        Error::filesystem(format!(
            "cannot write install directory {}",
            options.install_root.display()
        ))
        .with_cause(e)
    })?;

    events(InstallEvent::ResolveDependencies);
    let plan = resolver::resolve(client, spec).await?;

    let mut installed = Vec::new();
    let mut skipped = Vec::new();
    for skill in &plan.order {
        options.cancel.check()?;
        let body = {
            let mut progress = |percent: u8| {
                events(InstallEvent::DownloadBundle {
                    name: skill.name.clone(),
                    percent,
                })
            };
            storage
                .download(&skill.arweave_tx_id, &mut progress, &options.cancel)
                .await?
        };

        events(InstallEvent::ExtractBundle {
            name: skill.name.clone(),
        });
        match bundle::extract(&body, &options.install_root, &skill.name, options.force)? {
            ExtractOutcome::Installed(path) => {
                tracing::info!(skill = %skill.name, version = %skill.version, "installed");
                installed.push(InstalledSkill {
                    name: skill.name.clone(),
                    version: skill.version.clone(),
                    path,
                });
            }
            ExtractOutcome::AlreadyInstalled(_) => skipped.push(skill.name.clone()),
        }
    }

    let mut lock_updated = false;
    if !options.no_lock {
        events(InstallEvent::UpdateLockFile);
        let lock_path = config::lock_path(&options.install_root);
        match lockfile::update(&lock_path, &plan.order) {
            Ok(_) => lock_updated = true,
            Err(e) => {
                tracing::warn!(path = %lock_path.display(), error = %e, "lock file update failed");
            }
        }
    }

    if let Some(signer) = signer {
        for skill in &installed {
            // The install already succeeded; recording is fire-and-forget.
            if let Err(e) = client
                .record_download(signer, &skill.name, &skill.version)
                .await
            {
                tracing::debug!(skill = %skill.name, error = %e, "record-download failed");
            }
        }
    }

    events(InstallEvent::Complete);
    Ok(InstallOutcome {
        installed,
        skipped,
        mcp_servers: plan.mcp_servers,
        lock_updated,
    })
}
