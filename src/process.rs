//! The registry process: authoritative state, message handlers, and the
//! HTTP patch projection.
//!
//! The process is strictly serial. [`RegistryProcess::handle`] runs one
//! message to completion before the next is delivered; when spawned as a
//! task it drains a tokio mailbox channel. Handlers never read the wall
//! clock: every timestamp comes from the incoming message. After each
//! mutating handler the full `skills` mapping is emitted on the patch
//! channel, which the HTTP projection serves to readers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::signer::is_valid_address;
use crate::version;

/// Maximum byte length of a single tag value.
pub const MAX_TAG_LEN: usize = 3072;

/// Maximum number of tags on a message.
pub const MAX_TAGS: usize = 128;

/// Maximum length of a skill name.
pub const MAX_NAME_LEN: usize = 64;

const MAX_DESCRIPTION_LEN: usize = 1024;

/// A name/value string pair. Every protocol field travels as a tag; numeric
/// values are serialized explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An incoming message delivered to the process.
#[derive(Debug, Clone)]
pub struct Message {
    /// Message id assigned by the network.
    pub id: String,
    /// 43-char address of the sender.
    pub from: String,
    /// Sender-side timestamp in milliseconds.
    pub timestamp: u64,
    pub tags: Vec<Tag>,
}

impl Message {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.value.as_str())
    }

    /// Parse a tag value holding a JSON string array.
    fn list_tag(&self, name: &str) -> Result<Vec<String>, String> {
        match self.tag(name) {
            None => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(raw)
                .map_err(|_| format!("tag '{name}' must be a JSON string array")),
        }
    }
}

/// A response message emitted by a handler.
#[derive(Debug, Clone)]
pub struct OutMessage {
    pub target: String,
    pub tags: Vec<Tag>,
    pub data: Option<String>,
}

impl OutMessage {
    fn to(target: &str, action: &str) -> Self {
        Self {
            target: target.to_string(),
            tags: vec![Tag::new("Action", action)],
            data: None,
        }
    }

    fn with_tag(mut self, name: &str, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(name, value));
        self
    }

    fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data.to_string());
        self
    }

    fn error(target: &str, reason: impl Into<String>) -> Self {
        OutMessage::to(target, "Error").with_tag("Error", reason)
    }

    pub fn action(&self) -> &str {
        self.tags
            .iter()
            .find(|t| t.name == "Action")
            .map(|t| t.value.as_str())
            .unwrap_or("")
    }

    pub fn error_reason(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == "Error")
            .map(|t| t.value.as_str())
    }
}

/// A registered, immutable point in a skill's version history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkillVersion {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<String>,
    pub owner: String,
    pub arweave_tx_id: String,
    pub published_at: u64,
    pub updated_at: u64,
    pub download_count: u64,
    #[serde(default)]
    pub download_timestamps: Vec<u64>,
}

/// A named row in the registry: version map plus the `latest` pointer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillEntry {
    pub versions: BTreeMap<String, SkillVersion>,
    pub latest: String,
}

impl SkillEntry {
    pub fn latest_version(&self) -> Option<&SkillVersion> {
        self.versions.get(&self.latest)
    }

    fn owner(&self) -> Option<&str> {
        self.latest_version().map(|v| v.owner.as_str())
    }
}

/// The authoritative registry state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryState {
    pub skills: BTreeMap<String, SkillEntry>,
    pub initial_sync_done: bool,
}

/// A snapshot of the `skills` mapping pushed to the HTTP projection.
pub type SkillsSnapshot = BTreeMap<String, SkillEntry>;

/// The registry process: state plus an optional patch channel.
pub struct RegistryProcess {
    state: RegistryState,
    patches: Option<mpsc::UnboundedSender<SkillsSnapshot>>,
}

impl RegistryProcess {
    pub fn new() -> Self {
        Self::with_state(RegistryState::default())
    }

    pub fn with_state(state: RegistryState) -> Self {
        Self {
            state,
            patches: None,
        }
    }

    /// Attach the patch device. The initial sync patch is emitted at most
    /// once per process lifetime.
    pub fn with_patch_sink(mut self, sink: mpsc::UnboundedSender<SkillsSnapshot>) -> Self {
        self.patches = Some(sink);
        self.ensure_initial_sync();
        self
    }

    pub fn state(&self) -> &RegistryState {
        &self.state
    }

    fn ensure_initial_sync(&mut self) {
        if !self.state.initial_sync_done {
            self.state.initial_sync_done = true;
            self.emit_patch();
        }
    }

    fn emit_patch(&self) {
        if let Some(sink) = &self.patches {
            // Fire and forget: a detached projection must not stall handlers.
            let _ = sink.send(self.state.skills.clone());
        }
    }

    /// Dispatch one message. Returns `None` only for the silent no-op cases
    /// (an unknown name/version on `Record-Download`).
    pub fn handle(&mut self, msg: &Message) -> Option<OutMessage> {
        if let Err(reason) = validate_message(msg) {
            return Some(OutMessage::error(&msg.from, reason));
        }
        let action = match msg.tag("Action") {
            Some(action) => action.to_string(),
            None => return Some(OutMessage::error(&msg.from, "missing Action tag")),
        };
        tracing::debug!(action = %action, from = %msg.from, "handling message");

        match action.as_str() {
            "Register-Skill" => Some(self.register_skill(msg)),
            "Update-Skill" => Some(self.update_skill(msg)),
            "Search-Skills" => Some(self.search_skills(msg)),
            "List-Skills" => Some(self.list_skills(msg)),
            "Get-Skill" => Some(self.get_skill(msg)),
            "Get-Skill-Versions" => Some(self.get_skill_versions(msg)),
            "Record-Download" => self.record_download(msg),
            "Get-Download-Stats" => Some(self.get_download_stats(msg)),
            "Info" => Some(self.info(msg)),
            other => Some(OutMessage::error(
                &msg.from,
                format!("unknown action '{other}'"),
            )),
        }
    }

    // ── Mutating handlers ────────────────────────────────────────────

    fn register_skill(&mut self, msg: &Message) -> OutMessage {
        let fields = match RegisterFields::parse(msg) {
            Ok(fields) => fields,
            Err(reason) => return OutMessage::error(&msg.from, reason),
        };

        if let Some(entry) = self.state.skills.get(&fields.name) {
            if entry.versions.contains_key(&fields.version) {
                return OutMessage::error(
                    &msg.from,
                    format!(
                        "Skill with name '{}' version '{}' already exists",
                        fields.name, fields.version
                    ),
                );
            }
            // New versions of an existing name are owner-restricted.
            if entry.owner() != Some(msg.from.as_str()) {
                return OutMessage::error(&msg.from, "unauthorized");
            }
        }

        let skill = SkillVersion {
            name: fields.name.clone(),
            version: fields.version.clone(),
            description: fields.description,
            author: fields.author,
            tags: fields.tags,
            dependencies: fields.dependencies,
            mcp_servers: fields.mcp_servers,
            changelog: fields.changelog,
            owner: msg.from.clone(),
            arweave_tx_id: fields.arweave_tx_id,
            published_at: msg.timestamp,
            updated_at: msg.timestamp,
            download_count: 0,
            download_timestamps: Vec::new(),
        };

        let entry = self.state.skills.entry(fields.name.clone()).or_default();
        let first = entry.versions.is_empty();
        entry.versions.insert(fields.version.clone(), skill);
        if first || version::is_newer(&fields.version, &entry.latest) {
            entry.latest = fields.version.clone();
        }

        self.emit_patch();
        OutMessage::to(&msg.from, "Skill-Registered")
            .with_tag("Name", fields.name)
            .with_tag("Version", fields.version)
    }

    fn update_skill(&mut self, msg: &Message) -> OutMessage {
        let name = match msg.tag("Name") {
            Some(name) => name.to_string(),
            None => return OutMessage::error(&msg.from, "missing Name tag"),
        };
        let Some(entry) = self.state.skills.get_mut(&name) else {
            return OutMessage::error(&msg.from, format!("Skill '{name}' not found"));
        };
        let requested = msg.tag("Version").unwrap_or(&entry.latest).to_string();
        let Some(skill) = entry.versions.get_mut(&requested) else {
            return OutMessage::error(
                &msg.from,
                format!("Skill '{name}' version '{requested}' not found"),
            );
        };

        if skill.owner != msg.from {
            return OutMessage::error(&msg.from, "unauthorized");
        }

        if let Some(description) = msg.tag("Description") {
            if description.is_empty() || description.len() > MAX_DESCRIPTION_LEN {
                return OutMessage::error(&msg.from, "description must be 1..1024 characters");
            }
            skill.description = description.to_string();
        }
        match msg.list_tag("Tags") {
            Ok(tags) if msg.tag("Tags").is_some() => skill.tags = tags,
            Ok(_) => {}
            Err(reason) => return OutMessage::error(&msg.from, reason),
        }
        if let Some(changelog) = msg.tag("Changelog") {
            skill.changelog = Some(changelog.to_string());
        }
        skill.updated_at = msg.timestamp;

        self.emit_patch();
        OutMessage::to(&msg.from, "Skill-Updated")
            .with_tag("Name", name)
            .with_tag("Version", requested)
    }

    fn record_download(&mut self, msg: &Message) -> Option<OutMessage> {
        let name = match msg.tag("Name") {
            Some(name) => name.to_string(),
            None => return Some(OutMessage::error(&msg.from, "missing Name tag")),
        };
        // Unknown skill or version is a silent no-op.
        let entry = self.state.skills.get_mut(&name)?;
        let requested = msg.tag("Version").unwrap_or(&entry.latest).to_string();
        let skill = entry.versions.get_mut(&requested)?;

        skill.download_count += 1;
        skill.download_timestamps.push(msg.timestamp);

        self.emit_patch();
        Some(
            OutMessage::to(&msg.from, "Record-Download-Succeeded")
                .with_tag("Name", name)
                .with_tag("Version", requested),
        )
    }

    // ── Query handlers ───────────────────────────────────────────────

    fn search_skills(&self, msg: &Message) -> OutMessage {
        let query = msg.tag("Query").unwrap_or("").trim().to_lowercase();
        let mut matches: Vec<&SkillVersion> = self
            .state
            .skills
            .values()
            .filter_map(|entry| entry.latest_version())
            .filter(|skill| query.is_empty() || matches_query(skill, &query))
            .collect();
        matches.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.name.cmp(&b.name))
        });

        let results: Vec<serde_json::Value> = matches
            .iter()
            .map(|skill| serde_json::to_value(skill).unwrap_or_default())
            .collect();
        OutMessage::to(&msg.from, "Search-Results")
            .with_tag("Count", results.len().to_string())
            .with_data(serde_json::Value::Array(results))
    }

    fn list_skills(&self, msg: &Message) -> OutMessage {
        let limit = msg
            .tag("Limit")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(10)
            .clamp(1, 100) as usize;
        let offset = msg
            .tag("Offset")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
            .max(0) as usize;
        let filter_author = msg.tag("Author").map(str::to_lowercase);
        let filter_name = msg.tag("FilterName").map(str::to_lowercase);
        let filter_tags = match msg.list_tag("FilterTags") {
            Ok(tags) => tags,
            Err(reason) => return OutMessage::error(&msg.from, reason),
        };

        let mut all: Vec<&SkillVersion> = self
            .state
            .skills
            .values()
            .filter_map(|entry| entry.latest_version())
            .filter(|skill| {
                filter_author
                    .as_ref()
                    .is_none_or(|a| skill.author.to_lowercase() == *a)
            })
            .filter(|skill| {
                filter_name
                    .as_ref()
                    .is_none_or(|n| skill.name.to_lowercase().contains(n))
            })
            .filter(|skill| {
                filter_tags.iter().all(|wanted| {
                    skill
                        .tags
                        .iter()
                        .any(|t| t.eq_ignore_ascii_case(wanted))
                })
            })
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));

        let total = all.len();
        let page: Vec<serde_json::Value> = all
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|skill| serde_json::to_value(skill).unwrap_or_default())
            .collect();
        let returned = page.len();

        OutMessage::to(&msg.from, "List-Skills-Succeeded").with_data(serde_json::json!({
            "skills": page,
            "pagination": {
                "total": total,
                "limit": limit,
                "offset": offset,
                "returned": returned,
                "hasNextPage": offset + returned < total,
                "hasPrevPage": offset > 0,
            },
        }))
    }

    fn get_skill(&self, msg: &Message) -> OutMessage {
        let name = match msg.tag("Name") {
            Some(name) => name,
            None => return OutMessage::error(&msg.from, "missing Name tag"),
        };
        let Some(entry) = self.state.skills.get(name) else {
            return OutMessage::error(&msg.from, format!("Skill '{name}' not found"));
        };
        let requested = msg.tag("Version").unwrap_or(&entry.latest);
        let Some(skill) = entry.versions.get(requested) else {
            return OutMessage::error(
                &msg.from,
                format!("Skill '{name}' version '{requested}' not found"),
            );
        };
        OutMessage::to(&msg.from, "Get-Skill-Succeeded")
            .with_data(serde_json::to_value(skill).unwrap_or_default())
    }

    fn get_skill_versions(&self, msg: &Message) -> OutMessage {
        let name = match msg.tag("Name") {
            Some(name) => name,
            None => return OutMessage::error(&msg.from, "missing Name tag"),
        };
        let Some(entry) = self.state.skills.get(name) else {
            return OutMessage::error(&msg.from, format!("Skill '{name}' not found"));
        };
        let mut versions: Vec<&SkillVersion> = entry.versions.values().collect();
        versions.sort_by(|a, b| version::cmp_desc(&a.version, &b.version));

        OutMessage::to(&msg.from, "Get-Skill-Versions-Succeeded").with_data(serde_json::json!({
            "name": name,
            "latest": entry.latest,
            "versions": versions
                .iter()
                .map(|v| serde_json::to_value(v).unwrap_or_default())
                .collect::<Vec<_>>(),
        }))
    }

    fn get_download_stats(&self, msg: &Message) -> OutMessage {
        let name = match msg.tag("Name") {
            Some(name) => name,
            None => return OutMessage::error(&msg.from, "missing Name tag"),
        };
        let Some(entry) = self.state.skills.get(name) else {
            return OutMessage::error(&msg.from, format!("Skill '{name}' not found"));
        };
        let per_version: BTreeMap<&str, u64> = entry
            .versions
            .iter()
            .map(|(v, skill)| (v.as_str(), skill.download_count))
            .collect();
        let total: u64 = per_version.values().sum();

        OutMessage::to(&msg.from, "Get-Download-Stats-Succeeded").with_data(serde_json::json!({
            "name": name,
            "totalDownloads": total,
            "versions": per_version,
        }))
    }

    fn info(&self, msg: &Message) -> OutMessage {
        OutMessage::to(&msg.from, "Info-Succeeded").with_data(protocol_info())
    }
}

impl Default for RegistryProcess {
    fn default() -> Self {
        Self::new()
    }
}

/// Self-documentation served by the `Info` handler and `/info` read.
pub fn protocol_info() -> serde_json::Value {
    let handler = |name: &str, required: &[&str], optional: &[&str]| {
        serde_json::json!({ "name": name, "required": required, "optional": optional })
    };
    serde_json::json!({
        "process": "permaskill-registry",
        "version": env!("CARGO_PKG_VERSION"),
        "handlers": [
            handler(
                "Register-Skill",
                &["Name", "Version", "Description", "ArweaveTxId"],
                &["Author", "Tags", "Dependencies", "McpServers", "Changelog"],
            ),
            handler("Update-Skill", &["Name"], &["Version", "Description", "Tags", "Changelog"]),
            handler("Search-Skills", &[], &["Query"]),
            handler("List-Skills", &[], &["Limit", "Offset", "Author", "FilterTags", "FilterName"]),
            handler("Get-Skill", &["Name"], &["Version"]),
            handler("Get-Skill-Versions", &["Name"], &[]),
            handler("Record-Download", &["Name"], &["Version"]),
            handler("Get-Download-Stats", &["Name"], &[]),
            handler("Info", &[], &[]),
        ],
    })
}

/// Structural limits applied before dispatch.
fn validate_message(msg: &Message) -> Result<(), String> {
    if msg.tags.len() > MAX_TAGS {
        return Err(format!("too many tags: {} (max {MAX_TAGS})", msg.tags.len()));
    }
    for tag in &msg.tags {
        if tag.value.len() > MAX_TAG_LEN {
            return Err(format!(
                "tag '{}' exceeds {MAX_TAG_LEN} bytes",
                tag.name
            ));
        }
    }
    Ok(())
}

fn matches_query(skill: &SkillVersion, query: &str) -> bool {
    skill.name.to_lowercase().contains(query)
        || skill.description.to_lowercase().contains(query)
        || skill.author.to_lowercase().contains(query)
        || skill.tags.iter().any(|t| t.to_lowercase() == query)
}

/// Parsed and validated `Register-Skill` fields.
struct RegisterFields {
    name: String,
    version: String,
    description: String,
    author: String,
    tags: Vec<String>,
    dependencies: Vec<String>,
    mcp_servers: Vec<String>,
    changelog: Option<String>,
    arweave_tx_id: String,
}

impl RegisterFields {
    fn parse(msg: &Message) -> Result<Self, String> {
        let name = msg.tag("Name").ok_or("missing Name tag")?.to_string();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(format!("name must be 1..{MAX_NAME_LEN} characters"));
        }
        if !name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err("name may only contain lowercase letters, digits, and dashes".to_string());
        }

        let skill_version = msg.tag("Version").ok_or("missing Version tag")?.to_string();
        if !version::is_valid(&skill_version) {
            return Err(format!(
                "invalid version '{skill_version}': expected MAJOR.MINOR.PATCH with digits only"
            ));
        }

        let description = msg
            .tag("Description")
            .ok_or("missing Description tag")?
            .to_string();
        if description.is_empty() || description.len() > MAX_DESCRIPTION_LEN {
            return Err("description must be 1..1024 characters".to_string());
        }

        let arweave_tx_id = msg
            .tag("ArweaveTxId")
            .ok_or("missing ArweaveTxId tag")?
            .to_string();
        if !is_valid_address(&arweave_tx_id) {
            return Err(format!("invalid ArweaveTxId '{arweave_tx_id}'"));
        }

        let tags = msg.list_tag("Tags")?;
        let mut seen = std::collections::HashSet::new();
        for tag in &tags {
            if !seen.insert(tag) {
                return Err(format!("duplicate tag '{tag}'"));
            }
        }

        Ok(Self {
            name,
            version: skill_version,
            description,
            author: msg.tag("Author").unwrap_or("").to_string(),
            tags,
            dependencies: msg.list_tag("Dependencies")?,
            mcp_servers: msg.list_tag("McpServers")?,
            changelog: msg.tag("Changelog").map(str::to_string),
            arweave_tx_id,
        })
    }
}

// ── Mailbox ──────────────────────────────────────────────────────────

type Envelope = (Message, oneshot::Sender<Option<OutMessage>>);

/// Handle to a spawned registry process task.
#[derive(Clone)]
pub struct ProcessHandle {
    mailbox: mpsc::Sender<Envelope>,
}

impl ProcessHandle {
    /// Deliver a message and await the handler's response.
    pub async fn call(&self, msg: Message) -> Option<OutMessage> {
        let (tx, rx) = oneshot::channel();
        if self.mailbox.send((msg, tx)).await.is_err() {
            return None;
        }
        rx.await.unwrap_or(None)
    }
}

/// Spawn the process as a single task draining a mailbox channel.
///
/// Returns the handle plus the patch stream. Strict serialization is by
/// construction: one task, one message at a time.
pub fn spawn(
    process: RegistryProcess,
) -> (ProcessHandle, mpsc::UnboundedReceiver<SkillsSnapshot>) {
    let (patch_tx, patch_rx) = mpsc::unbounded_channel();
    let mut process = process.with_patch_sink(patch_tx);
    let (mailbox_tx, mut mailbox_rx) = mpsc::channel::<Envelope>(64);

    tokio::spawn(async move {
        while let Some((msg, reply)) = mailbox_rx.recv().await {
            let response = process.handle(&msg);
            let _ = reply.send(response);
        }
    });

    (ProcessHandle { mailbox: mailbox_tx }, patch_rx)
}
