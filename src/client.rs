//! Registry client: signed mutating messages and cached queries.
//!
//! Wraps the actor message-passing primitive behind [`MessageTransport`].
//! Mutations are signed as data items and submitted; the actor answers with
//! `<Action>-Succeeded`-style messages or `Error`. Queries go through the
//! dry-run evaluation path and are fronted by the search and metadata
//! caches, so repeated reads stay off the network.

use serde::de::DeserializeOwned;

use crate::cache::{MetadataCache, SearchCache};
use crate::error::{Error, Result};
use crate::process::{OutMessage, SkillVersion, Tag};
use crate::signer::{SignedItem, Signer};

/// Sender address used for unsigned dry-run queries.
const QUERY_FROM: &str = "QUERYAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// The transport seam between the client and the registry actor. The
/// network implementation is [`HttpTransport`]; tests drive an in-process
/// actor instead.
pub trait MessageTransport {
    /// Submit a signed mutating message and await the actor's response.
    /// `None` means the actor chose not to respond (silent no-op handlers).
    fn send(&self, item: &SignedItem) -> impl Future<Output = Result<Option<OutMessage>>>;

    /// Evaluate a query against live state without writing anything.
    fn dry_run(&self, from: &str, tags: &[Tag]) -> impl Future<Output = Result<Option<OutMessage>>>;
}

/// HTTP transport posting to an AO-style compute endpoint.
pub struct HttpTransport {
    http: reqwest::Client,
    base: String,
    process: String,
}

#[derive(serde::Deserialize)]
struct WireResponse {
    tags: Vec<Tag>,
    #[serde(default)]
    data: Option<String>,
}

impl HttpTransport {
    pub fn new(base: &str, process: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("permaskill/", env!("CARGO_PKG_VERSION")))
            .timeout(crate::gateway::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::network("failed to build the HTTP client").with_cause(e))?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            process: process.to_string(),
        })
    }

    async fn post(&self, url: String, body: serde_json::Value) -> Result<Option<OutMessage>> {
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::network(format!("registry request to {url} failed")).with_cause(e))?;
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::network(format!(
                "registry answered HTTP {}",
                response.status()
            )));
        }
        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| Error::network("registry response is not JSON").with_cause(e))?;
        Ok(Some(OutMessage {
            target: String::new(),
            tags: wire.tags,
            data: wire.data,
        }))
    }
}

impl MessageTransport for HttpTransport {
    async fn send(&self, item: &SignedItem) -> Result<Option<OutMessage>> {
        let body: serde_json::Value = serde_json::from_slice(&item.raw)
            .map_err(|e| Error::validation("signed item is not serializable").with_cause(e))?;
        self.post(format!("{}/message/{}", self.base, self.process), body)
            .await
    }

    async fn dry_run(&self, from: &str, tags: &[Tag]) -> Result<Option<OutMessage>> {
        let body = serde_json::json!({ "from": from, "tags": tags });
        self.post(format!("{}/dry-run/{}", self.base, self.process), body)
            .await
    }
}

/// Receipt of an accepted mutating message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// The signed message's 43-char id.
    pub message_id: String,
    pub action: String,
}

/// Options for `List-Skills`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub name: Option<String>,
}

/// Versions listing for one skill.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct VersionList {
    pub name: String,
    pub latest: String,
    pub versions: Vec<SkillVersion>,
}

/// Download statistics for one skill.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStats {
    pub name: String,
    pub total_downloads: u64,
    pub versions: std::collections::BTreeMap<String, u64>,
}

/// One page of a `List-Skills` response.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ListPage {
    pub skills: Vec<SkillVersion>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub returned: usize,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

/// Client over a transport, owning the process-wide caches.
pub struct RegistryClient<T: MessageTransport> {
    transport: T,
    search_cache: SearchCache,
    metadata_cache: MetadataCache,
}

impl<T: MessageTransport> RegistryClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            search_cache: SearchCache::new(),
            metadata_cache: MetadataCache::new(),
        }
    }

    /// Sign and submit a mutating action.
    pub async fn send_action(&self, signer: &Signer, tags: Vec<Tag>) -> Result<SendReceipt> {
        let action = tags
            .iter()
            .find(|t| t.name == "Action")
            .map(|t| t.value.clone())
            .ok_or_else(|| Error::validation("message has no Action tag"))?;
        tracing::debug!(%action, signer = signer.describe_source(), "sending message");
        let item = signer.sign_data_item(&[], &tags).await?;
        let response = self.transport.send(&item).await?;
        match response {
            Some(response) => {
                expect_success(&response)?;
                Ok(SendReceipt {
                    message_id: item.id,
                    action: response.action().to_string(),
                })
            }
            // Silent handlers acknowledge by not responding.
            None => Ok(SendReceipt {
                message_id: item.id,
                action: String::new(),
            }),
        }
    }

    /// Register a skill version; duplicate `name@version` surfaces as
    /// `Validation`.
    pub async fn register_skill(&self, signer: &Signer, tags: Vec<Tag>) -> Result<SendReceipt> {
        self.send_action(signer, tags).await
    }

    /// Record a completed download. Callers treat failures as non-fatal.
    pub async fn record_download(
        &self,
        signer: &Signer,
        name: &str,
        skill_version: &str,
    ) -> Result<()> {
        let tags = vec![
            Tag::new("Action", "Record-Download"),
            Tag::new("Name", name),
            Tag::new("Version", skill_version),
        ];
        self.send_action(signer, tags).await?;
        Ok(())
    }

    /// Search the registry. Normalizes the query and serves repeats from
    /// the search cache within its TTL.
    pub async fn search(&self, query: &str) -> Result<Vec<SkillVersion>> {
        let normalized = query.trim().to_lowercase();
        if let Some(hit) = self.search_cache.get(&normalized) {
            tracing::debug!(query = %normalized, "search cache hit");
            return Ok(hit);
        }

        let tags = vec![
            Tag::new("Action", "Search-Skills"),
            Tag::new("Query", normalized.clone()),
        ];
        let response = self.query(&tags).await?;
        let results: Vec<SkillVersion> = parse_data(&response)?;
        self.search_cache.put(&normalized, results.clone());
        Ok(results)
    }

    /// Fetch one skill's metadata, `None` when the registry has no such
    /// name/version. Hits populate the resolver's metadata cache.
    pub async fn get_skill(
        &self,
        name: &str,
        skill_version: Option<&str>,
    ) -> Result<Option<SkillVersion>> {
        let key = match skill_version {
            Some(v) => format!("{name}@{v}"),
            None => name.to_string(),
        };
        if let Some(hit) = self.metadata_cache.get(&key) {
            tracing::debug!(%key, "metadata cache hit");
            return Ok(Some(hit));
        }

        let mut tags = vec![Tag::new("Action", "Get-Skill"), Tag::new("Name", name)];
        if let Some(v) = skill_version {
            tags.push(Tag::new("Version", v));
        }
        let response = match self.transport.dry_run(QUERY_FROM, &tags).await? {
            Some(response) => response,
            None => return Ok(None),
        };
        if response.action() == "Error" {
            if response
                .error_reason()
                .is_some_and(|r| r.contains("not found"))
            {
                return Ok(None);
            }
            return Err(classify_actor_error(&response));
        }

        let skill: SkillVersion = parse_data(&response)?;
        self.metadata_cache.put(&key, skill.clone());
        self.metadata_cache
            .put(&format!("{}@{}", skill.name, skill.version), skill.clone());
        Ok(Some(skill))
    }

    /// All versions of a skill, newest first.
    pub async fn get_skill_versions(&self, name: &str) -> Result<VersionList> {
        let tags = vec![
            Tag::new("Action", "Get-Skill-Versions"),
            Tag::new("Name", name),
        ];
        parse_data(&self.query(&tags).await?)
    }

    /// Download statistics for a skill.
    pub async fn get_download_stats(&self, name: &str) -> Result<DownloadStats> {
        let tags = vec![
            Tag::new("Action", "Get-Download-Stats"),
            Tag::new("Name", name),
        ];
        parse_data(&self.query(&tags).await?)
    }

    /// Paginated listing with optional filters.
    pub async fn list_skills(&self, options: &ListOptions) -> Result<ListPage> {
        let mut tags = vec![Tag::new("Action", "List-Skills")];
        if let Some(limit) = options.limit {
            tags.push(Tag::new("Limit", limit.to_string()));
        }
        if let Some(offset) = options.offset {
            tags.push(Tag::new("Offset", offset.to_string()));
        }
        if let Some(author) = &options.author {
            tags.push(Tag::new("Author", author));
        }
        if !options.tags.is_empty() {
            let encoded = serde_json::to_string(&options.tags)
                .map_err(|e| Error::validation("failed to encode tag filter").with_cause(e))?;
            tags.push(Tag::new("FilterTags", encoded));
        }
        if let Some(name) = &options.name {
            tags.push(Tag::new("FilterName", name));
        }
        parse_data(&self.query(&tags).await?)
    }

    /// The registry's self-documentation.
    pub async fn info(&self) -> Result<serde_json::Value> {
        let tags = vec![Tag::new("Action", "Info")];
        parse_data(&self.query(&tags).await?)
    }

    async fn query(&self, tags: &[Tag]) -> Result<OutMessage> {
        let response = self
            .transport
            .dry_run(QUERY_FROM, tags)
            .await?
            .ok_or_else(|| Error::network("registry returned no response"))?;
        expect_success(&response)?;
        Ok(response)
    }

    /// Drop both caches (for tests).
    pub fn clear_caches(&self) {
        self.search_cache.clear();
        self.metadata_cache.clear();
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

/// Map an actor `Error` response onto the taxonomy.
fn classify_actor_error(response: &OutMessage) -> Error {
    let reason = response.error_reason().unwrap_or("unknown error").to_string();
    let lowered = reason.to_lowercase();
    if lowered.contains("unauthorized")
        || lowered.contains("rejected")
        || lowered.contains("denied")
        || lowered.contains("insufficient")
    {
        Error::authorization(reason)
    } else {
        Error::validation(reason)
    }
}

fn expect_success(response: &OutMessage) -> Result<()> {
    if response.action() == "Error" {
        Err(classify_actor_error(response))
    } else {
        Ok(())
    }
}

fn parse_data<V: DeserializeOwned>(response: &OutMessage) -> Result<V> {
    let data = response
        .data
        .as_deref()
        .ok_or_else(|| Error::network("registry response carried no data"))?;
    serde_json::from_str(data)
        .map_err(|e| Error::network("registry response data is malformed").with_cause(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::LocalTransport;

    fn registration_tags(name: &str, skill_version: &str) -> Vec<Tag> {
        vec![
            Tag::new("Action", "Register-Skill"),
            Tag::new("Name", name),
            Tag::new("Version", skill_version),
            Tag::new("Description", "A test skill"),
            Tag::new("Author", "Permamind"),
            Tag::new("ArweaveTxId", "T".repeat(43)),
        ]
    }

    fn client() -> RegistryClient<LocalTransport> {
        RegistryClient::new(LocalTransport::new())
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let client = client();
        let signer = crate::testutil::test_signer();

        let receipt = client
            .register_skill(&signer, registration_tags("ao-basics", "1.0.0"))
            .await
            .unwrap();
        assert_eq!(receipt.action, "Skill-Registered");
        assert_eq!(receipt.message_id.len(), 43);

        let skill = client.get_skill("ao-basics", None).await.unwrap().unwrap();
        assert_eq!(skill.version, "1.0.0");
        assert_eq!(skill.owner, signer.address());
    }

    #[tokio::test]
    async fn test_duplicate_register_is_validation() {
        let client = client();
        let signer = crate::testutil::test_signer();
        client
            .register_skill(&signer, registration_tags("ao-basics", "1.0.0"))
            .await
            .unwrap();

        let err = client
            .register_skill(&signer, registration_tags("ao-basics", "1.0.0"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_authorization() {
        let client = client();
        let owner = crate::testutil::test_signer();
        let thief = crate::testutil::other_signer();

        client
            .register_skill(&owner, registration_tags("ao-basics", "1.0.0"))
            .await
            .unwrap();
        let err = client
            .register_skill(&thief, registration_tags("ao-basics", "1.1.0"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn test_get_skill_missing_is_none() {
        let client = client();
        assert!(client.get_skill("ghost", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_caches_results() {
        let client = client();
        let signer = crate::testutil::test_signer();
        client
            .register_skill(&signer, registration_tags("ao-basics", "1.0.0"))
            .await
            .unwrap();

        let first = client.search("  AO-Basics  ").await.unwrap();
        assert_eq!(first.len(), 1);

        // Register another match; the cached result must be returned as-is
        // for the normalized query within the TTL.
        client
            .register_skill(&signer, registration_tags("ao-basics-two", "1.0.0"))
            .await
            .unwrap();
        let second = client.search("ao-basics").await.unwrap();
        assert_eq!(second.len(), 1);

        client.clear_caches();
        let third = client.search("ao-basics").await.unwrap();
        assert_eq!(third.len(), 2);
    }

    #[tokio::test]
    async fn test_get_skill_uses_metadata_cache() {
        let client = client();
        let signer = crate::testutil::test_signer();
        client
            .register_skill(&signer, registration_tags("ao-basics", "1.0.0"))
            .await
            .unwrap();

        client.get_skill("ao-basics", None).await.unwrap().unwrap();
        // The versioned key was primed by the unversioned fetch.
        let hit = client
            .get_skill("ao-basics", Some("1.0.0"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.version, "1.0.0");
    }

    #[tokio::test]
    async fn test_record_download_round_trip() {
        let client = client();
        let signer = crate::testutil::test_signer();
        client
            .register_skill(&signer, registration_tags("ao-basics", "1.0.0"))
            .await
            .unwrap();
        client
            .record_download(&signer, "ao-basics", "1.0.0")
            .await
            .unwrap();

        let stats = client.get_download_stats("ao-basics").await.unwrap();
        assert_eq!(stats.total_downloads, 1);
        assert_eq!(stats.versions["1.0.0"], 1);
    }

    #[tokio::test]
    async fn test_record_download_unknown_skill_is_ok() {
        let client = client();
        let signer = crate::testutil::test_signer();
        // Silent no-op on the actor side; the client sees success.
        client.record_download(&signer, "ghost", "1.0.0").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_skills_pagination() {
        let client = client();
        let signer = crate::testutil::test_signer();
        for i in 0..15 {
            client
                .register_skill(&signer, registration_tags(&format!("skill-{i:02}"), "1.0.0"))
                .await
                .unwrap();
        }

        let page = client
            .list_skills(&ListOptions {
                limit: Some(10),
                offset: Some(10),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.skills.len(), 5);
        assert_eq!(page.pagination.total, 15);
        assert!(!page.pagination.has_next_page);
        assert!(page.pagination.has_prev_page);
    }

    #[tokio::test]
    async fn test_versions_sorted_desc() {
        let client = client();
        let signer = crate::testutil::test_signer();
        for v in ["1.0.0", "2.0.0", "1.5.0"] {
            client
                .register_skill(&signer, registration_tags("ao-basics", v))
                .await
                .unwrap();
        }

        let list = client.get_skill_versions("ao-basics").await.unwrap();
        assert_eq!(list.latest, "2.0.0");
        let order: Vec<&str> = list.versions.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(order, vec!["2.0.0", "1.5.0", "1.0.0"]);
    }

    #[tokio::test]
    async fn test_info() {
        let client = client();
        let info = client.info().await.unwrap();
        assert_eq!(info["process"], "permaskill-registry");
        assert!(info["handlers"].as_array().unwrap().len() >= 9);
    }
}
