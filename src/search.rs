//! Search orchestrator: normalized, cached registry search with optional
//! tag filtering.

use crate::client::{MessageTransport, RegistryClient};
use crate::error::Result;
use crate::process::SkillVersion;

/// Search the registry. The query is normalized (trimmed, lowercased)
/// before hitting the cache; an empty query lists all skills, latest
/// versions only. `tag_filters` applies AND semantics with exact
/// case-insensitive membership.
pub async fn search<T: MessageTransport>(
    client: &RegistryClient<T>,
    query: &str,
    tag_filters: &[String],
) -> Result<Vec<SkillVersion>> {
    let results = client.search(query).await?;
    if tag_filters.is_empty() {
        return Ok(results);
    }
    Ok(results
        .into_iter()
        .filter(|skill| {
            tag_filters
                .iter()
                .all(|wanted| skill.tags.iter().any(|t| t.eq_ignore_ascii_case(wanted)))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Tag;
    use crate::testutil::LocalTransport;

    const OWNER: &str = "OWNERAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

    fn client() -> RegistryClient<LocalTransport> {
        let transport = LocalTransport::new();
        for (name, tags) in [
            ("ao-basics", r#"["ao","basics"]"#),
            ("ao-advanced", r#"["ao","advanced"]"#),
            ("pixel-art", r#"["graphics"]"#),
        ] {
            let response = transport
                .deliver(
                    OWNER,
                    &[
                        Tag::new("Action", "Register-Skill"),
                        Tag::new("Name", name),
                        Tag::new("Version", "1.0.0"),
                        Tag::new("Description", format!("The {name} skill")),
                        Tag::new("Author", "Permamind"),
                        Tag::new("ArweaveTxId", "T".repeat(43)),
                        Tag::new("Tags", tags),
                    ],
                )
                .unwrap();
            assert_eq!(response.action(), "Skill-Registered");
        }
        RegistryClient::new(transport)
    }

    #[tokio::test]
    async fn test_empty_query_lists_all() {
        let client = client();
        let results = search(&client, "", &[]).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_whitespace_query_lists_all() {
        let client = client();
        let results = search(&client, "   ", &[]).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_substring_match() {
        let client = client();
        let results = search(&client, "ao-", &[]).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_tag_filters_and_semantics() {
        let client = client();
        let results = search(&client, "", &["ao".to_string()]).await.unwrap();
        assert_eq!(results.len(), 2);

        let results = search(&client, "", &["ao".to_string(), "basics".to_string()])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "ao-basics");

        let results = search(&client, "", &["ao".to_string(), "graphics".to_string()])
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_repeat_search_hits_cache() {
        let client = client();
        let first = search(&client, "AO-Basics", &[]).await.unwrap();
        let second = search(&client, "  ao-basics ", &[]).await.unwrap();
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }
}
