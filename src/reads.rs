//! Dynamic reads: pure query functions over a snapshot of registry state.
//!
//! Each read takes the projected `skills` mapping and a flat map of string
//! parameters, and returns a status plus a JSON body. Nothing here mutates
//! or persists; the HTTP layer maps [`ReadResponse::status`] straight onto
//! the HTTP status code (200 ok, 400 bad parameter, 404 not found, 500
//! malformed stored data).

use std::collections::HashMap;

use crate::process::{SkillVersion, SkillsSnapshot};
use crate::version;

/// Query parameters as parsed from the URL, all string-typed.
pub type Params = HashMap<String, String>;

/// A read result: the body carries the same `status` it is served with.
#[derive(Debug, Clone)]
pub struct ReadResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl ReadResponse {
    fn ok(mut body: serde_json::Value) -> Self {
        if let Some(object) = body.as_object_mut() {
            object.insert("status".to_string(), 200.into());
        }
        Self { status: 200, body }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message, "status": status }),
        }
    }
}

/// Latest version of every entry, skipping rows whose `latest` pointer is
/// dangling (those surface as 500 from the per-skill reads).
fn latest_versions(base: &SkillsSnapshot) -> Vec<&SkillVersion> {
    base.values().filter_map(|entry| entry.latest_version()).collect()
}

/// Case-insensitive substring search over name, description, tags, author.
/// Empty query returns all latest versions.
pub fn search_skills(base: &SkillsSnapshot, req: &Params) -> ReadResponse {
    let query = req
        .get("query")
        .map(|q| q.trim().to_lowercase())
        .unwrap_or_default();

    let mut matches: Vec<&SkillVersion> = latest_versions(base)
        .into_iter()
        .filter(|skill| {
            query.is_empty()
                || skill.name.to_lowercase().contains(&query)
                || skill.description.to_lowercase().contains(&query)
                || skill.author.to_lowercase().contains(&query)
                || skill.tags.iter().any(|t| t.to_lowercase().contains(&query))
        })
        .collect();
    matches.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.name.cmp(&b.name))
    });

    ReadResponse::ok(serde_json::json!({
        "skills": matches,
        "count": matches.len(),
    }))
}

/// Single-skill lookup: 400 without `name`, 404 when absent.
pub fn get_skill(base: &SkillsSnapshot, req: &Params) -> ReadResponse {
    let Some(name) = req.get("name").filter(|n| !n.is_empty()) else {
        return ReadResponse::error(400, "missing required parameter 'name'");
    };
    let Some(entry) = base.get(name) else {
        return ReadResponse::error(404, &format!("skill '{name}' not found"));
    };
    let requested = req.get("version").unwrap_or(&entry.latest);
    match entry.versions.get(requested) {
        Some(skill) => ReadResponse::ok(serde_json::json!({ "skill": skill })),
        None if req.get("version").is_none() => ReadResponse::error(
            500,
            &format!("skill '{name}' has a dangling latest pointer"),
        ),
        None => ReadResponse::error(404, &format!("skill '{name}' version '{requested}' not found")),
    }
}

/// Paginated listing, same semantics as the actor's `List-Skills`.
pub fn list_skills(base: &SkillsSnapshot, req: &Params) -> ReadResponse {
    let limit = req
        .get("limit")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(10)
        .clamp(1, 100) as usize;
    let offset = req
        .get("offset")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0)
        .max(0) as usize;
    let author = req.get("author").map(|a| a.to_lowercase());
    let name_filter = req.get("name").map(|n| n.to_lowercase());
    let tag_filter: Vec<String> = req
        .get("tags")
        .map(|t| {
            t.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut all: Vec<&SkillVersion> = latest_versions(base)
        .into_iter()
        .filter(|skill| {
            author
                .as_ref()
                .is_none_or(|a| skill.author.to_lowercase() == *a)
        })
        .filter(|skill| {
            name_filter
                .as_ref()
                .is_none_or(|n| skill.name.to_lowercase().contains(n))
        })
        .filter(|skill| {
            tag_filter
                .iter()
                .all(|wanted| skill.tags.iter().any(|t| t.eq_ignore_ascii_case(wanted)))
        })
        .collect();
    all.sort_by(|a, b| a.name.cmp(&b.name));

    let total = all.len();
    let page: Vec<&SkillVersion> = all.into_iter().skip(offset).take(limit).collect();
    let returned = page.len();

    ReadResponse::ok(serde_json::json!({
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

/// All versions of one skill, sorted semver-descending.
pub fn get_skill_versions(base: &SkillsSnapshot, req: &Params) -> ReadResponse {
    let Some(name) = req.get("name").filter(|n| !n.is_empty()) else {
        return ReadResponse::error(400, "missing required parameter 'name'");
    };
    let Some(entry) = base.get(name) else {
        return ReadResponse::error(404, &format!("skill '{name}' not found"));
    };
    let mut versions: Vec<&SkillVersion> = entry.versions.values().collect();
    versions.sort_by(|a, b| version::cmp_desc(&a.version, &b.version));

    ReadResponse::ok(serde_json::json!({
        "name": name,
        "latest": entry.latest,
        "versions": versions,
    }))
}

/// Total and per-version download counts; zero is a legitimate value.
pub fn get_download_stats(base: &SkillsSnapshot, req: &Params) -> ReadResponse {
    let Some(name) = req.get("name").filter(|n| !n.is_empty()) else {
        return ReadResponse::error(400, "missing required parameter 'name'");
    };
    let Some(entry) = base.get(name) else {
        return ReadResponse::error(404, &format!("skill '{name}' not found"));
    };
    let per_version: std::collections::BTreeMap<&str, u64> = entry
        .versions
        .iter()
        .map(|(v, skill)| (v.as_str(), skill.download_count))
        .collect();
    let total: u64 = per_version.values().sum();

    ReadResponse::ok(serde_json::json!({
        "name": name,
        "totalDownloads": total,
        "versions": per_version,
    }))
}

/// Process self-documentation, identical to the actor's `Info`.
pub fn info(_base: &SkillsSnapshot, _req: &Params) -> ReadResponse {
    ReadResponse::ok(crate::process::protocol_info())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{SkillEntry, SkillVersion};
    use std::collections::BTreeMap;

    fn skill(name: &str, skill_version: &str, updated_at: u64) -> SkillVersion {
        SkillVersion {
            name: name.to_string(),
            version: skill_version.to_string(),
            description: format!("Description of {name}"),
            author: "Permamind".to_string(),
            tags: vec!["ao".to_string()],
            dependencies: Vec::new(),
            mcp_servers: Vec::new(),
            changelog: None,
            owner: "O".repeat(43),
            arweave_tx_id: "T".repeat(43),
            published_at: updated_at,
            updated_at,
            download_count: 0,
            download_timestamps: Vec::new(),
        }
    }

    fn snapshot(names: &[(&str, &[&str])]) -> SkillsSnapshot {
        let mut base = BTreeMap::new();
        for (i, (name, skill_versions)) in names.iter().enumerate() {
            let mut versions = BTreeMap::new();
            let mut latest = String::new();
            for v in skill_versions.iter() {
                versions.insert(v.to_string(), skill(name, v, i as u64));
                if latest.is_empty() || crate::version::is_newer(v, &latest) {
                    latest = v.to_string();
                }
            }
            base.insert(
                name.to_string(),
                SkillEntry { versions, latest },
            );
        }
        base
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_search_empty_query_returns_all() {
        let base = snapshot(&[("a", &["1.0.0"]), ("b", &["1.0.0", "2.0.0"])]);
        let response = search_skills(&base, &Params::new());
        assert_eq!(response.status, 200);
        assert_eq!(response.body["count"], 2);
        assert_eq!(response.body["status"], 200);
    }

    #[test]
    fn test_search_substring_and_tags() {
        let base = snapshot(&[("ao-basics", &["1.0.0"]), ("pixel-tool", &["1.0.0"])]);
        let response = search_skills(&base, &params(&[("query", "BASIC")]));
        assert_eq!(response.body["count"], 1);
        assert_eq!(response.body["skills"][0]["name"], "ao-basics");

        // Tag substring matches too on the read path.
        let response = search_skills(&base, &params(&[("query", "ao")]));
        assert_eq!(response.body["count"], 2);
    }

    #[test]
    fn test_get_skill_status_codes() {
        let base = snapshot(&[("ao-basics", &["1.0.0"])]);

        assert_eq!(get_skill(&base, &Params::new()).status, 400);
        assert_eq!(get_skill(&base, &params(&[("name", "ghost")])).status, 404);
        let ok = get_skill(&base, &params(&[("name", "ao-basics")]));
        assert_eq!(ok.status, 200);
        assert_eq!(ok.body["skill"]["version"], "1.0.0");
        assert_eq!(
            get_skill(&base, &params(&[("name", "ao-basics"), ("version", "9.9.9")])).status,
            404
        );
    }

    #[test]
    fn test_get_skill_dangling_latest_is_500() {
        let mut base = snapshot(&[("broken", &["1.0.0"])]);
        base.get_mut("broken").unwrap().latest = "9.9.9".to_string();
        let response = get_skill(&base, &params(&[("name", "broken")]));
        assert_eq!(response.status, 500);
    }

    #[test]
    fn test_list_pagination_matches_actor_semantics() {
        let names: Vec<String> = (0..21).map(|i| format!("skill-{i:02}")).collect();
        let seeded: Vec<(&str, &[&str])> =
            names.iter().map(|n| (n.as_str(), &["1.0.0"][..])).collect();
        let base = snapshot(&seeded);

        let page = list_skills(&base, &params(&[("limit", "10"), ("offset", "20")]));
        assert_eq!(page.body["skills"].as_array().unwrap().len(), 1);
        assert_eq!(page.body["pagination"]["hasNextPage"], false);
        assert_eq!(page.body["pagination"]["hasPrevPage"], true);

        let clamped = list_skills(&base, &params(&[("limit", "1000")]));
        assert_eq!(clamped.body["pagination"]["limit"], 100);

        let clamped = list_skills(&base, &params(&[("limit", "0")]));
        assert_eq!(clamped.body["pagination"]["limit"], 1);
    }

    #[test]
    fn test_versions_sorted_desc() {
        let base = snapshot(&[("s", &["1.0.0", "10.0.0", "2.0.0"])]);
        let response = get_skill_versions(&base, &params(&[("name", "s")]));
        assert_eq!(response.status, 200);
        let versions: Vec<&str> = response.body["versions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["version"].as_str().unwrap())
            .collect();
        assert_eq!(versions, vec!["10.0.0", "2.0.0", "1.0.0"]);
        assert_eq!(response.body["latest"], "10.0.0");
    }

    #[test]
    fn test_download_stats_zero() {
        let base = snapshot(&[("s", &["1.0.0"])]);
        let response = get_download_stats(&base, &params(&[("name", "s")]));
        assert_eq!(response.status, 200);
        assert_eq!(response.body["totalDownloads"], 0);
    }

    #[test]
    fn test_download_stats_requires_name() {
        let base = snapshot(&[]);
        assert_eq!(get_download_stats(&base, &Params::new()).status, 400);
    }

    #[test]
    fn test_info_matches_actor() {
        let base = snapshot(&[]);
        let response = info(&base, &Params::new());
        assert_eq!(response.status, 200);
        assert_eq!(response.body["process"], "permaskill-registry");
    }

    #[test]
    fn test_reads_do_not_mutate() {
        let base = snapshot(&[("s", &["1.0.0"])]);
        let before = serde_json::to_value(&base).unwrap();
        search_skills(&base, &Params::new());
        list_skills(&base, &Params::new());
        get_skill(&base, &params(&[("name", "s")]));
        assert_eq!(serde_json::to_value(&base).unwrap(), before);
    }
}
