//! Skill manifest: SKILL.md frontmatter parsing and validation.
//!
//! A skill directory carries its identity as YAML frontmatter at the top of
//! `SKILL.md`, fenced by `---` lines. Parsing enforces the publish-time
//! schema and splits declared requirements into installable skill
//! dependencies and informational MCP servers.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::process::Tag;
use crate::version;

const MAX_NAME_LEN: usize = 64;
const MAX_DESCRIPTION_LEN: usize = 1024;

/// The prefix that classifies an identifier as an MCP server. Matching is
/// case-sensitive: `MCP__` and `Mcp__` are ordinary skill names.
pub const MCP_PREFIX: &str = "mcp__";

/// True iff `identifier` names an MCP server rather than an installable skill.
pub fn is_mcp_server(identifier: &str) -> bool {
    identifier.starts_with(MCP_PREFIX)
}

/// Compile-time skill identity parsed from SKILL.md frontmatter.
///
/// Unknown keys fail validation rather than being silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SkillManifest {
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
}

/// A parsed manifest plus any non-blocking publish-time warnings.
#[derive(Debug)]
pub struct ParsedManifest {
    pub manifest: SkillManifest,
    pub warnings: Vec<String>,
}

impl SkillManifest {
    /// Dependencies the installer should resolve: everything not classified
    /// as an MCP server.
    pub fn install_dependencies(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .map(String::as_str)
            .filter(|d| !is_mcp_server(d))
            .collect()
    }

    /// MCP-server requirements: the declared `mcpServers` plus any
    /// misplaced `mcp__` entries found in `dependencies`.
    pub fn mcp_requirements(&self) -> Vec<&str> {
        let mut all: Vec<&str> = self.mcp_servers.iter().map(String::as_str).collect();
        for dep in &self.dependencies {
            if is_mcp_server(dep) && !all.contains(&dep.as_str()) {
                all.push(dep);
            }
        }
        all
    }

    /// Build the `Register-Skill` tag set for this manifest.
    pub fn registration_tags(&self, arweave_tx_id: &str) -> Result<Vec<Tag>> {
        let mut tags = vec![
            Tag::new("Action", "Register-Skill"),
            Tag::new("Name", &self.name),
            Tag::new("Version", &self.version),
            Tag::new("Description", &self.description),
            Tag::new("Author", &self.author),
            Tag::new("ArweaveTxId", arweave_tx_id),
        ];
        if !self.tags.is_empty() {
            tags.push(Tag::new("Tags", json_list(&self.tags)?));
        }
        if !self.dependencies.is_empty() {
            tags.push(Tag::new("Dependencies", json_list(&self.dependencies)?));
        }
        if !self.mcp_servers.is_empty() {
            tags.push(Tag::new("McpServers", json_list(&self.mcp_servers)?));
        }
        if let Some(changelog) = &self.changelog {
            tags.push(Tag::new("Changelog", changelog));
        }
        Ok(tags)
    }
}

fn json_list(items: &[String]) -> Result<String> {
    serde_json::to_string(items)
        .map_err(|e| Error::validation("failed to serialize manifest list").with_cause(e))
}

/// Parse and validate the manifest of a skill directory.
pub fn parse_dir(dir: &Path) -> Result<ParsedManifest> {
    let path = dir.join("SKILL.md");
    if !path.is_file() {
        return Err(Error::validation(format!(
            "no SKILL.md found in {}",
            dir.display()
        ))
        .with_solution("add a SKILL.md with YAML frontmatter to the skill directory"));
    }
    let content = std::fs::read_to_string(&path).map_err(|e| {
        Error::filesystem(format!("failed to read {}", path.display())).with_cause(e)
    })?;
    parse_str(&content)
}

/// Parse and validate SKILL.md content.
pub fn parse_str(content: &str) -> Result<ParsedManifest> {
    let frontmatter = extract_frontmatter(content)?;
    let manifest: SkillManifest = serde_yaml::from_str(frontmatter).map_err(|e| {
        Error::validation(format!("invalid SKILL.md frontmatter: {e}"))
            .with_solution("fix the named field in the frontmatter")
    })?;
    let warnings = validate(&manifest)?;
    Ok(ParsedManifest { manifest, warnings })
}

/// The YAML between the leading `---` fence and its closing `---` line.
fn extract_frontmatter(content: &str) -> Result<&str> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
        .ok_or_else(|| {
            Error::validation("SKILL.md does not start with a '---' frontmatter fence")
                .with_solution("begin SKILL.md with '---', the YAML fields, then a closing '---'")
        })?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Ok(&rest[..offset]);
        }
        offset += line.len();
    }
    Err(Error::validation(
        "SKILL.md frontmatter is missing its closing '---' fence",
    ))
}

/// Schema bounds and the dependency/MCP split rules. Returns the
/// non-blocking warnings.
fn validate(manifest: &SkillManifest) -> Result<Vec<String>> {
    if manifest.name.is_empty() || manifest.name.len() > MAX_NAME_LEN {
        return Err(Error::validation(format!(
            "field 'name' must be 1..{MAX_NAME_LEN} characters"
        )));
    }
    if !manifest
        .name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(Error::validation(
            "field 'name' may only contain lowercase letters, digits, and dashes",
        )
        .with_solution("rename the skill, e.g. my-skill-2"));
    }
    if !version::is_valid(&manifest.version) {
        return Err(Error::validation(format!(
            "field 'version' is '{}': expected MAJOR.MINOR.PATCH with digits only",
            manifest.version
        )));
    }
    if manifest.description.is_empty() || manifest.description.len() > MAX_DESCRIPTION_LEN {
        return Err(Error::validation(format!(
            "field 'description' must be 1..{MAX_DESCRIPTION_LEN} characters"
        )));
    }

    let mut seen = std::collections::HashSet::new();
    for tag in &manifest.tags {
        if !seen.insert(tag.as_str()) {
            return Err(Error::validation(format!(
                "field 'tags' contains duplicate '{tag}'"
            )));
        }
    }

    for server in &manifest.mcp_servers {
        if !is_mcp_server(server) {
            return Err(Error::validation(format!(
                "field 'mcpServers' entry '{server}' must start with '{MCP_PREFIX}'"
            )));
        }
    }

    for dep in &manifest.dependencies {
        if manifest.mcp_servers.iter().any(|s| s == dep) {
            return Err(Error::validation(format!(
                "'{dep}' appears in both 'dependencies' and 'mcpServers'"
            )));
        }
    }

    // Misplaced MCP entries warn but never block: older manifests predate
    // the mcpServers field.
    let warnings = manifest
        .dependencies
        .iter()
        .filter(|d| is_mcp_server(d))
        .map(|d| {
            format!(
                "dependency '{d}' looks like an MCP server; move it to the mcpServers field"
            )
        })
        .collect();

    Ok(warnings)
}
