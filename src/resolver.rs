//! Dependency resolver: memoized, cycle-safe graph walk over the registry.
//!
//! Resolves a root skill spec into an install plan: a dependency tree plus a
//! flat, topologically ordered list (leaves first, root last, no
//! duplicates). Metadata comes through the client's LRU cache, so repeated
//! resolves stay cheap. `mcp__`-prefixed dependencies never enter the walk;
//! they are collected on a side channel for the caller to report.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use crate::client::{MessageTransport, RegistryClient};
use crate::error::{Error, Result};
use crate::manifest::is_mcp_server;
use crate::process::SkillVersion;
use crate::version;

/// Reject any dependency path deeper than this.
pub const MAX_DEPTH: usize = 10;

/// One node of the resolved dependency tree.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub name: String,
    pub version: String,
    pub depth: usize,
    pub children: Vec<DependencyNode>,
}

/// The product of a resolve: tree, flat install order, and MCP-server
/// requirements discovered along the way.
#[derive(Debug)]
pub struct InstallPlan {
    pub root: DependencyNode,
    /// Topological order: every node's dependencies precede it; the root is
    /// last; each skill appears exactly once.
    pub order: Vec<SkillVersion>,
    /// MCP servers referenced anywhere in the graph, in discovery order.
    pub mcp_servers: Vec<String>,
}

/// Resolve `spec` (`name` or `name@version`) into an install plan.
pub async fn resolve<T: MessageTransport>(
    client: &RegistryClient<T>,
    spec: &str,
) -> Result<InstallPlan> {
    let (name, pinned) = version::split_spec(spec)?;
    let mut walker = Walker {
        client,
        visiting: Vec::new(),
        visited: HashSet::new(),
        order: Vec::new(),
        mcp_servers: Vec::new(),
    };

    let root = walker
        .walk(name.to_string(), pinned.map(str::to_string), 0)
        .await?
        .ok_or_else(|| {
            Error::dependency(format!("skill '{name}' not found in the registry"))
                .with_solution("check the name with `permaskill search`")
        })?;

    Ok(InstallPlan {
        root,
        order: walker.order,
        mcp_servers: walker.mcp_servers,
    })
}

struct Walker<'a, T: MessageTransport> {
    client: &'a RegistryClient<T>,
    /// DFS path from the root, for cycle reporting.
    visiting: Vec<String>,
    visited: HashSet<String>,
    order: Vec<SkillVersion>,
    mcp_servers: Vec<String>,
}

impl<T: MessageTransport> Walker<'_, T> {
    /// Post-order DFS. Returns `None` when a non-root node is missing from
    /// the registry (warned and skipped) or already resolved.
    fn walk(
        &mut self,
        name: String,
        pinned: Option<String>,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Option<DependencyNode>>> + '_>> {
        Box::pin(async move {
            if depth > MAX_DEPTH {
                return Err(Error::dependency(format!(
                    "maximum dependency depth exceeded ({MAX_DEPTH}) at '{name}'"
                ))
                .with_solution("break the dependency chain into smaller skills"));
            }

            if let Some(position) = self.visiting.iter().position(|v| v == &name) {
                let mut cycle = self.visiting[position..].join(" -> ");
                cycle.push_str(&format!(" -> {name}"));
                return Err(Error::dependency(format!("cycle: {cycle}"))
                    .with_solution("remove one of the dependencies forming the cycle"));
            }
            if self.visited.contains(&name) {
                // Shared dependency, already planned.
                return Ok(None);
            }

            let skill = match self.client.get_skill(&name, pinned.as_deref()).await? {
                Some(skill) => skill,
                None if depth == 0 => return Ok(None),
                None => {
                    tracing::warn!(skill = %name, "dependency not found in registry, skipping");
                    self.visited.insert(name);
                    return Ok(None);
                }
            };

            self.visiting.push(name.clone());
            let mut children = Vec::new();
            for dep in &skill.dependencies {
                if is_mcp_server(dep) {
                    if !self.mcp_servers.iter().any(|s| s == dep) {
                        self.mcp_servers.push(dep.clone());
                    }
                    continue;
                }
                let (dep_name, dep_pin) = version::split_spec(dep)?;
                if let Some(child) = self
                    .walk(dep_name.to_string(), dep_pin.map(str::to_string), depth + 1)
                    .await?
                {
                    children.push(child);
                }
            }
            for server in &skill.mcp_servers {
                if !self.mcp_servers.iter().any(|s| s == server) {
                    self.mcp_servers.push(server.clone());
                }
            }
            self.visiting.pop();
            self.visited.insert(name.clone());

            let node = DependencyNode {
                name,
                version: skill.version.clone(),
                depth,
                children,
            };
            self.order.push(skill);
            Ok(Some(node))
        })
    }
}
