//! CLI configuration: `.skillsrc` loading, env overrides, and install paths.
//!
//! Config is a JSON object with keys `wallet`, `registry`, `gateway`, and
//! optionally `bundler` and `gatewayFallbacks`. A project-root `.skillsrc`
//! overrides the home-directory one field by field; environment variables
//! override both.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default primary gateway for uploads and downloads.
pub const DEFAULT_GATEWAY: &str = "https://arweave.net";

/// Fallback gateways tried in order when the primary download fails.
pub const DEFAULT_GATEWAY_FALLBACKS: &[&str] = &["https://ar-io.net", "https://permagate.io"];

/// Default subsidized bundler service for free-tier uploads.
pub const DEFAULT_BUNDLER: &str = "https://turbo.ardrive.io";

/// On-disk `.skillsrc` shape. Unknown keys are rejected so typos surface.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct FileConfig {
    wallet: Option<String>,
    registry: Option<String>,
    gateway: Option<String>,
    bundler: Option<String>,
    gateway_fallbacks: Option<Vec<String>>,
}

/// Fully resolved CLI configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to a wallet keyfile, tilde-expanded.
    pub wallet: Option<PathBuf>,
    /// 12-word seed phrase from `SEED_PHRASE` (never read from file config).
    pub seed_phrase: Option<String>,
    /// 43-char registry process address.
    pub registry: Option<String>,
    /// Primary gateway URL (HTTPS required).
    pub gateway: String,
    /// Extra gateways tried after the primary on download failure.
    pub gateway_fallbacks: Vec<String>,
    /// Bundler service URL for free-tier uploads.
    pub bundler: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wallet: None,
            seed_phrase: None,
            registry: None,
            gateway: DEFAULT_GATEWAY.to_string(),
            gateway_fallbacks: DEFAULT_GATEWAY_FALLBACKS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            bundler: DEFAULT_BUNDLER.to_string(),
        }
    }
}

impl Config {
    /// Load configuration: home `.skillsrc`, then project `.skillsrc`, then
    /// environment variables, each layer overriding the previous per field.
    pub fn load() -> Result<Self> {
        let mut file = FileConfig::default();
        if let Some(home) = home_dir() {
            merge(&mut file, load_file(&home.join(".skillsrc"))?);
        }
        let cwd = std::env::current_dir()
            .map_err(|e| Error::filesystem("failed to resolve current directory").with_cause(e))?;
        merge(&mut file, load_file(&cwd.join(".skillsrc"))?);
        Self::from_parts(file, EnvOverrides::capture())
    }

    /// Load from a specific config file only (for testing).
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::from_parts(load_file(path)?, EnvOverrides::default())
    }

    fn from_parts(file: FileConfig, env: EnvOverrides) -> Result<Self> {
        let defaults = Config::default();

        let gateway = env
            .gateway
            .or(file.gateway)
            .unwrap_or_else(|| defaults.gateway.clone());
        validate_gateway_url(&gateway)?;

        let registry = env.registry.or(file.registry);
        if let Some(ref addr) = registry
            && !crate::signer::is_valid_address(addr)
        {
            return Err(Error::configuration(format!(
                "registry '{addr}' is not a valid 43-character process address"
            ))
            .with_solution("check the registry key in .skillsrc or AO_REGISTRY_PROCESS_ID"));
        }

        Ok(Self {
            wallet: file.wallet.as_deref().map(expand_tilde),
            seed_phrase: env.seed_phrase,
            registry,
            gateway,
            gateway_fallbacks: file
                .gateway_fallbacks
                .unwrap_or(defaults.gateway_fallbacks),
            bundler: file.bundler.unwrap_or(defaults.bundler),
        })
    }

    /// The registry process address, or `Configuration` if unset.
    pub fn require_registry(&self) -> Result<&str> {
        self.registry.as_deref().ok_or_else(|| {
            Error::configuration("no registry process address configured").with_solution(
                "set the registry key in .skillsrc or the AO_REGISTRY_PROCESS_ID variable",
            )
        })
    }

    /// All gateways in fallback order: primary first.
    pub fn gateways(&self) -> Vec<String> {
        let mut all = vec![self.gateway.clone()];
        for fallback in &self.gateway_fallbacks {
            if !all.contains(fallback) {
                all.push(fallback.clone());
            }
        }
        all
    }
}

/// Environment variables that override file config.
#[derive(Debug, Default)]
struct EnvOverrides {
    seed_phrase: Option<String>,
    registry: Option<String>,
    gateway: Option<String>,
}

impl EnvOverrides {
    fn capture() -> Self {
        Self {
            seed_phrase: non_empty_env("SEED_PHRASE"),
            registry: non_empty_env("AO_REGISTRY_PROCESS_ID"),
            gateway: non_empty_env("ARWEAVE_GATEWAY"),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn load_file(path: &Path) -> Result<FileConfig> {
    if !path.is_file() {
        return Ok(FileConfig::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::configuration(format!("failed to read config at {}", path.display())).with_cause(e)
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        Error::configuration(format!("failed to parse config at {}", path.display()))
            .with_cause(e)
            .with_solution("fix the JSON in .skillsrc")
    })
}

/// Overlay `layer` onto `base`, field by field.
fn merge(base: &mut FileConfig, layer: FileConfig) {
    if layer.wallet.is_some() {
        base.wallet = layer.wallet;
    }
    if layer.registry.is_some() {
        base.registry = layer.registry;
    }
    if layer.gateway.is_some() {
        base.gateway = layer.gateway;
    }
    if layer.bundler.is_some() {
        base.bundler = layer.bundler;
    }
    if layer.gateway_fallbacks.is_some() {
        base.gateway_fallbacks = layer.gateway_fallbacks;
    }
}

fn validate_gateway_url(url: &str) -> Result<()> {
    if !url.starts_with("https://") {
        return Err(Error::configuration(format!(
            "gateway '{url}' must be an HTTPS URL"
        ))
        .with_solution("use an https:// gateway URL"));
    }
    Ok(())
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

/// Skill installation root: `.claude/skills/` in the current directory for
/// local installs, under `$HOME` for global ones.
pub fn install_root(global: bool) -> Result<PathBuf> {
    if global {
        let home = home_dir().ok_or_else(|| {
            Error::configuration("HOME is not set; cannot resolve the global install root")
                .with_solution("set HOME or use --local")
        })?;
        Ok(home.join(".claude").join("skills"))
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::filesystem("failed to resolve current directory").with_cause(e))?;
        Ok(cwd.join(".claude").join("skills"))
    }
}

/// Lock file path inside an install root.
pub fn lock_path(install_root: &Path) -> PathBuf {
    install_root.join("skills-lock.json")
}
