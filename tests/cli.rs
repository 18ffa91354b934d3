//! CLI integration tests using assert_cmd.
//!
//! Tests override `$HOME` and point `ARWEAVE_GATEWAY` at an unroutable
//! loopback port so nothing touches the real network or filesystem; they
//! exercise argument parsing, configuration errors, validation errors, and
//! exit codes.

use assert_cmd::Command;
use predicates::prelude::*;

const REGISTRY: &str = "REGISTRYAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
const DEAD_GATEWAY: &str = "https://127.0.0.1:9";

#[allow(deprecated)] // cargo_bin! has compile-time issues; cargo_bin works fine
fn permaskill(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("permaskill").expect("binary exists");
    cmd.env_clear()
        .env("HOME", home)
        .env("PATH", std::env::var("PATH").unwrap_or_default());
    cmd
}

fn write_skill(dir: &std::path::Path, frontmatter: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("SKILL.md"), frontmatter).unwrap();
}

// ── Help and parsing ─────────────────────────────────────────────────

#[test]
fn help_lists_subcommands() {
    let tmp = tempfile::tempdir().unwrap();
    permaskill(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("publish")
                .and(predicate::str::contains("search"))
                .and(predicate::str::contains("install"))
                .and(predicate::str::contains("serve")),
        );
}

#[test]
fn version_flag_works() {
    let tmp = tempfile::tempdir().unwrap();
    permaskill(tmp.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("permaskill"));
}

#[test]
fn install_global_and_local_conflict() {
    let tmp = tempfile::tempdir().unwrap();
    permaskill(tmp.path())
        .args(["install", "some-skill", "--global", "--local"])
        .assert()
        .failure();
}

// ── Configuration errors (exit code 1) ───────────────────────────────

#[test]
fn search_without_registry_is_configuration_error() {
    let tmp = tempfile::tempdir().unwrap();
    permaskill(tmp.path())
        .args(["search", "anything"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[Configuration]").and(predicate::str::contains("registry")));
}

#[test]
fn publish_without_wallet_is_configuration_error() {
    let tmp = tempfile::tempdir().unwrap();
    let skill = tmp.path().join("my-skill");
    write_skill(
        &skill,
        "---\nname: my-skill\nversion: 1.0.0\ndescription: d\nauthor: a\n---\n",
    );

    permaskill(tmp.path())
        .env("AO_REGISTRY_PROCESS_ID", REGISTRY)
        .arg("publish")
        .arg(&skill)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[Configuration]").and(predicate::str::contains("wallet")));
}

#[test]
fn malformed_skillsrc_is_configuration_error() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join(".skillsrc"), "{ not json").unwrap();

    permaskill(tmp.path())
        .current_dir(tmp.path())
        .args(["search", "x"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[Configuration]"));
}

#[test]
fn bad_seed_phrase_is_configuration_error() {
    let tmp = tempfile::tempdir().unwrap();
    let skill = tmp.path().join("my-skill");
    write_skill(
        &skill,
        "---\nname: my-skill\nversion: 1.0.0\ndescription: d\nauthor: a\n---\n",
    );

    permaskill(tmp.path())
        .env("AO_REGISTRY_PROCESS_ID", REGISTRY)
        .env("SEED_PHRASE", "too few words")
        .arg("publish")
        .arg(&skill)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("12"));
}

// ── Validation errors (exit code 1) ──────────────────────────────────

#[test]
fn publish_missing_skill_md_is_validation_error() {
    let tmp = tempfile::tempdir().unwrap();
    let empty = tmp.path().join("empty-dir");
    std::fs::create_dir_all(&empty).unwrap();

    permaskill(tmp.path())
        .env("AO_REGISTRY_PROCESS_ID", REGISTRY)
        .env(
            "SEED_PHRASE",
            "abandon ability able about above absent absorb abstract absurd abuse access accident",
        )
        .arg("publish")
        .arg(&empty)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[Validation]").and(predicate::str::contains("SKILL.md")));
}

#[test]
fn publish_invalid_version_is_validation_error() {
    let tmp = tempfile::tempdir().unwrap();
    let skill = tmp.path().join("my-skill");
    write_skill(
        &skill,
        "---\nname: my-skill\nversion: 1.0.0-beta\ndescription: d\nauthor: a\n---\n",
    );

    permaskill(tmp.path())
        .env("AO_REGISTRY_PROCESS_ID", REGISTRY)
        .env(
            "SEED_PHRASE",
            "abandon ability able about above absent absorb abstract absurd abuse access accident",
        )
        .arg("publish")
        .arg(&skill)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("version"));
}

#[test]
fn install_empty_version_spec_is_validation_error() {
    let tmp = tempfile::tempdir().unwrap();
    permaskill(tmp.path())
        .env("AO_REGISTRY_PROCESS_ID", REGISTRY)
        .env("ARWEAVE_GATEWAY", DEAD_GATEWAY)
        .args(["install", "some-skill@"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[Validation]"));
}

// ── Network errors (exit code 2) ─────────────────────────────────────

#[test]
fn search_against_dead_gateway_is_network_error() {
    let tmp = tempfile::tempdir().unwrap();
    permaskill(tmp.path())
        .env("AO_REGISTRY_PROCESS_ID", REGISTRY)
        .env("ARWEAVE_GATEWAY", DEAD_GATEWAY)
        .args(["search", "anything"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("[Network]"));
}

#[test]
fn search_json_renders_structured_error() {
    let tmp = tempfile::tempdir().unwrap();
    permaskill(tmp.path())
        .env("AO_REGISTRY_PROCESS_ID", REGISTRY)
        .env("ARWEAVE_GATEWAY", DEAD_GATEWAY)
        .args(["search", "anything", "--json"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("\"error\":\"Network\""));
}

#[test]
fn install_against_dead_gateway_is_network_error() {
    let tmp = tempfile::tempdir().unwrap();
    permaskill(tmp.path())
        .env("AO_REGISTRY_PROCESS_ID", REGISTRY)
        .env("ARWEAVE_GATEWAY", DEAD_GATEWAY)
        .args(["install", "some-skill"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("[Network]"));
}

// ── Config file handling ─────────────────────────────────────────────

#[test]
fn http_gateway_in_config_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join(".skillsrc"),
        r#"{"gateway": "http://insecure.example"}"#,
    )
    .unwrap();

    permaskill(tmp.path())
        .current_dir(tmp.path())
        .args(["search", "x"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("HTTPS"));
}

#[test]
fn env_overrides_config_registry() {
    let tmp = tempfile::tempdir().unwrap();
    // The config registry is unusable; the env var takes precedence and
    // gets us past configuration validation to the (dead) network.
    std::fs::write(
        tmp.path().join(".skillsrc"),
        r#"{"registry": "not-a-valid-address"}"#,
    )
    .unwrap();

    permaskill(tmp.path())
        .current_dir(tmp.path())
        .env("AO_REGISTRY_PROCESS_ID", REGISTRY)
        .env("ARWEAVE_GATEWAY", DEAD_GATEWAY)
        .args(["search", "x"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("[Network]"));
}
