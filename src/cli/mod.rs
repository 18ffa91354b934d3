//! CLI subcommand implementations.

pub mod install;
pub mod publish;
pub mod search;
pub mod serve;

use std::path::Path;

use permaskill::config::Config;
use permaskill::error::{Error, Result};
use permaskill::signer::Signer;

/// Load a signer: explicit keyfile flag, then config wallet, then the
/// SEED_PHRASE environment variable.
pub fn load_signer(wallet_flag: Option<&Path>, config: &Config) -> Result<Signer> {
    if let Some(path) = wallet_flag {
        return Signer::from_keyfile(path);
    }
    if let Some(path) = &config.wallet {
        return Signer::from_keyfile(path);
    }
    if let Some(phrase) = &config.seed_phrase {
        return Signer::from_mnemonic(phrase);
    }
    Err(Error::configuration("no wallet configured").with_solution(
        "pass --wallet, set the wallet key in .skillsrc, or export SEED_PHRASE",
    ))
}

/// Like [`load_signer`], but absence is not an error.
pub fn try_load_signer(wallet_flag: Option<&Path>, config: &Config) -> Option<Signer> {
    match load_signer(wallet_flag, config) {
        Ok(signer) => Some(signer),
        Err(e) => {
            tracing::debug!(error = %e, "no signer available");
            None
        }
    }
}
