//! `permaskill install` implementation.

use permaskill::client::{HttpTransport, RegistryClient};
use permaskill::config::{self, Config};
use permaskill::error::Result;
use permaskill::gateway::StorageClient;
use permaskill::install::{self, InstallEvent, InstallOptions};

use crate::InstallArgs;

pub async fn run(args: InstallArgs) -> Result<()> {
    let config = Config::load()?;
    let registry = config.require_registry()?.to_string();

    // Global is the default; --local switches to the project directory.
    let global = args.global || !args.local;
    let install_root = config::install_root(global)?;
    let storage = StorageClient::new(&config)?;
    let client = RegistryClient::new(HttpTransport::new(&config.gateway, &registry)?);
    let signer = super::try_load_signer(args.wallet.as_deref(), &config);

    let mut options = InstallOptions::new(install_root.clone());
    options.force = args.force;
    options.no_lock = args.no_lock;

    let verbose = args.verbose;
    let outcome = install::install(
        &args.skill,
        &storage,
        &client,
        signer.as_ref(),
        &options,
        |event| match event {
            InstallEvent::QueryRegistry => println!("Querying registry..."),
            InstallEvent::ResolveDependencies => println!("Resolving dependencies..."),
            InstallEvent::DownloadBundle { name, percent } => {
                if verbose {
                    println!("  download {name} {percent}%");
                } else if percent == 0 {
                    println!("Downloading {name}...");
                }
            }
            InstallEvent::ExtractBundle { name } => println!("Extracting {name}..."),
            InstallEvent::UpdateLockFile => println!("Updating lock file..."),
            InstallEvent::Complete => {}
        },
    )
    .await?;

    println!();
    if outcome.installed.is_empty() && !outcome.skipped.is_empty() {
        println!("Nothing to do; already installed: {}", outcome.skipped.join(", "));
    } else {
        println!(
            "Installed {} skill(s) into {}",
            outcome.installed.len(),
            install_root.display()
        );
        for skill in &outcome.installed {
            println!("  {}@{}", skill.name, skill.version);
        }
        if !outcome.skipped.is_empty() {
            println!("Skipped (already installed): {}", outcome.skipped.join(", "));
        }
    }

    if !outcome.mcp_servers.is_empty() {
        println!();
        println!("MCP server setup required:");
        for server in &outcome.mcp_servers {
            println!("  - {server}");
        }
        println!("These are provisioned outside permaskill; see your MCP client's docs.");
    }

    Ok(())
}
