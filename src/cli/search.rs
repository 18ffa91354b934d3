//! `permaskill search` implementation.

use permaskill::client::{HttpTransport, RegistryClient};
use permaskill::config::Config;
use permaskill::error::{Error, Result};
use permaskill::search;

use crate::SearchArgs;

pub async fn run(args: SearchArgs) -> Result<()> {
    let config = Config::load()?;
    let registry = config.require_registry()?.to_string();
    let client = RegistryClient::new(HttpTransport::new(&config.gateway, &registry)?);

    let results = search::search(&client, &args.query, &args.tags).await?;

    if args.json {
        let body = serde_json::to_string_pretty(&results)
            .map_err(|e| Error::validation("failed to serialize results").with_cause(e))?;
        println!("{body}");
        return Ok(());
    }

    if results.is_empty() {
        println!("No skills found.");
        return Ok(());
    }

    println!("Found {} skill(s):", results.len());
    for skill in &results {
        println!("  {}@{} - {}", skill.name, skill.version, skill.description);
        if args.verbose {
            println!(
                "    author: {}  downloads: {}  tags: {}",
                skill.author,
                skill.download_count,
                if skill.tags.is_empty() {
                    "-".to_string()
                } else {
                    skill.tags.join(", ")
                }
            );
        }
    }
    Ok(())
}
