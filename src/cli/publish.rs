//! `permaskill publish` implementation.

use permaskill::client::{HttpTransport, RegistryClient};
use permaskill::config::Config;
use permaskill::error::{Error, Result};
use permaskill::gateway::StorageClient;
use permaskill::publish::{self, PublishEvent, PublishOptions};
use permaskill::signer::{INTERACTIVE_TIMEOUT, InteractiveSigner};

use crate::PublishArgs;

pub async fn run(args: PublishArgs) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(gateway) = args.gateway {
        if !gateway.starts_with("https://") {
            return Err(Error::configuration(format!(
                "gateway '{gateway}' must be an HTTPS URL"
            )));
        }
        config.gateway = gateway;
    }
    let registry = config.require_registry()?.to_string();

    let signer = if args.interactive {
        InteractiveSigner::connect(INTERACTIVE_TIMEOUT).await?
    } else {
        super::load_signer(args.wallet.as_deref(), &config)?
    };
    tracing::debug!(source = signer.describe_source(), address = signer.address(), "signer ready");

    let storage = StorageClient::new(&config)?;
    let client = RegistryClient::new(HttpTransport::new(&config.gateway, &registry)?);

    let options = PublishOptions {
        skip_confirmation: args.skip_confirmation,
        ..Default::default()
    };

    let verbose = args.verbose;
    let outcome = publish::publish(
        &args.directory,
        &signer,
        &storage,
        &client,
        &options,
        |event| match event {
            PublishEvent::Validated { name, version } => {
                println!("Validated {name}@{version}");
            }
            PublishEvent::UploadStart => println!("Uploading bundle..."),
            PublishEvent::UploadProgress { percent } => {
                if verbose {
                    println!("  upload {percent}%");
                }
            }
            PublishEvent::UploadComplete { tx_id } => println!("Uploaded: {tx_id}"),
            PublishEvent::WaitConfirmation => println!("Waiting for confirmation..."),
            PublishEvent::Registered { message_id } => {
                println!("Registered: message {message_id}");
            }
        },
    )
    .await;
    signer.disconnect().await;
    let outcome = outcome?;

    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    println!();
    println!(
        "Published {}@{} ({} bytes, {} winston)",
        outcome.name, outcome.version, outcome.bytes, outcome.cost
    );
    println!("  bundle:   {}", outcome.arweave_tx_id);
    println!("  registry: {}", outcome.registry_message_id);
    Ok(())
}
