//! Permaskill CLI
//!
//! Binary entry point. CLI parsing (clap) and the `serve` HTTP surface.
//! Core logic lives in the library crate.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod cli;

#[derive(Parser, Debug)]
#[command(name = "permaskill")]
#[command(version)]
#[command(about = "Decentralized package manager for Agent Skills")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish a skill directory to the registry
    Publish(PublishArgs),
    /// Search the registry for skills
    Search(SearchArgs),
    /// Install a skill and its dependencies
    Install(InstallArgs),
    /// Run a local registry process with the HTTP read projection
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
struct PublishArgs {
    /// Skill directory containing SKILL.md
    directory: PathBuf,

    /// Wallet keyfile path (overrides config)
    #[arg(long)]
    wallet: Option<PathBuf>,

    /// Gateway URL (overrides config)
    #[arg(long)]
    gateway: Option<String>,

    /// Approve the upload in a browser wallet instead of a keyfile
    #[arg(long, conflicts_with = "wallet")]
    interactive: bool,

    /// Don't wait for the upload to confirm
    #[arg(long)]
    skip_confirmation: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::Args, Debug)]
struct SearchArgs {
    /// Search query; empty lists all skills
    #[arg(default_value = "")]
    query: String,

    /// Require a tag (repeatable, AND semantics)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Emit JSON instead of human-readable output
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    /// Skill to install: name or name@version
    skill: String,

    /// Install under ~/.claude/skills (the default)
    #[arg(long, conflicts_with = "local")]
    global: bool,

    /// Install under ./.claude/skills
    #[arg(long)]
    local: bool,

    /// Replace already-installed skills
    #[arg(long)]
    force: bool,

    /// Skip the lock file update
    #[arg(long)]
    no_lock: bool,

    /// Wallet keyfile path, used to record downloads (optional)
    #[arg(long)]
    wallet: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Address to bind, e.g. "127.0.0.1:8080"
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default = if verbose { "permaskill=debug" } else { "permaskill=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (result, json) = match cli.command {
        Command::Publish(args) => {
            init_tracing(args.verbose);
            (cli::publish::run(args).await, false)
        }
        Command::Search(args) => {
            init_tracing(args.verbose);
            let json = args.json;
            (cli::search::run(args).await, json)
        }
        Command::Install(args) => {
            init_tracing(args.verbose);
            (cli::install::run(args).await, false)
        }
        Command::Serve(args) => {
            init_tracing(args.verbose);
            (cli::serve::run(args).await, false)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.render_json());
            } else {
                eprintln!("{}", e.render());
            }
            ExitCode::from(e.exit_code())
        }
    }
}
