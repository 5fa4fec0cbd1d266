//! mpost - Post one submission to many websites

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use libmultipost::config::resolve_config_path;
use libmultipost::logging::{LogFormat, LoggingConfig};
use libmultipost::service::events::Event;
use libmultipost::service::AccountResult;
use libmultipost::{
    Config, MemorySubmissionStore, MultipostError, MultipostService, SubmissionBundle,
};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(name = "mpost")]
#[command(version)]
#[command(about = "Post one submission to many websites")]
#[command(long_about = "\
mpost - Post one submission to many websites

DESCRIPTION:
    mpost reads a submission bundle (JSON: the submission plus one part per
    account) and posts it to every account the bundle targets, one account
    at a time. Accounts and posting options come from the configuration
    file.

USAGE:
    # List supported websites
    mpost websites

    # Check a bundle without posting
    mpost validate art.json

    # Check that configured accounts are logged in
    mpost check-login fa-main

    # Post a bundle (Ctrl-C cancels the remaining accounts)
    mpost post art.json --format json

CONFIGURATION:
    Configuration file: ~/.config/multipost/config.toml
    Override with --config or MULTIPOST_CONFIG.

EXIT CODES:
    0 - Success
    1 - Posting failed or runtime error
    2 - Authentication error
    3 - Invalid input or validation problems
")]
struct Cli {
    /// Configuration file (defaults to ~/.config/multipost/config.toml)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    #[arg(value_parser = ["text", "json"])]
    format: String,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json, pretty)
    #[arg(long, global = true, default_value = "text", value_name = "FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List supported websites and their posting rules
    Websites,

    /// Validate a submission bundle without posting
    Validate {
        /// Submission bundle (JSON)
        bundle: PathBuf,
    },

    /// Check the login of configured accounts
    CheckLogin {
        /// Account ids (all configured accounts when omitted)
        accounts: Vec<String>,
    },

    /// Post a submission bundle
    Post {
        /// Submission bundle (JSON)
        bundle: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    LoggingConfig::new(cli.log_format, level).init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(exit_code(&e));
        }
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<MultipostError>()
        .map(MultipostError::exit_code)
        .unwrap_or(1)
}

async fn run(cli: Cli) -> Result<i32> {
    let json = cli.format == "json";
    match &cli.command {
        Command::Websites => {
            let config = load_config(cli.config.as_deref())?;
            let (service, _) = service_with_bundle(&config, None)?;
            list_websites(&service, json)?;
            Ok(0)
        }
        Command::Validate { bundle } => {
            let config = load_config(cli.config.as_deref())?;
            let (service, submission_id) = service_with_bundle(&config, Some(bundle.as_path()))?;
            validate(&service, &submission_id.unwrap_or_default(), json).await
        }
        Command::CheckLogin { accounts } => {
            let config = load_config(cli.config.as_deref())?;
            let (service, _) = service_with_bundle(&config, None)?;
            check_login(&service, &config, accounts, json).await
        }
        Command::Post { bundle } => {
            let config = load_config(cli.config.as_deref())?;
            let (service, submission_id) = service_with_bundle(&config, Some(bundle.as_path()))?;
            post(service, &submission_id.unwrap_or_default(), json).await
        }
    }
}

/// Explicit path, then the default location, then built-in defaults
fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    let path = resolve_config_path()?;
    if path.exists() {
        Config::load_from_path(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        debug!(path = %path.display(), "No config file, using defaults");
        Ok(Config::default_config())
    }
}

fn service_with_bundle(
    config: &Config,
    bundle: Option<&Path>,
) -> Result<(MultipostService, Option<String>)> {
    let submissions = Arc::new(MemorySubmissionStore::new());
    let submission_id = match bundle {
        Some(path) => {
            let bundle = SubmissionBundle::load(path)
                .with_context(|| format!("Failed to read bundle {}", path.display()))?;
            let id = bundle.submission.id.clone();
            submissions.insert_bundle(bundle)?;
            Some(id)
        }
        None => None,
    };
    let service = MultipostService::from_config(config, submissions)?;
    Ok((service, submission_id))
}

#[derive(Serialize)]
struct WebsiteSummary {
    id: String,
    name: String,
    notifications: bool,
    additional_files: bool,
    wait_between_posts: String,
}

fn list_websites(service: &MultipostService, json: bool) -> Result<()> {
    let websites: Vec<WebsiteSummary> = service
        .registry()
        .all_adapters()
        .iter()
        .map(|adapter| {
            let capabilities = adapter.capabilities();
            WebsiteSummary {
                id: adapter.id().to_string(),
                name: adapter.id().display_name().to_string(),
                notifications: capabilities.supports_notifications,
                additional_files: capabilities.accepts_additional_files,
                wait_between_posts: format!("{}s", capabilities.wait_between_posts.as_secs()),
            }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&websites)?);
    } else {
        for website in &websites {
            println!(
                "{:<12} {:<12} notifications: {:<3} wait: {}",
                website.id,
                website.name,
                if website.notifications { "yes" } else { "no" },
                website.wait_between_posts
            );
        }
    }
    Ok(())
}

async fn validate(service: &MultipostService, submission_id: &str, json: bool) -> Result<i32> {
    let results = service.validate(submission_id).await?;
    let mut accounts: Vec<_> = results.into_iter().collect();
    accounts.sort_by(|a, b| a.0.cmp(&b.0));

    if json {
        let map: serde_json::Map<String, serde_json::Value> = accounts
            .iter()
            .map(|(id, parts)| {
                (
                    id.clone(),
                    serde_json::json!({"problems": parts.problems, "warnings": parts.warnings}),
                )
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for (id, parts) in &accounts {
            if parts.problems.is_empty() && parts.warnings.is_empty() {
                println!("{}: ok", id);
                continue;
            }
            println!("{}:", id);
            for problem in &parts.problems {
                println!("  problem: {}", problem);
            }
            for warning in &parts.warnings {
                println!("  warning: {}", warning);
            }
        }
    }

    let valid = accounts.iter().all(|(_, parts)| parts.is_valid());
    Ok(if valid { 0 } else { 3 })
}

async fn check_login(
    service: &MultipostService,
    config: &Config,
    requested: &[String],
    json: bool,
) -> Result<i32> {
    let ids: Vec<String> = if requested.is_empty() {
        config.accounts.iter().map(|a| a.id.clone()).collect()
    } else {
        requested.to_vec()
    };

    let mut all_logged_in = true;
    let mut report = Vec::new();
    for id in &ids {
        let login = service.check_login(id).await?;
        all_logged_in &= login.logged_in;
        if !json {
            match (&login.username, login.logged_in) {
                (Some(name), true) => println!("{}: logged in as {}", id, name),
                (None, true) => println!("{}: logged in", id),
                _ => println!("{}: not logged in", id),
            }
        }
        report.push(serde_json::json!({
            "account_id": id,
            "logged_in": login.logged_in,
            "username": login.username,
        }));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(if all_logged_in { 0 } else { 2 })
}

async fn post(service: MultipostService, submission_id: &str, json: bool) -> Result<i32> {
    let mut events = service.subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let Event::PostingProgress { account_id, status, .. } = event {
                eprintln!("{}: {}", account_id, status);
            }
        }
    });

    let receiver = service.post(submission_id).await?;

    let queue = service.queue().clone();
    let id = submission_id.to_string();
    let interrupt = tokio::spawn(async move {
        if wait_for_interrupt().await.is_ok() {
            warn!(submission = %id, "Interrupted, cancelling remaining accounts");
            queue.cancel(&id);
        }
    });

    let results = receiver.await.context("Post queue stopped unexpectedly")??;
    interrupt.abort();
    let _ = interrupt.await;
    service.shutdown().await;
    progress.abort();

    let summaries: Vec<AccountResult> = results.iter().map(|r| r.summary()).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for summary in &summaries {
            print_result(summary);
        }
    }

    let all_posted = summaries.iter().all(|s| s.success);
    Ok(if all_posted { 0 } else { 1 })
}

fn print_result(result: &AccountResult) {
    if result.success {
        match &result.source {
            Some(source) => println!("{}: posted {}", result.account_id, source),
            None => println!("{}: posted", result.account_id),
        }
    } else if result.cancelled {
        println!("{}: cancelled", result.account_id);
    } else {
        println!(
            "{}: failed: {}",
            result.account_id,
            result.message.as_deref().unwrap_or("Unknown Error")
        );
    }
}

#[cfg(unix)]
async fn wait_for_interrupt() -> std::io::Result<()> {
    use futures::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};

    let mut signals = signal_hook_tokio::Signals::new([SIGINT, SIGTERM])?;
    signals.next().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_interrupt() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
