//! authkitctl - client CLI for authkit helpers
//!
//! Executes, authorizes and stops actions in privileged helpers, and shows
//! the effective configuration.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use authkit::config::{AuthkitConfig, default_config_path};
use authkit::logging::{LogOpts, init_logging};
use authkit::policy::PolicyBackend;
use authkit::{Action, ActionReply, JobEvent, Registry, VariantMap};
use authkit_protocol::value::{map_from_json, map_to_json};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            let _ = writeln!(io::stderr(), "Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "authkitctl",
    author,
    version,
    about = "Run privileged authkit actions through their helpers."
)]
struct Cli {
    /// Path to config file (auto-detected if not set)
    #[arg(long, short = 'c', env = "AUTHKIT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    log: LogOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Authorize and execute an action
    Execute {
        /// Action name, e.g. org.authkit.demo.echo
        action: String,

        /// Helper id (default: the action name without its last component)
        #[arg(long)]
        helper: Option<String>,

        /// Arguments as a JSON object
        #[arg(long, short = 'a')]
        args: Option<String>,

        /// Reply timeout in seconds (default: client.reply_timeout_secs)
        #[arg(long, short = 't')]
        timeout: Option<u64>,

        /// Print progress and debug messages while running
        #[arg(long)]
        progress: bool,
    },

    /// Ask the helper whether this user may run an action
    Authorize {
        action: String,

        #[arg(long)]
        helper: Option<String>,
    },

    /// Show the backend's status for an action without prompting
    Status { action: String },

    /// Ask a helper to stop a running action
    Stop {
        action: String,

        #[arg(long)]
        helper: Option<String>,
    },

    /// Check that a helper is reachable
    Ping { helper: String },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file path in use
    Path,
}

#[tokio::main]
async fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = AuthkitConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(&cli.log, &config.logging);

    let backend = Arc::new(PolicyBackend::new(&config.policy));
    let registry = Registry::from_config(backend, &config.client).into_shared();

    match cli.command {
        Command::Execute {
            action,
            helper,
            args,
            timeout,
            progress,
        } => {
            let mut action = build_action(&registry, &action, helper)?;
            if let Some(args) = args {
                action.set_arguments(parse_args(&args)?);
            }
            if let Some(secs) = timeout {
                action.set_timeout(Duration::from_secs(secs));
            }
            handle_execute(action, progress).await
        }
        Command::Authorize { action, helper } => {
            let action = build_action(&registry, &action, helper)?;
            println!("{}", action.authorize().await);
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { action } => {
            println!("{}", registry.action(&action).status());
            Ok(ExitCode::SUCCESS)
        }
        Command::Stop { action, helper } => {
            let action = build_action(&registry, &action, helper)?;
            registry
                .transport()
                .stop_action(action.helper_id(), action.name())
                .await
                .context("sending stop request")?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Ping { helper } => {
            let id = registry
                .transport()
                .ping(&helper)
                .await
                .with_context(|| format!("pinging {helper}"))?;
            println!("{id}: ok");
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { command } => {
            match command {
                ConfigCommand::Show => print!("{}", config.to_toml()?),
                ConfigCommand::Path => match &cli.config {
                    Some(path) => println!("{}", path.display()),
                    None => println!("{}", default_config_path().display()),
                },
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_action(registry: &Arc<Registry>, name: &str, helper: Option<String>) -> Result<Action> {
    let action = registry.action(name);
    if !action.is_valid() {
        bail!("'{name}' is not a known action");
    }
    let helper = match helper {
        Some(helper) => helper,
        None => match name.rsplit_once('.') {
            Some((prefix, _)) => prefix.to_string(),
            None => bail!("cannot derive a helper id from '{name}', pass --helper"),
        },
    };
    Ok(action.with_helper(helper))
}

fn parse_args(text: &str) -> Result<VariantMap> {
    let json: serde_json::Value = serde_json::from_str(text).context("parsing --args as JSON")?;
    map_from_json(json).context("--args must be a JSON object")
}

async fn handle_execute(action: Action, progress: bool) -> Result<ExitCode> {
    let job = action.job();
    let mut events = job.subscribe();
    job.start()?;

    let reply = loop {
        match events.recv().await {
            Ok(JobEvent::Finished(reply)) => break reply,
            Ok(event) if progress => print_event(&event),
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => eprintln!("(missed {n} events)"),
            Err(RecvError::Closed) => break job.wait().await,
        }
    };
    print_reply(&reply)?;
    Ok(if reply.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_event(event: &JobEvent) {
    match event {
        JobEvent::Started => eprintln!("started"),
        JobEvent::Progress(step) => eprintln!("progress: {step}%"),
        JobEvent::ProgressData(data) => eprintln!("data: {}", map_to_json(data)),
        JobEvent::DebugMessage { level, message } => eprintln!("[{level:?}] {message}"),
        JobEvent::StatusChanged(status) => eprintln!("status: {status}"),
        JobEvent::Finished(_) => {}
    }
}

fn print_reply(reply: &ActionReply) -> Result<()> {
    let body = serde_json::json!({
        "type": format!("{:?}", reply.reply_type()),
        "code": reply.error_code(),
        "description": reply.error_description(),
        "data": map_to_json(reply.data()),
    });
    let text = serde_json::to_string_pretty(&body).context("serializing reply")?;
    println!("{text}");
    Ok(())
}
