//! authkit-helper: demo privileged helper for authkit.
//!
//! Serves the `org.authkit.demo` helper on a unix socket. Callers are
//! authorized against the `[policy.actions]` tables of the configuration,
//! using the kernel's peer credentials for the connecting process.
//!
//! Actions:
//!   org.authkit.demo.echo       returns its arguments
//!   org.authkit.demo.countdown  counts `seconds` down, reports progress, honours stop
//!   org.authkit.demo.fail       helper error with `code` and `message`
//!   org.authkit.demo.whoami     uid, gid and pid the helper runs as
//!
//! The helper exits after `helper.idle_timeout_secs` without requests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use authkit::config::AuthkitConfig;
use authkit::credential::CallerCredential;
use authkit::helper::{HelperServer, IdleTimer};
use authkit::logging::{LogOpts, init_logging};
use authkit::policy::PolicyBackend;
use authkit::{ActionReply, DebugLevel, HelperContext, HelperDispatcher, Responder, VariantMap};
use clap::Parser;
use tracing::{error, info, warn};

const HELPER_ID: &str = "org.authkit.demo";

/// Exit code of `countdown` when it was stopped early.
const STOPPED: i32 = 1;

#[derive(Debug, Parser)]
#[command(name = "authkit-helper", author, version, about = "Demo privileged helper for authkit")]
struct Cli {
    /// Path to config file (auto-detected if not set)
    #[arg(long, short = 'c', env = "AUTHKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Socket to listen on (default: <helper.socket_dir>/org.authkit.demo.sock)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Override the idle timeout in seconds (0 disables)
    #[arg(long)]
    idle_timeout: Option<u64>,

    #[command(flatten)]
    log: LogOpts,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match AuthkitConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(&cli.log, &Default::default());
            error!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    init_logging(&cli.log, &config.logging);

    if let Err(e) = run(cli, config).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: AuthkitConfig) -> Result<()> {
    info!("authkit-helper: starting (pid {})", std::process::id());

    if config.policy.actions.is_empty() {
        warn!("no [policy.actions] configured, every request will be denied");
    }
    let backend = Arc::new(PolicyBackend::new(&config.policy));

    let idle_secs = cli.idle_timeout.unwrap_or(config.helper.idle_timeout_secs);
    let dispatcher = HelperDispatcher::with_idle_timer(
        HELPER_ID,
        backend,
        IdleTimer::new(Duration::from_secs(idle_secs)),
    )?;
    dispatcher.set_responder(demo_responder())?;

    let socket = cli
        .socket
        .unwrap_or_else(|| config.helper.socket_dir.join(format!("{HELPER_ID}.sock")));
    let server = HelperServer::bind(dispatcher, &socket, config.helper.socket_mode)
        .with_context(|| format!("binding {}", socket.display()))?;

    server.serve(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("cannot listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

fn demo_responder() -> Responder {
    Responder::new(HELPER_ID)
        .on("echo", echo)
        .on("countdown", countdown)
        .on("fail", fail)
        .on("whoami", whoami)
}

fn echo(_ctx: &HelperContext, args: VariantMap) -> ActionReply {
    ActionReply::success_with(args)
}

fn countdown(ctx: &HelperContext, args: VariantMap) -> ActionReply {
    let seconds = args.get("seconds").and_then(|v| v.as_i64()).unwrap_or(5).clamp(1, 3600);
    let interval = args
        .get("interval_ms")
        .and_then(|v| v.as_i64())
        .and_then(|ms| u64::try_from(ms).ok())
        .map_or(Duration::from_secs(1), Duration::from_millis);

    for elapsed in 0..seconds {
        if ctx.is_stopped() {
            ctx.debug_message(DebugLevel::Info, format!("stopped with {} left", seconds - elapsed));
            return ActionReply::helper_error(STOPPED)
                .with_description("stopped")
                .with_data("remaining", seconds - elapsed);
        }
        let percent = i32::try_from(elapsed * 100 / seconds).unwrap_or(100);
        ctx.progress_step(percent);
        std::thread::sleep(interval);
    }
    ctx.progress_step(100);
    ActionReply::success().with_data("counted", seconds)
}

fn fail(_ctx: &HelperContext, args: VariantMap) -> ActionReply {
    let code = args
        .get("code")
        .and_then(|v| v.as_i64())
        .and_then(|c| i32::try_from(c).ok())
        .unwrap_or(1);
    let message = args
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("requested failure");
    ActionReply::helper_error(code).with_description(message)
}

fn whoami(_ctx: &HelperContext, _args: VariantMap) -> ActionReply {
    let me = CallerCredential::current();
    let mut reply = ActionReply::success()
        .with_data("uid", me.uid)
        .with_data("gid", me.gid);
    if let Some(pid) = me.pid {
        reply.add_data("pid", pid);
    }
    reply
}
