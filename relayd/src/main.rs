//! relayd - forwards intercepted requests to a local server.
//!
//! Polls the coordinator for requests captured on a site, replays them
//! against the configured local host and port, and reports each response
//! back. A small line-oriented control shell runs on stdin.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use relay_common::{LogFormat, Provider, RelayConfig, init_logging};
use relayd::commands::{self, Command};
use relayd::events::write_events;
use relayd::{Agent, HttpCoordinator, HttpTransport, Session, drain};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "relayd")]
#[command(author, version, about = "Replay intercepted requests against a local server")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Coordinator API base URL
    #[arg(long)]
    coordinator_url: Option<String>,

    /// Bearer token for the coordinator
    #[arg(long)]
    token: Option<String>,

    /// File holding the bearer token
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// Site whose captured traffic is forwarded
    #[arg(short, long)]
    site: Option<String>,

    /// Local host to forward to
    #[arg(long)]
    host: Option<String>,

    /// Local port to forward to
    #[arg(short, long)]
    port: Option<u16>,

    /// Scheme for the local connection (http or https)
    #[arg(long)]
    provider: Option<Provider>,

    /// Verify the local server's TLS certificate
    #[arg(long)]
    verify_tls: bool,

    /// Per-replay timeout in milliseconds
    #[arg(long)]
    replay_timeout_ms: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Console log format (pretty or json)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Do not read control commands from stdin
    #[arg(long)]
    no_control: bool,

    /// Write relay events to stderr as JSON lines
    #[arg(long)]
    events: bool,
}

impl Cli {
    /// CLI flags take precedence over file and environment settings.
    fn apply(&self, config: &mut RelayConfig) {
        if let Some(url) = &self.coordinator_url {
            config.coordinator.url = url.clone();
        }
        if let Some(token) = &self.token {
            config.coordinator.token = Some(token.clone());
        }
        if let Some(path) = &self.token_file {
            config.coordinator.token_file = Some(path.clone());
        }
        if let Some(site) = &self.site {
            config.target.site = site.to_lowercase();
        }
        if let Some(host) = &self.host {
            config.target.host = host.to_lowercase();
        }
        if let Some(port) = self.port {
            config.target.port = port;
        }
        if let Some(provider) = self.provider {
            config.target.provider = provider;
        }
        if self.verify_tls {
            config.target.verify_tls = true;
        }
        if let Some(timeout) = self.replay_timeout_ms {
            config.replay.timeout_ms = timeout;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RelayConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let _log_guards = init_logging(&config.logging.to_log_config())?;

    let token = config.coordinator.resolve_token()?;
    let coordinator = Arc::new(HttpCoordinator::new(
        &config.coordinator.url,
        token,
        config.coordinator.request_timeout(),
    )?);
    coordinator
        .check()
        .await
        .with_context(|| format!("Connection to {} failed", config.coordinator.url))?;
    info!("Connected to {}", coordinator.base_url());

    let transport = Arc::new(HttpTransport::new().context("Failed to build HTTP client")?);
    let session = Arc::new(Session::new(config.target.clone()));
    if cli.events {
        let events = session.events().subscribe();
        tokio::spawn(async move {
            if let Err(err) = write_events(events, tokio::io::stderr()).await {
                warn!("event output stopped: {}", err);
            }
        });
    }
    let agent = Agent::new(
        session.clone(),
        coordinator,
        transport,
        config.polling.clone(),
        config.replay.timeout(),
    );

    for line in commands::status_lines(&session) {
        println!("{line}");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let agent_task = tokio::spawn(agent.run(shutdown_rx));

    if cli.no_control {
        tokio::signal::ctrl_c().await?;
    } else {
        tokio::select! {
            result = control_loop(&session) => result?,
            result = tokio::signal::ctrl_c() => result?,
        }
    }

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    agent_task.await.context("Agent task failed")?;

    if !drain(&session, config.replay.timeout()).await {
        warn!(
            "{} replays still in flight at exit",
            session.accounting().snapshot().queue_current
        );
    }
    for line in commands::counter_lines(&session.accounting().snapshot()) {
        println!("{line}");
    }
    Ok(())
}

/// Read commands until the operator quits. A closed stdin leaves the agent
/// running until it is interrupted.
async fn control_loop(session: &Session) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Ok(command) => {
                let reply = commands::execute(session, command);
                for line in &reply.lines {
                    println!("{line}");
                }
                if reply.quit {
                    return Ok(());
                }
            }
            Err(err) => println!("{err}"),
        }
    }
    debug!("stdin closed; control shell disabled");
    futures::future::pending::<()>().await;
    Ok(())
}
