//! Line-oriented control commands read from stdin while the agent runs.

use crate::accounting::CountersSnapshot;
use crate::session::Session;
use relay_common::Provider;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Status,
    Counters,
    Reset,
    Help,
    Quit,
    Set(SetCommand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetCommand {
    Site(String),
    Host(String),
    Port(u16),
    Provider(Provider),
    VerifyTls(bool),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid command '{0}'. Type help for more information.")]
    Unknown(String),

    #[error("Missing additional parameters (e.g. site, host, port, provider)")]
    MissingSetting,

    #[error("Not a valid 'set' command: '{0}'. Type help for commands.")]
    UnknownSetting(String),

    #[error("Missing value. Try: set {0} <value>")]
    MissingValue(&'static str),

    #[error("Invalid value for {setting}: {reason}")]
    InvalidValue {
        setting: &'static str,
        reason: String,
    },
}

impl Command {
    /// Parse one input line. An empty line shows the counters.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            return Ok(Self::Counters);
        };
        match first.to_ascii_lowercase().as_str() {
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "status" => Ok(Self::Status),
            "counters" => Ok(Self::Counters),
            "reset" => Ok(Self::Reset),
            "help" | "?" => Ok(Self::Help),
            "quit" | "q" | "exit" | "x" => Ok(Self::Quit),
            "set" => {
                let setting = words.next().ok_or(CommandError::MissingSetting)?;
                let value = words.next();
                SetCommand::parse(setting, value).map(Self::Set)
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

impl SetCommand {
    fn parse(setting: &str, value: Option<&str>) -> Result<Self, CommandError> {
        match setting.to_ascii_lowercase().as_str() {
            "site" => {
                let value = value.ok_or(CommandError::MissingValue("site"))?;
                Ok(Self::Site(value.to_ascii_lowercase()))
            }
            "host" => {
                let value = value.ok_or(CommandError::MissingValue("host"))?;
                Ok(Self::Host(value.to_ascii_lowercase()))
            }
            "port" => {
                let value = value.ok_or(CommandError::MissingValue("port"))?;
                match value.parse::<u16>() {
                    Ok(port) if port > 0 => Ok(Self::Port(port)),
                    _ => Err(CommandError::InvalidValue {
                        setting: "port",
                        reason: format!("'{value}' is not a port between 1 and 65535"),
                    }),
                }
            }
            "provider" => {
                let value = value.ok_or(CommandError::MissingValue("provider"))?;
                value
                    .parse()
                    .map(Self::Provider)
                    .map_err(|reason| CommandError::InvalidValue {
                        setting: "provider",
                        reason,
                    })
            }
            "verifytls" => {
                let value = value.ok_or(CommandError::MissingValue("verifytls"))?;
                match value.to_ascii_lowercase().as_str() {
                    "on" => Ok(Self::VerifyTls(true)),
                    "off" => Ok(Self::VerifyTls(false)),
                    other => Err(CommandError::InvalidValue {
                        setting: "verifytls",
                        reason: format!("expected on or off, got '{other}'"),
                    }),
                }
            }
            other => Err(CommandError::UnknownSetting(other.to_string())),
        }
    }
}

/// Text printed in answer to a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub lines: Vec<String>,
    /// The operator asked to leave.
    pub quit: bool,
}

impl Reply {
    fn lines(lines: Vec<String>) -> Self {
        Self { lines, quit: false }
    }

    fn line(line: impl Into<String>) -> Self {
        Self::lines(vec![line.into()])
    }
}

/// Apply `command` to the session and describe the result.
pub fn execute(session: &Session, command: Command) -> Reply {
    match command {
        Command::Pause => {
            if session.pause() {
                Reply::line("Forwarding is paused. Type resume to continue.")
            } else {
                Reply::line("Forwarding is already paused.")
            }
        }
        Command::Resume => {
            if session.resume() {
                Reply::line("Forwarding resumed.")
            } else {
                Reply::line("Forwarding already resumed.")
            }
        }
        Command::Status => Reply::lines(status_lines(session)),
        Command::Counters => Reply::lines(counter_lines(&session.accounting().snapshot())),
        Command::Reset => {
            session.reset_counters();
            Reply::line("Forward stats cleared")
        }
        Command::Help => Reply::lines(help_lines()),
        Command::Quit => Reply {
            lines: vec!["Goodbye".to_string()],
            quit: true,
        },
        Command::Set(SetCommand::VerifyTls(on)) => {
            session.update_target(|target| target.verify_tls = on);
            Reply::line(format!(
                "TLS verification set to: {}",
                if on { "on" } else { "off" }
            ))
        }
        Command::Set(change) => {
            session.update_target(|target| match change {
                SetCommand::Site(site) => target.site = site,
                SetCommand::Host(host) => target.host = host,
                SetCommand::Port(port) => target.port = port,
                SetCommand::Provider(provider) => target.provider = provider,
                SetCommand::VerifyTls(on) => target.verify_tls = on,
            });
            Reply::lines(status_lines(session))
        }
    }
}

pub fn status_lines(session: &Session) -> Vec<String> {
    let target = session.target();
    let origin = target.origin();
    let state = if session.is_paused() { "Paused" } else { "Active" };
    let site = if target.site.is_empty() {
        "*"
    } else {
        target.site.as_str()
    };
    vec![
        format!("{:<20}{}", "Connection", state),
        format!("{:<20}http://{} -> {}", "Forwarding", site, origin),
        format!("{:<20}https://{} -> {}", "Forwarding", site, origin),
        format!(
            "{:<20}{}",
            "Verify TLS",
            if target.verify_tls {
                "on"
            } else {
                "off (supports self-signed certificates)"
            }
        ),
        format!("{:<20}{}", "In Flight", in_flight_summary(session)),
        format!("{:<20}{}", "Version", env!("CARGO_PKG_VERSION")),
    ]
}

fn in_flight_summary(session: &Session) -> String {
    let items = session.accounting().in_flight();
    match items.first() {
        None => "0".to_string(),
        Some((id, age)) => format!("{} (oldest {} for {}ms)", items.len(), id, age.as_millis()),
    }
}

pub fn counter_lines(counters: &CountersSnapshot) -> Vec<String> {
    vec![
        format!(
            "{:<20}{:<10}{:<10}{:<10}{:<10}{:<10}",
            "Forwarding Counters", "Total", "Pass", "Fail", "Queued", "Max Queue"
        ),
        format!(
            "{:<20}{:<10}{:<10}{:<10}{:<10}{:<10}",
            "",
            counters.total(),
            counters.replays,
            counters.errors,
            counters.queue_current,
            counters.queue_max
        ),
    ]
}

fn help_lines() -> Vec<String> {
    [
        ("quit", "Exit (aliases: q, x, exit)"),
        ("help", "Display this help (alias: ?)"),
        ("pause", "Stop forwarding"),
        ("resume", "Resume forwarding"),
        ("set site <site>", "Select the site to forward"),
        ("set host <host>", "Forward to host"),
        ("set port <port>", "Forward to port"),
        ("set provider <p>", "Forward as http or https"),
        ("set verifytls <on|off>", "TLS verification (off for self-signed)"),
        ("status", "Current session details"),
        ("counters", "Show forwarding counters (also: empty line)"),
        ("reset", "Reset forwarding counters"),
    ]
    .iter()
    .map(|(command, description)| format!(" {command:<25}{description}"))
    .collect()
}
