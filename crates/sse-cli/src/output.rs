//! Output formatting for sse-listen (text, json)

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use sse_client::{ClientError, ConnectionInfo, ServerCommand, ServerEventMessage};
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per event (default)
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }

    /// Parse a config file value
    pub fn from_name(name: &str) -> Option<Self> {
        Self::from_str(name, true).ok()
    }
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

/// Tagged record written in json mode
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum JsonRecord<'a> {
    Connect(&'a ConnectionInfo),
    Message(&'a ServerEventMessage),
    Command(&'a ServerCommand),
    Error { message: String },
}

/// Connection summary printed on connect
#[derive(Debug, Tabled)]
struct ConnectionRow {
    #[tabled(rename = "Subscription")]
    id: String,
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Heartbeat")]
    heartbeat: String,
    #[tabled(rename = "Idle Timeout")]
    idle_timeout: String,
}

impl ConnectionRow {
    fn from_info(info: &ConnectionInfo) -> Self {
        Self {
            id: info.id.clone().unwrap_or_else(|| "-".to_string()),
            user: match (&info.display_name, &info.user_id) {
                (Some(name), Some(id)) => format!("{} ({})", name, id),
                (Some(name), None) => name.clone(),
                (None, Some(id)) => id.clone(),
                (None, None) => "-".to_string(),
            },
            heartbeat: format!("every {}ms", info.heartbeat_interval_ms),
            idle_timeout: format!("{}ms", info.idle_timeout_ms),
        }
    }
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg);
        }
    }

    /// Print an error message
    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    pub fn connected(&self, info: &ConnectionInfo) {
        match self.format {
            OutputFormat::Text => {
                if !self.quiet {
                    println!("{}", "Connected".green().bold());
                    println!("{}", Table::new([ConnectionRow::from_info(info)]));
                }
            }
            OutputFormat::Json => print_json(&JsonRecord::Connect(info)),
        }
    }

    pub fn message(&self, msg: &ServerEventMessage) {
        match self.format {
            OutputFormat::Text => println!("{}", format_message(msg)),
            OutputFormat::Json => print_json(&JsonRecord::Message(msg)),
        }
    }

    pub fn command(&self, command: &ServerCommand) {
        match self.format {
            OutputFormat::Text => println!("{}", format_command(command).cyan()),
            OutputFormat::Json => print_json(&JsonRecord::Command(command)),
        }
    }

    pub fn exception(&self, err: &ClientError) {
        match self.format {
            OutputFormat::Text => self.error(&format!("Stream error: {}", err)),
            OutputFormat::Json => print_json(&JsonRecord::Error {
                message: err.to_string(),
            }),
        }
    }
}

fn print_json<T: Serialize>(record: &T) {
    if let Ok(json) = serde_json::to_string(record) {
        println!("{}", json);
    }
}

/// `[#id] channel@op.target json`
fn format_message(msg: &ServerEventMessage) -> String {
    let id = msg
        .event_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let selector = match &msg.channel {
        Some(channel) => format!("{}@{}", channel, msg.selector),
        None => msg.selector.clone(),
    };
    format!("[#{}] {} {}", id, selector.bold(), msg.json)
}

fn format_command(command: &ServerCommand) -> String {
    let who = command
        .display_name
        .as_deref()
        .or(command.user_id.as_deref())
        .unwrap_or("unknown user");
    let channels = if command.channels.is_empty() {
        String::new()
    } else {
        format!(" [{}]", command.channels.join(","))
    };
    format!("* {} {:?}{}", who, command.kind, channels)
}
