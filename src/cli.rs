//! # Command-Line Interface Module
//!
//! Argument parsing for the `crm-rpc` demonstration binary, using `clap`'s
//! derive API. The binary is a thin front-end over the library: `serve`
//! stands up a sample echo CRM on a given address, `call` issues one call
//! against a running server and prints the decoded reply.

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser, Subcommand,
};

/// Defines the styles for the help message to replicate clap v3's appearance.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// `crm-rpc` - a demonstration front-end for the resource-oriented RPC core
///
/// Stands up a sample `Echo` CRM over any of the five supported transports,
/// or drives a single call against one that is already running, for manual
/// smoke-testing of a transport/address combination.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity; repeat for more detail (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress the colorized human-readable log stream; only RUST_LOG-driven
    /// diagnostic output is shown.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Bind a sample echo CRM at the given address and serve until Ctrl-C.
    Serve {
        /// Address to bind, e.g. `tcp://127.0.0.1:17011`, `ipc:///tmp/crm.sock`,
        /// `thread://demo`, `memory://demo`, `http://127.0.0.1:8080`.
        #[arg(short, long)]
        address: String,

        /// Grace window for in-flight calls when Ctrl-C is received.
        #[arg(short, long, value_parser = parse_duration, default_value = "5s")]
        shutdown_timeout: std::time::Duration,
    },
    /// Issue one `echo` call against a running server and print the reply.
    Call {
        /// Address of the running server.
        #[arg(short, long)]
        address: String,

        /// Value to echo.
        #[arg(long)]
        value: String,

        /// Per-call timeout.
        #[arg(short, long, value_parser = parse_duration, default_value = "30s")]
        timeout: std::time::Duration,
    },
}

/// Parse human-readable duration strings like "10s", "500ms", "2m".
pub fn parse_duration(s: &str) -> Result<std::time::Duration, String> {
    let s = s.trim();
    let (number_part, unit_part) = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .map(|i| s.split_at(i))
        .ok_or_else(|| format!("missing unit in duration: {}", s))?;
    let value: f64 = number_part
        .parse()
        .map_err(|_| format!("invalid number in duration: {}", s))?;
    let seconds = match unit_part {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(format!("unknown duration unit: {}", other)),
    };
    Ok(std::time::Duration::from_secs_f64(seconds))
}
