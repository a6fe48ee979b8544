//! Process configuration.
//!
//! Parsed from the command line once at startup and immutable afterwards.
//! The core consumes `mode`, `destination`, `middleware`, `endpoint` and
//! `verbose`; ports and the database path are wiring for the listeners and
//! the store.

use std::fmt;
use std::path::PathBuf;

use clap::Parser;
use regex::Regex;

/// How the engine treats each intercepted request. Process-wide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Forward upstream and persist the exchange.
    Capture,
    /// Serve recorded responses; never touch the upstream.
    #[default]
    Virtualize,
    /// Manufacture responses entirely from the middleware command.
    Synthesize,
    /// Forward upstream, transform the response through middleware.
    Modify,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Capture => "capture",
            Mode::Virtualize => "virtualize",
            Mode::Synthesize => "synthesize",
            Mode::Modify => "modify",
        };
        f.write_str(name)
    }
}

/// Command line surface.
#[derive(Parser, Debug)]
#[command(name = "mimic", version, about = "Record-and-replay HTTP(S) proxy for service virtualization", long_about = None)]
pub struct Args {
    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
    /// Forward traffic upstream and record every exchange
    #[arg(long)]
    pub capture: bool,
    /// Manufacture responses entirely from the middleware command
    #[arg(long)]
    pub synthesize: bool,
    /// Transform live upstream responses through the middleware command
    #[arg(long)]
    pub modify: bool,
    /// Regex deciding which tunneled hosts are intercepted
    #[arg(long, default_value = ".")]
    pub destination: String,
    /// Path to the middleware executable
    #[arg(long)]
    pub middleware: Option<String>,
    /// Upstream host:port for non-proxied direct traffic
    #[arg(long)]
    pub endpoint: Option<String>,
    /// Proxy listener port
    #[arg(long = "pp", default_value_t = 8500)]
    pub proxy_port: u16,
    /// Admin listener port
    #[arg(long = "ap", default_value_t = 8888)]
    pub admin_port: u16,
    /// Database directory for recorded traffic
    #[arg(long, default_value = "mimic.db")]
    pub database: PathBuf,
}

/// Startup-fatal configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("only one of --capture, --synthesize and --modify may be given")]
    ConflictingModes,
    #[error("{0} mode requires --middleware")]
    MiddlewareRequired(Mode),
    #[error("invalid destination pattern: {0}")]
    InvalidDestination(#[from] regex::Error),
}

/// Validated, read-only runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub destination: Regex,
    pub middleware: Option<String>,
    pub endpoint: Option<String>,
    pub verbose: bool,
    pub proxy_port: u16,
    pub admin_port: u16,
    pub database: PathBuf,
}

impl Config {
    /// Validates parsed arguments into a runtime configuration.
    ///
    /// # Errors
    ///
    /// Rejects more than one mode flag, Synthesize or Modify without a
    /// middleware command, and a destination pattern that does not compile.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let mode = match (args.capture, args.synthesize, args.modify) {
            (false, false, false) => Mode::Virtualize,
            (true, false, false) => Mode::Capture,
            (false, true, false) => Mode::Synthesize,
            (false, false, true) => Mode::Modify,
            _ => return Err(ConfigError::ConflictingModes),
        };

        if matches!(mode, Mode::Synthesize | Mode::Modify) && args.middleware.is_none() {
            return Err(ConfigError::MiddlewareRequired(mode));
        }

        let destination = Regex::new(&args.destination)?;

        Ok(Self {
            mode,
            destination,
            middleware: args.middleware,
            endpoint: args.endpoint,
            verbose: args.verbose,
            proxy_port: args.proxy_port,
            admin_port: args.admin_port,
            database: args.database,
        })
    }
}
