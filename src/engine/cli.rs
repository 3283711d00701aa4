//! Fleetward CLI Module
//! Command-line definitions for `fleetward-server` and `fleetward-update`

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::engine::config::{CLIENT_CONFIG_FILE, SERVER_CONFIG_FILE};

pub mod formatter;

#[derive(Parser, Debug)]
#[command(name = "fleetward-server")]
#[command(version)]
#[command(about = "Signed release and patch distribution server", long_about = None)]
pub struct ServerCli {
    /// Server config file
    #[arg(short, long, global = true, default_value = SERVER_CONFIG_FILE)]
    pub config: PathBuf,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Operator name recorded in the audit trail
    #[arg(long, global = true, env = "FLEETWARD_ACTOR")]
    pub actor: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve /update and /acknowledge_patch
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
    },

    /// Signing key management
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Release management
    Release {
        #[command(subcommand)]
        action: ReleaseAction,
    },

    /// Patch management
    Patch {
        #[command(subcommand)]
        action: PatchAction,
    },

    /// Host issue management
    Issue {
        #[command(subcommand)]
        action: IssueAction,
    },

    /// Host suspension
    Host {
        #[command(subcommand)]
        action: HostAction,
    },

    /// Audit trail inspection
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum KeysAction {
    /// Generate a signing key at the configured path
    Generate {
        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },

    /// Print the public key clients must be configured with
    Show,
}

#[derive(Subcommand, Debug)]
pub enum ReleaseAction {
    /// Sign and publish a directory tree as a new release
    Build {
        /// Tree to ship
        source: PathBuf,

        /// Release number; must be greater than the current one
        #[arg(short = 'n', long = "version")]
        number: u64,
    },

    /// Show the release being served
    Status,
}

#[derive(Subcommand, Debug)]
pub enum PatchAction {
    /// Patch a single path on some or all hosts
    Create {
        /// Path relative to the client root directory
        path: String,

        /// Local file whose contents are shipped
        #[arg(long, conflicts_with = "delete", required_unless_present = "delete")]
        file: Option<PathBuf>,

        /// Delete the path instead of writing it
        #[arg(long)]
        delete: bool,

        /// Permission bits in octal
        #[arg(short, long, default_value = "755", value_parser = parse_octal_mode)]
        mode: u32,

        /// Ship without a signature; removes any installed signature for the path
        #[arg(long)]
        unsigned: bool,

        /// Target host; repeat for several. Defaults to every known host.
        #[arg(long = "host")]
        hosts: Vec<String>,
    },

    /// List patches with their pending and completed hosts
    List,
}

#[derive(Subcommand, Debug)]
pub enum IssueAction {
    /// Open an issue unless it is already open
    Open {
        hostname: String,
        name: String,

        /// Time the underlying data was sampled (RFC 3339)
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },

    /// Close matching open issues
    Close {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },

    /// Snooze matching open issues
    Snooze {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        name: Option<String>,

        /// Snooze until this time (RFC 3339)
        #[arg(long, conflicts_with = "hours", required_unless_present = "hours")]
        until: Option<DateTime<Utc>>,

        /// Snooze for this many hours from now
        #[arg(long)]
        hours: Option<i64>,
    },

    /// End the snooze of matching open issues
    Unsnooze {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },

    /// List open issues
    List {
        /// Group by host or by issue name
        #[arg(long, default_value = "host")]
        by: IssueGrouping,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        name: Option<String>,
        /// Include hosts that are suspended
        #[arg(long)]
        include_suspended: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum IssueGrouping {
    Host,
    Issue,
}

#[derive(Subcommand, Debug)]
pub enum HostAction {
    /// Hide a host's issues from default listings
    Suspend {
        #[arg(required = true)]
        hosts: Vec<String>,
    },

    /// Undo a suspension
    Unsuspend {
        #[arg(required = true)]
        hosts: Vec<String>,
    },

    /// List known hosts
    List,
}

#[derive(Subcommand, Debug)]
pub enum AuditAction {
    /// Show recent audit records
    List {
        /// Only records with this action
        #[arg(long)]
        action: Option<String>,

        /// Only records by this operator
        #[arg(long)]
        operator: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

#[derive(Parser, Debug)]
#[command(name = "fleetward-update")]
#[command(version)]
#[command(about = "Fetch and apply signed releases and patches", long_about = None)]
#[command(after_help = "Exit status: 0 nothing changed, 42 updated and verified, anything else is an error.")]
pub struct UpdateCli {
    /// Client config file
    #[arg(short, long, default_value = CLIENT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Server URL (overrides config)
    #[arg(long)]
    pub server_url: Option<String>,

    /// Hostname reported to the server (overrides config)
    #[arg(long)]
    pub hostname: Option<String>,

    /// More logging
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn parse_octal_mode(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8).map_err(|e| format!("invalid octal mode {s}: {e}"))?;
    if mode > 0o7777 {
        return Err(format!("mode {s} is out of range"));
    }
    Ok(mode)
}
