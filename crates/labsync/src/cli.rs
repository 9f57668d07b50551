//! Clap derive structures for the `labsync` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// labsync -- live view of a lab server's sensors, equipment and alerts
#[derive(Debug, Parser)]
#[command(
    name = "labsync",
    version,
    about = "Watch and drive a lab server's live state",
    long_about = "Mirrors a lab server's sensors, equipment and alerts over a WebSocket.\n\n\
        The server sends a full snapshot on connect and JSON patches afterwards;\n\
        pump commands are applied locally first and confirmed by the server.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Server profile to use
    #[arg(long, short = 'p', env = "LABSYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Base WebSocket URL (overrides profile)
    #[arg(long, short = 'u', env = "LABSYNC_URL", global = true)]
    pub url: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "LABSYNC_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Seconds to wait for the initial state (overrides config)
    #[arg(long, env = "LABSYNC_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// One JSON document per line
    JsonCompact,
    /// Plain text, one identifier per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream state changes and alerts until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Fetch the current state once and print it
    #[command(alias = "st")]
    Status(StatusArgs),

    /// Start, stop or set the speed of a pump
    Pump(PumpArgs),

    /// Inspect the configuration
    Config(ConfigArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only print alerts
    #[arg(long)]
    pub alerts_only: bool,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,
}

// ── Status ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Which section to print
    #[arg(value_enum, default_value = "all")]
    pub section: StatusSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusSection {
    All,
    Sensors,
    Equipment,
    Alerts,
}

// ── Pump ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct PumpArgs {
    /// Equipment id of the pump
    pub id: String,

    #[command(subcommand)]
    pub action: PumpAction,
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum PumpAction {
    /// Start a stopped pump
    Start,
    /// Stop a running pump
    Stop,
    /// Start if stopped, stop if running
    Toggle,
    /// Set the speed in RPM (clamped to the pump's range)
    Speed {
        #[arg(allow_negative_numbers = true)]
        rpm: f64,
    },
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,
    /// Print the effective configuration (file + environment)
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
