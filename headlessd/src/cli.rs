use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// headlessd - lifecycle daemon for the local headless agent
#[derive(Parser, Debug)]
#[command(name = "headlessd")]
#[command(version)]
#[command(about = "Lifecycle daemon for the local headless agent")]
pub struct Cli {
    /// Home directory for preferences, socket and logs
    #[arg(long, global = true, env = "HEADLESSD_HOME")]
    pub home: Option<PathBuf>,

    /// Unix socket path for management commands
    #[arg(long, global = true, env = "HEADLESSD_SOCKET")]
    pub socket: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon
    Serve(ServeArgs),
    /// Print the agent configuration and lifecycle state
    Status,
    /// Start the agent
    Start,
    /// Stop the agent
    Stop,
    /// Stop the agent if needed, then start it again
    Restart,
    /// Stream lifecycle notifications as JSON lines
    Watch,
}

#[derive(Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Daemon config file (default: <home>/headlessd.toml)
    #[arg(long, env = "HEADLESSD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Command line used to launch the agent, split on whitespace
    #[arg(long, env = "HEADLESSD_SERVICE_CMD")]
    pub service_cmd: Option<String>,

    /// Do not start the agent when the daemon boots
    #[arg(long, env = "HEADLESSD_NO_AUTOSTART")]
    pub no_autostart: bool,

    #[arg(long, value_enum, env = "HEADLESSD_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "HEADLESSD_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Also write JSON logs under <home>/log
    #[arg(long, env = "HEADLESSD_LOG_FILE")]
    pub log_file: bool,

    /// How many ports to try starting at the preferred one
    #[arg(long, env = "HEADLESSD_PORT_SCAN_WIDTH")]
    pub port_scan_width: Option<u16>,

    #[arg(long, env = "HEADLESSD_STARTUP_TIMEOUT_SECS")]
    pub startup_timeout_secs: Option<u64>,

    #[arg(long, env = "HEADLESSD_SHUTDOWN_TIMEOUT_SECS")]
    pub shutdown_timeout_secs: Option<u64>,

    /// Let restart attempt the start even when its stop step fails
    #[arg(long, env = "HEADLESSD_RESTART_PROCEED_ON_STOP_FAILURE")]
    pub restart_proceed_on_stop_failure: bool,
}
