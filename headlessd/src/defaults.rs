use std::time::Duration;

/// Port the agent is started on when nothing else is known.
pub const DEFAULT_PORT: u16 = 8090;
/// How many consecutive ports are tried, starting at the preferred one.
pub const DEFAULT_PORT_SCAN_WIDTH: u16 = 100;

pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const SOCKET_FILE_NAME: &str = "headlessd.sock";
pub const PREFERENCES_FILE_NAME: &str = "preferences.json";
pub const CONFIG_FILE_NAME: &str = "headlessd.toml";
pub const LOG_FILE_PREFIX: &str = "headlessd.log";
