//! Daemon configuration and the serve loop.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::bus::BroadcastBus;
use crate::cli::ServeArgs;
use crate::config::{ConfigError, JsonFileStore};
use crate::controller::{LifecycleController, RestartPolicy, TransitionError};
use crate::defaults::{
    DEFAULT_PORT_SCAN_WIDTH, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_STARTUP_TIMEOUT,
    READINESS_POLL_INTERVAL,
};
use crate::dispatch::CommandDispatcher;
use crate::logging::LogFormat;
use crate::paths;
use crate::ports::LocalPortAllocator;
use crate::process::CommandProcess;
use crate::socket::SocketServer;

#[derive(Debug, Error)]
pub enum DaemonConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Settings read from `headlessd.toml`. Every key is optional.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub socket: Option<PathBuf>,
    pub service_command: Option<Vec<String>>,
    pub autostart: Option<bool>,
    pub log_format: Option<LogFormat>,
    pub log_level: Option<String>,
    pub log_file: Option<bool>,
    pub port_scan_width: Option<u16>,
    pub startup_timeout_secs: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,
    pub restart_policy: Option<RestartPolicy>,
}

impl FileConfig {
    pub fn parse(path: &Path, raw: &str) -> Result<Self, DaemonConfigError> {
        toml::from_str(raw).map_err(|source| DaemonConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the config file. A missing file is only an error when it was
    /// asked for explicitly.
    pub fn load(path: &Path, required: bool) -> Result<Self, DaemonConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::parse(path, &raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => Ok(Self::default()),
            Err(source) => Err(DaemonConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Fully resolved daemon settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub home: PathBuf,
    pub socket: PathBuf,
    pub service_command: Vec<String>,
    pub autostart: bool,
    pub log_format: LogFormat,
    pub log_level: String,
    pub log_file: bool,
    pub port_scan_width: u16,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub restart_policy: RestartPolicy,
}

impl DaemonConfig {
    /// Read the config file for `args` and merge it.
    pub fn resolve(
        home: PathBuf,
        socket: Option<PathBuf>,
        args: &ServeArgs,
    ) -> Result<Self, DaemonConfigError> {
        let (path, required) = match &args.config {
            Some(path) => (path.clone(), true),
            None => (paths::config_path(&home), false),
        };
        let file = FileConfig::load(&path, required)?;
        Ok(Self::merge(home, socket, args, file))
    }

    /// CLI and environment win over the file, the file wins over defaults.
    pub fn merge(home: PathBuf, socket: Option<PathBuf>, args: &ServeArgs, file: FileConfig) -> Self {
        let service_command = match &args.service_cmd {
            Some(cmd) => cmd.split_whitespace().map(str::to_string).collect(),
            None => file.service_command.unwrap_or_default(),
        };
        let restart_policy = if args.restart_proceed_on_stop_failure {
            RestartPolicy::ProceedOnStopFailure
        } else {
            file.restart_policy.unwrap_or_default()
        };

        Self {
            socket: socket
                .or(file.socket)
                .unwrap_or_else(|| paths::socket_path(&home)),
            service_command,
            autostart: !args.no_autostart && file.autostart.unwrap_or(true),
            log_format: args.log_format.or(file.log_format).unwrap_or_default(),
            log_level: args
                .log_level
                .clone()
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
            log_file: args.log_file || file.log_file.unwrap_or(false),
            port_scan_width: args
                .port_scan_width
                .or(file.port_scan_width)
                .unwrap_or(DEFAULT_PORT_SCAN_WIDTH),
            startup_timeout: args
                .startup_timeout_secs
                .or(file.startup_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_STARTUP_TIMEOUT),
            shutdown_timeout: args
                .shutdown_timeout_secs
                .or(file.shutdown_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
            restart_policy,
            home,
        }
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.log_file.then(|| paths::log_dir(&self.home))
    }
}

/// Socket a client command should talk to: explicit flag, then the daemon's
/// config file, then the default under `home`.
pub fn client_socket_path(home: &Path, socket: Option<PathBuf>) -> PathBuf {
    if let Some(socket) = socket {
        return socket;
    }
    FileConfig::load(&paths::config_path(home), false)
        .ok()
        .and_then(|file| file.socket)
        .unwrap_or_else(|| paths::socket_path(home))
}

/// Build the controller and its collaborators from resolved settings.
///
/// Writes default preferences on first boot.
pub fn build(
    config: &DaemonConfig,
) -> Result<(Arc<LifecycleController>, Arc<BroadcastBus>), ConfigError> {
    let store = Arc::new(JsonFileStore::new(
        paths::preferences_path(&config.home),
        paths::default_agent_home(&config.home),
    ));
    let preferences = store.initialize()?;
    tracing::info!(
        global_id = %preferences.global_id,
        "Preferences: {}",
        store.path().display()
    );

    let ports = Arc::new(LocalPortAllocator::new(config.port_scan_width));
    let process = Arc::new(CommandProcess::new(
        config.service_command.clone(),
        config.startup_timeout,
        config.shutdown_timeout,
    ));
    let bus = Arc::new(BroadcastBus::new());

    let controller = LifecycleController::new(store, ports, process, bus.clone())
        .with_restart_policy(config.restart_policy);
    Ok((Arc::new(controller), bus))
}

/// Run the daemon until SIGINT or SIGTERM.
pub async fn run(config: DaemonConfig) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.home)?;

    tracing::info!("headlessd v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Home: {}", config.home.display());
    tracing::info!("Socket: {}", config.socket.display());
    if config.service_command.is_empty() {
        tracing::warn!("No service command configured; start requests will fail");
    }

    let (controller, bus) = build(&config)?;
    let dispatcher = Arc::new(CommandDispatcher::new(controller.clone()));
    let server = SocketServer::new(&config.socket);

    if config.autostart {
        let controller = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.start().await {
                tracing::error!(error = %e, "Autostart failed");
            }
        });
    }

    server.run(dispatcher, bus, shutdown_signal()).await?;

    tracing::info!("Shutting down");
    stop_for_exit(&controller, config.shutdown_timeout + config.startup_timeout).await;
    Ok(())
}

/// Stop the agent before exit, waiting out a transition that is still running.
async fn stop_for_exit(controller: &LifecycleController, patience: Duration) {
    let deadline = tokio::time::Instant::now() + patience;
    loop {
        match controller.shutdown().await {
            Ok(()) => return,
            Err(TransitionError::Busy { in_flight }) if tokio::time::Instant::now() < deadline => {
                tracing::debug!(%in_flight, "Waiting for transition before shutdown");
                tokio::time::sleep(READINESS_POLL_INTERVAL).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to stop agent on shutdown");
                return;
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
