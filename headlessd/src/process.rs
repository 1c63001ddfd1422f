//! Managed service process - launches and terminates the headless agent

use async_trait::async_trait;
use headless_core::{AgentPreferences, SERVICE_NAME};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;

use crate::defaults::READINESS_POLL_INTERVAL;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no service command configured")]
    NotConfigured,
    #[error("failed to spawn service: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("service exited during startup ({0})")]
    ExitedDuringStartup(String),
    #[error("service did not accept connections on port {port} within {}s", .timeout.as_secs())]
    StartupTimeout { port: u16, timeout: Duration },
    #[error("failed to terminate service: {0}")]
    Terminate(#[source] std::io::Error),
}

/// Everything the agent is launched with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchSpec {
    pub port: u16,
    pub base_url: String,
    pub global_id: String,
    pub headless: bool,
    pub log_files_path: PathBuf,
    pub service_name: String,
    pub screenshot: bool,
    pub agent_home: PathBuf,
    pub static_root: PathBuf,
}

impl LaunchSpec {
    pub fn from_preferences(preferences: &AgentPreferences, port: u16) -> Self {
        Self {
            port,
            base_url: preferences.base_url.clone(),
            global_id: preferences.global_id.clone(),
            headless: false,
            log_files_path: preferences.log_path(),
            service_name: SERVICE_NAME.to_string(),
            screenshot: true,
            agent_home: preferences.agent_home.clone(),
            static_root: preferences.agent_home.clone(),
        }
    }

    /// Environment exported to the agent process.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("PORT", self.port.to_string()),
            ("MUNEW_BASE_URL", self.base_url.clone()),
            ("GLOBAL_ID", self.global_id.clone()),
            ("HEADLESS", self.headless.to_string()),
            ("LOG_FILES_PATH", self.log_files_path.display().to_string()),
            ("SERVICE_NAME", self.service_name.clone()),
            ("SCREENSHOT", self.screenshot.to_string()),
            ("AGENT_HOME", self.agent_home.display().to_string()),
            ("STATIC_ROOT", self.static_root.display().to_string()),
        ]
    }
}

/// The managed service as seen by the lifecycle controller.
#[async_trait]
pub trait ServiceProcess: Send + Sync {
    /// Launch the service and return once it is ready.
    async fn launch(&self, spec: &LaunchSpec) -> Result<(), ServiceError>;

    /// Stop the service. Succeeds when nothing is running.
    async fn terminate(&self) -> Result<(), ServiceError>;
}

/// Runs the agent as a child process.
pub struct CommandProcess {
    command: Vec<String>,
    startup_timeout: Duration,
    shutdown_timeout: Duration,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl CommandProcess {
    pub fn new(command: Vec<String>, startup_timeout: Duration, shutdown_timeout: Duration) -> Self {
        Self {
            command,
            startup_timeout,
            shutdown_timeout,
            child: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(|c| c.id())
    }

    fn spawn(&self, spec: &LaunchSpec) -> Result<Child, ServiceError> {
        let (program, args) = self.command.split_first().ok_or(ServiceError::NotConfigured)?;

        std::fs::create_dir_all(&spec.log_files_path).map_err(ServiceError::Spawn)?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&spec.agent_home)
            .envs(spec.env_vars())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ServiceError::Spawn)?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        Ok(child)
    }

    /// Wait until the agent accepts TCP connections on its port.
    async fn wait_for_ready(child: &mut Child, port: u16) -> Result<(), ServiceError> {
        let mut interval = tokio::time::interval(READINESS_POLL_INTERVAL);

        loop {
            interval.tick().await;

            if let Some(status) = child.try_wait().map_err(ServiceError::Spawn)? {
                return Err(ServiceError::ExitedDuringStartup(status.to_string()));
            }

            match tokio::net::TcpStream::connect(("127.0.0.1", port)).await {
                Ok(_) => return Ok(()),
                Err(e) => tracing::trace!(port, error = %e, "Agent not accepting connections yet"),
            }
        }
    }

    async fn shutdown_child(&self, mut child: Child) -> Result<(), ServiceError> {
        if let Some(pid) = child.id() {
            send_sigterm(pid);
        }

        match timeout(self.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(%status, "Agent exited");
                Ok(())
            }
            Ok(Err(e)) => Err(ServiceError::Terminate(e)),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Agent ignored SIGTERM, killing"
                );
                child.kill().await.map_err(ServiceError::Terminate)
            }
        }
    }
}

fn send_sigterm(pid: u32) {
    // ESRCH means it is already gone; wait() reaps it either way.
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

async fn forward_output<R>(stream: R, stream_name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(target: "agent", stream = stream_name, "{}", line);
    }
}

#[async_trait]
impl ServiceProcess for CommandProcess {
    async fn launch(&self, spec: &LaunchSpec) -> Result<(), ServiceError> {
        let mut slot = self.child.lock().await;
        if let Some(stale) = slot.take() {
            tracing::warn!("Replacing a still registered agent process");
            self.shutdown_child(stale).await?;
        }

        tracing::info!(
            port = spec.port,
            agent_home = %spec.agent_home.display(),
            "Spawning agent"
        );
        let mut child = self.spawn(spec)?;

        match timeout(
            self.startup_timeout,
            Self::wait_for_ready(&mut child, spec.port),
        )
        .await
        {
            Ok(Ok(())) => {
                tracing::info!(port = spec.port, pid = child.id(), "Agent is ready");
                *slot = Some(child);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                Err(e)
            }
            Err(_) => {
                let _ = child.kill().await;
                Err(ServiceError::StartupTimeout {
                    port: spec.port,
                    timeout: self.startup_timeout,
                })
            }
        }
    }

    async fn terminate(&self) -> Result<(), ServiceError> {
        let Some(child) = self.child.lock().await.take() else {
            return Ok(());
        };
        self.shutdown_child(child).await
    }
}
