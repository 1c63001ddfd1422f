//! Lifecycle controller - the state machine that owns the managed service
//!
//! Every transition runs under an exclusive guard taken with `try_lock`, so a
//! command that arrives while another transition is in flight is rejected
//! instead of queued. The state itself sits behind a synchronous lock that is
//! never held across an await point; the only suspension points are port
//! allocation and process launch/terminate.

mod error;
mod state;

pub use error::TransitionError;
pub use state::{LifecycleState, RestartPolicy, TransitionRequest};

use headless_core::{
    AgentPreferences, Notification, NotificationSubject, Phase, PreferencesPatch, ServiceConfig,
};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::bus::NotificationBus;
use crate::config::ConfigStore;
use crate::ports::PortAllocator;
use crate::process::{LaunchSpec, ServiceProcess};

pub struct LifecycleController {
    config: Arc<dyn ConfigStore>,
    ports: Arc<dyn PortAllocator>,
    process: Arc<dyn ServiceProcess>,
    bus: Arc<dyn NotificationBus>,
    restart_policy: RestartPolicy,
    transition_lock: tokio::sync::Mutex<()>,
    in_flight: RwLock<Option<TransitionRequest>>,
    state: RwLock<LifecycleState>,
}

/// Held for the whole body of a transition, terminal publish included.
///
/// `in_flight` is only written with its write lock held while the transition
/// lock is taken or released, so a rejected caller always sees the request
/// that holds the lock.
struct TransitionGuard<'a> {
    in_flight: &'a RwLock<Option<TransitionRequest>>,
    lock: Option<tokio::sync::MutexGuard<'a, ()>>,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.write();
        *in_flight = None;
        self.lock.take();
    }
}

impl LifecycleController {
    pub fn new(
        config: Arc<dyn ConfigStore>,
        ports: Arc<dyn PortAllocator>,
        process: Arc<dyn ServiceProcess>,
        bus: Arc<dyn NotificationBus>,
    ) -> Self {
        Self {
            config,
            ports,
            process,
            bus,
            restart_policy: RestartPolicy::default(),
            transition_lock: tokio::sync::Mutex::new(()),
            in_flight: RwLock::new(None),
            state: RwLock::new(LifecycleState::default()),
        }
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state.read().clone()
    }

    pub fn phase(&self) -> Phase {
        self.state.read().phase
    }

    /// Transition currently holding the guard, if any.
    pub fn in_flight(&self) -> Option<TransitionRequest> {
        *self.in_flight.read()
    }

    /// Project stored preferences and the live state into a status record.
    ///
    /// Never touches the port allocator or the service process, and reports
    /// intermediate phases as they are.
    pub fn get_status(&self) -> Result<ServiceConfig, TransitionError> {
        let preferences = self.config.load()?;
        Ok(self.snapshot(&preferences))
    }

    /// Merge a preferences update and return the fresh projection.
    ///
    /// Takes effect for the next start; a running agent keeps its launch
    /// settings.
    pub fn update_config(&self, patch: PreferencesPatch) -> Result<ServiceConfig, TransitionError> {
        let preferences = self.config.update(patch)?;
        tracing::info!(phase = %self.phase(), "Agent preferences updated");
        Ok(self.snapshot(&preferences))
    }

    pub async fn start(&self) -> Result<(), TransitionError> {
        let _guard = self.begin(TransitionRequest::Start)?;
        self.check(TransitionRequest::Start)?;
        let preferences = self.config.load()?;
        self.start_sequence(&preferences).await
    }

    pub async fn stop(&self) -> Result<(), TransitionError> {
        let _guard = self.begin(TransitionRequest::Stop)?;
        self.check(TransitionRequest::Stop)?;
        let preferences = self.config.load()?;
        self.stop_sequence(&preferences).await
    }

    /// Stop (unless already stopped) and start again as one transition.
    ///
    /// The guard is held across both steps, so nothing can interleave between
    /// the stop completing and the start beginning.
    pub async fn restart(&self) -> Result<(), TransitionError> {
        let _guard = self.begin(TransitionRequest::Restart)?;
        self.check(TransitionRequest::Restart)?;
        let preferences = self.config.load()?;

        if self.phase() != Phase::Stopped
            && let Err(e) = self.stop_sequence(&preferences).await
        {
            match self.restart_policy {
                RestartPolicy::AbortOnStopFailure => return Err(e),
                RestartPolicy::ProceedOnStopFailure => {
                    tracing::warn!(
                        request = %TransitionRequest::Restart,
                        error = %e,
                        "Stop step failed, starting anyway"
                    );
                }
            }
        }

        self.start_sequence(&preferences).await
    }

    /// Stop the agent if it may still be running. Used on daemon exit.
    pub async fn shutdown(&self) -> Result<(), TransitionError> {
        let _guard = self.begin(TransitionRequest::Stop)?;
        if !matches!(self.phase(), Phase::Running | Phase::StopFailed) {
            return Ok(());
        }
        let preferences = self.config.load()?;
        self.stop_sequence(&preferences).await
    }

    fn begin(&self, request: TransitionRequest) -> Result<TransitionGuard<'_>, TransitionError> {
        let mut current = self.in_flight.write();
        let Ok(lock) = self.transition_lock.try_lock() else {
            // Set whenever the transition lock is held.
            let in_flight = (*current).unwrap_or(request);
            tracing::debug!(%request, %in_flight, "Rejecting request, transition in progress");
            return Err(TransitionError::Busy { in_flight });
        };
        *current = Some(request);
        drop(current);
        Ok(TransitionGuard {
            in_flight: &self.in_flight,
            lock: Some(lock),
        })
    }

    fn check(&self, request: TransitionRequest) -> Result<(), TransitionError> {
        let phase = self.phase();
        if state::accepts(request, phase) {
            return Ok(());
        }
        tracing::debug!(%request, %phase, "Rejecting request, no edge from current phase");
        Err(TransitionError::InvalidTransition { phase, request })
    }

    fn snapshot(&self, preferences: &AgentPreferences) -> ServiceConfig {
        let state = self.state.read();
        ServiceConfig::project(
            preferences.clone(),
            state.phase,
            state.port,
            state.last_error.clone(),
        )
    }

    /// Move into a transitioning phase and announce it.
    fn enter(&self, phase: Phase, subject: NotificationSubject, preferences: &AgentPreferences) {
        {
            let mut state = self.state.write();
            state.phase = phase;
            state.last_error = None;
        }
        self.bus
            .publish(Notification::begin(subject, self.snapshot(preferences)));
    }

    /// Record the outcome of a transition and publish its terminal notification.
    fn finish(
        &self,
        subject: NotificationSubject,
        preferences: &AgentPreferences,
        outcome: Result<Phase, (Phase, &TransitionError)>,
    ) {
        let error = {
            let mut state = self.state.write();
            match outcome {
                Ok(phase) => {
                    state.phase = phase;
                    None
                }
                Err((phase, e)) => {
                    let detail = e.detail();
                    state.phase = phase;
                    state.last_error = Some(detail.clone());
                    Some(detail)
                }
            }
        };
        self.bus.publish(Notification::finished(
            subject,
            self.snapshot(preferences),
            error,
        ));
    }

    async fn start_sequence(&self, preferences: &AgentPreferences) -> Result<(), TransitionError> {
        let preferred = preferences
            .preferred_port
            .unwrap_or_else(|| self.state.read().port);

        self.enter(Phase::Starting, NotificationSubject::Starting, preferences);
        tracing::info!(phase = %Phase::Starting, port = preferred, "Starting agent");

        match self.launch(preferences, preferred).await {
            Ok(port) => {
                self.state.write().port = port;
                self.finish(NotificationSubject::Started, preferences, Ok(Phase::Running));
                tracing::info!(phase = %Phase::Running, port, "Agent started");
                Ok(())
            }
            Err(e) => {
                self.finish(
                    NotificationSubject::Started,
                    preferences,
                    Err((Phase::StartFailed, &e)),
                );
                tracing::error!(phase = %Phase::StartFailed, error = %e, "Agent failed to start");
                Err(e)
            }
        }
    }

    async fn launch(&self, preferences: &AgentPreferences, preferred: u16) -> Result<u16, TransitionError> {
        let port = self.ports.allocate(preferred).await?;
        let spec = LaunchSpec::from_preferences(preferences, port);
        self.process
            .launch(&spec)
            .await
            .map_err(TransitionError::Launch)?;
        Ok(port)
    }

    async fn stop_sequence(&self, preferences: &AgentPreferences) -> Result<(), TransitionError> {
        self.enter(Phase::Stopping, NotificationSubject::Stopping, preferences);
        tracing::info!(phase = %Phase::Stopping, port = self.state.read().port, "Stopping agent");

        match self.process.terminate().await {
            Ok(()) => {
                self.finish(NotificationSubject::Stopped, preferences, Ok(Phase::Stopped));
                tracing::info!(phase = %Phase::Stopped, "Agent stopped");
                Ok(())
            }
            Err(e) => {
                let e = TransitionError::Terminate(e);
                self.finish(
                    NotificationSubject::Stopped,
                    preferences,
                    Err((Phase::StopFailed, &e)),
                );
                tracing::error!(phase = %Phase::StopFailed, error = %e, "Agent failed to stop");
                Err(e)
            }
        }
    }
}
