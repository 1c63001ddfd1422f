use headless_core::{ErrorDetail, Phase};
use serde::{Deserialize, Serialize};

use crate::defaults::DEFAULT_PORT;

/// Live lifecycle state of the managed service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleState {
    pub phase: Phase,
    /// Bound port while running or stopping; otherwise the last successfully
    /// bound port, or the default before the first start.
    pub port: u16,
    pub last_error: Option<ErrorDetail>,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self {
            phase: Phase::Stopped,
            port: DEFAULT_PORT,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionRequest {
    Start,
    Stop,
    Restart,
}

impl std::fmt::Display for TransitionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionRequest::Start => write!(f, "start"),
            TransitionRequest::Stop => write!(f, "stop"),
            TransitionRequest::Restart => write!(f, "restart"),
        }
    }
}

/// What restart does when its stop step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Surface the stop failure and leave the service in `StopFailed`.
    #[default]
    AbortOnStopFailure,
    /// Log the stop failure and attempt the start anyway.
    ProceedOnStopFailure,
}

/// Phases a plain start or stop may begin from.
pub(super) fn accepts(request: TransitionRequest, phase: Phase) -> bool {
    match request {
        TransitionRequest::Start => matches!(phase, Phase::Stopped | Phase::StartFailed),
        TransitionRequest::Stop => matches!(phase, Phase::Running | Phase::StopFailed),
        TransitionRequest::Restart => !phase.is_transitioning(),
    }
}
