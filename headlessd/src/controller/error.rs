use headless_core::{ErrorDetail, Phase};
use thiserror::Error;

use super::TransitionRequest;
use crate::config::ConfigError;
use crate::ports::PortError;
use crate::process::ServiceError;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("a {in_flight} is already in progress")]
    Busy { in_flight: TransitionRequest },
    #[error("cannot {request} while {phase}")]
    InvalidTransition {
        phase: Phase,
        request: TransitionRequest,
    },
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("port unavailable: {0}")]
    PortUnavailable(#[from] PortError),
    #[error("launch failed: {0}")]
    Launch(#[source] ServiceError),
    #[error("terminate failed: {0}")]
    Terminate(#[source] ServiceError),
}

impl TransitionError {
    /// Stable identifier carried in error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            TransitionError::Busy { .. } => "busy",
            TransitionError::InvalidTransition { .. } => "invalid_transition",
            TransitionError::Config(_) => "config",
            TransitionError::PortUnavailable(_) => "port_unavailable",
            TransitionError::Launch(_) => "service_launch",
            TransitionError::Terminate(_) => "service_terminate",
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail::new(self.kind(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_names_the_in_flight_request() {
        let err = TransitionError::Busy {
            in_flight: TransitionRequest::Restart,
        };
        assert_eq!(err.kind(), "busy");
        assert_eq!(err.to_string(), "a restart is already in progress");
    }

    #[test]
    fn detail_carries_kind_and_message() {
        let err = TransitionError::PortUnavailable(PortError::Exhausted {
            preferred: 8090,
            attempts: 100,
        });
        let detail = err.detail();
        assert_eq!(detail.kind, "port_unavailable");
        assert!(detail.message.contains("8090"));

        let err = TransitionError::InvalidTransition {
            phase: Phase::Running,
            request: TransitionRequest::Start,
        };
        assert_eq!(err.to_string(), "cannot start while running");
    }
}
