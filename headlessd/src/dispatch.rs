//! Command dispatcher - maps management requests onto the controller
//!
//! This is the only place where controller failures are turned into
//! `{status: false, error}` payloads.

use headless_core::{
    Command, CommandRequest, ErrorDetail, HelloResponse, PROTOCOL_VERSION, Response, SUBJECTS,
};
use std::sync::Arc;

use crate::controller::LifecycleController;

pub struct CommandDispatcher {
    controller: Arc<LifecycleController>,
}

impl CommandDispatcher {
    pub fn new(controller: Arc<LifecycleController>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<LifecycleController> {
        &self.controller
    }

    pub async fn dispatch(&self, request: CommandRequest) -> Response {
        match Command::parse(&request) {
            Ok(command) => self.handle(command).await,
            Err(e) => {
                tracing::warn!(subject = %request.subject, error = %e, "Rejected request");
                Response::failure(ErrorDetail::new(e.kind(), e.to_string()))
            }
        }
    }

    pub async fn handle(&self, command: Command) -> Response {
        tracing::debug!(subject = command.subject(), "Handling command");
        match command {
            Command::Hello { protocol_version } => {
                if protocol_version != PROTOCOL_VERSION {
                    return Response::failure(ErrorDetail::new(
                        "protocol_mismatch",
                        format!(
                            "Protocol version mismatch: client={} server={}",
                            protocol_version, PROTOCOL_VERSION
                        ),
                    ));
                }
                Response::ok(HelloResponse {
                    protocol_version: PROTOCOL_VERSION,
                    server_version: env!("CARGO_PKG_VERSION").to_string(),
                    subjects: SUBJECTS.iter().map(|s| s.to_string()).collect(),
                })
            }
            Command::GetHeadlessConfig => match self.controller.get_status() {
                Ok(config) => Response::ok(config),
                Err(e) => Response::failure(e.detail()),
            },
            Command::Start => match self.controller.start().await {
                Ok(()) => Response::done(),
                Err(e) => Response::failure(e.detail()),
            },
            Command::Stop => match self.controller.stop().await {
                Ok(()) => Response::ok(serde_json::json!({})),
                Err(e) => Response::failure(e.detail()).with_data(serde_json::json!({})),
            },
            Command::Restart => match self.controller.restart().await {
                Ok(()) => Response::done(),
                Err(e) => Response::failure(e.detail()),
            },
            Command::UpdateHeadlessConfig(patch) => match self.controller.update_config(patch) {
                Ok(config) => Response::ok(config),
                Err(e) => Response::failure(e.detail()),
            },
            Command::Subscribe => Response::failure(ErrorDetail::new(
                "unsupported",
                "subscribe is only available on a socket connection",
            )),
        }
    }
}
