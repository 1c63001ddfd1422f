//! Port allocation for the managed service.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("no free port among {attempts} ports starting at {preferred}")]
    Exhausted { preferred: u16, attempts: u16 },
    #[error("invalid port range: preferred={preferred} width={width}")]
    InvalidRange { preferred: u16, width: u16 },
}

#[async_trait]
pub trait PortAllocator: Send + Sync {
    /// Return a free port, trying `preferred` first.
    async fn allocate(&self, preferred: u16) -> Result<u16, PortError>;
}

/// Probes loopback ports upward from the preferred one.
pub struct LocalPortAllocator {
    scan_width: u16,
}

impl LocalPortAllocator {
    pub fn new(scan_width: u16) -> Self {
        Self { scan_width }
    }
}

fn can_bind(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[async_trait]
impl PortAllocator for LocalPortAllocator {
    async fn allocate(&self, preferred: u16) -> Result<u16, PortError> {
        if preferred == 0 || self.scan_width == 0 {
            return Err(PortError::InvalidRange {
                preferred,
                width: self.scan_width,
            });
        }

        let last = preferred.saturating_add(self.scan_width - 1);
        let mut attempts = 0u16;
        for port in preferred..=last {
            attempts += 1;
            if can_bind(port) {
                if port != preferred {
                    tracing::debug!(preferred, port, "Preferred port busy, using next free one");
                }
                return Ok(port);
            }
        }

        Err(PortError::Exhausted {
            preferred,
            attempts,
        })
    }
}
