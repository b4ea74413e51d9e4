//! Service state definitions.

/// Service operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Service is starting up.
    Starting,
    /// Service is running and scheduling ingestion.
    Running,
    /// Service is shutting down.
    ShuttingDown,
    /// Service is stopped.
    Stopped,
}

impl ServiceState {
    /// Check if the service is accepting new requests.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ServiceState::Running)
    }

    /// Check if the service is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped)
    }
}
