use crate::services::EscrowServices;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub services: EscrowServices,
}

impl AppState {
    pub fn new(services: EscrowServices) -> Self {
        Self { services }
    }
}
