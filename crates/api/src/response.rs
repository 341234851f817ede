//! Response payloads shared by the job handlers.

use serde::Serialize;

/// `{ "message": ... }` acknowledgement.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// `{ "status": ... }` body of `GET /status`.
///
/// `status` is one of `running`, `idle_succes` or `idle_fail`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}
