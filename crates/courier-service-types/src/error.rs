use crate::messages::DeviceMismatch;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid base url")]
    InvalidBaseUrl,
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("transport {0}")]
    Transport(String),
    #[error("unexpected status {status}")]
    Status { status: u16, body: Vec<u8> },
    #[error("json error")]
    Json(#[from] serde_json::Error),
    #[error("response too large")]
    ResponseTooLarge,
}

impl ServiceError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ServiceError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Structured device-list payload the service attaches to 409/410
    /// rejections, when the body parses as one.
    pub fn device_mismatch(&self) -> Option<DeviceMismatch> {
        match self {
            ServiceError::Status { body, .. } => serde_json::from_slice(body).ok(),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ServiceError::Transport(_))
    }
}
