use crate::address::ServiceAddress;
use crate::ids::DeviceId;
use courier_service_types::ServiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("prekey fetch rate limited")]
    PrekeyRateLimit,
    #[error("identity of {address} is untrusted")]
    UntrustedIdentity { address: ServiceAddress },
    #[error("no such device {device_id}")]
    MissingDevice { device_id: DeviceId },
    #[error("contact is blocked")]
    BlockedContactRecipient,
    #[error("thread no longer exists")]
    ThreadMissing,
    #[error("recipient is not registered")]
    NoSuchRecipient { ignorable_for_group: bool },
    #[error("device unauthorized")]
    UnauthorizedDevice,
    #[error("mismatched devices")]
    MismatchedDevices,
    #[error("stale devices")]
    StaleDevices,
    #[error("unidentified-access auth rejected")]
    UdAuthFailed,
    #[error("send attempts exhausted: {last}")]
    AttemptsExhausted { last: Box<SendError> },
    #[error("contact discovery failed")]
    Discovery { retryable: bool },
    #[error("recipient has no service id")]
    InvalidRecipient,
    #[error("malformed service response: {0}")]
    InvalidResponse(&'static str),
    #[error("session build failed: {0}")]
    SessionBuild(String),
    #[error("sender certificate unavailable: {0}")]
    Certificate(String),
    #[error("{0}")]
    Service(#[from] ServiceError),
}

impl SendError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SendError::PrekeyRateLimit
            | SendError::UdAuthFailed
            | SendError::MismatchedDevices
            | SendError::StaleDevices => true,
            SendError::Discovery { retryable } => *retryable,
            SendError::Service(err) => match err.status_code() {
                Some(401 | 403 | 404) => false,
                Some(_) => true,
                None => !matches!(
                    err,
                    ServiceError::InvalidBaseUrl | ServiceError::InvalidInput(_)
                ),
            },
            SendError::UntrustedIdentity { .. }
            | SendError::MissingDevice { .. }
            | SendError::BlockedContactRecipient
            | SendError::ThreadMissing
            | SendError::NoSuchRecipient { .. }
            | SendError::UnauthorizedDevice
            | SendError::AttemptsExhausted { .. }
            | SendError::InvalidRecipient
            | SendError::InvalidResponse(_)
            | SendError::SessionBuild(_)
            | SendError::Certificate(_) => false,
        }
    }

    /// A group send treats this failure as a partial success: the one
    /// recipient is skipped, the rest of the fanout proceeds.
    pub fn is_ignorable_for_group(&self) -> bool {
        matches!(
            self,
            SendError::NoSuchRecipient {
                ignorable_for_group: true
            }
        )
    }
}
