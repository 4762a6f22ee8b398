pub mod auth;
pub mod error;
pub mod messages;
pub mod prekeys;

pub use auth::{Auth, BasicCredentials, UD_ACCESS_KEY_LEN};
pub use error::{Result, ServiceError};
pub use messages::{DeviceMessage, DeviceMismatch, OutgoingMessageList, SendMessageResponse};
pub use prekeys::{PreKeyDevice, PreKeyEntry, PreKeyResponse, SignedPreKeyEntry};
