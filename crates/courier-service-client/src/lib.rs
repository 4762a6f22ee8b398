mod client;
mod config;
mod urls;

pub use crate::client::RestClient;
pub use crate::config::RestClientConfig;
pub use courier_service_types::{Result, ServiceError};
