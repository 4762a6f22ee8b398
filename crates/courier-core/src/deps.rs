use crate::address::ServiceAddress;
use crate::error::SendError;
use crate::ids::{AccountId, DeviceId};
use crate::message::OutgoingMessage;
use crate::store::{ReadTransaction, Store};
use async_trait::async_trait;
use courier_service_types::{BasicCredentials, DeviceMessage, UD_ACCESS_KEY_LEN};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Per-recipient sealed-sender access: the access key derived from the
/// recipient's profile key, paired with the certificate the sender
/// presents in UD mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdSendingAccess {
    pub access_key: [u8; UD_ACCESS_KEY_LEN],
    pub sender_certificate: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertificateExpirationPolicy {
    Strict,
    /// Accept near-expiry certificates; the send path prefers going out
    /// over round-tripping for a fresh certificate.
    Permissive,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SenderCertificates {
    pub default_certificate: Vec<u8>,
    pub uuid_only_certificate: Vec<u8>,
}

#[async_trait]
pub trait SenderCertificateProvider: Send + Sync {
    async fn ensure(
        &self,
        policy: CertificateExpirationPolicy,
    ) -> Result<SenderCertificates, SendError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredContact {
    pub uuid: Uuid,
    pub phone: String,
}

#[derive(Debug, Error)]
#[error("contact discovery failed")]
pub struct DiscoveryError {
    /// Absent means the discovery layer has no opinion; callers default to
    /// retryable.
    pub retry_suggested: Option<bool>,
}

#[async_trait]
pub trait ContactDiscovery: Send + Sync {
    async fn discover(
        &self,
        phone_numbers: &[String],
    ) -> Result<Vec<DiscoveredContact>, DiscoveryError>;
}

pub trait BlockingManager: Send + Sync {
    fn is_blocked(&self, address: &ServiceAddress) -> bool;
    fn blocked_addresses(&self) -> HashSet<ServiceAddress>;
}

/// Produces the opaque per-device ciphertext. Encryption reads session
/// state under the caller's read transaction.
pub trait Encryptor: Send + Sync {
    fn encrypt(
        &self,
        message: &OutgoingMessage,
        recipient_account_id: &AccountId,
        device_id: DeviceId,
        txn: &ReadTransaction<'_>,
    ) -> Result<DeviceMessage, SendError>;
}

pub trait ProfileManager: Send + Sync {
    fn note_outgoing_interaction(&self, address: &ServiceAddress);
}

pub trait UdAccessProvider: Send + Sync {
    /// The access key for a recipient whose profile key we hold.
    fn ud_access_key(&self, address: &ServiceAddress) -> Option<[u8; UD_ACCESS_KEY_LEN]>;
}

/// Local device-list knowledge. Starts out assuming linked devices may
/// exist; a successful empty self-sync probe clears the flag, a 409
/// reporting missing local devices sets it again.
pub struct DeviceManager {
    may_have_linked_devices: AtomicBool,
}

impl DeviceManager {
    pub fn new(may_have_linked_devices: bool) -> Self {
        Self {
            may_have_linked_devices: AtomicBool::new(may_have_linked_devices),
        }
    }

    pub fn may_have_linked_devices(&self) -> bool {
        self.may_have_linked_devices.load(Ordering::SeqCst)
    }

    pub fn set_may_have_linked_devices(&self, value: bool) {
        self.may_have_linked_devices.store(value, Ordering::SeqCst);
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new(true)
    }
}

/// The signed-in account.
#[derive(Clone, Debug)]
pub struct LocalAccount {
    pub address: ServiceAddress,
    pub account_id: AccountId,
    pub device_id: DeviceId,
    pub credentials: BasicCredentials,
}

/// Everything the delivery core collaborates with, injected at
/// construction. Tests substitute fakes per trait.
#[derive(Clone)]
pub struct Dependencies {
    pub account: LocalAccount,
    pub store: Arc<Store>,
    pub blocking: Arc<dyn BlockingManager>,
    pub discovery: Arc<dyn ContactDiscovery>,
    pub certificates: Arc<dyn SenderCertificateProvider>,
    pub session_builder: Arc<dyn crate::sessions::SessionBuilder>,
    pub encryptor: Arc<dyn Encryptor>,
    pub profiles: Arc<dyn ProfileManager>,
    pub ud_access: Arc<dyn UdAccessProvider>,
    pub devices: Arc<DeviceManager>,
}
