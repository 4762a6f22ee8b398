
use crate::address::ServiceAddress;
use crate::config::SenderConfig;
use crate::deps::{
    BlockingManager, CertificateExpirationPolicy, ContactDiscovery, Dependencies, DeviceManager,
    DiscoveredContact, DiscoveryError, Encryptor, LocalAccount, ProfileManager,
    SenderCertificateProvider, SenderCertificates, UdAccessProvider,
};
use crate::error::SendError;
use crate::ids::{AccountId, DeviceId, ThreadId};
use crate::message::OutgoingMessage;
use crate::prekeys::PreKeyBundle;
use crate::recipient::Recipient;
use crate::service::ServiceApi;
use crate::sessions::{SessionBuilder, SessionBuilderError};
use crate::store::{ReadTransaction, SessionRecord, Store, WriteTransaction};
use crate::thread::{GroupMembership, Thread};
use crate::MessageSender;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use courier_service_types::{
    Auth, BasicCredentials, DeviceMessage, OutgoingMessageList, PreKeyDevice, PreKeyEntry,
    PreKeyResponse, SendMessageResponse, ServiceError, SignedPreKeyEntry,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

pub fn local_address() -> ServiceAddress {
    ServiceAddress::new(Uuid::from_u128(0xA11CE), "+14155550100")
}

pub fn bob() -> ServiceAddress {
    ServiceAddress::new(Uuid::from_u128(0xB0B), "+14155550101")
}

pub fn eve() -> ServiceAddress {
    ServiceAddress::new(Uuid::from_u128(0xE7E), "+14155550102")
}

pub fn charlie() -> ServiceAddress {
    ServiceAddress::new(Uuid::from_u128(0xC4A12), "+14155550103")
}

pub fn dana() -> ServiceAddress {
    ServiceAddress::new(Uuid::from_u128(0xDA7A), "+14155550104")
}

pub fn mallory() -> ServiceAddress {
    ServiceAddress::new(Uuid::from_u128(0x3A110), "+14155550105")
}

pub fn device_message(device_id: DeviceId) -> DeviceMessage {
    DeviceMessage {
        message_type: 3,
        destination_device_id: device_id,
        destination_registration_id: 1000 + device_id,
        content: STANDARD.encode(b"ciphertext"),
    }
}

pub fn prekey_response(device_id: DeviceId) -> PreKeyResponse {
    prekey_response_with_identity(device_id, &[5u8; 33])
}

pub fn prekey_response_with_identity(device_id: DeviceId, identity_key: &[u8]) -> PreKeyResponse {
    PreKeyResponse {
        identity_key: STANDARD.encode(identity_key),
        devices: vec![PreKeyDevice {
            device_id,
            registration_id: 1000 + device_id,
            signed_pre_key: SignedPreKeyEntry {
                key_id: 22,
                public_key: STANDARD.encode([1u8; 32]),
                signature: STANDARD.encode([2u8; 64]),
            },
            pre_key: Some(PreKeyEntry {
                key_id: 7,
                public_key: STANDARD.encode([3u8; 32]),
            }),
        }],
    }
}

pub fn status_error(status: u16) -> ServiceError {
    ServiceError::Status {
        status,
        body: Vec::new(),
    }
}

pub fn mismatch_error(status: u16, body: serde_json::Value) -> ServiceError {
    ServiceError::Status {
        status,
        body: serde_json::to_vec(&body).expect("mismatch body"),
    }
}

#[derive(Clone, Debug)]
pub struct RecordedPrekeyRequest {
    pub service_id: String,
    pub device_id: DeviceId,
    pub unidentified: bool,
}

#[derive(Clone, Debug)]
pub struct RecordedMessageRequest {
    pub service_id: String,
    pub list: OutgoingMessageList,
    pub unidentified: bool,
}

#[derive(Default)]
struct FakeServiceState {
    prekey_responses: VecDeque<Result<PreKeyResponse, ServiceError>>,
    message_responses: VecDeque<Result<SendMessageResponse, ServiceError>>,
    prekey_requests: Vec<RecordedPrekeyRequest>,
    message_requests: Vec<RecordedMessageRequest>,
}

/// Scriptable in-memory service: queued responses are consumed in order,
/// after which prekey fetches answer with a generated bundle and submits
/// succeed.
#[derive(Default)]
pub struct FakeService {
    state: Mutex<FakeServiceState>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_prekey_response(&self, response: Result<PreKeyResponse, ServiceError>) {
        self.lock().prekey_responses.push_back(response);
    }

    pub fn push_message_response(&self, response: Result<SendMessageResponse, ServiceError>) {
        self.lock().message_responses.push_back(response);
    }

    pub fn prekey_requests(&self) -> Vec<RecordedPrekeyRequest> {
        self.lock().prekey_requests.clone()
    }

    pub fn message_requests(&self) -> Vec<RecordedMessageRequest> {
        self.lock().message_requests.clone()
    }
}

#[async_trait]
impl ServiceApi for FakeService {
    async fn get_prekeys(
        &self,
        service_id: &str,
        device_id: DeviceId,
        auth: &Auth,
    ) -> Result<PreKeyResponse, ServiceError> {
        let mut state = self.lock();
        state.prekey_requests.push(RecordedPrekeyRequest {
            service_id: service_id.to_string(),
            device_id,
            unidentified: auth.is_unidentified(),
        });
        match state.prekey_responses.pop_front() {
            Some(response) => response,
            None => Ok(prekey_response(device_id)),
        }
    }

    async fn put_messages(
        &self,
        service_id: &str,
        list: &OutgoingMessageList,
        auth: &Auth,
    ) -> Result<SendMessageResponse, ServiceError> {
        let mut state = self.lock();
        state.message_requests.push(RecordedMessageRequest {
            service_id: service_id.to_string(),
            list: list.clone(),
            unidentified: auth.is_unidentified(),
        });
        match state.message_responses.pop_front() {
            Some(response) => response,
            None => Ok(SendMessageResponse::default()),
        }
    }
}

/// A service whose every request fails at the transport layer, standing in
/// for a dead websocket.
pub struct DeadService;

#[async_trait]
impl ServiceApi for DeadService {
    async fn get_prekeys(
        &self,
        _service_id: &str,
        _device_id: DeviceId,
        _auth: &Auth,
    ) -> Result<PreKeyResponse, ServiceError> {
        Err(ServiceError::Transport("connection reset".to_string()))
    }

    async fn put_messages(
        &self,
        _service_id: &str,
        _list: &OutgoingMessageList,
        _auth: &Auth,
    ) -> Result<SendMessageResponse, ServiceError> {
        Err(ServiceError::Transport("connection reset".to_string()))
    }
}

pub enum BuilderBehavior {
    Succeed,
    SucceedWithoutWriting,
    FailUntrusted(Vec<u8>),
    FailOther(String),
}

/// Writes a session record straight into the transaction, or fails in a
/// scripted way. Defaults to succeeding once the script runs out.
#[derive(Default)]
pub struct FakeSessionBuilder {
    behaviors: Mutex<VecDeque<BuilderBehavior>>,
    processed: Mutex<Vec<(AccountId, DeviceId)>>,
}

impl FakeSessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_behavior(&self, behavior: BuilderBehavior) {
        self.behaviors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(behavior);
    }

    pub fn processed(&self) -> Vec<(AccountId, DeviceId)> {
        self.processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SessionBuilder for FakeSessionBuilder {
    fn process(
        &self,
        bundle: &PreKeyBundle,
        account_id: &AccountId,
        txn: &mut WriteTransaction<'_>,
    ) -> Result<(), SessionBuilderError> {
        self.processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((account_id.clone(), bundle.device_id));
        let behavior = self
            .behaviors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(BuilderBehavior::Succeed);
        match behavior {
            BuilderBehavior::Succeed => {
                txn.put_session(
                    account_id,
                    bundle.device_id,
                    SessionRecord {
                        registration_id: bundle.registration_id,
                        state: bundle.identity_key.clone(),
                    },
                );
                Ok(())
            }
            BuilderBehavior::SucceedWithoutWriting => Ok(()),
            BuilderBehavior::FailUntrusted(identity_key) => {
                Err(SessionBuilderError::UntrustedIdentity { identity_key })
            }
            BuilderBehavior::FailOther(reason) => Err(SessionBuilderError::Other(reason)),
        }
    }
}

#[derive(Default)]
pub struct FakeDiscovery {
    contacts: Mutex<HashMap<String, Uuid>>,
    fail_with: Mutex<Option<Option<bool>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, phone: &str, uuid: Uuid) {
        self.contacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(phone.to_string(), uuid);
    }

    pub fn fail_with(&self, retry_suggested: Option<bool>) {
        *self
            .fail_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(retry_suggested);
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ContactDiscovery for FakeDiscovery {
    async fn discover(
        &self,
        phone_numbers: &[String],
    ) -> Result<Vec<DiscoveredContact>, DiscoveryError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(phone_numbers.to_vec());
        if let Some(retry_suggested) = *self
            .fail_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
        {
            return Err(DiscoveryError { retry_suggested });
        }
        let contacts = self
            .contacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(phone_numbers
            .iter()
            .filter_map(|phone| {
                contacts.get(phone).map(|uuid| DiscoveredContact {
                    uuid: *uuid,
                    phone: phone.clone(),
                })
            })
            .collect())
    }
}

#[derive(Default)]
pub struct FakeBlocking {
    blocked: Mutex<HashSet<ServiceAddress>>,
}

impl FakeBlocking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, address: ServiceAddress) {
        self.blocked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address);
    }
}

impl BlockingManager for FakeBlocking {
    fn is_blocked(&self, address: &ServiceAddress) -> bool {
        self.blocked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(address)
    }

    fn blocked_addresses(&self) -> HashSet<ServiceAddress> {
        self.blocked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Default)]
pub struct FakeCertificates {
    fail: AtomicBool,
}

impl FakeCertificates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SenderCertificateProvider for FakeCertificates {
    async fn ensure(
        &self,
        _policy: CertificateExpirationPolicy,
    ) -> Result<SenderCertificates, SendError> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(SendError::Certificate("expired".to_string()));
        }
        Ok(SenderCertificates {
            default_certificate: vec![1, 2, 3],
            uuid_only_certificate: vec![4, 5, 6],
        })
    }
}

#[derive(Default)]
pub struct FakeProfiles {
    interactions: Mutex<Vec<ServiceAddress>>,
}

impl FakeProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interactions(&self) -> Vec<ServiceAddress> {
        self.interactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProfileManager for FakeProfiles {
    fn note_outgoing_interaction(&self, address: &ServiceAddress) {
        self.interactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(address.clone());
    }
}

#[derive(Default)]
pub struct FakeUdAccess {
    keys: Mutex<HashMap<ServiceAddress, [u8; 16]>>,
}

impl FakeUdAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, address: ServiceAddress, key: [u8; 16]) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, key);
    }
}

impl UdAccessProvider for FakeUdAccess {
    fn ud_access_key(&self, address: &ServiceAddress) -> Option<[u8; 16]> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .copied()
    }
}

/// Produces a ciphertext stub for any device that has a session, erroring
/// like a real encryptor would when no session exists.
pub struct FakeEncryptor;

impl Encryptor for FakeEncryptor {
    fn encrypt(
        &self,
        _message: &OutgoingMessage,
        recipient_account_id: &AccountId,
        device_id: DeviceId,
        txn: &ReadTransaction<'_>,
    ) -> Result<DeviceMessage, SendError> {
        let session = txn
            .session(recipient_account_id, device_id)
            .ok_or(SendError::SessionBuild("no session to encrypt with".to_string()))?;
        Ok(DeviceMessage {
            message_type: 3,
            destination_device_id: device_id,
            destination_registration_id: session.registration_id,
            content: STANDARD.encode(b"ciphertext"),
        })
    }
}

pub struct Fixture {
    pub sender: MessageSender,
    pub deps: Dependencies,
    pub service: Arc<FakeService>,
    pub builder: Arc<FakeSessionBuilder>,
    pub discovery: Arc<FakeDiscovery>,
    pub blocking: Arc<FakeBlocking>,
    pub certificates: Arc<FakeCertificates>,
    pub profiles: Arc<FakeProfiles>,
    pub ud_access: Arc<FakeUdAccess>,
}

pub fn test_config() -> SenderConfig {
    SenderConfig {
        max_send_attempts: 3,
        retry_backoff_initial_ms: 0,
        retry_backoff_max_ms: 0,
    }
}

pub fn fixture() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let service = Arc::new(FakeService::new());
    let builder = Arc::new(FakeSessionBuilder::new());
    let discovery = Arc::new(FakeDiscovery::new());
    let blocking = Arc::new(FakeBlocking::new());
    let certificates = Arc::new(FakeCertificates::new());
    let profiles = Arc::new(FakeProfiles::new());
    let ud_access = Arc::new(FakeUdAccess::new());
    let deps = Dependencies {
        account: LocalAccount {
            address: local_address(),
            account_id: AccountId::new("local-account"),
            device_id: 1,
            credentials: BasicCredentials::new("aci-user", "registration-password"),
        },
        store: Arc::new(Store::new()),
        blocking: blocking.clone(),
        discovery: discovery.clone(),
        certificates: certificates.clone(),
        session_builder: builder.clone(),
        encryptor: Arc::new(FakeEncryptor),
        profiles: profiles.clone(),
        ud_access: ud_access.clone(),
        devices: Arc::new(DeviceManager::default()),
    };
    let sender = MessageSender::new(deps.clone(), test_config(), None, service.clone());
    Fixture {
        sender,
        deps,
        service,
        builder,
        discovery,
        blocking,
        certificates,
        profiles,
        ud_access,
    }
}

impl Fixture {
    pub fn contact_thread(&self, peer: &ServiceAddress) -> ThreadId {
        let thread_id = ThreadId::random();
        self.deps.store.write().upsert_thread(
            thread_id,
            Thread::Contact {
                peer: peer.clone(),
            },
        );
        thread_id
    }

    pub fn group_thread(
        &self,
        full_members: &[ServiceAddress],
        invited_members: &[ServiceAddress],
    ) -> ThreadId {
        let thread_id = ThreadId::random();
        self.deps.store.write().upsert_thread(
            thread_id,
            Thread::Group {
                membership: GroupMembership {
                    full_members: full_members.iter().cloned().collect(),
                    invited_members: invited_members.iter().cloned().collect(),
                },
            },
        );
        thread_id
    }

    pub fn recipient_for(&self, address: &ServiceAddress) -> Recipient {
        self.deps.store.write().get_or_create_recipient(address)
    }

    pub fn set_devices(&self, address: &ServiceAddress, device_ids: &[DeviceId]) -> Recipient {
        let mut txn = self.deps.store.write();
        let mut recipient = txn.get_or_create_recipient(address);
        recipient.device_ids = device_ids.iter().copied().collect();
        txn.upsert_recipient(recipient.clone());
        recipient
    }

    pub fn put_session(&self, account_id: &AccountId, device_id: DeviceId) {
        self.deps.store.write().put_session(
            account_id,
            device_id,
            SessionRecord {
                registration_id: 1000 + device_id,
                state: vec![0xAB],
            },
        );
    }

    pub fn session_exists(&self, account_id: &AccountId, device_id: DeviceId) -> bool {
        self.deps
            .store
            .read()
            .session(account_id, device_id)
            .is_some()
    }
}
