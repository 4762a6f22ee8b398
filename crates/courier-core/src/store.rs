use crate::address::ServiceAddress;
use crate::ids::{AccountId, DeviceId, MessageId, ThreadId};
use crate::message::RecipientMessageState;
use crate::recipient::{Recipient, Registration};
use crate::thread::Thread;
use crate::time::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Opaque pairwise cryptographic state. The session builder owns the
/// contents; the core only cares about existence and the registration id
/// echoed into outgoing envelopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub registration_id: u32,
    pub state: Vec<u8>,
}

/// The remote identity key last seen for an account, with the outgoing
/// trust decision. First-seen keys are trusted; a replacement key is
/// persisted untrusted-for-outgoing until explicitly approved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientIdentity {
    pub identity_key: Vec<u8>,
    pub untrusted_for_outgoing: bool,
    pub updated_at_ms: u64,
}

#[derive(Default)]
struct Tables {
    recipients: HashMap<AccountId, Recipient>,
    address_index: HashMap<ServiceAddress, AccountId>,
    sessions: HashMap<(AccountId, DeviceId), SessionRecord>,
    identities: HashMap<AccountId, RecipientIdentity>,
    threads: HashMap<ThreadId, Thread>,
    message_states: HashMap<MessageId, HashMap<ServiceAddress, RecipientMessageState>>,
}

impl Tables {
    fn recipient(&self, account_id: &AccountId) -> Option<&Recipient> {
        self.recipients.get(account_id)
    }

    fn recipient_by_address(&self, address: &ServiceAddress) -> Option<&Recipient> {
        self.address_index
            .get(address)
            .and_then(|id| self.recipients.get(id))
    }

    fn session(&self, account_id: &AccountId, device_id: DeviceId) -> Option<&SessionRecord> {
        self.sessions.get(&(account_id.clone(), device_id))
    }

    fn identity(&self, account_id: &AccountId) -> Option<&RecipientIdentity> {
        self.identities.get(account_id)
    }

    fn is_identity_trusted_for_outgoing(&self, account_id: &AccountId, key: &[u8]) -> bool {
        match self.identities.get(account_id) {
            // first use is trusted
            None => true,
            Some(record) => record.identity_key == key && !record.untrusted_for_outgoing,
        }
    }

    fn thread(&self, thread_id: &ThreadId) -> Option<&Thread> {
        self.threads.get(thread_id)
    }

    fn message_state(
        &self,
        message_id: &MessageId,
        address: &ServiceAddress,
    ) -> Option<RecipientMessageState> {
        self.message_states
            .get(message_id)
            .and_then(|states| states.get(address))
            .copied()
    }
}

/// The single owner of recipient, session, identity, thread, and message
/// delivery state. All access goes through explicit transaction handles:
/// reads take a shared snapshot, every mutation requires a
/// `WriteTransaction`, so mutating outside a write context does not
/// compile. Transactions are synchronous regions; nothing awaits while one
/// is live.
#[derive(Default)]
pub struct Store {
    tables: RwLock<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> ReadTransaction<'_> {
        ReadTransaction {
            tables: self.tables.read().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn write(&self) -> WriteTransaction<'_> {
        WriteTransaction {
            tables: self.tables.write().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

pub struct ReadTransaction<'a> {
    tables: RwLockReadGuard<'a, Tables>,
}

impl ReadTransaction<'_> {
    pub fn recipient(&self, account_id: &AccountId) -> Option<&Recipient> {
        self.tables.recipient(account_id)
    }

    pub fn recipient_by_address(&self, address: &ServiceAddress) -> Option<&Recipient> {
        self.tables.recipient_by_address(address)
    }

    pub fn session(&self, account_id: &AccountId, device_id: DeviceId) -> Option<&SessionRecord> {
        self.tables.session(account_id, device_id)
    }

    pub fn identity(&self, account_id: &AccountId) -> Option<&RecipientIdentity> {
        self.tables.identity(account_id)
    }

    pub fn is_identity_trusted_for_outgoing(&self, account_id: &AccountId, key: &[u8]) -> bool {
        self.tables.is_identity_trusted_for_outgoing(account_id, key)
    }

    pub fn thread(&self, thread_id: &ThreadId) -> Option<&Thread> {
        self.tables.thread(thread_id)
    }

    pub fn message_state(
        &self,
        message_id: &MessageId,
        address: &ServiceAddress,
    ) -> Option<RecipientMessageState> {
        self.tables.message_state(message_id, address)
    }
}

pub struct WriteTransaction<'a> {
    tables: RwLockWriteGuard<'a, Tables>,
}

impl WriteTransaction<'_> {
    pub fn recipient(&self, account_id: &AccountId) -> Option<&Recipient> {
        self.tables.recipient(account_id)
    }

    pub fn recipient_by_address(&self, address: &ServiceAddress) -> Option<&Recipient> {
        self.tables.recipient_by_address(address)
    }

    pub fn session(&self, account_id: &AccountId, device_id: DeviceId) -> Option<&SessionRecord> {
        self.tables.session(account_id, device_id)
    }

    pub fn identity(&self, account_id: &AccountId) -> Option<&RecipientIdentity> {
        self.tables.identity(account_id)
    }

    pub fn is_identity_trusted_for_outgoing(&self, account_id: &AccountId, key: &[u8]) -> bool {
        self.tables.is_identity_trusted_for_outgoing(account_id, key)
    }

    pub fn thread(&self, thread_id: &ThreadId) -> Option<&Thread> {
        self.tables.thread(thread_id)
    }

    pub fn message_state(
        &self,
        message_id: &MessageId,
        address: &ServiceAddress,
    ) -> Option<RecipientMessageState> {
        self.tables.message_state(message_id, address)
    }

    pub fn get_or_create_recipient(&mut self, address: &ServiceAddress) -> Recipient {
        if let Some(existing) = self.tables.recipient_by_address(address) {
            return existing.clone();
        }
        let recipient = Recipient::new(AccountId::random(), address.clone());
        self.tables
            .address_index
            .insert(address.clone(), recipient.account_id.clone());
        self.tables
            .recipients
            .insert(recipient.account_id.clone(), recipient.clone());
        recipient
    }

    pub fn upsert_recipient(&mut self, recipient: Recipient) {
        self.tables
            .address_index
            .insert(recipient.address.clone(), recipient.account_id.clone());
        self.tables
            .recipients
            .insert(recipient.account_id.clone(), recipient);
    }

    pub fn add_recipient_devices(&mut self, account_id: &AccountId, device_ids: &[DeviceId]) {
        if let Some(recipient) = self.tables.recipients.get_mut(account_id) {
            recipient.device_ids.extend(device_ids.iter().copied());
        }
    }

    /// Removes devices from the recipient's set, dropping their sessions
    /// with them: a committed transaction never leaves a session behind for
    /// a device the recipient no longer has.
    pub fn remove_recipient_devices(&mut self, account_id: &AccountId, device_ids: &[DeviceId]) {
        if let Some(recipient) = self.tables.recipients.get_mut(account_id) {
            for device_id in device_ids {
                recipient.device_ids.remove(device_id);
            }
        }
        for device_id in device_ids {
            self.tables
                .sessions
                .remove(&(account_id.clone(), *device_id));
        }
    }

    pub fn mark_recipient_registered(&mut self, account_id: &AccountId) {
        if let Some(recipient) = self.tables.recipients.get_mut(account_id) {
            recipient.registration = Registration::Registered;
        }
    }

    pub fn mark_recipient_unregistered(&mut self, account_id: &AccountId) {
        if let Some(recipient) = self.tables.recipients.get_mut(account_id) {
            recipient.registration = Registration::Unregistered;
        }
    }

    pub fn put_session(
        &mut self,
        account_id: &AccountId,
        device_id: DeviceId,
        record: SessionRecord,
    ) {
        self.tables
            .sessions
            .insert((account_id.clone(), device_id), record);
    }

    pub fn delete_session(&mut self, account_id: &AccountId, device_id: DeviceId) {
        self.tables.sessions.remove(&(account_id.clone(), device_id));
    }

    /// Trust-on-first-use: an unseen account gets its key stored trusted; a
    /// changed key is stored untrusted for the outgoing direction until the
    /// user approves it.
    pub fn save_identity(&mut self, account_id: &AccountId, key: &[u8]) {
        match self.tables.identities.get_mut(account_id) {
            Some(record) if record.identity_key == key => {}
            Some(record) => {
                record.identity_key = key.to_vec();
                record.untrusted_for_outgoing = true;
                record.updated_at_ms = now_ms();
            }
            None => {
                self.tables.identities.insert(
                    account_id.clone(),
                    RecipientIdentity {
                        identity_key: key.to_vec(),
                        untrusted_for_outgoing: false,
                        updated_at_ms: now_ms(),
                    },
                );
            }
        }
    }

    /// User re-verification of the current key.
    pub fn approve_identity(&mut self, account_id: &AccountId) {
        if let Some(record) = self.tables.identities.get_mut(account_id) {
            record.untrusted_for_outgoing = false;
            record.updated_at_ms = now_ms();
        }
    }

    pub fn upsert_thread(&mut self, thread_id: ThreadId, thread: Thread) {
        self.tables.threads.insert(thread_id, thread);
    }

    pub fn remove_thread(&mut self, thread_id: &ThreadId) {
        self.tables.threads.remove(thread_id);
    }

    pub fn mark_message_skipped(&mut self, message_id: &MessageId, address: &ServiceAddress) {
        self.tables
            .message_states
            .entry(*message_id)
            .or_default()
            .insert(address.clone(), RecipientMessageState::Skipped);
    }

    pub fn mark_message_sent_to(
        &mut self,
        message_id: &MessageId,
        address: &ServiceAddress,
        was_sent_by_ud: bool,
    ) {
        self.tables
            .message_states
            .entry(*message_id)
            .or_default()
            .insert(
                address.clone(),
                RecipientMessageState::Sent { was_sent_by_ud },
            );
    }
}
