use crate::address::ServiceAddress;
use crate::deps::{LocalAccount, UdSendingAccess};
use crate::error::SendError;
use crate::ids::{AccountId, DeviceId, MessageId, ThreadId, PRIMARY_DEVICE_ID};
use crate::recipient::Recipient;
use crate::thread::Thread;
use crate::time::now_ms;
use serde::{Deserialize, Serialize};

/// The application-level outgoing message, as the delivery core sees it:
/// content is opaque (the encryptor owns it), the core cares about routing
/// metadata and per-recipient delivery state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub timestamp: u64,
    pub is_sync_message: bool,
    /// Group metadata updates are also delivered to invited members.
    pub is_group_update: bool,
    pub sending_recipient_addresses: Vec<ServiceAddress>,
}

impl OutgoingMessage {
    pub fn new(thread_id: ThreadId, sending_recipient_addresses: Vec<ServiceAddress>) -> Self {
        Self {
            id: MessageId::random(),
            thread_id,
            timestamp: now_ms(),
            is_sync_message: false,
            is_group_update: false,
            sending_recipient_addresses,
        }
    }

    /// A message targeting only the local account's other devices.
    pub fn sync(thread_id: ThreadId, local_address: ServiceAddress) -> Self {
        Self {
            id: MessageId::random(),
            thread_id,
            timestamp: now_ms(),
            is_sync_message: true,
            is_group_update: false,
            sending_recipient_addresses: vec![local_address],
        }
    }
}

/// Delivery state of one recipient on one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecipientMessageState {
    Sent { was_sent_by_ud: bool },
    Skipped,
}

/// One in-flight delivery attempt to one recipient. The failover flags are
/// sticky for the life of the send and are mutated only by the send's
/// serialized driver; `remaining_attempts` is strictly decreasing and
/// hitting zero is fatal for this recipient.
#[derive(Clone, Debug)]
pub struct MessageSend {
    pub message: OutgoingMessage,
    pub thread: Thread,
    pub recipient_account_id: AccountId,
    pub recipient_address: ServiceAddress,
    pub device_ids: Vec<DeviceId>,
    pub ud_access: Option<UdSendingAccess>,
    pub has_websocket_send_failed: bool,
    pub has_ud_auth_failed: bool,
    pub remaining_attempts: u32,
    pub is_local_address: bool,
}

impl MessageSend {
    pub fn new(
        message: OutgoingMessage,
        thread: Thread,
        recipient: &Recipient,
        ud_access: Option<UdSendingAccess>,
        remaining_attempts: u32,
        account: &LocalAccount,
    ) -> Self {
        let device_ids: Vec<DeviceId> = if recipient.device_ids.is_empty() {
            vec![PRIMARY_DEVICE_ID]
        } else {
            recipient.device_ids.iter().copied().collect()
        };
        Self {
            message,
            thread,
            recipient_account_id: recipient.account_id.clone(),
            recipient_address: recipient.address.clone(),
            device_ids,
            ud_access,
            has_websocket_send_failed: false,
            has_ud_auth_failed: false,
            remaining_attempts,
            is_local_address: recipient.address == account.address,
        }
    }

    pub fn service_id(&self) -> Result<String, SendError> {
        self.recipient_address
            .service_id()
            .ok_or(SendError::InvalidRecipient)
    }

    /// Whether a submission made right now would go out under sealed
    /// sender. The request maker's failover flags decide the auth actually
    /// used, so this is also the verdict recorded after a success.
    pub fn was_sent_by_ud(&self) -> bool {
        self.ud_access.is_some() && !self.has_ud_auth_failed
    }
}
