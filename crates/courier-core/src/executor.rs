use crate::deps::Dependencies;
use crate::error::SendError;
use crate::message::MessageSend;
use crate::recipient::Recipient;
use crate::request_maker::RequestMaker;
use courier_service_types::{DeviceMessage, DeviceMismatch, OutgoingMessageList};
use std::sync::Arc;

/// What one submission attempt decided. `Retry` means local state has been
/// corrected as far as possible and the caller should re-drive the send
/// (`ensure_sessions` then `perform_send` again).
#[derive(Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered { was_sent_by_ud: bool },
    Retry,
}

/// Submits per-device ciphertexts and interprets the structured failures
/// the service answers with, applying device-list and session corrections
/// before deciding whether the send is retried.
pub struct SendExecutor {
    deps: Dependencies,
    request_maker: Arc<RequestMaker>,
}

impl SendExecutor {
    pub fn new(deps: Dependencies, request_maker: Arc<RequestMaker>) -> Self {
        Self { deps, request_maker }
    }

    pub async fn perform_send(
        &self,
        send: &mut MessageSend,
        device_messages: Vec<DeviceMessage>,
    ) -> Result<AttemptOutcome, SendError> {
        // An empty list is only meaningful as a self-sync probe: the
        // response (or a 409) tells us whether linked devices exist. For
        // anyone else it means there is nobody left to deliver to.
        if device_messages.is_empty() && !send.is_local_address {
            return self.fail_send_for_unregistered_recipient(send);
        }
        let probe_without_devices = device_messages.is_empty();
        let list = OutgoingMessageList {
            timestamp: send.message.timestamp,
            messages: device_messages,
            online: false,
        };
        match self.request_maker.put_messages(send, &list).await {
            Ok(_response) => {
                self.handle_success(send, probe_without_devices);
                Ok(AttemptOutcome::Delivered {
                    was_sent_by_ud: send.was_sent_by_ud(),
                })
            }
            Err(err) => self.handle_failure(send, err),
        }
    }

    fn handle_success(&self, send: &MessageSend, probe_without_devices: bool) {
        if send.is_local_address && probe_without_devices {
            self.deps.devices.set_may_have_linked_devices(false);
        }
        let mut txn = self.deps.store.write();
        txn.mark_message_sent_to(
            &send.message.id,
            &send.recipient_address,
            send.was_sent_by_ud(),
        );
        // a delivered message is proof of registration, at low trust
        txn.mark_recipient_registered(&send.recipient_account_id);
        self.deps
            .profiles
            .note_outgoing_interaction(&send.recipient_address);
    }

    fn handle_failure(
        &self,
        send: &mut MessageSend,
        err: SendError,
    ) -> Result<AttemptOutcome, SendError> {
        match err {
            SendError::UdAuthFailed => self.retry(send, false, SendError::UdAuthFailed),
            SendError::Service(service_err) => match service_err.status_code() {
                Some(401) => {
                    log::warn!("message submit rejected as unauthorized");
                    Err(SendError::UnauthorizedDevice)
                }
                Some(404) => self.fail_send_for_unregistered_recipient(send),
                Some(409) => {
                    let mismatch = service_err.device_mismatch().unwrap_or_default();
                    self.handle_mismatched_devices(send, &mismatch);
                    self.retry(send, true, SendError::MismatchedDevices)
                }
                Some(410) => {
                    let mismatch = service_err.device_mismatch().unwrap_or_default();
                    self.handle_stale_devices(send, &mismatch);
                    self.retry(send, true, SendError::StaleDevices)
                }
                _ => self.retry(send, false, SendError::Service(service_err)),
            },
            other => Err(other),
        }
    }

    fn retry(
        &self,
        send: &mut MessageSend,
        device_list_changed: bool,
        err: SendError,
    ) -> Result<AttemptOutcome, SendError> {
        if send.remaining_attempts == 0 {
            return Err(SendError::AttemptsExhausted {
                last: Box::new(err),
            });
        }
        send.remaining_attempts -= 1;
        if device_list_changed && send.is_local_address {
            // the websocket's cached view of our own devices may be stale
            send.has_websocket_send_failed = true;
        }
        log::debug!(
            "retrying send to {}, {} attempts remaining: {}",
            send.recipient_address,
            send.remaining_attempts,
            err
        );
        Ok(AttemptOutcome::Retry)
    }

    /// 409: the service knows a different device list than we do. Adopt it
    /// and drop sessions for the devices that no longer exist.
    pub fn handle_mismatched_devices(&self, send: &mut MessageSend, mismatch: &DeviceMismatch) {
        log::info!(
            "mismatched devices for {}: missing {:?}, extra {:?}",
            send.recipient_address,
            mismatch.missing_devices,
            mismatch.extra_devices
        );
        if !mismatch.missing_devices.is_empty() && send.is_local_address {
            self.deps.devices.set_may_have_linked_devices(true);
        }
        let mut txn = self.deps.store.write();
        txn.add_recipient_devices(&send.recipient_account_id, &mismatch.missing_devices);
        txn.remove_recipient_devices(&send.recipient_account_id, &mismatch.extra_devices);
        for device_id in &mismatch.extra_devices {
            txn.delete_session(&send.recipient_account_id, *device_id);
        }
        let device_ids = txn
            .recipient(&send.recipient_account_id)
            .map(|recipient| recipient.device_ids.iter().copied().collect())
            .unwrap_or_default();
        drop(txn);
        send.device_ids = device_ids;
    }

    /// 410: the devices exist but their sessions are dead. Only the
    /// sessions go; the device set is untouched.
    pub fn handle_stale_devices(&self, send: &MessageSend, mismatch: &DeviceMismatch) {
        log::info!(
            "stale devices for {}: {:?}",
            send.recipient_address,
            mismatch.stale_devices
        );
        let mut txn = self.deps.store.write();
        for device_id in &mismatch.stale_devices {
            txn.delete_session(&send.recipient_account_id, *device_id);
        }
    }

    fn fail_send_for_unregistered_recipient(
        &self,
        send: &MessageSend,
    ) -> Result<AttemptOutcome, SendError> {
        let is_group = send.thread.is_group();
        let mut txn = self.deps.store.write();
        if !send.message.is_sync_message && is_group {
            txn.mark_message_skipped(&send.message.id, &send.recipient_address);
        }
        let was_registered = txn
            .recipient(&send.recipient_account_id)
            .map(Recipient::is_registered)
            .unwrap_or(false);
        if was_registered {
            txn.mark_recipient_unregistered(&send.recipient_account_id);
        }
        drop(txn);
        log::info!("recipient {} is not registered", send.recipient_address);
        Err(SendError::NoSuchRecipient {
            ignorable_for_group: is_group,
        })
    }
}
