use crate::address::ServiceAddress;
use crate::deps::Dependencies;
use crate::error::SendError;
use crate::ids::{AccountId, DeviceId};
use crate::message::MessageSend;
use crate::negative_cache::NegativeCache;
use crate::prekeys::{PreKeyBundle, PrekeyClient};
use crate::store::WriteTransaction;
use std::sync::Arc;
use thiserror::Error;

const KEY_TYPE_DJB: u8 = 0x05;

#[derive(Debug, Error)]
pub enum SessionBuilderError {
    #[error("untrusted identity")]
    UntrustedIdentity { identity_key: Vec<u8> },
    #[error("session builder: {0}")]
    Other(String),
}

/// Processes a prekey bundle into persistent session state. Implemented by
/// the protocol layer; the fake in tests writes a `SessionRecord` straight
/// into the transaction.
pub trait SessionBuilder: Send + Sync {
    fn process(
        &self,
        bundle: &PreKeyBundle,
        account_id: &AccountId,
        txn: &mut WriteTransaction<'_>,
    ) -> Result<(), SessionBuilderError>;
}

/// Strips the standard key-type byte off a wire identity key before it is
/// persisted.
pub fn strip_key_type(key: &[u8]) -> Vec<u8> {
    match key.split_first() {
        Some((&KEY_TYPE_DJB, rest)) if rest.len() == 32 => rest.to_vec(),
        _ => key.to_vec(),
    }
}

/// Makes sure a session exists for every `(recipient, device)` pair a batch
/// of sends is about to target.
pub struct SessionEstablisher {
    deps: Dependencies,
    cache: Arc<NegativeCache>,
    prekeys: PrekeyClient,
}

impl SessionEstablisher {
    pub fn new(deps: Dependencies, cache: Arc<NegativeCache>, prekeys: PrekeyClient) -> Self {
        Self {
            deps,
            cache,
            prekeys,
        }
    }

    /// `ignore_errors` swallows only `MissingDevice` (the device was pruned
    /// and the send can proceed to its remaining devices); every other
    /// failure propagates regardless.
    pub async fn ensure_sessions(
        &self,
        sends: &mut [MessageSend],
        ignore_errors: bool,
    ) -> Result<(), SendError> {
        for send in sends.iter_mut() {
            self.ensure_sessions_for_send(send, ignore_errors).await?;
        }
        Ok(())
    }

    async fn ensure_sessions_for_send(
        &self,
        send: &mut MessageSend,
        ignore_errors: bool,
    ) -> Result<(), SendError> {
        let devices_needing_sessions: Vec<DeviceId> = {
            let txn = self.deps.store.read();
            send.device_ids
                .iter()
                .copied()
                .filter(|device_id| {
                    !(send.is_local_address && *device_id == self.deps.account.device_id)
                        && txn.session(&send.recipient_account_id, *device_id).is_none()
                })
                .collect()
        };
        for device_id in devices_needing_sessions {
            match self.establish(send, device_id).await {
                Ok(()) => {}
                Err(SendError::MissingDevice { device_id }) => {
                    self.prune_missing_device(send, device_id);
                    if !ignore_errors {
                        return Err(SendError::MissingDevice { device_id });
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn establish(&self, send: &mut MessageSend, device_id: DeviceId) -> Result<(), SendError> {
        let bundle = self.prekeys.fetch(send, device_id).await?;
        let account_id = send.recipient_account_id.clone();
        let address = send.recipient_address.clone();
        let mut txn = self.deps.store.write();
        self.create_session(&mut txn, &bundle, &account_id, &address, device_id)
    }

    /// Idempotent: a session that already exists (racing establisher, or a
    /// concurrent incoming message) is left alone.
    pub fn create_session(
        &self,
        txn: &mut WriteTransaction<'_>,
        bundle: &PreKeyBundle,
        account_id: &AccountId,
        address: &ServiceAddress,
        device_id: DeviceId,
    ) -> Result<(), SendError> {
        if txn.session(account_id, device_id).is_some() {
            return Ok(());
        }
        match self.deps.session_builder.process(bundle, account_id, txn) {
            Ok(()) => {}
            Err(SessionBuilderError::UntrustedIdentity { identity_key }) => {
                let new_key = strip_key_type(&identity_key);
                txn.save_identity(account_id, &new_key);
                let current_key = txn
                    .identity(account_id)
                    .map(|record| record.identity_key.clone())
                    .unwrap_or_default();
                self.cache
                    .record_stale_identity(address, current_key, new_key);
                log::warn!("identity changed for {}, send blocked pending verification", address);
                return Err(SendError::UntrustedIdentity {
                    address: address.clone(),
                });
            }
            Err(SessionBuilderError::Other(reason)) => {
                return Err(SendError::SessionBuild(reason))
            }
        }
        if txn.session(account_id, device_id).is_none() {
            log::error!(
                "session builder completed without a session for {} device {}",
                address,
                device_id
            );
            return Err(SendError::SessionBuild(
                "no session after successful build".to_string(),
            ));
        }
        Ok(())
    }

    fn prune_missing_device(&self, send: &mut MessageSend, device_id: DeviceId) {
        log::warn!(
            "pruning missing device {} of {}",
            device_id,
            send.recipient_address
        );
        {
            let mut txn = self.deps.store.write();
            txn.remove_recipient_devices(&send.recipient_account_id, &[device_id]);
        }
        send.device_ids.retain(|d| *d != device_id);
    }
}
