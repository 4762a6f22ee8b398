pub mod address;
pub mod config;
pub mod deps;
pub mod error;
pub mod executor;
pub mod ids;
pub mod message;
pub mod negative_cache;
pub mod prekeys;
pub mod recipient;
pub mod request_maker;
pub mod resolver;
pub mod service;
pub mod sessions;
pub mod store;
pub mod thread;
pub mod time;

use crate::address::ServiceAddress;
use crate::config::SenderConfig;
use crate::deps::{Dependencies, SenderCertificates, UdSendingAccess};
use crate::error::SendError;
use crate::executor::{AttemptOutcome, SendExecutor};
use crate::message::{MessageSend, OutgoingMessage};
use crate::negative_cache::NegativeCache;
use crate::prekeys::PrekeyClient;
use crate::request_maker::RequestMaker;
use crate::resolver::{RecipientResolver, SendInfo};
use crate::service::ServiceApi;
use crate::sessions::SessionEstablisher;
use courier_service_types::DeviceMessage;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Per-recipient outcome of one `send_message` call. A group send with
/// unregistered members reports them skipped rather than failing the
/// fanout.
#[derive(Debug, Default)]
pub struct SendReport {
    pub sent: Vec<ServiceAddress>,
    pub skipped: Vec<ServiceAddress>,
    pub failed: Vec<(ServiceAddress, SendError)>,
}

impl SendReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The outgoing delivery pipeline: resolve recipients, establish sessions,
/// encrypt per device, submit, and recover from device-list drift, bounded
/// by each send's attempt budget.
pub struct MessageSender {
    deps: Dependencies,
    config: SenderConfig,
    resolver: RecipientResolver,
    establisher: SessionEstablisher,
    executor: SendExecutor,
}

impl MessageSender {
    pub fn new(
        deps: Dependencies,
        config: SenderConfig,
        websocket: Option<Arc<dyn ServiceApi>>,
        rest: Arc<dyn ServiceApi>,
    ) -> Self {
        let cache = Arc::new(NegativeCache::new());
        let request_maker = Arc::new(RequestMaker::new(
            websocket,
            rest,
            deps.account.credentials.clone(),
        ));
        let prekeys = PrekeyClient::new(deps.clone(), cache.clone(), request_maker.clone());
        let resolver = RecipientResolver::new(deps.clone());
        let establisher = SessionEstablisher::new(deps.clone(), cache, prekeys);
        let executor = SendExecutor::new(deps.clone(), request_maker);
        Self {
            deps,
            config,
            resolver,
            establisher,
            executor,
        }
    }

    pub async fn send_message(&self, message: &OutgoingMessage) -> Result<SendReport, SendError> {
        let info = self.resolver.prepare_send(message).await?;
        let mut report = SendReport::default();
        for address in &message.sending_recipient_addresses {
            if !info.covers(address) {
                report.skipped.push(address.clone());
            }
        }
        for address in &info.recipients {
            match self.send_to_recipient(message, &info, address).await {
                Ok(()) => report.sent.push(address.clone()),
                Err(err) if info.thread.is_group() && err.is_ignorable_for_group() => {
                    report.skipped.push(address.clone());
                }
                Err(err) => report.failed.push((address.clone(), err)),
            }
        }
        Ok(report)
    }

    async fn send_to_recipient(
        &self,
        message: &OutgoingMessage,
        info: &SendInfo,
        address: &ServiceAddress,
    ) -> Result<(), SendError> {
        let mut send = {
            let mut txn = self.deps.store.write();
            let recipient = txn.get_or_create_recipient(address);
            MessageSend::new(
                message.clone(),
                info.thread.clone(),
                &recipient,
                self.ud_access_for(address, &info.sender_certificates),
                self.config.max_send_attempts,
                &self.deps.account,
            )
        };
        let mut backoff_tries = 0u32;
        loop {
            if let Err(err) = self
                .establisher
                .ensure_sessions(std::slice::from_mut(&mut send), true)
                .await
            {
                if err.is_retryable() && send.remaining_attempts > 0 {
                    send.remaining_attempts -= 1;
                    self.backoff(&mut backoff_tries).await;
                    continue;
                }
                return Err(err);
            }
            let device_messages = self.encrypt_for(&send)?;
            match self.executor.perform_send(&mut send, device_messages).await? {
                AttemptOutcome::Delivered { .. } => return Ok(()),
                AttemptOutcome::Retry => self.backoff(&mut backoff_tries).await,
            }
        }
    }

    fn encrypt_for(&self, send: &MessageSend) -> Result<Vec<DeviceMessage>, SendError> {
        let txn = self.deps.store.read();
        let mut device_messages = Vec::with_capacity(send.device_ids.len());
        for device_id in &send.device_ids {
            if send.is_local_address && *device_id == self.deps.account.device_id {
                continue;
            }
            device_messages.push(self.deps.encryptor.encrypt(
                &send.message,
                &send.recipient_account_id,
                *device_id,
                &txn,
            )?);
        }
        Ok(device_messages)
    }

    fn ud_access_for(
        &self,
        address: &ServiceAddress,
        certificates: &SenderCertificates,
    ) -> Option<UdSendingAccess> {
        // sealed sender never targets our own account
        if address == &self.deps.account.address {
            return None;
        }
        self.deps
            .ud_access
            .ud_access_key(address)
            .map(|access_key| UdSendingAccess {
                access_key,
                sender_certificate: certificates.default_certificate.clone(),
            })
    }

    /// Doubles the delay per attempt up to the configured ceiling, with a
    /// random pad so a fleet of failing sends does not reconverge.
    async fn backoff(&self, attempt: &mut u32) {
        *attempt += 1;
        let exponent = attempt.saturating_sub(1).min(16);
        let delay_ms = self
            .config
            .retry_backoff_initial_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.config.retry_backoff_max_ms);
        let padded = delay_ms.saturating_add(rand::thread_rng().gen_range(0..=delay_ms / 3 + 1));
        tokio::time::sleep(Duration::from_millis(padded)).await;
    }
}

#[cfg(test)]
mod tests;
