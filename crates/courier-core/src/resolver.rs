use crate::address::ServiceAddress;
use crate::deps::{CertificateExpirationPolicy, Dependencies, SenderCertificates};
use crate::error::SendError;
use crate::message::OutgoingMessage;
use crate::thread::Thread;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Numbers a discovery round failed to resolve stay on a cooldown before
/// being asked about again.
pub const UNDISCOVERABLE_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// What a send needs to know before fanning out: the resolved thread, the
/// exact recipient set, and the sender certificates for sealed sending.
#[derive(Clone, Debug)]
pub struct SendInfo {
    pub thread: Thread,
    pub recipients: Vec<ServiceAddress>,
    pub sender_certificates: SenderCertificates,
}

impl SendInfo {
    /// Whether an originally-targeted address is represented in the
    /// resolved set. Discovery may have replaced a phone-only address with
    /// its `(uuid, phone)` form, so a phone match counts.
    pub fn covers(&self, address: &ServiceAddress) -> bool {
        covers(&self.recipients, address)
    }
}

fn covers(resolved: &[ServiceAddress], address: &ServiceAddress) -> bool {
    resolved.iter().any(|candidate| {
        candidate == address
            || (address.phone().is_some() && candidate.phone() == address.phone())
    })
}

/// Expands an outgoing message into the deduplicated, filtered set of
/// addresses that should receive a copy.
pub struct RecipientResolver {
    deps: Dependencies,
    undiscoverable: Mutex<HashMap<String, Instant>>,
}

impl RecipientResolver {
    pub fn new(deps: Dependencies) -> Self {
        Self {
            deps,
            undiscoverable: Mutex::new(HashMap::new()),
        }
    }

    pub async fn prepare_send(&self, message: &OutgoingMessage) -> Result<SendInfo, SendError> {
        let sender_certificates = self
            .deps
            .certificates
            .ensure(CertificateExpirationPolicy::Permissive)
            .await?;
        let thread = {
            let txn = self.deps.store.read();
            txn.thread(&message.thread_id).cloned()
        }
        .ok_or(SendError::ThreadMissing)?;
        let recipients = self.enumerate_recipients(message, &thread)?;
        let recipients = self.resolve_missing_uuids(recipients).await?;
        self.mark_skipped_recipients(message, &recipients);
        Ok(SendInfo {
            thread,
            recipients,
            sender_certificates,
        })
    }

    fn enumerate_recipients(
        &self,
        message: &OutgoingMessage,
        thread: &Thread,
    ) -> Result<Vec<ServiceAddress>, SendError> {
        let local = &self.deps.account.address;
        if message.is_sync_message {
            return Ok(vec![local.clone()]);
        }
        match thread {
            Thread::Group { membership } => {
                let mut member_pool: HashSet<&ServiceAddress> =
                    membership.full_members.iter().collect();
                if message.is_group_update {
                    member_pool.extend(membership.invited_members.iter());
                }
                let blocked = self.deps.blocking.blocked_addresses();
                let mut seen = HashSet::new();
                let mut recipients = Vec::new();
                for address in &message.sending_recipient_addresses {
                    if member_pool.contains(address)
                        && address != local
                        && !blocked.contains(address)
                        && seen.insert(address.clone())
                    {
                        recipients.push(address.clone());
                    }
                }
                Ok(recipients)
            }
            Thread::Contact { peer } => {
                if peer == local {
                    Ok(vec![local.clone()])
                } else if self.deps.blocking.is_blocked(peer) {
                    Err(SendError::BlockedContactRecipient)
                } else {
                    Ok(vec![peer.clone()])
                }
            }
        }
    }

    /// Recipients without a UUID go through contact discovery. When every
    /// one of them is on the undiscoverable cooldown the round is skipped
    /// and they are simply dropped; numbers discovery comes back without
    /// are recorded undiscoverable and dropped likewise.
    async fn resolve_missing_uuids(
        &self,
        recipients: Vec<ServiceAddress>,
    ) -> Result<Vec<ServiceAddress>, SendError> {
        let (mut resolved, invalid): (Vec<_>, Vec<_>) =
            recipients.into_iter().partition(ServiceAddress::is_valid);
        if invalid.is_empty() {
            return Ok(resolved);
        }
        let all_on_cooldown = invalid.iter().all(|address| {
            address
                .phone()
                .map(|phone| self.is_recently_undiscoverable(phone))
                .unwrap_or(true)
        });
        if all_on_cooldown {
            log::info!(
                "dropping {} recipients on discovery cooldown",
                invalid.len()
            );
            return Ok(resolved);
        }
        let numbers: Vec<String> = invalid
            .iter()
            .filter_map(|address| address.phone().map(str::to_string))
            .collect();
        let discovered = self
            .deps
            .discovery
            .discover(&numbers)
            .await
            .map_err(|err| SendError::Discovery {
                retryable: err.retry_suggested.unwrap_or(true),
            })?;
        let by_phone: HashMap<&str, &crate::deps::DiscoveredContact> = discovered
            .iter()
            .map(|contact| (contact.phone.as_str(), contact))
            .collect();
        for address in &invalid {
            match address.phone().and_then(|phone| by_phone.get(phone)) {
                Some(contact) => {
                    resolved.push(ServiceAddress::new(contact.uuid, contact.phone.clone()));
                }
                None => {
                    if let Some(phone) = address.phone() {
                        self.record_undiscoverable(phone);
                    }
                }
            }
        }
        Ok(resolved)
    }

    /// Addresses the message originally targeted but the resolution dropped
    /// are persistently marked skipped, all in one write transaction.
    fn mark_skipped_recipients(&self, message: &OutgoingMessage, resolved: &[ServiceAddress]) {
        let skipped: Vec<&ServiceAddress> = message
            .sending_recipient_addresses
            .iter()
            .filter(|address| !covers(resolved, address))
            .collect();
        if skipped.is_empty() {
            return;
        }
        let mut txn = self.deps.store.write();
        for address in skipped {
            txn.mark_message_skipped(&message.id, address);
        }
    }

    fn is_recently_undiscoverable(&self, phone: &str) -> bool {
        self.is_recently_undiscoverable_at(phone, Instant::now())
    }

    pub(crate) fn is_recently_undiscoverable_at(&self, phone: &str, now: Instant) -> bool {
        let mut cache = self.lock_undiscoverable();
        match cache.get(phone) {
            None => false,
            Some(recorded_at) => {
                if now.duration_since(*recorded_at) >= UNDISCOVERABLE_TTL {
                    cache.remove(phone);
                    false
                } else {
                    true
                }
            }
        }
    }

    fn record_undiscoverable(&self, phone: &str) {
        self.record_undiscoverable_at(phone, Instant::now());
    }

    pub(crate) fn record_undiscoverable_at(&self, phone: &str, now: Instant) {
        self.lock_undiscoverable().insert(phone.to_string(), now);
    }

    fn lock_undiscoverable(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        self.undiscoverable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
