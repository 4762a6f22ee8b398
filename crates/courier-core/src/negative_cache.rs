use crate::address::ServiceAddress;
use crate::ids::{is_primary_device, AccountId, DeviceId};
use crate::store::ReadTransaction;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const MISSING_DEVICE_TTL: Duration = Duration::from_secs(60);
pub const STALE_IDENTITY_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug)]
struct StaleIdentityEntry {
    current_identity_key: Vec<u8>,
    new_identity_key: Vec<u8>,
    recorded_at: Instant,
}

#[derive(Default)]
struct CacheTables {
    missing_devices: HashMap<(ServiceAddress, DeviceId), Instant>,
    stale_identities: HashMap<ServiceAddress, StaleIdentityEntry>,
}

/// Short-lived suppression of prekey fetches known to be futile: recent
/// "missing device" 404s and recent untrusted-identity failures whose
/// precondition has not changed. All reads and writes serialize through
/// one mutex; TTLs run on the monotonic clock.
#[derive(Default)]
pub struct NegativeCache {
    tables: Mutex<CacheTables>,
}

impl NegativeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_missing_device(&self, address: &ServiceAddress, device_id: DeviceId) {
        self.record_missing_device_at(address, device_id, Instant::now());
    }

    /// Only primary-device 404s are cached. Linked devices are self-healing
    /// through the server's device-list corrections, so caching their
    /// absence would suppress the fetch that heals them.
    pub(crate) fn record_missing_device_at(
        &self,
        address: &ServiceAddress,
        device_id: DeviceId,
        now: Instant,
    ) {
        if !is_primary_device(device_id) {
            return;
        }
        let mut tables = self.lock();
        tables
            .missing_devices
            .insert((address.clone(), device_id), now);
    }

    pub fn is_device_not_missing(&self, address: &ServiceAddress, device_id: DeviceId) -> bool {
        self.is_device_not_missing_at(address, device_id, Instant::now())
    }

    pub(crate) fn is_device_not_missing_at(
        &self,
        address: &ServiceAddress,
        device_id: DeviceId,
        now: Instant,
    ) -> bool {
        let mut tables = self.lock();
        let key = (address.clone(), device_id);
        match tables.missing_devices.get(&key) {
            None => true,
            Some(recorded_at) => {
                if now.duration_since(*recorded_at) >= MISSING_DEVICE_TTL {
                    tables.missing_devices.remove(&key);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_stale_identity(
        &self,
        address: &ServiceAddress,
        current_identity_key: Vec<u8>,
        new_identity_key: Vec<u8>,
    ) {
        self.record_stale_identity_at(address, current_identity_key, new_identity_key, Instant::now());
    }

    pub(crate) fn record_stale_identity_at(
        &self,
        address: &ServiceAddress,
        current_identity_key: Vec<u8>,
        new_identity_key: Vec<u8>,
        now: Instant,
    ) {
        let mut tables = self.lock();
        tables.stale_identities.insert(
            address.clone(),
            StaleIdentityEntry {
                current_identity_key,
                new_identity_key,
                recorded_at: now,
            },
        );
    }

    pub fn is_identity_likely_untrusted(
        &self,
        account_id: &AccountId,
        address: &ServiceAddress,
        txn: &ReadTransaction<'_>,
    ) -> bool {
        self.is_identity_likely_untrusted_at(account_id, address, txn, Instant::now())
    }

    /// Blocks a fetch only while every precondition of the cached failure
    /// still holds: the entry is fresh, the persisted current key has not
    /// rotated, and the offending new key is still untrusted for outgoing.
    /// Anything else permits a retry.
    pub(crate) fn is_identity_likely_untrusted_at(
        &self,
        account_id: &AccountId,
        address: &ServiceAddress,
        txn: &ReadTransaction<'_>,
        now: Instant,
    ) -> bool {
        let mut tables = self.lock();
        let entry = match tables.stale_identities.get(address) {
            None => return false,
            Some(entry) => entry.clone(),
        };
        if now.duration_since(entry.recorded_at) >= STALE_IDENTITY_TTL {
            tables.stale_identities.remove(address);
            return false;
        }
        let persisted_current = match txn.identity(account_id) {
            None => return false,
            Some(record) => record.identity_key.clone(),
        };
        if persisted_current != entry.current_identity_key {
            return false;
        }
        !txn.is_identity_trusted_for_outgoing(account_id, &entry.new_identity_key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
