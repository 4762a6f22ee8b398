use crate::address::ServiceAddress;
use crate::ids::{AccountId, DeviceId, PRIMARY_DEVICE_ID};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Registration {
    Unknown,
    Registered,
    Unregistered,
}

/// Persisted per-account record. Device-set updates happen only inside a
/// write transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub account_id: AccountId,
    pub address: ServiceAddress,
    pub device_ids: BTreeSet<DeviceId>,
    pub registration: Registration,
}

impl Recipient {
    /// A recipient we have never exchanged device state with is assumed to
    /// have its primary device only.
    pub fn new(account_id: AccountId, address: ServiceAddress) -> Self {
        let mut device_ids = BTreeSet::new();
        device_ids.insert(PRIMARY_DEVICE_ID);
        Self {
            account_id,
            address,
            device_ids,
            registration: Registration::Unknown,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registration == Registration::Registered
    }
}
