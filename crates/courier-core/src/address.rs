use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// A logical user identity on the service. Identity is the stable UUID when
/// known, else the E.164 phone number; equality and hashing follow that
/// rule so an address learned by phone and later enriched with a UUID keys
/// consistently.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceAddress {
    uuid: Option<Uuid>,
    phone: Option<String>,
}

#[derive(PartialEq, Eq, Hash)]
enum AddressKey<'a> {
    Uuid(Uuid),
    Phone(&'a str),
}

impl ServiceAddress {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid: Some(uuid),
            phone: None,
        }
    }

    pub fn from_phone(phone: impl Into<String>) -> Self {
        Self {
            uuid: None,
            phone: Some(phone.into()),
        }
    }

    pub fn new(uuid: Uuid, phone: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid),
            phone: Some(phone.into()),
        }
    }

    pub fn from_parts(uuid: Option<Uuid>, phone: Option<String>) -> Option<Self> {
        if uuid.is_none() && phone.is_none() {
            return None;
        }
        Some(Self { uuid, phone })
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    /// An address without a UUID cannot be targeted on the wire; it must go
    /// through contact discovery first.
    pub fn is_valid(&self) -> bool {
        self.uuid.is_some()
    }

    /// The path component used when addressing the service.
    pub fn service_id(&self) -> Option<String> {
        self.uuid
            .map(|u| u.to_string())
            .or_else(|| self.phone.clone())
    }

    fn key(&self) -> AddressKey<'_> {
        match (self.uuid, self.phone.as_deref()) {
            (Some(uuid), _) => AddressKey::Uuid(uuid),
            (None, Some(phone)) => AddressKey::Phone(phone),
            // unreachable by construction
            (None, None) => AddressKey::Phone(""),
        }
    }
}

impl PartialEq for ServiceAddress {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ServiceAddress {}

impl Hash for ServiceAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Display for ServiceAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.uuid, self.phone.as_deref()) {
            (Some(uuid), _) => write!(f, "{}", uuid),
            (None, Some(phone)) => write!(f, "{}", phone),
            (None, None) => write!(f, "unknown"),
        }
    }
}
