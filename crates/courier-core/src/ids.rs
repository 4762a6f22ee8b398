use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Small per-account device index assigned by the service.
pub type DeviceId = u32;

pub const PRIMARY_DEVICE_ID: DeviceId = 1;

pub fn is_primary_device(device_id: DeviceId) -> bool {
    device_id == PRIMARY_DEVICE_ID
}

/// Opaque key of a recipient row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId {
    pub value: String,
}

impl AccountId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn random() -> Self {
        Self {
            value: Uuid::new_v4().to_string(),
        }
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub value: Uuid,
}

impl MessageId {
    pub fn random() -> Self {
        Self {
            value: Uuid::new_v4(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId {
    pub value: Uuid,
}

impl ThreadId {
    pub fn random() -> Self {
        Self {
            value: Uuid::new_v4(),
        }
    }
}
