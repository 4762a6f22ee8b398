use serde::{Deserialize, Serialize};

/// Response body of `GET /v2/keys/{serviceId}/{deviceId}`. Key material is
/// base64 on the wire.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyResponse {
    pub identity_key: String,
    pub devices: Vec<PreKeyDevice>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyDevice {
    pub device_id: u32,
    pub registration_id: u32,
    pub signed_pre_key: SignedPreKeyEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_key: Option<PreKeyEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKeyEntry {
    pub key_id: u32,
    pub public_key: String,
    pub signature: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyEntry {
    pub key_id: u32,
    pub public_key: String,
}

impl PreKeyResponse {
    /// The entry for one specific device, if the service included it.
    pub fn device(&self, device_id: u32) -> Option<&PreKeyDevice> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }
}
