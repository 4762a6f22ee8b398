use serde::{Deserialize, Serialize};

/// Body of `PUT /v1/messages/{serviceId}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessageList {
    pub timestamp: u64,
    pub messages: Vec<DeviceMessage>,
    pub online: bool,
}

/// One per-device ciphertext. `content` is opaque to this subsystem; the
/// encryptor hands it over already base64-encoded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMessage {
    #[serde(rename = "type")]
    pub message_type: u32,
    pub destination_device_id: u32,
    pub destination_registration_id: u32,
    pub content: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    #[serde(default)]
    pub needs_sync: bool,
}

/// Device-list correction payload attached to 409 (mismatched) and 410
/// (stale) rejections. The service omits the arrays it has nothing to say
/// about, so every field defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMismatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
    #[serde(default)]
    pub extra_devices: Vec<u32>,
    #[serde(default)]
    pub missing_devices: Vec<u32>,
    #[serde(default)]
    pub stale_devices: Vec<u32>,
}
