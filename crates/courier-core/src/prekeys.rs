use crate::deps::Dependencies;
use crate::error::SendError;
use crate::ids::DeviceId;
use crate::message::MessageSend;
use crate::negative_cache::NegativeCache;
use crate::request_maker::RequestMaker;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use courier_service_types::PreKeyResponse;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OneTimePreKey {
    pub id: u32,
    pub public_key: Vec<u8>,
}

/// Server-supplied key material for one `(recipient, device)` pair, key
/// bytes already base64-decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyBundle {
    pub device_id: DeviceId,
    pub registration_id: u32,
    pub identity_key: Vec<u8>,
    pub signed_prekey_id: u32,
    pub signed_prekey: Vec<u8>,
    pub signed_prekey_signature: Vec<u8>,
    pub one_time_prekey: Option<OneTimePreKey>,
}

impl PreKeyBundle {
    /// Extracts the entry for exactly the requested device. The service
    /// answering without it is a malformed response, not a missing device.
    pub fn from_response(
        response: &PreKeyResponse,
        device_id: DeviceId,
    ) -> Result<Self, SendError> {
        let device = response
            .device(device_id)
            .ok_or(SendError::InvalidResponse("prekey device payload"))?;
        Ok(Self {
            device_id: device.device_id,
            registration_id: device.registration_id,
            identity_key: decode_key(&response.identity_key)?,
            signed_prekey_id: device.signed_pre_key.key_id,
            signed_prekey: decode_key(&device.signed_pre_key.public_key)?,
            signed_prekey_signature: decode_key(&device.signed_pre_key.signature)?,
            one_time_prekey: device
                .pre_key
                .as_ref()
                .map(|entry| {
                    Ok::<_, SendError>(OneTimePreKey {
                        id: entry.key_id,
                        public_key: decode_key(&entry.public_key)?,
                    })
                })
                .transpose()?,
        })
    }
}

fn decode_key(encoded: &str) -> Result<Vec<u8>, SendError> {
    STANDARD
        .decode(encoded)
        .map_err(|_| SendError::InvalidResponse("key material base64"))
}

/// Fetches prekey bundles, short-circuiting through the negative caches
/// before any network work.
pub struct PrekeyClient {
    deps: Dependencies,
    cache: Arc<NegativeCache>,
    request_maker: Arc<RequestMaker>,
}

impl PrekeyClient {
    pub fn new(
        deps: Dependencies,
        cache: Arc<NegativeCache>,
        request_maker: Arc<RequestMaker>,
    ) -> Self {
        Self {
            deps,
            cache,
            request_maker,
        }
    }

    pub async fn fetch(
        &self,
        send: &mut MessageSend,
        device_id: DeviceId,
    ) -> Result<PreKeyBundle, SendError> {
        let address = send.recipient_address.clone();
        if !self.cache.is_device_not_missing(&address, device_id) {
            return Err(SendError::MissingDevice { device_id });
        }
        {
            let txn = self.deps.store.read();
            if self
                .cache
                .is_identity_likely_untrusted(&send.recipient_account_id, &address, &txn)
            {
                return Err(SendError::UntrustedIdentity { address });
            }
        }
        log::debug!("fetching prekey bundle for {} device {}", address, device_id);
        let response = match self.request_maker.get_prekeys(send, device_id).await {
            Ok(response) => response,
            Err(SendError::Service(err)) => {
                return Err(match err.status_code() {
                    Some(404) => {
                        self.cache.record_missing_device(&address, device_id);
                        SendError::MissingDevice { device_id }
                    }
                    Some(413) => SendError::PrekeyRateLimit,
                    _ => SendError::Service(err),
                })
            }
            Err(other) => return Err(other),
        };
        PreKeyBundle::from_response(&response, device_id)
    }
}
