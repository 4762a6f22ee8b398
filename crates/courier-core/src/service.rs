use crate::ids::DeviceId;
use async_trait::async_trait;
use courier_service_client::{RestClient, RestClientConfig};
use courier_service_types::{
    Auth, OutgoingMessageList, PreKeyResponse, SendMessageResponse, ServiceError,
};

/// One channel to the messaging service. The REST implementation lives in
/// `courier-service-client`; a websocket multiplex implements the same
/// trait and is preferred by the request maker until it fails.
#[async_trait]
pub trait ServiceApi: Send + Sync {
    async fn get_prekeys(
        &self,
        service_id: &str,
        device_id: DeviceId,
        auth: &Auth,
    ) -> Result<PreKeyResponse, ServiceError>;

    async fn put_messages(
        &self,
        service_id: &str,
        list: &OutgoingMessageList,
        auth: &Auth,
    ) -> Result<SendMessageResponse, ServiceError>;
}

pub struct RestServiceApi {
    client: RestClient,
}

impl RestServiceApi {
    pub fn new(base_url: impl Into<String>, cfg: RestClientConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            client: RestClient::new(base_url, cfg)?,
        })
    }
}

#[async_trait]
impl ServiceApi for RestServiceApi {
    async fn get_prekeys(
        &self,
        service_id: &str,
        device_id: DeviceId,
        auth: &Auth,
    ) -> Result<PreKeyResponse, ServiceError> {
        self.client.get_prekeys(service_id, device_id, auth).await
    }

    async fn put_messages(
        &self,
        service_id: &str,
        list: &OutgoingMessageList,
        auth: &Auth,
    ) -> Result<SendMessageResponse, ServiceError> {
        self.client.put_messages(service_id, list, auth).await
    }
}
