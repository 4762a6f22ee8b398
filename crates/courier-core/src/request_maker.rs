use crate::error::SendError;
use crate::ids::DeviceId;
use crate::message::MessageSend;
use crate::service::ServiceApi;
use courier_service_types::{
    Auth, BasicCredentials, OutgoingMessageList, PreKeyResponse, SendMessageResponse, ServiceError,
};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Channel {
    Websocket,
    Rest,
}

/// Issues authenticated service requests on behalf of one `MessageSend`,
/// preferring sealed-sender auth and the websocket channel, and recording
/// failovers on the send so they stick across retries: once UD auth is
/// rejected the send stays on basic auth, once the websocket fails the
/// send stays on REST.
pub struct RequestMaker {
    websocket: Option<Arc<dyn ServiceApi>>,
    rest: Arc<dyn ServiceApi>,
    credentials: BasicCredentials,
}

impl RequestMaker {
    pub fn new(
        websocket: Option<Arc<dyn ServiceApi>>,
        rest: Arc<dyn ServiceApi>,
        credentials: BasicCredentials,
    ) -> Self {
        Self {
            websocket,
            rest,
            credentials,
        }
    }

    pub async fn get_prekeys(
        &self,
        send: &mut MessageSend,
        device_id: DeviceId,
    ) -> Result<PreKeyResponse, SendError> {
        let service_id = send.service_id()?;
        loop {
            let auth = self.auth_for(send);
            let (channel, api) = self.channel_for(send);
            match api.get_prekeys(&service_id, device_id, &auth).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if self.note_failover(send, &auth, channel, &err, true)? {
                        continue;
                    }
                    return Err(SendError::Service(err));
                }
            }
        }
    }

    pub async fn put_messages(
        &self,
        send: &mut MessageSend,
        list: &OutgoingMessageList,
    ) -> Result<SendMessageResponse, SendError> {
        let service_id = send.service_id()?;
        loop {
            let auth = self.auth_for(send);
            let (channel, api) = self.channel_for(send);
            match api.put_messages(&service_id, list, &auth).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if self.note_failover(send, &auth, channel, &err, false)? {
                        continue;
                    }
                    return Err(SendError::Service(err));
                }
            }
        }
    }

    fn auth_for(&self, send: &MessageSend) -> Auth {
        match &send.ud_access {
            Some(access) if !send.has_ud_auth_failed => {
                Auth::UnidentifiedAccess(access.access_key)
            }
            _ => Auth::Basic(self.credentials.clone()),
        }
    }

    fn channel_for(&self, send: &MessageSend) -> (Channel, Arc<dyn ServiceApi>) {
        match &self.websocket {
            Some(ws) if !send.has_websocket_send_failed => (Channel::Websocket, ws.clone()),
            _ => (Channel::Rest, self.rest.clone()),
        }
    }

    /// Returns `Ok(true)` when the request should be reissued in place on
    /// the fallback auth/channel. `Err` when UD auth was rejected and
    /// in-place failover is not allowed for this operation; the retry path
    /// re-runs with basic auth since the flag is now set.
    fn note_failover(
        &self,
        send: &mut MessageSend,
        auth: &Auth,
        channel: Channel,
        err: &ServiceError,
        can_failover_ud_auth: bool,
    ) -> Result<bool, SendError> {
        if channel == Channel::Websocket && err.is_transport() {
            log::debug!("websocket channel failed, staying on rest for this send");
            send.has_websocket_send_failed = true;
            return Ok(true);
        }
        if auth.is_unidentified() && matches!(err.status_code(), Some(401) | Some(403)) {
            log::debug!("unidentified-access auth rejected for {}", send.recipient_address);
            send.has_ud_auth_failed = true;
            if can_failover_ud_auth {
                return Ok(true);
            }
            return Err(SendError::UdAuthFailed);
        }
        Ok(false)
    }
}
