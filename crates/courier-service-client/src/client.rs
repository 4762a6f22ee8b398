use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use courier_service_types::{
    Auth, OutgoingMessageList, PreKeyResponse, Result, SendMessageResponse, ServiceError,
};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::config::RestClientConfig;
use crate::urls;

const UNIDENTIFIED_ACCESS_HEADER: &str = "Unidentified-Access-Key";

pub struct RestClient {
    base_url: String,
    http: reqwest::Client,
    cfg: RestClientConfig,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, cfg: RestClientConfig) -> Result<RestClient> {
        if cfg.timeout_ms == 0 {
            return Err(ServiceError::InvalidInput("timeout_ms"));
        }
        if cfg.connect_timeout_ms == 0 {
            return Err(ServiceError::InvalidInput("connect_timeout_ms"));
        }
        if cfg.max_response_bytes == 0 {
            return Err(ServiceError::InvalidInput("max_response_bytes"));
        }
        if cfg.user_agent.trim().is_empty() {
            return Err(ServiceError::InvalidInput("user_agent"));
        }
        let base_raw: String = base_url.into();
        let base = urls::validated_base(base_raw.as_str())?;
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .build()
            .map_err(transport)?;
        Ok(RestClient {
            base_url: base,
            http,
            cfg,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_prekeys(
        &self,
        service_id: &str,
        device_id: u32,
        auth: &Auth,
    ) -> Result<PreKeyResponse> {
        let url = urls::prekeys(&self.base_url, service_id, device_id)?;
        let req = self.with_auth(self.http.get(url), auth);
        let resp = req.send().await.map_err(transport)?;
        self.handle_json_response(resp).await
    }

    pub async fn put_messages(
        &self,
        service_id: &str,
        list: &OutgoingMessageList,
        auth: &Auth,
    ) -> Result<SendMessageResponse> {
        let url = urls::messages(&self.base_url, service_id)?;
        let req = self.with_auth(self.http.put(url), auth).json(list);
        let resp = req.send().await.map_err(transport)?;
        let body = self.read_body(resp).await?;
        if body.is_empty() {
            return Ok(SendMessageResponse::default());
        }
        Ok(serde_json::from_slice(&body)?)
    }

    fn with_auth(&self, req: RequestBuilder, auth: &Auth) -> RequestBuilder {
        match auth {
            Auth::Basic(creds) => req.basic_auth(&creds.username, Some(&creds.password)),
            Auth::UnidentifiedAccess(key) => {
                req.header(UNIDENTIFIED_ACCESS_HEADER, STANDARD.encode(key))
            }
        }
    }

    async fn handle_json_response<T: DeserializeOwned>(&self, resp: Response) -> Result<T> {
        let body = self.read_body(resp).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Reads a capped body, turning non-2xx statuses into `Status` errors
    /// that keep the raw body so callers can parse structured failures.
    async fn read_body(&self, resp: Response) -> Result<Vec<u8>> {
        let status = resp.status();
        let body = resp.bytes().await.map_err(transport)?;
        if body.len() > self.cfg.max_response_bytes {
            return Err(ServiceError::ResponseTooLarge);
        }
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: body.to_vec(),
            });
        }
        Ok(body.to_vec())
    }
}

fn transport(err: reqwest::Error) -> ServiceError {
    ServiceError::Transport(err.to_string())
}
