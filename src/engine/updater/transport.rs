//! Update Server Transport
//!
//! Blocking JSON-over-HTTP calls to the update server. The client pass only
//! sees the `UpdateServer` trait so tests can substitute an in-memory fake.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{Result, UpdateError};
use crate::engine::protocol::{AcknowledgeRequest, UpdateRequest, UpdateResponse};

pub const UPDATE_PATH: &str = "/update";
pub const ACKNOWLEDGE_PATH: &str = "/acknowledge_patch";

pub trait UpdateServer {
    fn request_update(&self, request: &UpdateRequest) -> Result<UpdateResponse>;
    fn acknowledge_patch(&self, ack: &AcknowledgeRequest) -> Result<()>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(concat!("fleetward-update/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| UpdateError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "Sending request");

        let response = self.client.post(&url).json(body).send()?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(UpdateError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json()?)
    }
}

impl UpdateServer for HttpTransport {
    fn request_update(&self, request: &UpdateRequest) -> Result<UpdateResponse> {
        self.post(UPDATE_PATH, request)
    }

    fn acknowledge_patch(&self, ack: &AcknowledgeRequest) -> Result<()> {
        let _: serde_json::Value = self.post(ACKNOWLEDGE_PATH, ack)?;
        Ok(())
    }
}
