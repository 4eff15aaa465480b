use std::sync::Arc;

use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client,
    Method,
};
use serde::Serialize;

use crate::{ClientConfig, ClientError};

/// A thin JSON-over-HTTP client shared by the service clients.
#[derive(Clone)]
pub struct RestClient {
    config: ClientConfig,
    client: Arc<Client>,
}

impl RestClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::with_capacity(2);
        if !config.api_key.reveal().is_empty() {
            let val = HeaderValue::from_str(&format!("Bearer {}", config.api_key.reveal()))
                .map_err(|e| ClientError::Initialization(e.to_string()))?;
            headers.insert(AUTHORIZATION, val);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn url(&self, path: &str) -> String {
        self.config.url(path)
    }

    /// Sends a request whose response body is of no interest beyond its status.
    pub async fn rest_command<B: Serialize>(&self, method: Method, path: &str, body: Option<B>) -> Result<(), ClientError> {
        self.send(method, path, body).await.map(|_| ())
    }

    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<B>,
    ) -> Result<reqwest::Response, ClientError> {
        let url = self.url(path);
        trace!("🌐️ Sending REST request: {method} {url}");
        let mut req = self.client.request(method, url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req.send().await.map_err(|e| {
            if e.is_builder() {
                ClientError::RestRequestError(e.to_string())
            } else {
                ClientError::RestResponseError(e.to_string())
            }
        })?;
        if response.status().is_success() {
            trace!("🌐️ REST request successful. {}", response.status());
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| ClientError::RestResponseError(e.to_string()))?;
            Err(ClientError::QueryError { status, message })
        }
    }
}
