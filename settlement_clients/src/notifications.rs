use log::*;
use reqwest::Method;
use serde::Serialize;

use crate::{data_objects::NotificationBody, ClientConfig, ClientError, RestClient};

/// Forwards escrow events to the notification service. Delivery is best effort.
#[derive(Clone)]
pub struct NotificationClient {
    client: RestClient,
}

impl NotificationClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = RestClient::new(config)?;
        Ok(Self { client })
    }

    pub async fn notify<T: Serialize>(&self, topic: &str, payload: &T) -> Result<(), ClientError> {
        let payload = serde_json::to_value(payload).map_err(|e| ClientError::JsonError(e.to_string()))?;
        let body = NotificationBody { topic: topic.to_string(), payload };
        self.client.rest_command(Method::POST, "/events", Some(body)).await?;
        debug!("🌐️ Notification sent for {topic}");
        Ok(())
    }
}
