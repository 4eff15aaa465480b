use escrow_common::Money;
use escrow_engine::{CollaboratorError, PaymentGateway};
use log::*;
use reqwest::Method;

use crate::{data_objects::RefundBody, ClientConfig, ClientError, RestClient};

/// Refunds buyers through the payment gateway's REST API.
#[derive(Clone)]
pub struct GatewayClient {
    client: RestClient,
}

impl GatewayClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = RestClient::new(config)?;
        Ok(Self { client })
    }
}

impl PaymentGateway for GatewayClient {
    async fn refund(&self, payment_reference: &str, amount: Money, currency: &str) -> Result<(), CollaboratorError> {
        let body =
            RefundBody { payment_reference: payment_reference.to_string(), amount, currency: currency.to_string() };
        debug!("🌐️ Requesting a refund of {amount} {currency} against payment {payment_reference}");
        self.client.rest_command(Method::POST, "/refunds", Some(body)).await.map_err(|e| {
            warn!("🌐️ Refund of {amount} {currency} against payment {payment_reference} failed. {e}");
            CollaboratorError::from(e)
        })?;
        info!("🌐️ Refunded {amount} {currency} against payment {payment_reference}");
        Ok(())
    }
}
