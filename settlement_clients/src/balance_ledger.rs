use escrow_common::Money;
use escrow_engine::{CollaboratorError, SellerBalanceLedger};
use log::*;
use reqwest::Method;

use crate::{data_objects::CreditBody, ClientConfig, ClientError, RestClient};

/// Credits sellers through the balance ledger's REST API.
#[derive(Clone)]
pub struct BalanceLedgerClient {
    client: RestClient,
}

impl BalanceLedgerClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = RestClient::new(config)?;
        Ok(Self { client })
    }
}

impl SellerBalanceLedger for BalanceLedgerClient {
    async fn credit(
        &self,
        seller_id: &str,
        amount: Money,
        currency: &str,
        reference: &str,
    ) -> Result<(), CollaboratorError> {
        let body = CreditBody {
            seller_id: seller_id.to_string(),
            amount,
            currency: currency.to_string(),
            reference: reference.to_string(),
        };
        debug!("🌐️ Crediting {amount} {currency} to seller {seller_id} ({reference})");
        self.client.rest_command(Method::POST, "/credits", Some(body)).await.map_err(|e| {
            warn!("🌐️ Credit of {amount} {currency} to seller {seller_id} ({reference}) failed. {e}");
            CollaboratorError::from(e)
        })?;
        info!("🌐️ Credited {amount} {currency} to seller {seller_id} ({reference})");
        Ok(())
    }
}
