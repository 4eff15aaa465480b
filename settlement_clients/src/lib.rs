//! Clients for the services the escrow engine settles money through.
//!
//! * [`GatewayClient`] refunds buyers through the payment gateway.
//! * [`BalanceLedgerClient`] credits sellers on the balance ledger.
//! * [`NotificationClient`] forwards escrow events to the notification service.
//!
//! All three talk JSON over HTTP via [`RestClient`] and are configured from the environment with [`ClientConfig`].
mod api;
mod balance_ledger;
mod config;
mod error;
mod notifications;
mod payment_gateway;

pub mod data_objects;

pub use api::RestClient;
pub use balance_ledger::BalanceLedgerClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use notifications::NotificationClient;
pub use payment_gateway::GatewayClient;
