//! # Escrow settlement server
//! This crate hosts the HTTP service in front of the escrow engine. It is responsible for:
//! * Receiving order, delivery and dispute webhooks from the marketplace checkout, and turning them into escrow
//!   transitions.
//! * Letting administrators release, refund and resolve disputed escrows, and run the auto-release sweep on demand.
//! * Answering questions about the ledger: single escrows, searches, statistics, seller summaries and audit logs.
//! * Running the auto-release sweep on a timer.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/webhook/*`: Checkout webhooks. Calls must be signed (see [middleware]) and may be restricted to an IP whitelist.
//! * `/api/*`: Reporting and administrative routes. The caller is identified by the `esg_actor_id` header.
pub mod auth;
pub mod auto_release_worker;
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod integrations;
pub mod middleware;
pub mod routes;
pub mod server;
