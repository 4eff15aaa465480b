use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use escrow_engine::{events::EventHandlers, EscrowFlowApi, ReportingApi, SqliteDatabase};
use log::*;
use settlement_clients::{BalanceLedgerClient, GatewayClient, NotificationClient};

use crate::{
    auth::RoleAuthorizer,
    auto_release_worker::start_auto_release_worker,
    config::ServerConfig,
    errors::ServerError,
    integrations::notifications::notification_hooks,
    middleware::{HmacMiddlewareFactory, IpWhitelistFactory, HMAC_HEADER},
    routes::{admin_routes, health, reporting_routes, webhook_routes},
};

pub type ServerFlowApi = EscrowFlowApi<SqliteDatabase, GatewayClient, BalanceLedgerClient, RoleAuthorizer>;
pub type ServerReportingApi = ReportingApi<SqliteDatabase, RoleAuthorizer>;

const EVENT_BUFFER_SIZE: usize = 25;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.run_migrations().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let notifier = config
        .notifications
        .clone()
        .map(NotificationClient::new)
        .transpose()
        .map_err(|e| ServerError::InitializeError(format!("Could not create the notification client. {e}")))?;
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, notification_hooks(notifier));
    let producers = handlers.producers();
    handlers.start_handlers().await;
    let gateway = GatewayClient::new(config.payment_gateway.clone())
        .map_err(|e| ServerError::InitializeError(format!("Could not create the payment gateway client. {e}")))?;
    let balances = BalanceLedgerClient::new(config.balance_ledger.clone())
        .map_err(|e| ServerError::InitializeError(format!("Could not create the balance ledger client. {e}")))?;
    let authorizer = RoleAuthorizer::new(config.actor_roles.clone());
    let flow_api = EscrowFlowApi::new(db.clone(), gateway, balances, authorizer.clone(), producers)
        .with_policy(config.policy.clone())
        .with_call_timeout(config.external_call_timeout);
    let flow_api = web::Data::new(flow_api);
    let reporting_api = web::Data::new(ReportingApi::new(db, authorizer));
    let worker = start_auto_release_worker(flow_api.clone().into_inner(), config.auto_release.clone());
    let srv = create_server_instance(config, flow_api, reporting_api)?;
    let result = srv.await.map_err(|e| ServerError::Unspecified(e.to_string()));
    info!("🚀️ Server has stopped. Stopping the auto-release worker");
    worker.abort();
    result
}

/// Builds the HTTP server. Every worker shares the same engine APIs, so per-escrow locking holds across all of them and
/// the auto-release worker.
pub fn create_server_instance(
    config: ServerConfig,
    flow_api: web::Data<ServerFlowApi>,
    reporting_api: web::Data<ServerReportingApi>,
) -> Result<Server, ServerError> {
    let host = config.host.clone();
    let port = config.port;
    let auto_release = web::Data::new(config.auto_release.clone());
    let srv = HttpServer::new(move || {
        let webhooks = &config.webhooks;
        let webhook_scope = webhook_routes::<SqliteDatabase, GatewayClient, BalanceLedgerClient, RoleAuthorizer>(
            web::scope("/webhook"),
        )
        .wrap(HmacMiddlewareFactory::new(HMAC_HEADER, webhooks.hmac_secret.clone(), webhooks.hmac_checks))
        .wrap(IpWhitelistFactory::new(
            webhooks.whitelist.clone(),
            config.use_x_forwarded_for,
            config.use_forwarded,
        ));
        let api_scope = reporting_routes::<SqliteDatabase, RoleAuthorizer>(web::scope("/api"));
        let api_scope =
            admin_routes::<SqliteDatabase, GatewayClient, BalanceLedgerClient, RoleAuthorizer>(api_scope);
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("esg::access_log"))
            .app_data(flow_api.clone())
            .app_data(reporting_api.clone())
            .app_data(auto_release.clone())
            .service(health)
            .service(webhook_scope)
            .service(api_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}
