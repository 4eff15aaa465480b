//! Request handler definitions
//!
//! Define each route and its handler here. Handlers only translate between HTTP and the engine APIs. Any decision
//! about escrows, including whether the caller may make it, belongs in the engine.
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Release and refund handlers wait on the payment gateway and the
//! seller balance ledger, so everything here must stay async.
use actix_web::{get, web, HttpResponse, Responder, Scope};
use chrono::Utc;
use escrow_engine::{
    db_types::EscrowId,
    escrow_objects::{
        ConfirmedOrder,
        DeliveryConfirmation,
        DisputeRequest,
        DisputeResolution,
        RefundRequest,
        ReleaseRequest,
        ResolutionOutcome,
    },
    ActionAuthorizer,
    EscrowFlowApi,
    EscrowLedger,
    LedgerQueries,
    PaymentGateway,
    ReportingApi,
    SellerBalanceLedger,
};
use log::*;

use crate::{
    auth::ActorId,
    config::AutoReleaseConfig,
    data_objects::{AutoReleaseParams, RefundParams, SearchParams, TransitionResponse},
    errors::ServerError,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

/// Adds the webhook routes to `scope`. The caller is responsible for wrapping the scope in signature checks.
pub fn webhook_routes<B, G, L, A>(scope: Scope) -> Scope
where
    B: EscrowLedger + 'static,
    G: PaymentGateway + 'static,
    L: SellerBalanceLedger + 'static,
    A: ActionAuthorizer + 'static,
{
    scope
        .service(OrderConfirmedRoute::<B, G, L, A>::new())
        .service(DeliveryConfirmedRoute::<B, G, L, A>::new())
        .service(DisputeRaisedRoute::<B, G, L, A>::new())
}

/// Adds the read-only ledger routes to `scope`. Fixed paths are registered before the `{id}` paths they overlap with.
pub fn reporting_routes<B, A>(scope: Scope) -> Scope
where
    B: LedgerQueries + 'static,
    A: ActionAuthorizer + 'static,
{
    scope
        .service(EscrowSearchRoute::<B, A>::new())
        .service(EscrowStatsRoute::<B, A>::new())
        .service(EscrowsForOrderRoute::<B, A>::new())
        .service(EscrowByIdRoute::<B, A>::new())
        .service(EscrowAuditLogRoute::<B, A>::new())
        .service(SellerSummaryRoute::<B, A>::new())
}

/// Adds the routes through which administrators move money to `scope`.
pub fn admin_routes<B, G, L, A>(scope: Scope) -> Scope
where
    B: EscrowLedger + 'static,
    G: PaymentGateway + 'static,
    L: SellerBalanceLedger + 'static,
    A: ActionAuthorizer + 'static,
{
    scope
        .service(TriggerAutoReleaseRoute::<B, G, L, A>::new())
        .service(ReleaseEscrowRoute::<B, G, L, A>::new())
        .service(ReleaseUndeliveredRoute::<B, G, L, A>::new())
        .service(RefundEscrowRoute::<B, G, L, A>::new())
        .service(ResolveDisputeRoute::<B, G, L, A>::new())
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Webhooks  ----------------------------------------------------
route!(order_confirmed => Post "/order_confirmed" impl EscrowLedger, PaymentGateway, SellerBalanceLedger, ActionAuthorizer);
/// The checkout calls this once payment for an order has been captured. One escrow is created for each seller and
/// store in the order. Calling it again for the same order returns the escrows that already exist.
pub async fn order_confirmed<B, G, L, A>(
    body: web::Json<ConfirmedOrder>,
    api: web::Data<EscrowFlowApi<B, G, L, A>>,
) -> Result<HttpResponse, ServerError>
where
    B: EscrowLedger,
    G: PaymentGateway,
    L: SellerBalanceLedger,
    A: ActionAuthorizer,
{
    let order = body.into_inner();
    debug!("💻️ Order {} confirmed with {} line item(s)", order.order_id, order.items.len());
    let escrows = api.create_escrows_for_order(order).await?;
    Ok(HttpResponse::Ok().json(escrows))
}

route!(delivery_confirmed => Post "/delivery_confirmed" impl EscrowLedger, PaymentGateway, SellerBalanceLedger, ActionAuthorizer);
pub async fn delivery_confirmed<B, G, L, A>(
    body: web::Json<DeliveryConfirmation>,
    api: web::Data<EscrowFlowApi<B, G, L, A>>,
) -> Result<HttpResponse, ServerError>
where
    B: EscrowLedger,
    G: PaymentGateway,
    L: SellerBalanceLedger,
    A: ActionAuthorizer,
{
    let confirmation = body.into_inner();
    debug!("💻️ Delivery confirmed for order {} by {}", confirmation.order_id, confirmation.confirmed_by);
    let escrows = api.confirm_delivery(confirmation).await?;
    Ok(HttpResponse::Ok().json(escrows))
}

route!(dispute_raised => Post "/dispute_raised" impl EscrowLedger, PaymentGateway, SellerBalanceLedger, ActionAuthorizer);
pub async fn dispute_raised<B, G, L, A>(
    body: web::Json<DisputeRequest>,
    api: web::Data<EscrowFlowApi<B, G, L, A>>,
) -> Result<HttpResponse, ServerError>
where
    B: EscrowLedger,
    G: PaymentGateway,
    L: SellerBalanceLedger,
    A: ActionAuthorizer,
{
    let request = body.into_inner();
    debug!("💻️ Dispute raised on escrow {} by {}", request.id, request.raised_by);
    let outcome = api.raise_dispute(request).await?;
    Ok(HttpResponse::Ok().json(TransitionResponse::from(outcome)))
}

//----------------------------------------------   Reporting  ----------------------------------------------------
route!(escrow_search => Get "/escrows" impl LedgerQueries, ActionAuthorizer);
/// Search escrows. All query parameters are optional:
/// * `status`: a comma-separated list of statuses, e.g. `HELD,DISPUTED`
/// * `seller_id`, `store_id`, `order_id`: exact matches
/// * `since`, `until`: RFC 3339 bounds on the creation time
/// * `page` (one-based) and `limit` (at most 100)
pub async fn escrow_search<B, A>(
    actor: ActorId,
    query: web::Query<SearchParams>,
    api: web::Data<ReportingApi<B, A>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerQueries,
    A: ActionAuthorizer,
{
    let (filter, pagination) = query.into_inner().into_query()?;
    debug!("💻️ GET escrow search for {actor}");
    let page = api.search(actor.as_str(), filter, pagination).await?;
    Ok(HttpResponse::Ok().json(page))
}

route!(escrow_stats => Get "/escrows/stats" impl LedgerQueries, ActionAuthorizer);
pub async fn escrow_stats<B, A>(actor: ActorId, api: web::Data<ReportingApi<B, A>>) -> Result<HttpResponse, ServerError>
where
    B: LedgerQueries,
    A: ActionAuthorizer,
{
    debug!("💻️ GET escrow statistics for {actor}");
    let stats = api.statistics(actor.as_str()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "statistics": stats,
        "platform_revenue": stats.platform_revenue(),
        "total_in_escrow": stats.total_in_escrow(),
    })))
}

route!(escrows_for_order => Get "/escrows/order/{order_id}" impl LedgerQueries, ActionAuthorizer);
pub async fn escrows_for_order<B, A>(
    actor: ActorId,
    path: web::Path<String>,
    api: web::Data<ReportingApi<B, A>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerQueries,
    A: ActionAuthorizer,
{
    let order_id = path.into_inner();
    debug!("💻️ GET escrows for order {order_id}");
    let escrows = api.escrows_for_order(actor.as_str(), &order_id).await?;
    Ok(HttpResponse::Ok().json(escrows))
}

route!(escrow_by_id => Get "/escrows/{id}" impl LedgerQueries, ActionAuthorizer);
pub async fn escrow_by_id<B, A>(
    actor: ActorId,
    path: web::Path<EscrowId>,
    api: web::Data<ReportingApi<B, A>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerQueries,
    A: ActionAuthorizer,
{
    let id = path.into_inner();
    debug!("💻️ GET escrow {id}");
    let escrow = api.escrow(actor.as_str(), id).await?;
    Ok(HttpResponse::Ok().json(escrow))
}

route!(escrow_audit_log => Get "/escrows/{id}/audit" impl LedgerQueries, ActionAuthorizer);
pub async fn escrow_audit_log<B, A>(
    actor: ActorId,
    path: web::Path<EscrowId>,
    api: web::Data<ReportingApi<B, A>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerQueries,
    A: ActionAuthorizer,
{
    let id = path.into_inner();
    debug!("💻️ GET audit log for escrow {id}");
    let entries = api.audit_log(actor.as_str(), id).await?;
    Ok(HttpResponse::Ok().json(entries))
}

route!(seller_summary => Get "/sellers/{seller_id}/escrow_summary" impl LedgerQueries, ActionAuthorizer);
/// Sellers may always fetch their own summary. Everyone else needs permission to view the ledger.
pub async fn seller_summary<B, A>(
    actor: ActorId,
    path: web::Path<String>,
    api: web::Data<ReportingApi<B, A>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerQueries,
    A: ActionAuthorizer,
{
    let seller_id = path.into_inner();
    debug!("💻️ GET escrow summary for seller {seller_id}");
    let summary = api.seller_summary(actor.as_str(), &seller_id).await?;
    Ok(HttpResponse::Ok().json(summary))
}

//----------------------------------------------   Admin  ----------------------------------------------------
route!(release_escrow => Post "/escrows/{id}/release" impl EscrowLedger, PaymentGateway, SellerBalanceLedger, ActionAuthorizer);
pub async fn release_escrow<B, G, L, A>(
    actor: ActorId,
    path: web::Path<EscrowId>,
    api: web::Data<EscrowFlowApi<B, G, L, A>>,
) -> Result<HttpResponse, ServerError>
where
    B: EscrowLedger,
    G: PaymentGateway,
    L: SellerBalanceLedger,
    A: ActionAuthorizer,
{
    let id = path.into_inner();
    info!("💻️ {actor} requested release of escrow {id}");
    let outcome = api.release_escrow(ReleaseRequest::new(id, actor.0)).await?;
    Ok(HttpResponse::Ok().json(TransitionResponse::from(outcome)))
}

route!(release_undelivered => Post "/escrows/{id}/release_undelivered" impl EscrowLedger, PaymentGateway, SellerBalanceLedger, ActionAuthorizer);
/// Releases an escrow whose delivery was never confirmed. This needs a more privileged role than a normal release.
pub async fn release_undelivered<B, G, L, A>(
    actor: ActorId,
    path: web::Path<EscrowId>,
    api: web::Data<EscrowFlowApi<B, G, L, A>>,
) -> Result<HttpResponse, ServerError>
where
    B: EscrowLedger,
    G: PaymentGateway,
    L: SellerBalanceLedger,
    A: ActionAuthorizer,
{
    let id = path.into_inner();
    warn!("💻️ {actor} requested release of undelivered escrow {id}");
    let outcome = api.release_escrow(ReleaseRequest::undelivered(id, actor.0)).await?;
    Ok(HttpResponse::Ok().json(TransitionResponse::from(outcome)))
}

route!(refund_escrow => Post "/escrows/{id}/refund" impl EscrowLedger, PaymentGateway, SellerBalanceLedger, ActionAuthorizer);
pub async fn refund_escrow<B, G, L, A>(
    actor: ActorId,
    path: web::Path<EscrowId>,
    body: web::Json<RefundParams>,
    api: web::Data<EscrowFlowApi<B, G, L, A>>,
) -> Result<HttpResponse, ServerError>
where
    B: EscrowLedger,
    G: PaymentGateway,
    L: SellerBalanceLedger,
    A: ActionAuthorizer,
{
    let id = path.into_inner();
    let RefundParams { reason } = body.into_inner();
    info!("💻️ {actor} requested a refund of escrow {id}: {reason}");
    let outcome = api.refund_escrow(RefundRequest { id, actor_id: actor.0, reason }).await?;
    Ok(HttpResponse::Ok().json(TransitionResponse::from(outcome)))
}

route!(resolve_dispute => Post "/escrows/{id}/resolve" impl EscrowLedger, PaymentGateway, SellerBalanceLedger, ActionAuthorizer);
/// The body is `{"outcome": "release"}` to pay the seller, or `{"outcome": "refund", "reason": "..."}` to refund the
/// buyer.
pub async fn resolve_dispute<B, G, L, A>(
    actor: ActorId,
    path: web::Path<EscrowId>,
    body: web::Json<ResolutionOutcome>,
    api: web::Data<EscrowFlowApi<B, G, L, A>>,
) -> Result<HttpResponse, ServerError>
where
    B: EscrowLedger,
    G: PaymentGateway,
    L: SellerBalanceLedger,
    A: ActionAuthorizer,
{
    let id = path.into_inner();
    let outcome = body.into_inner();
    info!("💻️ {actor} is resolving the dispute on escrow {id}: {outcome:?}");
    let resolution = DisputeResolution { id, actor_id: actor.0, outcome };
    let outcome = api.resolve_dispute(resolution).await?;
    Ok(HttpResponse::Ok().json(TransitionResponse::from(outcome)))
}

route!(trigger_auto_release => Post "/escrows/auto_release" impl EscrowLedger, PaymentGateway, SellerBalanceLedger, ActionAuthorizer);
/// Runs one auto-release sweep now, rather than waiting for the worker. `batch_size` defaults to the configured value
/// and is capped by the engine.
pub async fn trigger_auto_release<B, G, L, A>(
    actor: ActorId,
    query: web::Query<AutoReleaseParams>,
    config: web::Data<AutoReleaseConfig>,
    api: web::Data<EscrowFlowApi<B, G, L, A>>,
) -> Result<HttpResponse, ServerError>
where
    B: EscrowLedger,
    G: PaymentGateway,
    L: SellerBalanceLedger,
    A: ActionAuthorizer,
{
    let batch_size = query.into_inner().batch_size.unwrap_or(config.batch_size);
    let report = api.trigger_auto_release(actor.as_str(), Utc::now(), batch_size).await?;
    Ok(HttpResponse::Ok().json(report))
}
