//! The escrow lifecycle.
//!
//! ```text
//!   HELD ──delivery confirmed──▶ PENDING_RELEASE ──hold elapsed / admin──▶ RELEASED
//!    │  ╲                          │       ╲
//!    │   ╲──admin override──▶ RELEASED      ╲──dispute──▶ DISPUTED ──resolve──▶ RELEASED | REFUNDED
//!    ├──dispute──▶ DISPUTED
//!    └──refund──▶ REFUNDED  (also from PENDING_RELEASE)
//! ```
//!
//! Every transition is a compare-and-set on the escrow's current status. Transitions that move money (release and
//! refund) hold the escrow's transition lock, call the external collaborator with no ledger transaction open, and only
//! commit the new status once that call has succeeded. A failed or timed-out call leaves the escrow untouched and the
//! request can simply be retried.
//!
//! When two requests race for the same transition, exactly one performs it. The loser receives
//! [`TransitionOutcome::AlreadyApplied`] and no second side effect is issued. A request for an escrow that was already
//! in a terminal state when the request arrived fails with [`EscrowError::InvalidStateError`].
use std::{fmt::Debug, future::Future, time::Duration};

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    db_types::{DeliveryUpdate, EscrowId, EscrowStatus, EscrowTransaction, Money, NewEscrow, ReleaseKind},
    escrow_api::{authorize, errors::EscrowError, policy::EscrowPolicy},
    escrow_objects::{
        ConfirmedOrder,
        DeliveryConfirmation,
        DisputeRequest,
        DisputeResolution,
        RefundRequest,
        ReleaseRequest,
        ResolutionOutcome,
    },
    events::{EscrowDisputedEvent, EscrowRefundedEvent, EscrowReleasedEvent, EventProducers},
    fees,
    locks::TransitionLocks,
    traits::{
        ActionAuthorizer,
        AutoReleaseFailure,
        AutoReleaseReport,
        CollaboratorError,
        EscrowLedger,
        PaymentGateway,
        Permission,
        SellerBalanceLedger,
        SettleOutcome,
        TransitionOutcome,
    },
};

/// The actor recorded on escrows released by the scheduler.
pub const AUTO_RELEASE_ACTOR: &str = "system:auto-release";
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_AUTO_RELEASE_BATCH_SIZE: i64 = 50;
/// Larger sweep requests are cut down to this many escrows.
pub const MAX_AUTO_RELEASE_BATCH_SIZE: i64 = 50;

/// `EscrowFlowApi` drives escrows through their lifecycle in response to order, delivery and dispute events, and to
/// administrator decisions.
pub struct EscrowFlowApi<B, G, L, A> {
    db: B,
    gateway: G,
    balances: L,
    authorizer: A,
    policy: EscrowPolicy,
    call_timeout: Duration,
    locks: TransitionLocks,
    producers: EventProducers,
}

impl<B: Debug, G, L, A> Debug for EscrowFlowApi<B, G, L, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EscrowFlowApi ({:?})", self.db)
    }
}

impl<B, G, L, A> EscrowFlowApi<B, G, L, A>
where
    B: EscrowLedger,
    G: PaymentGateway,
    L: SellerBalanceLedger,
    A: ActionAuthorizer,
{
    pub fn new(db: B, gateway: G, balances: L, authorizer: A, producers: EventProducers) -> Self {
        Self {
            db,
            gateway,
            balances,
            authorizer,
            policy: EscrowPolicy::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            locks: TransitionLocks::default(),
            producers,
        }
    }

    pub fn with_policy(mut self, policy: EscrowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the time allowed for each call to the payment gateway or seller balance ledger.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut B {
        &mut self.db
    }

    pub fn policy(&self) -> &EscrowPolicy {
        &self.policy
    }

    /// Creates one escrow per (seller, store) pair in a confirmed order, in a single atomic step.
    ///
    /// Each escrow's commission is computed with the rate in force for its store, and the rate and hold period are
    /// recorded on the row. Submitting the same order again returns the escrows created the first time.
    pub async fn create_escrows_for_order(&self, order: ConfirmedOrder) -> Result<Vec<EscrowTransaction>, EscrowError> {
        order.validate().map_err(EscrowError::ValidationError)?;
        let created_at = order.confirmed_at.unwrap_or_else(Utc::now);
        let mut new_escrows = Vec::new();
        for (seller_id, store_id, amount) in order.seller_totals() {
            let commission = self.policy.commission_for_store(&store_id);
            let split = fees::split(amount, commission)?;
            trace!(
                "🔒️ Order {} / {store_id}: {amount} splits into {} fee at {commission} and {} for {seller_id}",
                order.order_id,
                split.platform_fee,
                split.seller_amount
            );
            new_escrows.push(NewEscrow {
                order_id: order.order_id.clone(),
                payment_reference: order.payment_reference.clone(),
                seller_id,
                store_id,
                currency: order.currency.clone(),
                split,
                commission,
                hold_period_days: self.policy.hold_period_days,
                created_at,
            });
        }
        let (escrows, inserted) = self.db.insert_escrows(new_escrows).await?;
        if inserted {
            info!("🔒️ {} escrow(s) created for order {}", escrows.len(), order.order_id);
        } else {
            let existing: Money = escrows.iter().map(|e| e.total_amount).sum();
            if existing != order.subtotal {
                return Err(EscrowError::ValidationError(format!(
                    "Order {} already has escrows totalling {existing}, which does not match the subtotal of {}",
                    order.order_id, order.subtotal
                )));
            }
            info!("🔒️ Order {} already has {} escrow(s). Nothing to do.", order.order_id, escrows.len());
        }
        Ok(escrows)
    }

    /// Confirms delivery of an order, or of one store's part of it, and starts the hold period.
    ///
    /// Every targeted escrow must still be `HELD`. Either all of them move to `PENDING_RELEASE` or none do.
    pub async fn confirm_delivery(
        &self,
        confirmation: DeliveryConfirmation,
    ) -> Result<Vec<EscrowTransaction>, EscrowError> {
        let DeliveryConfirmation { order_id, store_id, confirmed_by, confirmed_at } = confirmation;
        if confirmed_by.trim().is_empty() {
            return Err(EscrowError::ValidationError("Delivery confirmations must say who confirmed them".into()));
        }
        let targets = self.targeted_escrows(&order_id, store_id.as_deref()).await?;
        if let Some(escrow) = targets.iter().find(|e| e.status != EscrowStatus::Held) {
            return Err(EscrowError::invalid_state(escrow, "confirm delivery for"));
        }
        let confirmed_at = confirmed_at.unwrap_or_else(Utc::now);
        let updates = targets
            .iter()
            .map(|e| DeliveryUpdate {
                id: e.id,
                confirmed_by: confirmed_by.clone(),
                confirmed_at,
                auto_release_at: confirmed_at + chrono::Duration::days(e.hold_period_days),
            })
            .collect();
        match self.db.confirm_delivery(updates).await? {
            Some(updated) => {
                info!("🔒️ Delivery of order {order_id} confirmed by {confirmed_by}. {} escrow(s) pending release", updated.len());
                Ok(updated)
            },
            None => {
                // Another request moved at least one of the escrows after we read them
                let latest = self.targeted_escrows(&order_id, store_id.as_deref()).await?;
                match latest.iter().find(|e| e.status != EscrowStatus::Held) {
                    Some(escrow) => Err(EscrowError::invalid_state(escrow, "confirm delivery for")),
                    None => Err(EscrowError::DatabaseError(format!("Delivery confirmation for {order_id} was not applied"))),
                }
            },
        }
    }

    /// Releases an escrow to its seller on an administrator's instruction.
    ///
    /// Escrows awaiting the end of their hold period can be released with the `Release` permission. Releasing an
    /// escrow whose delivery was never confirmed requires `allow_undelivered` and the `ReleaseUndelivered` permission,
    /// and is logged as an override. Disputed escrows can only be released through [`Self::resolve_dispute`].
    pub async fn release_escrow(&self, request: ReleaseRequest) -> Result<TransitionOutcome, EscrowError> {
        let ReleaseRequest { id, actor_id, allow_undelivered } = request;
        let (permission, kind) = if allow_undelivered {
            (Permission::ReleaseUndelivered, ReleaseKind::Override)
        } else {
            (Permission::Release, ReleaseKind::Manual)
        };
        authorize(&self.authorizer, &actor_id, permission).await?;
        let escrow = self.fetch_existing(id).await?;
        self.release(escrow, &actor_id, kind).await
    }

    /// Refunds the full escrowed amount to the buyer. A non-empty reason is required.
    pub async fn refund_escrow(&self, request: RefundRequest) -> Result<TransitionOutcome, EscrowError> {
        let RefundRequest { id, actor_id, reason } = request;
        let reason = non_empty_reason(&reason, "Refunds")?;
        authorize(&self.authorizer, &actor_id, Permission::Refund).await?;
        let escrow = self.fetch_existing(id).await?;
        if !matches!(escrow.status, EscrowStatus::Held | EscrowStatus::PendingRelease) {
            return Err(EscrowError::invalid_state(&escrow, "refund"));
        }
        self.refund(escrow, &actor_id, reason).await
    }

    /// Suspends an escrow pending an administrator's decision. Raising a dispute on an escrow that is already disputed
    /// has no further effect.
    pub async fn raise_dispute(&self, request: DisputeRequest) -> Result<TransitionOutcome, EscrowError> {
        let DisputeRequest { id, raised_by, reason } = request;
        let reason = non_empty_reason(&reason, "Disputes")?;
        if raised_by.trim().is_empty() {
            return Err(EscrowError::ValidationError("Disputes must say who raised them".into()));
        }
        let escrow = self.fetch_existing(id).await?;
        match escrow.status {
            EscrowStatus::Disputed => {
                debug!("🔒️ Escrow {id} is already disputed. Ignoring the new dispute from {raised_by}");
                return Ok(TransitionOutcome::AlreadyApplied(escrow));
            },
            EscrowStatus::Released | EscrowStatus::Refunded => {
                return Err(EscrowError::invalid_state(&escrow, "dispute"));
            },
            EscrowStatus::Held | EscrowStatus::PendingRelease => {},
        }
        let _guard = self.locks.acquire(id).await;
        match self.db.mark_disputed(id, escrow.status, &raised_by, reason, Utc::now()).await? {
            Some(disputed) => {
                info!("🔒️ Escrow {id} for order {} disputed by {raised_by}: {reason}", disputed.order_id);
                self.producers.publish_disputed(EscrowDisputedEvent::new(disputed.clone())).await;
                Ok(TransitionOutcome::Applied(disputed))
            },
            None => self.after_lost_race(id, EscrowStatus::Disputed, "dispute").await,
        }
    }

    /// Settles a disputed escrow in favour of the seller (release) or the buyer (refund).
    pub async fn resolve_dispute(&self, resolution: DisputeResolution) -> Result<TransitionOutcome, EscrowError> {
        let DisputeResolution { id, actor_id, outcome } = resolution;
        if let ResolutionOutcome::Refund { reason } = &outcome {
            non_empty_reason(reason, "Refunds")?;
        }
        authorize(&self.authorizer, &actor_id, Permission::ResolveDispute).await?;
        let escrow = self.fetch_existing(id).await?;
        if escrow.status != EscrowStatus::Disputed {
            return Err(EscrowError::invalid_state(&escrow, "resolve a dispute on"));
        }
        info!("🔒️ {actor_id} is resolving the dispute on escrow {id}");
        match outcome {
            ResolutionOutcome::Release => self.release(escrow, &actor_id, ReleaseKind::DisputeResolution).await,
            ResolutionOutcome::Refund { reason } => self.refund(escrow, &actor_id, reason.trim()).await,
        }
    }

    /// Releases up to `batch_size` escrows whose hold period ended at or before `now`. `batch_size` must be positive
    /// and is capped at [`MAX_AUTO_RELEASE_BATCH_SIZE`].
    ///
    /// Each escrow is released independently. A failure is logged, counted against the escrow and reported, and the
    /// sweep carries on with the next escrow. Escrows that failed are still due, but later sweeps try escrows with
    /// fewer failures first, so one seller whose credits keep failing cannot hold up everyone else's releases.
    pub async fn release_due_escrows(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<AutoReleaseReport, EscrowError> {
        let batch_size = checked_batch_size(batch_size)?;
        let due = self.db.fetch_due_for_release(now, batch_size).await?;
        let mut report = AutoReleaseReport::default();
        for escrow in due {
            report.processed += 1;
            let id = escrow.id;
            match self.release(escrow, AUTO_RELEASE_ACTOR, ReleaseKind::Automatic).await {
                Ok(outcome) => {
                    report.successful += 1;
                    trace!("🕰️ Escrow {id} auto-released (applied by this sweep: {})", outcome.was_applied());
                },
                Err(e) => {
                    error!("🕰️ Automatic release of escrow {id} failed: {e}");
                    self.record_failure(id, &e).await;
                    report.failed += 1;
                    report.failures.push(AutoReleaseFailure { escrow_id: id, error: e.to_string() });
                },
            }
        }
        if report.processed > 0 {
            info!(
                "🕰️ Auto-release sweep processed {} escrow(s): {} released, {} failed",
                report.processed, report.successful, report.failed
            );
        }
        Ok(report)
    }

    /// Runs one auto-release sweep on an administrator's request. The batch is checked and capped as for
    /// [`Self::release_due_escrows`].
    pub async fn trigger_auto_release(
        &self,
        actor_id: &str,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<AutoReleaseReport, EscrowError> {
        authorize(&self.authorizer, actor_id, Permission::RunAutoRelease).await?;
        info!("🕰️ Auto-release sweep triggered by {actor_id}");
        self.release_due_escrows(now, batch_size).await
    }

    async fn record_failure(&self, id: EscrowId, error: &EscrowError) {
        match self.db.record_auto_release_failure(id, &error.to_string(), Utc::now()).await {
            Ok(true) => trace!("🕰️ Failed auto-release of escrow {id} recorded"),
            Ok(false) => debug!("🕰️ Escrow {id} is no longer pending release. No failure recorded"),
            Err(e) => warn!("🕰️ Could not record the failed auto-release of escrow {id}. {e}"),
        }
    }

    async fn release(
        &self,
        escrow: EscrowTransaction,
        actor_id: &str,
        kind: ReleaseKind,
    ) -> Result<TransitionOutcome, EscrowError> {
        let allowed = matches!(
            (escrow.status, kind),
            (EscrowStatus::PendingRelease, ReleaseKind::Manual | ReleaseKind::Override | ReleaseKind::Automatic) |
                (EscrowStatus::Held, ReleaseKind::Override) |
                (EscrowStatus::Disputed, ReleaseKind::DisputeResolution)
        );
        if !allowed {
            return Err(EscrowError::invalid_state(&escrow, "release"));
        }
        if escrow.status == EscrowStatus::Held {
            warn!(
                "🔒️ {actor_id} is releasing escrow {} for order {} to seller {} without a delivery confirmation",
                escrow.id, escrow.order_id, escrow.seller_id
            );
        }
        let _guard = self.locks.acquire(escrow.id).await;
        let reference = escrow.credit_reference();
        let credit = self.with_timeout(self.balances.credit(
            &escrow.seller_id,
            escrow.seller_amount,
            &escrow.currency,
            &reference,
        ));
        let outcome = self.db.settle_release(escrow.id, escrow.status, actor_id, kind, Utc::now(), credit).await?;
        match outcome {
            SettleOutcome::Committed(released) => {
                info!(
                    "🔒️ Escrow {} released ({kind}) by {actor_id}. {} {} credited to seller {}",
                    released.id, released.seller_amount, released.currency, released.seller_id
                );
                self.producers.publish_released(EscrowReleasedEvent::new(released.clone(), kind)).await;
                Ok(TransitionOutcome::Applied(released))
            },
            SettleOutcome::StatusChanged => self.after_lost_race(escrow.id, EscrowStatus::Released, "release").await,
            SettleOutcome::EffectFailed(e) => {
                warn!("🔒️ Could not credit seller {} for escrow {}. The escrow is unchanged. {e}", escrow.seller_id, escrow.id);
                Err(EscrowError::ExternalDependencyError(format!(
                    "Crediting seller {} for escrow {} failed. {e}",
                    escrow.seller_id, escrow.id
                )))
            },
        }
    }

    async fn refund(
        &self,
        escrow: EscrowTransaction,
        actor_id: &str,
        reason: &str,
    ) -> Result<TransitionOutcome, EscrowError> {
        let _guard = self.locks.acquire(escrow.id).await;
        let refund =
            self.with_timeout(self.gateway.refund(&escrow.payment_reference, escrow.total_amount, &escrow.currency));
        let outcome = self.db.settle_refund(escrow.id, escrow.status, actor_id, reason, Utc::now(), refund).await?;
        match outcome {
            SettleOutcome::Committed(refunded) => {
                info!(
                    "🔒️ Escrow {} refunded by {actor_id}. {} {} returned against payment {}. Reason: {reason}",
                    refunded.id, refunded.total_amount, refunded.currency, refunded.payment_reference
                );
                self.producers.publish_refunded(EscrowRefundedEvent::new(refunded.clone())).await;
                Ok(TransitionOutcome::Applied(refunded))
            },
            SettleOutcome::StatusChanged => self.after_lost_race(escrow.id, EscrowStatus::Refunded, "refund").await,
            SettleOutcome::EffectFailed(e) => {
                warn!("🔒️ Could not refund payment {} for escrow {}. The escrow is unchanged. {e}", escrow.payment_reference, escrow.id);
                Err(EscrowError::ExternalDependencyError(format!(
                    "Refunding payment {} for escrow {} failed. {e}",
                    escrow.payment_reference, escrow.id
                )))
            },
        }
    }

    /// Called when a compare-and-set found the status changed underneath us. If the concurrent request made the same
    /// transition, ours is reported as already applied.
    async fn after_lost_race(
        &self,
        id: EscrowId,
        target: EscrowStatus,
        action: &'static str,
    ) -> Result<TransitionOutcome, EscrowError> {
        let latest = self.fetch_existing(id).await?;
        if latest.status == target {
            debug!("🔒️ Escrow {id} was moved to {target} by a concurrent request");
            Ok(TransitionOutcome::AlreadyApplied(latest))
        } else {
            Err(EscrowError::invalid_state(&latest, action))
        }
    }

    async fn with_timeout<F>(&self, call: F) -> Result<(), CollaboratorError>
    where F: Future<Output = Result<(), CollaboratorError>> {
        tokio::time::timeout(self.call_timeout, call).await.unwrap_or(Err(CollaboratorError::Timeout(self.call_timeout)))
    }

    async fn fetch_existing(&self, id: EscrowId) -> Result<EscrowTransaction, EscrowError> {
        self.db.fetch_escrow(id).await?.ok_or_else(|| EscrowError::NotFound(format!("Escrow {id}")))
    }

    async fn targeted_escrows(
        &self,
        order_id: &str,
        store_id: Option<&str>,
    ) -> Result<Vec<EscrowTransaction>, EscrowError> {
        let escrows: Vec<_> = self
            .db
            .fetch_escrows_for_order(order_id)
            .await?
            .into_iter()
            .filter(|e| store_id.map(|s| e.store_id == s).unwrap_or(true))
            .collect();
        if escrows.is_empty() {
            let target = match store_id {
                Some(s) => format!("Escrow for order {order_id} and store {s}"),
                None => format!("Escrow for order {order_id}"),
            };
            return Err(EscrowError::NotFound(target));
        }
        Ok(escrows)
    }
}

fn checked_batch_size(batch_size: i64) -> Result<i64, EscrowError> {
    if batch_size <= 0 {
        return Err(EscrowError::ValidationError(format!("Batch size must be positive, not {batch_size}")));
    }
    if batch_size > MAX_AUTO_RELEASE_BATCH_SIZE {
        debug!("🕰️ Batch size {batch_size} is larger than {MAX_AUTO_RELEASE_BATCH_SIZE}. Using the maximum instead.");
    }
    Ok(batch_size.min(MAX_AUTO_RELEASE_BATCH_SIZE))
}

fn non_empty_reason<'a>(reason: &'a str, what: &str) -> Result<&'a str, EscrowError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(EscrowError::ValidationError(format!("{what} require a reason")));
    }
    Ok(reason)
}
