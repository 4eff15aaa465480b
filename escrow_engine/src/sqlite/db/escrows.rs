use chrono::{DateTime, Utc};
use log::trace;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db_types::{DeliveryUpdate, EscrowId, EscrowStatus, EscrowTransaction, NewEscrow},
    escrow_objects::{EscrowQueryFilter, Pagination},
};

/// Inserts a new escrow row in the `HELD` state. This is not atomic. Embed the call in a transaction and pass
/// `&mut *tx` as the connection when inserting several rows that belong together.
pub async fn insert_escrow(escrow: &NewEscrow, conn: &mut SqliteConnection) -> Result<EscrowTransaction, sqlx::Error> {
    let row = sqlx::query_as(
        r#"
            INSERT INTO escrow_transactions (
                order_id,
                payment_reference,
                seller_id,
                store_id,
                currency,
                total_amount,
                platform_fee,
                seller_amount,
                commission_rate_bps,
                hold_period_days,
                status,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'HELD', $11, $11)
            RETURNING *;
        "#,
    )
    .bind(&escrow.order_id)
    .bind(&escrow.payment_reference)
    .bind(&escrow.seller_id)
    .bind(&escrow.store_id)
    .bind(&escrow.currency)
    .bind(escrow.split.total_amount)
    .bind(escrow.split.platform_fee)
    .bind(escrow.split.seller_amount)
    .bind(i64::from(escrow.commission.bps()))
    .bind(i64::from(escrow.hold_period_days))
    .bind(escrow.created_at)
    .fetch_one(conn)
    .await?;
    Ok(row)
}

pub async fn fetch_escrow(id: EscrowId, conn: &mut SqliteConnection) -> Result<Option<EscrowTransaction>, sqlx::Error> {
    let escrow =
        sqlx::query_as("SELECT * FROM escrow_transactions WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(escrow)
}

pub async fn fetch_escrows_for_order(
    order_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<EscrowTransaction>, sqlx::Error> {
    let escrows = sqlx::query_as("SELECT * FROM escrow_transactions WHERE order_id = $1 ORDER BY id ASC")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(escrows)
}

/// Moves a `HELD` escrow to `PENDING_RELEASE`. Returns `None` if the escrow was not `HELD`.
pub async fn mark_delivery_confirmed(
    update: &DeliveryUpdate,
    conn: &mut SqliteConnection,
) -> Result<Option<EscrowTransaction>, sqlx::Error> {
    let escrow = sqlx::query_as(
        r#"
            UPDATE escrow_transactions SET
                status = 'PENDING_RELEASE',
                delivery_confirmed = 1,
                delivery_confirmed_at = $1,
                delivery_confirmed_by = $2,
                auto_release_at = $3,
                updated_at = $1
            WHERE id = $4 AND status = 'HELD'
            RETURNING *;
        "#,
    )
    .bind(update.confirmed_at)
    .bind(&update.confirmed_by)
    .bind(update.auto_release_at)
    .bind(update.id)
    .fetch_optional(conn)
    .await?;
    Ok(escrow)
}

/// Compare-and-set to `RELEASED`. Returns `None` if the status was not `expected`.
pub async fn mark_released(
    id: EscrowId,
    expected: EscrowStatus,
    released_by: &str,
    released_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<EscrowTransaction>, sqlx::Error> {
    let escrow = sqlx::query_as(
        r#"
            UPDATE escrow_transactions SET
                status = 'RELEASED',
                released_at = $1,
                released_by = $2,
                updated_at = $1
            WHERE id = $3 AND status = $4
            RETURNING *;
        "#,
    )
    .bind(released_at)
    .bind(released_by)
    .bind(id)
    .bind(expected)
    .fetch_optional(conn)
    .await?;
    Ok(escrow)
}

/// Compare-and-set to `REFUNDED`. Returns `None` if the status was not `expected`.
pub async fn mark_refunded(
    id: EscrowId,
    expected: EscrowStatus,
    refunded_by: &str,
    reason: &str,
    refunded_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<EscrowTransaction>, sqlx::Error> {
    let escrow = sqlx::query_as(
        r#"
            UPDATE escrow_transactions SET
                status = 'REFUNDED',
                refunded_at = $1,
                refunded_by = $2,
                refund_reason = $3,
                updated_at = $1
            WHERE id = $4 AND status = $5
            RETURNING *;
        "#,
    )
    .bind(refunded_at)
    .bind(refunded_by)
    .bind(reason)
    .bind(id)
    .bind(expected)
    .fetch_optional(conn)
    .await?;
    Ok(escrow)
}

/// Compare-and-set to `DISPUTED`. Returns `None` if the status was not `expected`.
pub async fn mark_disputed(
    id: EscrowId,
    expected: EscrowStatus,
    reason: &str,
    disputed_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<EscrowTransaction>, sqlx::Error> {
    let escrow = sqlx::query_as(
        r#"
            UPDATE escrow_transactions SET
                status = 'DISPUTED',
                disputed_at = $1,
                dispute_reason = $2,
                updated_at = $1
            WHERE id = $3 AND status = $4
            RETURNING *;
        "#,
    )
    .bind(disputed_at)
    .bind(reason)
    .bind(id)
    .bind(expected)
    .fetch_optional(conn)
    .await?;
    Ok(escrow)
}

/// Fetches `PENDING_RELEASE` escrows whose auto-release time has been reached.
///
/// Escrows with the fewest failed automatic releases come first, then the oldest. Escrows that keep failing therefore
/// never crowd the rest out of a batch.
pub async fn fetch_due_for_release(
    now: DateTime<Utc>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<EscrowTransaction>, sqlx::Error> {
    let escrows = sqlx::query_as(
        r#"
            SELECT * FROM escrow_transactions
            WHERE status = 'PENDING_RELEASE'
              AND auto_release_at IS NOT NULL
              AND julianday(auto_release_at) <= julianday($1)
            ORDER BY auto_release_attempts ASC, julianday(auto_release_at) ASC, id ASC
            LIMIT $2
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(escrows)
}

/// Counts a failed automatic release against a `PENDING_RELEASE` escrow. Returns `false` if the escrow has left that
/// state in the meantime.
pub async fn record_auto_release_failure(
    id: EscrowId,
    error: &str,
    failed_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
            UPDATE escrow_transactions SET
                auto_release_attempts = auto_release_attempts + 1,
                last_auto_release_error = $1,
                updated_at = $2
            WHERE id = $3 AND status = 'PENDING_RELEASE'
        "#,
    )
    .bind(error)
    .bind(failed_at)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Fetches one page of escrows matching `filter`, newest first, along with the total number of matches.
///
/// Run this inside a transaction if the page and the total must agree with each other.
pub async fn search_escrows(
    filter: &EscrowQueryFilter,
    pagination: Pagination,
    conn: &mut SqliteConnection,
) -> Result<(Vec<EscrowTransaction>, i64), sqlx::Error> {
    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM escrow_transactions");
    push_filters(&mut count, filter);
    let total: i64 = count.build_query_scalar().fetch_one(&mut *conn).await?;

    let mut builder = QueryBuilder::new("SELECT * FROM escrow_transactions");
    push_filters(&mut builder, filter);
    builder.push(" ORDER BY julianday(created_at) DESC, id DESC LIMIT ");
    builder.push_bind(i64::from(pagination.limit()));
    builder.push(" OFFSET ");
    builder.push_bind(pagination.offset());
    trace!("🗃️ Executing query: {}", builder.sql());
    let escrows = builder.build_query_as::<EscrowTransaction>().fetch_all(conn).await?;
    trace!("🗃️ Result of search_escrows: {} of {total}", escrows.len());
    Ok((escrows, total))
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &EscrowQueryFilter) {
    if filter.is_empty() {
        return;
    }
    builder.push(" WHERE ");
    let mut where_clause = builder.separated(" AND ");
    if !filter.status.is_empty() {
        // Statuses come from a closed enum, so they can be inlined safely
        let statuses = filter.status.iter().map(|s| format!("'{}'", s.as_str())).collect::<Vec<_>>().join(",");
        where_clause.push(format!("status IN ({statuses})"));
    }
    if let Some(seller_id) = &filter.seller_id {
        where_clause.push("seller_id = ");
        where_clause.push_bind_unseparated(seller_id.clone());
    }
    if let Some(store_id) = &filter.store_id {
        where_clause.push("store_id = ");
        where_clause.push_bind_unseparated(store_id.clone());
    }
    if let Some(order_id) = &filter.order_id {
        where_clause.push("order_id = ");
        where_clause.push_bind_unseparated(order_id.clone());
    }
    if let Some(since) = filter.since {
        where_clause.push("julianday(created_at) >= julianday(");
        where_clause.push_bind_unseparated(since);
        where_clause.push_unseparated(")");
    }
    if let Some(until) = filter.until {
        where_clause.push("julianday(created_at) <= julianday(");
        where_clause.push_bind_unseparated(until);
        where_clause.push_unseparated(")");
    }
}
