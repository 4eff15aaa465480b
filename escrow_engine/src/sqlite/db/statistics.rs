use escrow_common::Money;
use log::trace;
use sqlx::{FromRow, QueryBuilder, SqliteConnection};

use crate::{
    db_types::EscrowStatus,
    traits::{EscrowStatistics, StatusBucket},
};

#[derive(Debug, FromRow)]
struct StatusTotals {
    status: EscrowStatus,
    count: i64,
    total_amount: Money,
    seller_amount: Money,
    platform_fee: Money,
}

/// Counts and sums every status bucket with one statement, so the buckets always describe the same snapshot.
pub async fn fetch_statistics(
    seller_id: Option<String>,
    conn: &mut SqliteConnection,
) -> Result<EscrowStatistics, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        r#"
        SELECT
            status,
            COUNT(*) AS count,
            COALESCE(SUM(total_amount), 0) AS total_amount,
            COALESCE(SUM(seller_amount), 0) AS seller_amount,
            COALESCE(SUM(platform_fee), 0) AS platform_fee
        FROM escrow_transactions
        "#,
    );
    if let Some(seller_id) = seller_id {
        builder.push(" WHERE seller_id = ");
        builder.push_bind(seller_id);
    }
    builder.push(" GROUP BY status");
    trace!("🗃️ Executing query: {}", builder.sql());
    let rows = builder.build_query_as::<StatusTotals>().fetch_all(conn).await?;
    let stats = rows.into_iter().fold(EscrowStatistics::default(), |mut stats, row| {
        *stats.bucket_mut(row.status) = StatusBucket {
            count: row.count,
            total_amount: row.total_amount,
            seller_amount: row.seller_amount,
            platform_fee: row.platform_fee,
        };
        stats
    });
    Ok(stats)
}
