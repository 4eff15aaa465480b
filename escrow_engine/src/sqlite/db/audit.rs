use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::db_types::{AuditAction, AuditEntry, EscrowId, EscrowStatus};

/// A state change about to be written to the audit log.
#[derive(Debug, Clone)]
pub struct AuditRecord<'a> {
    pub escrow_id: EscrowId,
    pub action: AuditAction,
    pub actor: &'a str,
    pub from_status: Option<EscrowStatus>,
    pub to_status: EscrowStatus,
    pub note: Option<&'a str>,
    pub at: DateTime<Utc>,
}

/// Appends an entry to the audit log. Call this inside the same transaction as the state change it records.
pub async fn append(record: AuditRecord<'_>, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    trace!("🗃️ Audit: escrow {} {:?} by {}", record.escrow_id, record.action, record.actor);
    sqlx::query(
        r#"
            INSERT INTO escrow_audit_log (escrow_id, action, actor, from_status, to_status, note, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(record.escrow_id)
    .bind(record.action)
    .bind(record.actor)
    .bind(record.from_status)
    .bind(record.to_status)
    .bind(record.note)
    .bind(record.at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_for_escrow(id: EscrowId, conn: &mut SqliteConnection) -> Result<Vec<AuditEntry>, sqlx::Error> {
    let entries = sqlx::query_as("SELECT * FROM escrow_audit_log WHERE escrow_id = $1 ORDER BY id ASC")
        .bind(id)
        .fetch_all(conn)
        .await?;
    Ok(entries)
}
