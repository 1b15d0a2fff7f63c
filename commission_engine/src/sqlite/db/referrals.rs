use chrono::{DateTime, Utc};
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{InvoiceId, NewReferralCommission, ReferralCommissionRecord, ReferralStatus},
    traits::CommissionDatabaseError,
};

pub async fn referral_by_invoice(
    invoice_id: &InvoiceId,
    conn: &mut SqliteConnection,
) -> Result<Option<ReferralCommissionRecord>, CommissionDatabaseError> {
    let referral = sqlx::query_as("SELECT * FROM referral_commissions WHERE invoice_id = $1")
        .bind(invoice_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(referral)
}

pub async fn referral_by_id(
    id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<ReferralCommissionRecord>, CommissionDatabaseError> {
    let referral = sqlx::query_as("SELECT * FROM referral_commissions WHERE id = $1")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(referral)
}

/// Registers a referral commission. Inserts are idempotent on the invoice id: if a record for the invoice already
/// exists, it is returned as-is along with `false`, and nothing is written.
pub async fn idempotent_insert(
    referral: NewReferralCommission,
    conn: &mut SqliteConnection,
) -> Result<(ReferralCommissionRecord, bool), CommissionDatabaseError> {
    match referral_by_invoice(&referral.invoice_id, &mut *conn).await? {
        Some(existing) => {
            debug!("🗃️ Invoice {} already carries referral {}. Not inserting a new record", existing.invoice_id, existing.id);
            Ok((existing, false))
        },
        None => {
            let record = insert_referral(referral, conn).await?;
            debug!(
                "🗃️ Referral {} registered: influencer {} earns {} {} on invoice {}",
                record.id, record.influencer_id, record.amount, record.currency, record.invoice_id
            );
            Ok((record, true))
        },
    }
}

async fn insert_referral(
    referral: NewReferralCommission,
    conn: &mut SqliteConnection,
) -> Result<ReferralCommissionRecord, CommissionDatabaseError> {
    let record = sqlx::query_as(
        r#"
            INSERT INTO referral_commissions (
                influencer_id,
                user_id,
                invoice_id,
                coupon_code,
                amount,
                currency,
                created_at,
                available_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *;
        "#,
    )
    .bind(referral.influencer_id)
    .bind(referral.user_id)
    .bind(referral.invoice_id.as_str())
    .bind(&referral.coupon_code)
    .bind(referral.amount.value())
    .bind(&referral.currency)
    .bind(referral.created_at)
    .bind(referral.available_at)
    .fetch_one(conn)
    .await?;
    Ok(record)
}

pub async fn referrals_created_in(
    influencer_id: i64,
    window: (DateTime<Utc>, DateTime<Utc>),
    conn: &mut SqliteConnection,
) -> Result<Vec<ReferralCommissionRecord>, CommissionDatabaseError> {
    let referrals = sqlx::query_as(
        "SELECT * FROM referral_commissions WHERE influencer_id = $1 AND created_at >= $2 AND created_at < $3 \
         ORDER BY created_at, id",
    )
    .bind(influencer_id)
    .bind(window.0)
    .bind(window.1)
    .fetch_all(conn)
    .await?;
    Ok(referrals)
}

/// Referrals in the window that can still be paid out. Cancelled records and records whose source invoice has been
/// refunded are dropped. The hold period is checked by the caller, who knows what "now" is.
pub async fn collectible_referrals(
    influencer_id: i64,
    window: (DateTime<Utc>, DateTime<Utc>),
    conn: &mut SqliteConnection,
) -> Result<Vec<ReferralCommissionRecord>, CommissionDatabaseError> {
    let referrals = sqlx::query_as(
        r#"
            SELECT r.*
            FROM referral_commissions r
            JOIN invoices i ON i.id = r.invoice_id
            WHERE r.influencer_id = $1
              AND r.created_at >= $2
              AND r.created_at < $3
              AND r.status != 'Cancelled'
              AND i.status != 'Refunded'
            ORDER BY r.created_at, r.id;
        "#,
    )
    .bind(influencer_id)
    .bind(window.0)
    .bind(window.1)
    .fetch_all(conn)
    .await?;
    Ok(referrals)
}

/// Users with a live referral in the window. These users are settled through the referral channel for the month and
/// must not appear in the usage computation as well.
pub async fn referral_locked_user_ids(
    influencer_id: i64,
    window: (DateTime<Utc>, DateTime<Utc>),
    conn: &mut SqliteConnection,
) -> Result<Vec<i64>, CommissionDatabaseError> {
    let user_ids = sqlx::query_scalar(
        "SELECT DISTINCT user_id FROM referral_commissions WHERE influencer_id = $1 AND created_at >= $2 AND \
         created_at < $3 AND status != 'Cancelled' ORDER BY user_id",
    )
    .bind(influencer_id)
    .bind(window.0)
    .bind(window.1)
    .fetch_all(conn)
    .await?;
    Ok(user_ids)
}

pub async fn update_status(
    referral_id: i64,
    new_status: ReferralStatus,
    conn: &mut SqliteConnection,
) -> Result<ReferralCommissionRecord, CommissionDatabaseError> {
    let record = referral_by_id(referral_id, &mut *conn)
        .await?
        .ok_or(CommissionDatabaseError::ReferralNotFound(referral_id))?;
    record.status.validate_transition(new_status)?;
    let updated = sqlx::query_as("UPDATE referral_commissions SET status = $1 WHERE id = $2 RETURNING *")
        .bind(new_status.to_string())
        .bind(referral_id)
        .fetch_one(conn)
        .await?;
    debug!("🗃️ Referral {referral_id} status changed: {} -> {}", record.status, new_status);
    Ok(updated)
}
