use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db_types::{InvoiceId, UsageInvoice},
    traits::{CommissionDatabaseError, PlanScope},
};

/// Appends the billable-invoice conditions shared by every query in this module: fulfilled, positive amount,
/// fulfilled inside the half-open window.
fn push_billable_window(builder: &mut QueryBuilder<'_, Sqlite>, window: (DateTime<Utc>, DateTime<Utc>)) {
    builder.push("status = 'Fulfilled' AND amount > 0 AND fulfilled_at >= ");
    builder.push_bind(window.0);
    builder.push(" AND fulfilled_at < ");
    builder.push_bind(window.1);
}

fn push_plan_scope(builder: &mut QueryBuilder<'_, Sqlite>, plans: &PlanScope) {
    match plans {
        // An empty allow list matches nothing.
        PlanScope::AllowList(ids) if ids.is_empty() => {
            builder.push(" AND 1 = 0");
        },
        PlanScope::AllowList(ids) => {
            builder.push(" AND plan_id IN (");
            let mut list = builder.separated(", ");
            for id in ids {
                list.push_bind(*id);
            }
            builder.push(")");
        },
        PlanScope::DenyList(ids) if ids.is_empty() => {},
        PlanScope::DenyList(ids) => {
            builder.push(" AND plan_id NOT IN (");
            let mut list = builder.separated(", ");
            for id in ids {
                list.push_bind(*id);
            }
            builder.push(")");
        },
    }
}

fn push_excluded_users(builder: &mut QueryBuilder<'_, Sqlite>, excluded_users: &[i64]) {
    if excluded_users.is_empty() {
        return;
    }
    builder.push(" AND user_id NOT IN (");
    let mut list = builder.separated(", ");
    for id in excluded_users {
        list.push_bind(*id);
    }
    builder.push(")");
}

pub async fn invoice_by_id(
    invoice_id: &InvoiceId,
    conn: &mut SqliteConnection,
) -> Result<Option<UsageInvoice>, CommissionDatabaseError> {
    let invoice = sqlx::query_as("SELECT * FROM invoices WHERE id = $1")
        .bind(invoice_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(invoice)
}

/// The distinct users with a billable invoice in the window, excluding `excluded_users`, in ascending user order.
pub async fn billable_user_ids(
    window: (DateTime<Utc>, DateTime<Utc>),
    excluded_users: &[i64],
    plans: &PlanScope,
    conn: &mut SqliteConnection,
) -> Result<Vec<i64>, CommissionDatabaseError> {
    let mut builder = QueryBuilder::new("SELECT DISTINCT user_id FROM invoices WHERE ");
    push_billable_window(&mut builder, window);
    push_excluded_users(&mut builder, excluded_users);
    push_plan_scope(&mut builder, plans);
    builder.push(" ORDER BY user_id");
    let ids: Vec<i64> = builder.build_query_scalar().fetch_all(conn).await?;
    Ok(ids)
}

pub async fn billable_invoices_for_user(
    user_id: i64,
    window: (DateTime<Utc>, DateTime<Utc>),
    plans: &PlanScope,
    conn: &mut SqliteConnection,
) -> Result<Vec<UsageInvoice>, CommissionDatabaseError> {
    let mut builder = QueryBuilder::new("SELECT * FROM invoices WHERE user_id = ");
    builder.push_bind(user_id);
    builder.push(" AND ");
    push_billable_window(&mut builder, window);
    push_plan_scope(&mut builder, plans);
    builder.push(" ORDER BY fulfilled_at, id");
    let invoices = builder.build_query_as::<UsageInvoice>().fetch_all(conn).await?;
    Ok(invoices)
}

pub async fn billable_invoices(
    window: (DateTime<Utc>, DateTime<Utc>),
    excluded_users: &[i64],
    plans: &PlanScope,
    conn: &mut SqliteConnection,
) -> Result<Vec<UsageInvoice>, CommissionDatabaseError> {
    let mut builder = QueryBuilder::new("SELECT * FROM invoices WHERE ");
    push_billable_window(&mut builder, window);
    push_excluded_users(&mut builder, excluded_users);
    push_plan_scope(&mut builder, plans);
    builder.push(" ORDER BY user_id, fulfilled_at, id");
    let invoices = builder.build_query_as::<UsageInvoice>().fetch_all(conn).await?;
    Ok(invoices)
}
