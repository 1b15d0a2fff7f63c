use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{NewEngagementEvent, QualifyingEvent},
    traits::ActivityQuery,
};

/// Records a raw engagement event in the local mirror.
pub async fn record_event(event: NewEngagementEvent, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let id = sqlx::query_scalar(
        r#"
            INSERT INTO engagement_events (user_id, related_type, related_id, kind, cohort_id, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id;
        "#,
    )
    .bind(event.user_id)
    .bind(event.related_type.to_string())
    .bind(event.related_id)
    .bind(event.kind)
    .bind(event.cohort_id)
    .bind(event.occurred_at)
    .fetch_one(conn)
    .await?;
    Ok(id)
}

/// The earliest event per `(user, entity, kind)` triple in the window, restricted to the queried users and kind
/// pairs. With a lone MIN aggregate, SQLite takes bare columns from the minimal row, so `cohort_id` belongs to the
/// earliest event.
pub async fn earliest_qualifying_events(
    query: &ActivityQuery,
    conn: &mut SqliteConnection,
) -> Result<Vec<QualifyingEvent>, sqlx::Error> {
    if query.user_ids.is_empty() || query.kinds.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::new(
        "SELECT user_id, related_type, related_id, kind, cohort_id, MIN(occurred_at) AS occurred_at FROM \
         engagement_events WHERE occurred_at >= ",
    );
    builder.push_bind(query.window.0);
    builder.push(" AND occurred_at < ");
    builder.push_bind(query.window.1);
    builder.push(" AND user_id IN (");
    let mut users = builder.separated(", ");
    for id in &query.user_ids {
        users.push_bind(*id);
    }
    builder.push(") AND (related_type, kind) IN");
    builder.push_tuples(query.kinds.iter(), |mut tuple, (related_type, kind)| {
        tuple.push_bind(related_type.to_string());
        tuple.push_bind(kind.clone());
    });
    builder
        .push("GROUP BY user_id, related_type, related_id, kind ORDER BY user_id, related_type, related_id, kind");
    let events = builder.build_query_as::<QualifyingEvent>().fetch_all(conn).await?;
    Ok(events)
}
