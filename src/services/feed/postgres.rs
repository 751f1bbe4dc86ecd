use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::PgPool;

use crate::{
    error::{AppError, AppResult},
    models::{FeedEntry, FeedPosition, SourceCollection, TrackedEvent, TrackingRow},
};

use super::{EventFeed, FeedSubscription};

/// Feed over the Postgres tracking tables.
///
/// Positions are `(xact_id, id)`: every tracking row records the transaction that
/// inserted it, and a fetch only returns rows from transactions older than the oldest
/// one still running. Anything committed later sorts after the cursor, so no row is
/// skipped when writers commit out of id order.
///
/// Insert triggers raise `pg_notify` on a channel per table (see migrations), which
/// wakes the listener early; polling covers any missed notification and rows held
/// back behind a long-running writer.
#[derive(Clone)]
pub struct PgEventFeed {
    pool: PgPool,
}

impl PgEventFeed {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Projects each tracking table onto the shared row shape
fn select_columns(source: SourceCollection) -> &'static str {
    match source {
        SourceCollection::ProductViews => {
            "id, session_id, user_id, product_id, NULL::text AS action, view_duration, created_at"
        }
        SourceCollection::Searches => {
            "id, session_id, user_id, NULL::text AS product_id, NULL::text AS action, \
             NULL::float8 AS view_duration, created_at"
        }
        SourceCollection::CartMutations => {
            "id, session_id, user_id, product_id, action, NULL::float8 AS view_duration, created_at"
        }
        SourceCollection::Orders => {
            "id, session_id, user_id, product_id, NULL::text AS action, \
             NULL::float8 AS view_duration, created_at"
        }
    }
}

fn fetch_query(source: SourceCollection) -> String {
    format!(
        "SELECT {}, xact_id::text::bigint AS xact_id FROM {} \
         WHERE (xact_id, id) > ($1::bigint::text::xid8, $2) \
         AND xact_id < pg_snapshot_xmin(pg_current_snapshot()) \
         ORDER BY xact_id, id LIMIT $3",
        select_columns(source),
        source.table()
    )
}

#[async_trait::async_trait]
impl EventFeed for PgEventFeed {
    async fn subscribe(&self, source: SourceCollection) -> AppResult<Box<dyn FeedSubscription>> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&source.channel()).await?;

        tracing::debug!(source = %source, channel = %source.channel(), "Listening for inserts");

        Ok(Box::new(PgSubscription { listener }))
    }

    async fn load_position(&self, source: SourceCollection) -> AppResult<FeedPosition> {
        let position: Option<(i64, i64)> = sqlx::query_as(
            "SELECT last_xact_id, last_row_id FROM feed_positions WHERE source = $1",
        )
        .bind(source.table())
        .fetch_optional(&self.pool)
        .await?;

        Ok(position
            .map(|(xact_id, row_id)| FeedPosition::new(xact_id, row_id))
            .unwrap_or_default())
    }

    async fn commit_position(
        &self,
        source: SourceCollection,
        position: FeedPosition,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO feed_positions (source, last_xact_id, last_row_id, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (source) DO UPDATE
            SET last_xact_id = EXCLUDED.last_xact_id,
                last_row_id = EXCLUDED.last_row_id,
                updated_at = EXCLUDED.updated_at
            WHERE (feed_positions.last_xact_id, feed_positions.last_row_id)
                < (EXCLUDED.last_xact_id, EXCLUDED.last_row_id)
            "#,
        )
        .bind(source.table())
        .bind(position.xact_id)
        .bind(position.row_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_after(
        &self,
        source: SourceCollection,
        position: FeedPosition,
        limit: i64,
    ) -> AppResult<Vec<FeedEntry>> {
        let rows: Vec<TrackingRow> = sqlx::query_as(&fetch_query(source))
            .bind(position.xact_id)
            .bind(position.row_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| FeedEntry {
                position: FeedPosition::new(row.xact_id, row.id),
                event: TrackedEvent::from_row(source, row),
            })
            .collect())
    }
}

/// LISTEN connection for one tracking table
struct PgSubscription {
    listener: PgListener,
}

#[async_trait::async_trait]
impl FeedSubscription for PgSubscription {
    async fn wait(&mut self, timeout: Duration) -> AppResult<()> {
        match tokio::time::timeout(timeout, self.listener.try_recv()).await {
            // Poll interval reached without a notification
            Err(_) => Ok(()),
            Ok(Ok(Some(_))) => Ok(()),
            Ok(Ok(None)) => Err(AppError::Feed(
                "notification connection closed".to_string(),
            )),
            Ok(Err(e)) => Err(e.into()),
        }
    }
}
