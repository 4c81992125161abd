use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::BTreeSet;

use crate::indexer::types::DecodedEvent;

/// Idempotent schema: both tables and the lookup index are create-if-absent,
/// so startup can always run this unconditionally.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    contract_name TEXT NOT NULL,
    event_name    TEXT NOT NULL,
    round         INTEGER,
    block_number  INTEGER NOT NULL,
    tx_hash       TEXT NOT NULL,
    tx_index      INTEGER NOT NULL,
    log_index     INTEGER NOT NULL,
    address       TEXT NOT NULL,
    decoded_data  TEXT,
    PRIMARY KEY (tx_hash, log_index)
);

CREATE INDEX IF NOT EXISTS idx_events_contract_event
    ON events (contract_name, event_name);

CREATE TABLE IF NOT EXISTS sync_status (
    contract_name TEXT NOT NULL,
    event_name    TEXT NOT NULL,
    last_block    INTEGER NOT NULL,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (contract_name, event_name)
);
";

pub async fn init_schema(pool: &SqlitePool) -> eyre::Result<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

/// Last fully processed block for a (contract, event) pair. None when the
/// pair has never been synced.
pub async fn get_cursor(
    pool: &SqlitePool,
    contract_name: &str,
    event_name: &str,
) -> eyre::Result<Option<u64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT last_block FROM sync_status WHERE contract_name = ?1 AND event_name = ?2",
    )
    .bind(contract_name)
    .bind(event_name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(b,)| b as u64))
}

/// Persist a batch of decoded events and advance the sync cursors, in one
/// transaction.
///
/// Events insert under the (tx_hash, log_index) uniqueness key with
/// `ON CONFLICT DO NOTHING`, so re-delivered events are no-ops and the
/// returned count covers genuinely new rows only. When `processed_through`
/// is Some, every pair in `tracked_pairs` has its cursor set to that block
/// whether or not it produced events this window; the SQL clamps the cursor
/// so it can never move backwards. A `None` means no block in the window was
/// confirmed, so the cursors are left untouched.
pub async fn upsert_events(
    pool: &SqlitePool,
    events: &[DecodedEvent],
    processed_through: Option<u64>,
    tracked_pairs: &BTreeSet<(String, String)>,
) -> eyre::Result<u64> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;

    // Chunked multi-row insert, staying under SQLite's bind parameter limit.
    for chunk in events.chunks(500) {
        let mut query_builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO events (contract_name, event_name, round, block_number, \
             tx_hash, tx_index, log_index, address, decoded_data) ",
        );

        query_builder.push_values(chunk, |mut b, e| {
            b.push_bind(&e.contract_name)
                .push_bind(&e.event_name)
                .push_bind(e.round)
                .push_bind(e.block_number as i64)
                .push_bind(&e.tx_hash)
                .push_bind(e.tx_index as i64)
                .push_bind(e.log_index as i64)
                .push_bind(&e.address)
                .push_bind(e.fields_json());
        });

        query_builder.push(" ON CONFLICT (tx_hash, log_index) DO NOTHING");
        let result = query_builder.build().execute(&mut *tx).await?;
        inserted += result.rows_affected();
    }

    if let Some(through) = processed_through {
        let now = Utc::now().to_rfc3339();
        for (contract_name, event_name) in tracked_pairs {
            sqlx::query(
                "INSERT INTO sync_status (contract_name, event_name, last_block, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (contract_name, event_name) DO UPDATE
                 SET last_block = MAX(last_block, excluded.last_block), updated_at = excluded.updated_at",
            )
            .bind(contract_name)
            .bind(event_name)
            .bind(through as i64)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(inserted)
}
