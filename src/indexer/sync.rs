use alloy::primitives::Address;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};

use crate::abi::EventRegistry;
use crate::config::Config;
use crate::db::repository;
use crate::indexer::decoder;
use crate::indexer::fetcher::{self, LogSource};
use crate::indexer::types::{calc_round, SyncReport};

/// Drive one sync pass: compute the minimal block window still needed across
/// all tracked (contract, event) pairs, fetch it, decode, and persist with
/// the ledger advanced in the same transaction.
///
/// When the fetcher reports anomalous spans, cursors advance only to the
/// block before the earliest unconfirmed span, so a later run resumes over
/// the gap instead of silently losing it.
pub async fn run_sync<S: LogSource>(
    source: &S,
    pool: &SqlitePool,
    registry: &EventRegistry,
    config: &Config,
) -> eyre::Result<SyncReport> {
    let to_block = config.rpc.to_block;
    let origin = config.rounds.origin_block;

    // Per-address start block: the minimum of (cursor + 1, or origin when
    // never synced) over every pair hosted at that address.
    let mut start_blocks: HashMap<Address, u64> = HashMap::new();
    for (address, shapes) in registry.iter() {
        let mut min_from = to_block + 1;
        for shape in shapes.values() {
            let last = repository::get_cursor(pool, &shape.contract_name, &shape.name).await?;
            let from = match last {
                Some(block) => block + 1,
                None => origin,
            };
            min_from = min_from.min(from);
        }
        if min_from > to_block {
            tracing::info!(address = %address, to_block, "Address already up to date");
            continue;
        }
        start_blocks.insert(*address, min_from);
    }

    if start_blocks.is_empty() {
        tracing::info!(to_block, "All tracked pairs already up to date");
        return Ok(SyncReport::default());
    }

    let addresses: Vec<Address> = start_blocks.keys().copied().collect();
    let union_from = start_blocks.values().copied().min().unwrap_or(to_block);

    let outcome = fetcher::fetch_logs(source, &addresses, union_from, to_block, &config.rpc).await;
    let fetched = outcome.logs.len();

    // The fetcher treats the address list as a flat filter over the union
    // range; drop entries older than their own address's start block.
    let mut decoded_events = Vec::new();
    let mut unmatched = 0usize;
    for log in &outcome.logs {
        let Some(&address_from) = start_blocks.get(&log.inner.address) else {
            continue;
        };
        if log.block_number.unwrap_or_default() < address_from {
            continue;
        }
        match decoder::decode_log(log, registry) {
            Some(mut event) => {
                event.round = calc_round(event.block_number, origin, config.rounds.phase_blocks);
                decoded_events.push(event);
            }
            None => unmatched += 1,
        }
    }

    // Every pair in scope for this window advances, even with zero events.
    let mut tracked_pairs: BTreeSet<(String, String)> = BTreeSet::new();
    for address in &addresses {
        tracked_pairs.extend(registry.tracked_pairs_for(address));
    }

    // Cursors may only claim blocks that were actually confirmed. When the
    // earliest anomalous span starts at the window's own first block nothing
    // is confirmed at all, so the cursors stay where they were.
    let processed_through = match outcome.anomalies.iter().map(|a| a.from_block).min() {
        Some(first_gap) if first_gap > union_from => Some(first_gap - 1),
        Some(_) => None,
        None => Some(to_block),
    };

    let inserted =
        repository::upsert_events(pool, &decoded_events, processed_through, &tracked_pairs).await?;

    tracing::info!(
        fetched,
        decoded = decoded_events.len(),
        unmatched,
        inserted,
        anomalies = outcome.anomalies.len(),
        processed_through = ?processed_through,
        "Sync pass complete"
    );

    Ok(SyncReport {
        fetched,
        decoded: decoded_events.len(),
        inserted,
        anomalies: outcome.anomalies,
        processed_through,
    })
}
