use serde_json::{Map, Value};

/// A fully decoded event log, ready for DB insertion. Uniquely identified by
/// (tx_hash, log_index); `fields` keeps parameter declaration order, with
/// tuple components dotted (`info.amount`).
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub contract_name: String,
    pub event_name: String,
    pub round: Option<i64>,
    pub block_number: u64,
    pub tx_hash: String,
    pub tx_index: u64,
    pub log_index: u64,
    pub address: String,
    pub fields: Vec<(String, String)>,
}

impl DecodedEvent {
    /// Serialize the decoded parameter map for the opaque `decoded_data`
    /// column. Positional attributes live in their own columns.
    pub fn fields_json(&self) -> String {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map).to_string()
    }
}

/// A block span the fetcher gave up on after retries and bisection. Surfaced
/// in the run report; the orchestrator withholds cursor advancement past it.
#[derive(Debug, Clone)]
pub struct RangeAnomaly {
    pub from_block: u64,
    pub to_block: u64,
    pub reason: String,
}

/// Outcome of one sync pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub fetched: usize,
    pub decoded: usize,
    pub inserted: u64,
    pub anomalies: Vec<RangeAnomaly>,
    /// Block the sync cursors were advanced to, when a fetch window ran.
    pub processed_through: Option<u64>,
}

/// Derive the protocol round for a block, as a pure function of the round
/// configuration. None when rounds are disabled (`phase_blocks = 0`) or the
/// block predates the origin.
pub fn calc_round(block_number: u64, origin_block: u64, phase_blocks: u64) -> Option<i64> {
    if phase_blocks == 0 || block_number < origin_block {
        return None;
    }
    Some(((block_number - origin_block) / phase_blocks) as i64)
}
