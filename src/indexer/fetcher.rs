use alloy::primitives::Address;
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, Log};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::RpcConfig;
use crate::indexer::types::RangeAnomaly;

/// Classified failure of one log-retrieval request. Scope violations are
/// resolved by bisection, everything else by bounded retry.
#[derive(Debug, Clone)]
pub enum FetchFailure {
    RangeTooLarge(String),
    Timeout,
    Other(String),
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::RangeTooLarge(msg) => write!(f, "range too large: {}", msg),
            FetchFailure::Timeout => write!(f, "timeout"),
            FetchFailure::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// The upstream log source. Production uses an alloy provider; tests supply a
/// scripted implementation.
pub trait LogSource: Sync {
    fn fetch(
        &self,
        addresses: &[Address],
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<Log>, FetchFailure>> + Send;
}

/// `eth_getLogs` over an alloy HTTP provider, with provider errors classified
/// by message the same way the upstream services phrase them.
pub struct RpcLogSource<P> {
    provider: P,
}

impl<P: Provider> RpcLogSource<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: Provider> LogSource for RpcLogSource<P> {
    async fn fetch(
        &self,
        addresses: &[Address],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, FetchFailure> {
        let filter = Filter::new()
            .address(addresses.to_vec())
            .from_block(from_block)
            .to_block(to_block);
        self.provider
            .get_logs(&filter)
            .await
            .map_err(|e| classify_rpc_error(&e.to_string()))
    }
}

fn classify_rpc_error(message: &str) -> FetchFailure {
    let lower = message.to_lowercase();
    if lower.contains("limit") || lower.contains("too many") || lower.contains("block range") {
        FetchFailure::RangeTooLarge(message.to_string())
    } else if lower.contains("timeout") || lower.contains("timed out") {
        FetchFailure::Timeout
    } else {
        FetchFailure::Other(message.to_string())
    }
}

/// Logs merged across all sub-ranges (no ordering guarantee), plus the spans
/// that could not be retrieved even after retries and bisection.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub logs: Vec<Log>,
    pub anomalies: Vec<RangeAnomaly>,
}

/// Fetch all logs for `addresses` over the inclusive range `[from, to]`.
///
/// The range is partitioned into chunks of at most `max_blocks_per_request`
/// blocks; all chunks run concurrently on the calling task, with a semaphore
/// bounding in-flight requests to `max_concurrent_jobs`. Within a chunk,
/// scope failures bisect via an explicit worklist and transient failures
/// retry with a capped backoff; spans that still fail degrade to zero logs
/// and are reported as anomalies rather than failing the run.
pub async fn fetch_logs<S: LogSource>(
    source: &S,
    addresses: &[Address],
    from_block: u64,
    to_block: u64,
    config: &RpcConfig,
) -> FetchOutcome {
    if from_block > to_block || addresses.is_empty() {
        return FetchOutcome::default();
    }

    let mut chunks = Vec::new();
    let mut current = from_block;
    while current <= to_block {
        let end = std::cmp::min(current.saturating_add(config.max_blocks_per_request - 1), to_block);
        chunks.push((current, end));
        current = end + 1;
    }

    tracing::info!(
        from_block,
        to_block,
        chunks = chunks.len(),
        concurrency = config.max_concurrent_jobs,
        "Fetching log range"
    );

    let semaphore = Semaphore::new(config.max_concurrent_jobs);
    let tasks = chunks
        .into_iter()
        .map(|(lo, hi)| fetch_chunk(source, addresses, lo, hi, config, &semaphore));
    let results = futures::future::join_all(tasks).await;

    let mut outcome = FetchOutcome::default();
    for (logs, anomalies) in results {
        outcome.logs.extend(logs);
        outcome.anomalies.extend(anomalies);
    }

    for anomaly in &outcome.anomalies {
        tracing::warn!(
            from_block = anomaly.from_block,
            to_block = anomaly.to_block,
            reason = %anomaly.reason,
            "Block span could not be fetched, treating as empty"
        );
    }

    outcome
}

/// Process one top-level chunk with a worklist of sub-ranges, so bisection
/// depth stays bounded without language-level recursion.
async fn fetch_chunk<S: LogSource>(
    source: &S,
    addresses: &[Address],
    from_block: u64,
    to_block: u64,
    config: &RpcConfig,
    semaphore: &Semaphore,
) -> (Vec<Log>, Vec<RangeAnomaly>) {
    let mut pending = vec![(from_block, to_block)];
    let mut logs = Vec::new();
    let mut anomalies = Vec::new();

    while let Some((lo, hi)) = pending.pop() {
        let result = {
            let _permit = semaphore
                .acquire()
                .await
                .expect("fetch semaphore is never closed");
            fetch_range_with_retry(source, addresses, lo, hi, config).await
        };

        match result {
            Ok(batch) => {
                tracing::debug!(from_block = lo, to_block = hi, logs = batch.len(), "Fetched span");
                logs.extend(batch);
            }
            Err(FetchFailure::RangeTooLarge(reason)) => {
                let span = hi - lo + 1;
                if span > config.min_range_width {
                    let mid = lo + (hi - lo) / 2;
                    pending.push((mid + 1, hi));
                    pending.push((lo, mid));
                } else {
                    anomalies.push(RangeAnomaly {
                        from_block: lo,
                        to_block: hi,
                        reason,
                    });
                }
            }
            Err(failure) => {
                anomalies.push(RangeAnomaly {
                    from_block: lo,
                    to_block: hi,
                    reason: failure.to_string(),
                });
            }
        }
    }

    (logs, anomalies)
}

/// Retry transient failures with a capped backoff. Scope failures return
/// immediately so the caller can bisect instead of hammering the same span.
async fn fetch_range_with_retry<S: LogSource>(
    source: &S,
    addresses: &[Address],
    from_block: u64,
    to_block: u64,
    config: &RpcConfig,
) -> Result<Vec<Log>, FetchFailure> {
    let mut delay = Duration::from_millis(200);
    let mut attempt = 0;

    loop {
        match source.fetch(addresses, from_block, to_block).await {
            Ok(logs) => return Ok(logs),
            Err(FetchFailure::RangeTooLarge(msg)) => {
                return Err(FetchFailure::RangeTooLarge(msg))
            }
            Err(failure) => {
                attempt += 1;
                if attempt >= config.max_retries {
                    return Err(failure);
                }
                tracing::warn!(
                    from_block,
                    to_block,
                    attempt,
                    max_retries = config.max_retries,
                    error = %failure,
                    "Log fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(5));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn test_config(max_blocks: u64, min_width: u64) -> RpcConfig {
        RpcConfig {
            url: "http://localhost:8545".to_string(),
            to_block: 0,
            max_blocks_per_request: max_blocks,
            max_concurrent_jobs: 4,
            max_retries: 3,
            min_range_width: min_width,
        }
    }

    fn log_at(block: u64) -> Log {
        Log {
            block_number: Some(block),
            ..Default::default()
        }
    }

    enum Script {
        /// One log per block in every successful span.
        Succeed,
        /// Spans wider than the given width report a scope violation.
        TooLargeAbove(u64),
        /// Every call fails with a transient error.
        AlwaysTransient,
    }

    struct ScriptedSource {
        script: Script,
        calls: Mutex<Vec<(u64, u64)>>,
    }

    impl ScriptedSource {
        fn new(script: Script) -> Self {
            Self {
                script,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(u64, u64)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl LogSource for ScriptedSource {
        async fn fetch(
            &self,
            _addresses: &[Address],
            from_block: u64,
            to_block: u64,
        ) -> Result<Vec<Log>, FetchFailure> {
            self.calls.lock().unwrap().push((from_block, to_block));
            match &self.script {
                Script::Succeed => Ok((from_block..=to_block).map(log_at).collect()),
                Script::TooLargeAbove(width) => {
                    if to_block - from_block + 1 > *width {
                        Err(FetchFailure::RangeTooLarge("query exceeds limit".to_string()))
                    } else {
                        Ok((from_block..=to_block).map(log_at).collect())
                    }
                }
                Script::AlwaysTransient => Err(FetchFailure::Other("connection reset".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_chunks_cover_range_exactly_once() {
        let source = ScriptedSource::new(Script::Succeed);
        let addresses = [Address::repeat_byte(0x11)];
        let outcome = fetch_logs(&source, &addresses, 1, 10, &test_config(3, 1)).await;

        assert!(outcome.anomalies.is_empty());
        let mut blocks: Vec<u64> = outcome
            .logs
            .iter()
            .map(|l| l.block_number.unwrap())
            .collect();
        blocks.sort_unstable();
        assert_eq!(blocks, (1..=10).collect::<Vec<_>>());

        let mut calls = source.calls();
        calls.sort_unstable();
        assert_eq!(calls, vec![(1, 3), (4, 6), (7, 9), (10, 10)]);
    }

    #[tokio::test]
    async fn test_bisection_resolves_scope_failures() {
        // Provider accepts at most 200-block spans; one 1000-block chunk must
        // split until every span fits, with no block lost or duplicated.
        let source = ScriptedSource::new(Script::TooLargeAbove(200));
        let addresses = [Address::repeat_byte(0x11)];
        let outcome = fetch_logs(&source, &addresses, 0, 999, &test_config(1000, 50)).await;

        assert!(outcome.anomalies.is_empty());
        let mut blocks: Vec<u64> = outcome
            .logs
            .iter()
            .map(|l| l.block_number.unwrap())
            .collect();
        blocks.sort_unstable();
        assert_eq!(blocks, (0..=999).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_bisection_stops_at_floor_and_reports_anomalies() {
        // Every span fails as too-large; spans at or below the floor must not
        // split further, so the anomaly count is bounded and finite.
        let source = ScriptedSource::new(Script::TooLargeAbove(0));
        let addresses = [Address::repeat_byte(0x11)];
        let config = test_config(64, 8);
        let outcome = fetch_logs(&source, &addresses, 0, 63, &config).await;

        assert!(outcome.logs.is_empty());
        assert_eq!(outcome.anomalies.len(), 8); // 64 blocks bisect evenly down to floor-width spans

        // No request was ever issued for a span narrower than the floor.
        for (lo, hi) in source.calls() {
            assert!(hi - lo + 1 >= 8, "span {}..{} below the floor", lo, hi);
        }
        for anomaly in &outcome.anomalies {
            assert!(anomaly.to_block - anomaly.from_block + 1 <= config.min_range_width);
        }
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_degrade() {
        let source = ScriptedSource::new(Script::AlwaysTransient);
        let addresses = [Address::repeat_byte(0x11)];
        let outcome = fetch_logs(&source, &addresses, 100, 199, &test_config(1000, 10)).await;

        assert!(outcome.logs.is_empty());
        assert_eq!(outcome.anomalies.len(), 1);
        assert_eq!(outcome.anomalies[0].from_block, 100);
        assert_eq!(outcome.anomalies[0].to_block, 199);
        // max_retries bounds the attempts; the span is not bisected.
        assert_eq!(source.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_range_and_addresses_short_circuit() {
        let source = ScriptedSource::new(Script::Succeed);
        let outcome = fetch_logs(&source, &[], 0, 100, &test_config(10, 1)).await;
        assert!(outcome.logs.is_empty());
        assert!(source.calls().is_empty());

        let addresses = [Address::repeat_byte(0x11)];
        let outcome = fetch_logs(&source, &addresses, 100, 50, &test_config(10, 1)).await;
        assert!(outcome.logs.is_empty());
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_gate_bounds_inflight_requests() {
        struct GaugeSource {
            inflight: AtomicUsize,
            peak: AtomicUsize,
        }

        impl LogSource for GaugeSource {
            async fn fetch(
                &self,
                _addresses: &[Address],
                _from_block: u64,
                _to_block: u64,
            ) -> Result<Vec<Log>, FetchFailure> {
                let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.inflight.fetch_sub(1, Ordering::SeqCst);
                Ok(Vec::new())
            }
        }

        let source = GaugeSource {
            inflight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        let addresses = [Address::repeat_byte(0x11)];
        let mut config = test_config(10, 1);
        config.max_concurrent_jobs = 2;

        let outcome = fetch_logs(&source, &addresses, 0, 99, &config).await;
        assert!(outcome.anomalies.is_empty());
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_classify_rpc_error() {
        assert!(matches!(
            classify_rpc_error("query returned more than 10000 results, try a smaller block range"),
            FetchFailure::RangeTooLarge(_)
        ));
        assert!(matches!(
            classify_rpc_error("Log response size exceeded limit"),
            FetchFailure::RangeTooLarge(_)
        ));
        assert!(matches!(
            classify_rpc_error("request timed out"),
            FetchFailure::Timeout
        ));
        assert!(matches!(
            classify_rpc_error("connection refused"),
            FetchFailure::Other(_)
        ));
    }
}
