//! Health & Readiness (§4.9).
//!
//! `/healthz` reports process liveness unconditionally; `/readyz`
//! aggregates a timeout-wrapped probe per backend collaborator (identity
//! service, event bus, conversation store) and only reports ready once
//! every probe succeeds within its budget. Grounded on the general
//! "wrap an upstream call with `tokio::time::timeout`" idiom used
//! throughout `server.rs`'s forwarding paths.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Ok,
    TimedOut,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub name: String,
    pub status: ProbeStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub probes: Vec<ProbeResult>,
}

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Runs `probe` with a fixed timeout and turns any outcome into a
/// [`ProbeResult`]; never panics or propagates, since a single flaky
/// collaborator must not take down the whole readiness check.
pub async fn run_probe<F, Fut>(name: &str, probe: F) -> ProbeResult
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    match tokio::time::timeout(PROBE_TIMEOUT, probe()).await {
        Ok(Ok(())) => ProbeResult {
            name: name.to_string(),
            status: ProbeStatus::Ok,
            detail: None,
        },
        Ok(Err(detail)) => ProbeResult {
            name: name.to_string(),
            status: ProbeStatus::Failed,
            detail: Some(detail),
        },
        Err(_) => ProbeResult {
            name: name.to_string(),
            status: ProbeStatus::TimedOut,
            detail: Some(format!("probe exceeded {}ms budget", PROBE_TIMEOUT.as_millis())),
        },
    }
}

pub fn aggregate(probes: Vec<ProbeResult>) -> ReadinessReport {
    let ready = probes.iter().all(|p| p.status == ProbeStatus::Ok);
    ReadinessReport { ready, probes }
}

/// Per-route hit-count snapshot, reused by the `/metrics` endpoint and by
/// `/readyz`'s diagnostic payload.
pub fn route_stats_summary(stats: Vec<(String, String, u64)>) -> HashMap<String, u64> {
    stats
        .into_iter()
        .map(|(method, pattern, count)| (format!("{method} {pattern}"), count))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_probe_is_ok() {
        let result = run_probe("store", || async { Ok(()) }).await;
        assert_eq!(result.status, ProbeStatus::Ok);
    }

    #[tokio::test]
    async fn failing_probe_is_failed_with_detail() {
        let result = run_probe("identity", || async { Err("connection refused".to_string()) }).await;
        assert_eq!(result.status, ProbeStatus::Failed);
        assert_eq!(result.detail.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn slow_probe_times_out() {
        let result = run_probe("eventbus", || async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(())
        })
        .await;
        assert_eq!(result.status, ProbeStatus::TimedOut);
    }

    #[tokio::test]
    async fn aggregate_is_ready_only_when_all_probes_succeed() {
        let all_ok = aggregate(vec![
            ProbeResult { name: "a".into(), status: ProbeStatus::Ok, detail: None },
            ProbeResult { name: "b".into(), status: ProbeStatus::Ok, detail: None },
        ]);
        assert!(all_ok.ready);

        let one_failed = aggregate(vec![
            ProbeResult { name: "a".into(), status: ProbeStatus::Ok, detail: None },
            ProbeResult { name: "b".into(), status: ProbeStatus::Failed, detail: None },
        ]);
        assert!(!one_failed.ready);
    }
}
