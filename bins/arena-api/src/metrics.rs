// Prometheus metrics served on GET /metrics

use arena_common::types::Verdict;
use arena_engine::EngineError;
use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref JOBS_TOTAL: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new("arena_jobs_total", "Executed jobs by endpoint and outcome"),
            &["kind", "outcome"],
        )
    );

    pub static ref VERDICTS_TOTAL: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new("arena_verdicts_total", "Judged submissions by verdict"),
            &["verdict"],
        )
    );

    pub static ref JOB_RUNTIME_SECONDS: Histogram = register(
        Histogram::with_opts(
            HistogramOpts::new("arena_job_runtime_seconds", "Wall-clock time of the Running stage")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )
    );

    pub static ref DUELS_CREATED: IntCounter = register(
        IntCounter::new("arena_duels_created_total", "Battles formed by matchmaking")
    );

    pub static ref DUELS_FINISHED: IntCounter = register(
        IntCounter::new("arena_duels_finished_total", "Battles closed by an accepted answer or a forfeit")
    );

    pub static ref DUELS_EXPIRED: IntCounter = register(
        IntCounter::new("arena_duels_expired_total", "Battles that ran out of time without a winner")
    );

    pub static ref WAITING_PLAYERS: IntGauge = register(
        IntGauge::new("arena_waiting_players", "Sessions waiting for an opponent")
    );
}

// Metric names are static, so construction and registration only fail on a
// duplicate name, which is a programming error.
fn register<M>(metric: prometheus::Result<M>) -> M
where
    M: prometheus::core::Collector + Clone + 'static,
{
    let metric = metric.expect("metric definition is valid");
    REGISTRY
        .register(Box::new(metric.clone()))
        .expect("metric name is unique");
    metric
}

/// Outcome label for a finished job
pub fn outcome_label(error: Option<&EngineError>) -> &'static str {
    match error {
        None => "ok",
        Some(EngineError::Validation(_)) => "invalid",
        Some(EngineError::Compile { .. }) => "compile_error",
        Some(EngineError::Runtime { .. }) => "runtime_error",
        Some(EngineError::Timeout { .. }) => "timeout",
        Some(EngineError::Transport(_)) | Some(EngineError::Infrastructure(_)) => "infrastructure",
    }
}

pub fn record_job(kind: &str, error: Option<&EngineError>) {
    JOBS_TOTAL.with_label_values(&[kind, outcome_label(error)]).inc();
}

pub fn record_verdict(verdict: Verdict) {
    VERDICTS_TOTAL.with_label_values(&[&verdict.to_string()]).inc();
}

/// Text exposition of every registered metric
pub fn render() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome_label(None), "ok");
        assert_eq!(
            outcome_label(Some(&EngineError::Timeout { limit: Duration::from_secs(10) })),
            "timeout"
        );
        assert_eq!(
            outcome_label(Some(&EngineError::Infrastructure("gone".into()))),
            "infrastructure"
        );
    }

    #[test]
    fn test_render_exposes_counters() {
        record_job("run", None);
        record_verdict(Verdict::Accepted);
        DUELS_CREATED.inc();

        let text = render();
        assert!(text.contains("arena_jobs_total{kind=\"run\",outcome=\"ok\"}"));
        assert!(text.contains("arena_verdicts_total{verdict=\"accepted\"}"));
        assert!(text.contains("arena_duels_created_total"));
    }
}
