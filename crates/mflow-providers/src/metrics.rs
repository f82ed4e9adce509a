//! Provider call metrics.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Provider calls by provider, task and outcome.
    pub const CALLS_TOTAL: &str = "provider_calls_total";

    /// Provider call latency in seconds by provider and task.
    pub const LATENCY_SECONDS: &str = "provider_call_latency_seconds";

    /// Chains that ran out of providers, by task.
    pub const CHAIN_EXHAUSTED_TOTAL: &str = "provider_chain_exhausted_total";
}

/// Record one provider call. `outcome` is "success" or a failure kind.
pub fn record_call(provider: &str, task: &str, outcome: &'static str, latency_ms: f64) {
    counter!(
        names::CALLS_TOTAL,
        "provider" => provider.to_string(),
        "task" => task.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "provider" => provider.to_string(),
        "task" => task.to_string()
    )
    .record(latency_ms / 1000.0);
}

pub fn record_exhausted(task: &str) {
    counter!(names::CHAIN_EXHAUSTED_TOTAL, "task" => task.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::CALLS_TOTAL.starts_with("provider_"));
        assert!(names::LATENCY_SECONDS.contains("latency"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_call("p1", "transcription", "success", 12.0);
        record_exhausted("transcription");
    }
}
