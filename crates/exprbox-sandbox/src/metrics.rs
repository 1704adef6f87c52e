//! Prometheus metrics for expression evaluation.
//!
//! This module is only compiled when the `metrics` feature is enabled.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use exprbox_error::ExpressionError;

/// Label set for evaluation metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    /// `ok`, or the lowercased error code (`timeout`, `security_violation`, ...).
    pub outcome: String,
}

impl OutcomeLabels {
    /// Labels for an evaluation result.
    pub fn of<T>(result: &Result<T, ExpressionError>) -> Self {
        let outcome = match result {
            Ok(_) => "ok".to_string(),
            Err(e) => e.code().to_ascii_lowercase(),
        };
        Self { outcome }
    }
}

/// Prometheus metrics for expression evaluation.
pub struct EvaluatorMetrics {
    /// Evaluations by outcome.
    pub evaluations_total: Family<OutcomeLabels, Counter>,
    /// Evaluation duration in seconds by outcome.
    pub evaluation_duration_seconds: Family<OutcomeLabels, Histogram>,
    /// Evaluations whose compiled script came from the cache.
    pub script_cache_hits_total: Counter,
}

impl EvaluatorMetrics {
    /// Create the metrics and register them with `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let evaluations_total = Family::default();
        registry.register(
            "exprbox_evaluations",
            "Total expression evaluations",
            evaluations_total.clone(),
        );

        let evaluation_duration_seconds =
            Family::<OutcomeLabels, Histogram>::new_with_constructor(|| {
                Histogram::new([0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0].into_iter())
            });
        registry.register(
            "exprbox_evaluation_duration_seconds",
            "Expression evaluation duration",
            evaluation_duration_seconds.clone(),
        );

        let script_cache_hits_total = Counter::default();
        registry.register(
            "exprbox_script_cache_hits",
            "Evaluations served from the compiled-script cache",
            script_cache_hits_total.clone(),
        );

        Self {
            evaluations_total,
            evaluation_duration_seconds,
            script_cache_hits_total,
        }
    }

    /// Record one evaluation.
    pub fn record(&self, labels: &OutcomeLabels, duration_secs: f64, cache_hit: bool) {
        self.evaluations_total.get_or_create(labels).inc();
        self.evaluation_duration_seconds
            .get_or_create(labels)
            .observe(duration_secs);
        if cache_hit {
            self.script_cache_hits_total.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn outcome_labels() {
        let ok: Result<(), ExpressionError> = Ok(());
        assert_eq!(OutcomeLabels::of(&ok).outcome, "ok");
        let err: Result<(), ExpressionError> = Err(ExpressionError::timeout("slow"));
        assert_eq!(OutcomeLabels::of(&err).outcome, "timeout");
    }

    #[test]
    fn counters_increment_per_outcome() {
        let mut registry = Registry::default();
        let metrics = EvaluatorMetrics::new(&mut registry);
        let ok = OutcomeLabels { outcome: "ok".into() };
        metrics.record(&ok, 0.01, false);
        metrics.record(&ok, 0.02, true);
        metrics.record(&OutcomeLabels { outcome: "timeout".into() }, 5.0, false);
        assert_eq!(metrics.evaluations_total.get_or_create(&ok).get(), 2);
        assert_eq!(metrics.script_cache_hits_total.get(), 1);
    }

    #[test]
    fn metrics_encode_to_text() {
        let mut registry = Registry::default();
        let metrics = EvaluatorMetrics::new(&mut registry);
        metrics.record(&OutcomeLabels { outcome: "ok".into() }, 0.5, true);

        let mut buf = String::new();
        encode(&mut buf, &registry).unwrap();
        assert!(buf.contains("exprbox_evaluations_total"), "{buf}");
        assert!(buf.contains("exprbox_evaluation_duration_seconds"), "{buf}");
        assert!(buf.contains("exprbox_script_cache_hits_total"), "{buf}");
    }
}
