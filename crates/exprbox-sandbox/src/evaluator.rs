//! Guard-then-execute front end over a [`Bridge`].

use std::time::Duration;
#[cfg(feature = "metrics")]
use std::sync::Arc;

use exprbox_error::{ErrorContext, ExpressionError};
use serde_json::Value;

use crate::bridge::{Bridge, ExecuteOptions};
use crate::data::WorkflowData;
use crate::guard::{guard_expression_with_hooks, GuardHooks};
#[cfg(feature = "metrics")]
use crate::metrics::{EvaluatorMetrics, OutcomeLabels};

/// Per-evaluation options.
///
/// Everything except `timeout` only feeds the [`ErrorContext`] attached to a
/// failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluateOptions {
    /// Overrides the bridge timeout for this evaluation.
    pub timeout: Option<Duration>,
    /// Workflow the expression belongs to.
    pub workflow_id: Option<String>,
    /// Node the expression belongs to.
    pub node_id: Option<String>,
    /// Run index of the node execution.
    pub run_index: Option<usize>,
    /// Index of the item being evaluated.
    pub item_index: Option<usize>,
}

impl EvaluateOptions {
    fn context(&self, expression: &str) -> ErrorContext {
        ErrorContext {
            expression: Some(expression.to_string()),
            workflow_id: self.workflow_id.clone(),
            node_id: self.node_id.clone(),
            run_index: self.run_index,
            item_index: self.item_index,
        }
    }
}

/// Guards raw expressions and runs them on one bridge.
pub struct Evaluator<B: Bridge> {
    bridge: B,
    hooks: GuardHooks,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<EvaluatorMetrics>>,
}

impl<B: Bridge> Evaluator<B> {
    /// Wrap `bridge`. The bridge is initialized lazily on first use.
    pub fn new(bridge: B) -> Self {
        Self {
            bridge,
            hooks: GuardHooks::default(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Run `hooks` as part of guard rewriting.
    pub fn with_hooks(mut self, hooks: GuardHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Record every evaluation into `metrics`.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<EvaluatorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The underlying bridge.
    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    /// The underlying bridge, mutably.
    pub fn bridge_mut(&mut self) -> &mut B {
        &mut self.bridge
    }

    /// Initialize the bridge now rather than on first evaluation.
    pub fn initialize(&mut self) -> Result<(), ExpressionError> {
        self.bridge.initialize()
    }

    /// Guard `expression`, run it against `data` and return its JSON result.
    ///
    /// Any failure carries an [`ErrorContext`] built from `expression` and
    /// `options`.
    pub fn evaluate(
        &mut self,
        expression: &str,
        data: &WorkflowData,
        options: &EvaluateOptions,
    ) -> Result<Value, ExpressionError> {
        let _span = tracing::debug_span!(
            "evaluate",
            workflow_id = options.workflow_id.as_deref(),
            node_id = options.node_id.as_deref(),
            item_index = options.item_index,
        )
        .entered();
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        let result = self.run(expression, data, options);

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            let cache_hit = result.is_ok()
                && self.bridge.last_stats().is_some_and(|stats| stats.cache_hit);
            metrics.record(&OutcomeLabels::of(&result), start.elapsed().as_secs_f64(), cache_hit);
        }

        result.map_err(|e| e.with_context(options.context(expression)))
    }

    fn run(
        &mut self,
        expression: &str,
        data: &WorkflowData,
        options: &EvaluateOptions,
    ) -> Result<Value, ExpressionError> {
        let guarded = guard_expression_with_hooks(expression, &self.hooks).map_err(|violation| {
            tracing::warn!(error = %violation, rule = violation.rule(), "expression rejected by guard");
            ExpressionError::from(violation)
        })?;
        self.bridge.initialize()?;
        self.bridge.execute(
            guarded.as_str(),
            data,
            &ExecuteOptions {
                timeout: options.timeout,
            },
        )
    }

    /// Dispose the bridge.
    pub fn dispose(&mut self) {
        self.bridge.dispose();
    }
}
