//! The bridge contract between callers and an isolated expression engine.

use std::time::Duration;

use exprbox_error::ExpressionError;
use serde_json::Value;

use crate::data::WorkflowData;

/// Configuration for one bridge. Fixed once the bridge is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Isolate heap ceiling in megabytes.
    pub memory_limit_mb: usize,
    /// Default per-call timeout.
    pub timeout: Duration,
    /// Install a guest `console` that forwards to `tracing`.
    pub debug: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 128,
            timeout: Duration::from_millis(5000),
            debug: false,
        }
    }
}

impl BridgeConfig {
    /// Heap ceiling in bytes.
    pub fn memory_limit_bytes(&self) -> usize {
        self.memory_limit_mb.saturating_mul(1024 * 1024)
    }
}

/// Per-call options for [`Bridge::execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Overrides [`BridgeConfig::timeout`] for this call only.
    pub timeout: Option<Duration>,
}

/// What one `execute()` call cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    /// The compiled script came from the cache.
    pub cache_hit: bool,
    /// Proxy value reads.
    pub value_reads: usize,
    /// Proxy array element reads.
    pub element_reads: usize,
    /// Host function calls.
    pub function_calls: usize,
    /// Wall time of the call.
    pub duration: Duration,
}

/// Owns one isolated execution context and brokers every call into it.
///
/// Calls are strictly serial. `initialize()` must succeed before `execute()`;
/// `dispose()` is terminal and idempotent.
pub trait Bridge {
    /// Bring the engine up. A no-op when already initialized.
    fn initialize(&mut self) -> Result<(), ExpressionError>;

    /// Run already-guarded `code` with `data` as its lazily read context.
    fn execute(
        &mut self,
        code: &str,
        data: &WorkflowData,
        options: &ExecuteOptions,
    ) -> Result<Value, ExpressionError>;

    /// Release the isolate, compiled scripts and data references.
    fn dispose(&mut self);

    /// Whether `dispose()` has run.
    fn is_disposed(&self) -> bool;

    /// Stats of the most recent `execute()`, if the engine tracks them.
    fn last_stats(&self) -> Option<ExecutionStats> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.memory_limit_mb, 128);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(!config.debug);
        assert_eq!(config.memory_limit_bytes(), 128 * 1024 * 1024);
        assert_eq!(ExecuteOptions::default().timeout, None);
    }
}
