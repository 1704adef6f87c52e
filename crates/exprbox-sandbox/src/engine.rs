//! V8-backed [`Bridge`] implementation.
//!
//! One [`IsolateBridge`] owns one `deno_core` runtime. Initialization loads the
//! guest runtime bundle, installs its exports as read-only globals and freezes
//! the global object. Each `execute()` then:
//!
//! 1. binds the call's data to the proxy ops under a fresh generation,
//!    releasing the previous call's data
//! 2. resets the guest data container
//! 3. wraps the guarded code in a function whose receiver is the container
//! 4. compiles it, or fetches it from the script cache
//! 5. runs it under the watchdog and copies the result out
//! 6. unbinds the data again
//!
//! # Safety model
//!
//! The isolate has no `Deno` namespace, no `eval`, no code-generating
//! constructors and no console unless debugging. The context refuses code
//! generation from strings outright. Array buffer backing stores sit outside
//! the V8 heap, so the bundle charges them against the memory limit itself.
//! The only way out is the `expr_ext` ops, which read the bound data or run
//! extension functions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use deno_core::{serde_v8, v8, JsRuntime, RuntimeOptions};
use exprbox_error::{codes, ExpressionError, RuntimeError};
use serde_json::Value;

use crate::bridge::{Bridge, BridgeConfig, ExecuteOptions, ExecutionStats};
use crate::cache::ScriptCache;
use crate::data::WorkflowData;
use crate::ops::expr_ext;
use crate::proxy::ActiveData;
use crate::watchdog::Watchdog;

/// The guest runtime: lazy proxies, safe globals, extension dispatch.
const RUNTIME_BUNDLE: &str = include_str!("runtime/bundle.js");

/// Exports the bundle must provide.
const REQUIRED_EXPORTS: [&str; 6] = ["reset", "finalize", "describeError", "E", "extend", "sanitize"];

/// Globals installed from bundle exports, as (global name, export name).
const INSTALLED_GLOBALS: [(&str, &str); 3] = [("E", "E"), ("extend", "extend"), ("__sanitize", "sanitize")];

/// Wrap guarded code so it runs as a function called with the data container
/// as its receiver.
pub(crate) fn wrap_script(code: &str) -> String {
    format!("(function () {{\n'use strict';\n{code}\n}})")
}

/// State for the near-heap-limit callback.
struct HeapLimitState {
    handle: v8::IsolateHandle,
    /// Whether the heap limit has been triggered. Uses AtomicBool so the callback
    /// can use a shared `&` reference instead of `&mut`.
    triggered: AtomicBool,
}

/// V8 near-heap-limit callback. Terminates execution and grants 1MB grace
/// for the termination to propagate cleanly.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points to the `HeapLimitState` boxed in `Engine::heap`.
    // `Engine` declares `heap` after `runtime`, so the box is dropped only
    // after the isolate that can invoke this callback.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

/// Guest functions the engine calls directly.
struct Exports {
    reset: v8::Global<v8::Function>,
    finalize: v8::Global<v8::Function>,
    describe_error: v8::Global<v8::Function>,
}

/// A running isolate. Field order is drop order: handles into the isolate
/// go first, the heap callback state goes last.
struct Engine {
    exports: Exports,
    scripts: ScriptCache<v8::Global<v8::UnboundScript>>,
    watchdog: Watchdog,
    runtime: JsRuntime,
    heap: Box<HeapLimitState>,
    memory_limit: usize,
    generation: u32,
}

/// How a run ended, before translation.
enum Failure {
    Memory,
    Timeout,
    Error(ExpressionError),
}

impl Engine {
    fn boot(config: &BridgeConfig) -> Result<Self, ExpressionError> {
        let memory_limit = config.memory_limit_bytes();
        let create_params = v8::CreateParams::default().heap_limits(0, memory_limit);
        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![expr_ext::init_ops_and_esm()],
            create_params: Some(create_params),
            ..Default::default()
        });

        let heap = Box::new(HeapLimitState {
            handle: runtime.v8_isolate().thread_safe_handle(),
            triggered: AtomicBool::new(false),
        });
        runtime.v8_isolate().add_near_heap_limit_callback(
            near_heap_limit_callback,
            &*heap as *const HeapLimitState as *mut std::ffi::c_void,
        );

        {
            let scope = &mut runtime.handle_scope();
            let global = scope.get_current_context().global(scope);
            define_readonly(scope, global, "global", global.into())?;
        }

        let source = format!(
            "({})(Deno.core.ops, {}, {})",
            RUNTIME_BUNDLE.trim_end(),
            config.debug,
            memory_limit
        );
        let bundle = runtime
            .execute_script("[exprbox:runtime]", source)
            .map_err(|e| init_failed(format!("runtime bundle failed to load: {e}")))?;

        let exports = {
            let scope = &mut runtime.handle_scope();
            let bundle = v8::Local::new(scope, bundle);
            let bundle = bundle
                .to_object(scope)
                .ok_or_else(|| init_failed("runtime bundle did not return an object"))?;
            for name in REQUIRED_EXPORTS {
                export(scope, bundle, name)?;
            }

            let global = scope.get_current_context().global(scope);
            for (global_name, export_name) in INSTALLED_GLOBALS {
                let f = export(scope, bundle, export_name)?;
                define_readonly(scope, global, global_name, f.into())?;
            }
            freeze_global(scope)?;
            scope.get_current_context().set_allow_generation_from_strings(false);

            let reset = export(scope, bundle, "reset")?;
            let finalize = export(scope, bundle, "finalize")?;
            let describe_error = export(scope, bundle, "describeError")?;
            Exports {
                reset: v8::Global::new(scope, reset),
                finalize: v8::Global::new(scope, finalize),
                describe_error: v8::Global::new(scope, describe_error),
            }
        };

        let watchdog =
            Watchdog::new(runtime.v8_isolate().thread_safe_handle()).map_err(watchdog_failed)?;

        Ok(Self {
            exports,
            scripts: ScriptCache::new(),
            watchdog,
            runtime,
            heap,
            memory_limit,
            generation: 0,
        })
    }

    fn run(
        &mut self,
        code: &str,
        data: &WorkflowData,
        timeout: Duration,
    ) -> (Result<Value, Failure>, ExecutionStats) {
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        {
            let op_state = self.runtime.op_state();
            let mut state = op_state.borrow_mut();
            drop(state.try_take::<ActiveData>());
            state.put(ActiveData::new(generation, data.clone()));
        }
        self.heap.triggered.store(false, Ordering::SeqCst);

        let names: Vec<&str> = data.root_names().collect();
        let (outcome, cache_hit, timed_out) = self.call(&wrap_script(code), generation, &names, timeout);

        let proxy = self
            .runtime
            .op_state()
            .borrow_mut()
            .try_take::<ActiveData>()
            .map(|active| active.stats)
            .unwrap_or_default();
        let stats = ExecutionStats {
            cache_hit,
            value_reads: proxy.value_reads,
            element_reads: proxy.element_reads,
            function_calls: proxy.function_calls,
            duration: Duration::ZERO,
        };

        // --- Check error causes in priority order ---
        if self.heap.triggered.load(Ordering::SeqCst) {
            self.rearm_heap_limit();
            return (Err(Failure::Memory), stats);
        }
        if timed_out {
            return (Err(Failure::Timeout), stats);
        }
        (outcome.map_err(Failure::Error), stats)
    }

    /// Reset the container, compile-or-fetch, run and finalize.
    ///
    /// Returns the outcome, whether the script was cached, and whether the
    /// watchdog fired.
    fn call(
        &mut self,
        wrapped: &str,
        generation: u32,
        names: &[&str],
        timeout: Duration,
    ) -> (Result<Value, ExpressionError>, bool, bool) {
        let scope = &mut self.runtime.handle_scope();
        scope.cancel_terminate_execution();
        let tc = &mut v8::TryCatch::new(scope);

        let compiled = self.scripts.get_or_try_insert_with(wrapped, |source| {
            compile_script(tc, source)
        });
        let (unbound, cache_hit) = match compiled {
            Ok((script, hit)) => (v8::Local::new(tc, script), hit),
            Err(e) => return (Err(e), false, false),
        };

        let reset = v8::Local::new(tc, &self.exports.reset);
        let finalize = v8::Local::new(tc, &self.exports.finalize);
        let describe = v8::Local::new(tc, &self.exports.describe_error);
        let undefined: v8::Local<v8::Value> = v8::undefined(tc).into();
        let generation: v8::Local<v8::Value> = v8::Integer::new_from_unsigned(tc, generation).into();
        let names = match serde_v8::to_v8(tc, names) {
            Ok(names) => names,
            Err(e) => return (Err(expression_error(format!("invalid root names: {e}"))), cache_hit, false),
        };

        let (value, timed_out) = self.watchdog.run(timeout, || {
            let container = reset.call(tc, undefined, &[generation, names])?;
            let script = unbound.bind_to_current_context(tc);
            let function = script.run(tc)?;
            let function = v8::Local::<v8::Function>::try_from(function).ok()?;
            let value = function.call(tc, container, &[])?;
            finalize.call(tc, undefined, &[value])
        });

        if timed_out || tc.has_terminated() {
            tc.cancel_terminate_execution();
            return (Err(expression_error("execution terminated")), cache_hit, timed_out);
        }

        let outcome = match value {
            Some(value) => serde_v8::from_v8::<Value>(tc, value)
                .map_err(|e| expression_error(format!("result could not be copied out: {e}"))),
            None => Err(thrown(tc, describe)),
        };
        (outcome, cache_hit, timed_out)
    }

    /// Restore the configured heap ceiling after the callback raised it.
    fn rearm_heap_limit(&mut self) {
        let isolate = self.runtime.v8_isolate();
        isolate.cancel_terminate_execution();
        isolate.remove_near_heap_limit_callback(near_heap_limit_callback, self.memory_limit);
        isolate.add_near_heap_limit_callback(
            near_heap_limit_callback,
            &*self.heap as *const HeapLimitState as *mut std::ffi::c_void,
        );
        self.heap.triggered.store(false, Ordering::SeqCst);
    }

    /// Release data references, then compiled scripts, then the isolate.
    fn shutdown(mut self) {
        drop(self.runtime.op_state().borrow_mut().try_take::<ActiveData>());
        self.scripts.clear();
        drop(self);
    }
}

fn compile_script(
    scope: &mut v8::TryCatch<v8::HandleScope>,
    source: &str,
) -> Result<v8::Global<v8::UnboundScript>, ExpressionError> {
    let code = v8::String::new(scope, source)
        .ok_or_else(|| expression_error("expression is too large to compile"))?;
    match v8::Script::compile(scope, code, None) {
        Some(script) => {
            let unbound = script.get_unbound_script(scope);
            Ok(v8::Global::new(scope, unbound))
        }
        None => {
            let message = scope
                .exception()
                .map(|e| e.to_rust_string_lossy(scope))
                .unwrap_or_else(|| "expression failed to compile".into());
            scope.reset();
            tracing::warn!(error = %message, "expression failed to compile");
            Err(ExpressionError::syntax(message))
        }
    }
}

/// Turn the exception caught by `scope` into an [`ExpressionError`].
fn thrown(scope: &mut v8::TryCatch<v8::HandleScope>, describe: v8::Local<v8::Function>) -> ExpressionError {
    let Some(exception) = scope.exception() else {
        return expression_error("expression did not produce a result");
    };
    scope.reset();
    let undefined = v8::undefined(scope).into();
    let described = describe
        .call(scope, undefined, &[exception])
        .and_then(|d| serde_v8::from_v8::<RuntimeError>(scope, d).ok());
    match described {
        Some(runtime_error) => runtime_error.into(),
        None => {
            scope.reset();
            expression_error(exception.to_rust_string_lossy(scope))
        }
    }
}

fn export<'s>(
    scope: &mut v8::HandleScope<'s>,
    bundle: v8::Local<v8::Object>,
    name: &str,
) -> Result<v8::Local<'s, v8::Function>, ExpressionError> {
    let missing = || init_failed(format!("runtime bundle is missing export `{name}`"));
    let key = v8::String::new(scope, name).ok_or_else(missing)?;
    let value = bundle.get(scope, key.into()).ok_or_else(missing)?;
    v8::Local::<v8::Function>::try_from(value).map_err(|_| missing())
}

fn define_readonly(
    scope: &mut v8::HandleScope,
    target: v8::Local<v8::Object>,
    name: &str,
    value: v8::Local<v8::Value>,
) -> Result<(), ExpressionError> {
    let key = v8::String::new(scope, name).ok_or_else(|| init_failed(format!("bad global name `{name}`")))?;
    let attrs = v8::PropertyAttribute::READ_ONLY | v8::PropertyAttribute::DONT_DELETE;
    match target.define_own_property(scope, key.into(), value, attrs) {
        Some(true) => Ok(()),
        _ => Err(init_failed(format!("could not install global `{name}`"))),
    }
}

/// Freeze both the global proxy and the real global behind it.
fn freeze_global(scope: &mut v8::HandleScope) -> Result<(), ExpressionError> {
    let global_proxy = scope.get_current_context().global(scope);
    let true_global = global_proxy
        .get_prototype(scope)
        .and_then(|proto| proto.to_object(scope))
        .ok_or_else(|| init_failed("global object has no prototype"))?;
    for target in [true_global, global_proxy] {
        if target.set_integrity_level(scope, v8::IntegrityLevel::Frozen) != Some(true) {
            return Err(init_failed("could not freeze the global object"));
        }
    }
    Ok(())
}

fn init_failed(message: impl Into<String>) -> ExpressionError {
    ExpressionError::other(codes::BRIDGE_INIT_FAILED, message)
}

fn watchdog_failed(err: std::io::Error) -> ExpressionError {
    init_failed(format!("failed to start the watchdog thread: {err}"))
}

fn expression_error(message: impl Into<String>) -> ExpressionError {
    ExpressionError::other(codes::EXPRESSION_ERROR, message)
}

enum Lifecycle {
    Uninitialized,
    Ready(Box<Engine>),
    Disposed,
}

/// A [`Bridge`] backed by one V8 isolate.
///
/// Not `Send`: create and use it on one thread. For parallel evaluation use
/// [`crate::EvaluatorPool`], which gives every worker thread its own bridge.
pub struct IsolateBridge {
    config: BridgeConfig,
    state: Lifecycle,
    last_stats: Option<ExecutionStats>,
}

impl IsolateBridge {
    /// A bridge with `config`. Nothing is allocated until
    /// [`Bridge::initialize`].
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            state: Lifecycle::Uninitialized,
            last_stats: None,
        }
    }

    /// The bridge configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Whether `initialize()` has completed and `dispose()` has not run.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, Lifecycle::Ready(_))
    }

    /// Number of compiled scripts held by the cache.
    pub fn cached_scripts(&self) -> usize {
        match &self.state {
            Lifecycle::Ready(engine) => engine.scripts.len(),
            _ => 0,
        }
    }
}

impl Default for IsolateBridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl Bridge for IsolateBridge {
    fn initialize(&mut self) -> Result<(), ExpressionError> {
        match self.state {
            Lifecycle::Ready(_) => return Ok(()),
            Lifecycle::Disposed => return Err(ExpressionError::disposed()),
            Lifecycle::Uninitialized => {}
        }
        let engine = Engine::boot(&self.config)?;
        self.state = Lifecycle::Ready(Box::new(engine));
        tracing::debug!(
            memory_limit_mb = self.config.memory_limit_mb,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "bridge initialized"
        );
        Ok(())
    }

    fn execute(
        &mut self,
        code: &str,
        data: &WorkflowData,
        options: &ExecuteOptions,
    ) -> Result<Value, ExpressionError> {
        let engine = match &mut self.state {
            Lifecycle::Ready(engine) => engine,
            Lifecycle::Uninitialized => return Err(ExpressionError::not_initialized()),
            Lifecycle::Disposed => return Err(ExpressionError::disposed()),
        };
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let _span = tracing::debug_span!("execute", timeout_ms = timeout.as_millis() as u64).entered();

        let start = Instant::now();
        let (outcome, mut stats) = engine.run(code, data, timeout);
        stats.duration = start.elapsed();
        self.last_stats = Some(stats);

        outcome.map_err(|failure| match failure {
            Failure::Memory => ExpressionError::memory_limit(format!(
                "expression exceeded the {} MB memory limit",
                self.config.memory_limit_mb
            )),
            Failure::Timeout => ExpressionError::timeout(format!(
                "expression timed out after {} ms",
                timeout.as_millis()
            )),
            Failure::Error(e) => e,
        })
    }

    fn dispose(&mut self) {
        if let Lifecycle::Ready(engine) = std::mem::replace(&mut self.state, Lifecycle::Disposed) {
            engine.shutdown();
            tracing::debug!("bridge disposed");
        }
    }

    fn is_disposed(&self) -> bool {
        matches!(self.state, Lifecycle::Disposed)
    }

    fn last_stats(&self) -> Option<ExecutionStats> {
        self.last_stats
    }
}

impl Drop for IsolateBridge {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapper_is_a_function_expression() {
        let wrapped = wrap_script("return 1;");
        assert!(wrapped.starts_with("(function () {\n'use strict';\n"));
        assert!(wrapped.ends_with("\n})"));
    }

    #[test]
    fn bundle_exports_every_required_name() {
        let tail = RUNTIME_BUNDLE
            .rsplit("return RealObject.freeze(")
            .next()
            .unwrap_or_default();
        for name in REQUIRED_EXPORTS {
            assert!(tail.contains(name), "bundle does not export {name}");
        }
    }

    #[test]
    fn watchdog_spawn_failure_is_an_init_failure() {
        let err = watchdog_failed(std::io::Error::other("resource temporarily unavailable"));
        assert_eq!(err.code(), codes::BRIDGE_INIT_FAILED);
        assert!(err.to_string().contains("watchdog"));
    }

    #[test]
    fn lifecycle_without_isolate() {
        let mut bridge = IsolateBridge::default();
        assert!(!bridge.is_ready());
        let err = bridge
            .execute("return 1;", &WorkflowData::default(), &ExecuteOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), codes::BRIDGE_NOT_INITIALIZED);
        bridge.dispose();
        bridge.dispose();
        assert!(bridge.is_disposed());
        let err = bridge
            .execute("return 1;", &WorkflowData::default(), &ExecuteOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), codes::BRIDGE_DISPOSED);
        assert_eq!(bridge.initialize().unwrap_err().code(), codes::BRIDGE_DISPOSED);
    }
}
