//! Pool of evaluator threads, one isolate each.
//!
//! A bridge serves one call at a time and its isolate cannot leave the thread
//! that created it, so parallelism comes from several bridges on several
//! threads. Callers stay async: [`EvaluatorPool::evaluate`] waits for a permit,
//! hands the job to whichever worker is idle, and awaits the answer on a
//! oneshot channel.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use exprbox_error::{codes, ExpressionError};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{oneshot, Semaphore};

use crate::bridge::BridgeConfig;
use crate::data::WorkflowData;
use crate::engine::IsolateBridge;
use crate::evaluator::{EvaluateOptions, Evaluator};
use crate::guard::GuardHooks;
#[cfg(feature = "metrics")]
use crate::metrics::EvaluatorMetrics;

/// Configuration for the evaluator pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads (and isolates).
    pub workers: usize,
    /// Configuration for every worker's bridge.
    pub bridge: BridgeConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            bridge: BridgeConfig::default(),
        }
    }
}

struct Job {
    expression: String,
    data: WorkflowData,
    options: EvaluateOptions,
    reply: oneshot::Sender<Result<Value, ExpressionError>>,
}

/// Extra wiring applied to every worker's evaluator.
#[derive(Default, Clone)]
struct WorkerSetup {
    hooks: GuardHooks,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<EvaluatorMetrics>>,
}

impl WorkerSetup {
    fn evaluator(&self, config: &BridgeConfig) -> Evaluator<IsolateBridge> {
        let evaluator = Evaluator::new(IsolateBridge::new(config.clone())).with_hooks(self.hooks.clone());
        #[cfg(feature = "metrics")]
        let evaluator = match &self.metrics {
            Some(metrics) => evaluator.with_metrics(Arc::clone(metrics)),
            None => evaluator,
        };
        evaluator
    }
}

/// A fixed set of evaluator threads behind an async front.
pub struct EvaluatorPool {
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl EvaluatorPool {
    /// Start `config.workers` workers and wait until every isolate is up.
    pub fn new(config: PoolConfig) -> Result<Self, ExpressionError> {
        Self::spawn(config, WorkerSetup::default())
    }

    /// Like [`EvaluatorPool::new`], running `hooks` during guard rewriting.
    pub fn with_hooks(config: PoolConfig, hooks: GuardHooks) -> Result<Self, ExpressionError> {
        Self::spawn(
            config,
            WorkerSetup {
                hooks,
                ..WorkerSetup::default()
            },
        )
    }

    /// Like [`EvaluatorPool::with_hooks`], recording into `metrics`.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(
        config: PoolConfig,
        hooks: GuardHooks,
        metrics: Arc<EvaluatorMetrics>,
    ) -> Result<Self, ExpressionError> {
        Self::spawn(
            config,
            WorkerSetup {
                hooks,
                metrics: Some(metrics),
            },
        )
    }

    fn spawn(config: PoolConfig, setup: WorkerSetup) -> Result<Self, ExpressionError> {
        let size = config.workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), ExpressionError>>();

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let rx = Arc::clone(&rx);
            let ready = ready_tx.clone();
            let bridge_config = config.bridge.clone();
            let setup = setup.clone();
            let handle = std::thread::Builder::new()
                .name(format!("exprbox-worker-{id}"))
                .spawn(move || {
                    let mut evaluator = setup.evaluator(&bridge_config);
                    let init = evaluator.initialize();
                    let ok = init.is_ok();
                    let _ = ready.send(init);
                    if ok {
                        work(id, &rx, &mut evaluator);
                    }
                    evaluator.dispose();
                })
                .map_err(|e| {
                    ExpressionError::other(codes::BRIDGE_INIT_FAILED, format!("failed to spawn worker: {e}"))
                })?;
            workers.push(handle);
        }
        drop(ready_tx);

        let pool = Self {
            jobs: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            permits: Arc::new(Semaphore::new(size)),
            size,
        };
        for _ in 0..size {
            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(ExpressionError::other(
                        codes::BRIDGE_INIT_FAILED,
                        "worker exited during startup",
                    ))
                }
            }
        }
        tracing::info!(workers = size, "evaluator pool started");
        Ok(pool)
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Evaluate `expression` on the next idle worker.
    pub async fn evaluate(
        &self,
        expression: impl Into<String>,
        data: WorkflowData,
        options: EvaluateOptions,
    ) -> Result<Value, ExpressionError> {
        let _permit = self.permits.acquire().await.map_err(|_| shut_down())?;
        let sender = self.jobs.lock().clone().ok_or_else(shut_down)?;
        let (reply, answer) = oneshot::channel();
        sender
            .send(Job {
                expression: expression.into(),
                data,
                options,
                reply,
            })
            .map_err(|_| shut_down())?;
        answer.await.map_err(|_| {
            ExpressionError::other(codes::EXPRESSION_ERROR, "worker exited before answering")
        })?
    }

    /// Stop accepting work, let workers finish their current job and join
    /// them. Blocks the calling thread. Idempotent.
    pub fn shutdown(&self) {
        self.permits.close();
        drop(self.jobs.lock().take());
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        if workers.is_empty() {
            return;
        }
        for handle in workers {
            if handle.join().is_err() {
                tracing::warn!("evaluator worker panicked");
            }
        }
        tracing::info!("evaluator pool shut down");
    }
}

impl Drop for EvaluatorPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn work(id: usize, jobs: &Mutex<mpsc::Receiver<Job>>, evaluator: &mut Evaluator<IsolateBridge>) {
    loop {
        let job = jobs.lock().recv();
        let Ok(job) = job else {
            tracing::debug!(worker = id, "job channel closed");
            return;
        };
        let result = evaluator.evaluate(&job.expression, &job.data, &job.options);
        // The caller may have gone away; nothing to do then.
        let _ = job.reply.send(result);
    }
}

fn shut_down() -> ExpressionError {
    ExpressionError::other(codes::BRIDGE_DISPOSED, "evaluator pool has been shut down")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_workers_is_at_least_one() {
        let config = PoolConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.bridge, BridgeConfig::default());
    }

    #[test]
    fn shutdown_error_is_coded() {
        assert_eq!(shut_down().code(), codes::BRIDGE_DISPOSED);
    }
}
