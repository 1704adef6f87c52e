//! Evaluator pool behaviour with real worker isolates.

use std::sync::Arc;
use std::time::Duration;

use exprbox_error::codes;
use exprbox_sandbox::{BridgeConfig, EvaluateOptions, EvaluatorPool, PoolConfig, WorkflowData};
use serde_json::json;

fn pool(workers: usize) -> EvaluatorPool {
    EvaluatorPool::new(PoolConfig {
        workers,
        bridge: BridgeConfig::default(),
    })
    .unwrap()
}

fn item(n: i64) -> WorkflowData {
    WorkflowData::from_json(json!({ "$json": { "n": n } })).unwrap()
}

#[tokio::test]
async fn evaluates_on_a_worker() {
    let pool = pool(1);
    assert_eq!(pool.size(), 1);
    let out = pool
        .evaluate("$json.n * 2", item(21), EvaluateOptions::default())
        .await
        .unwrap();
    assert_eq!(out, json!(42));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_evaluations_all_complete() {
    let pool = Arc::new(pool(3));
    let mut handles = Vec::new();
    for n in 0..12 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            pool.evaluate("$json.n + 100", item(n), EvaluateOptions::default())
                .await
        }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }
    let expected: Vec<_> = (0..12).map(|n| json!(n + 100)).collect();
    assert_eq!(results, expected);
}

#[tokio::test]
async fn errors_come_back_with_context() {
    let pool = pool(1);
    let options = EvaluateOptions {
        timeout: Some(Duration::from_millis(100)),
        node_id: Some("Loop".into()),
        ..EvaluateOptions::default()
    };
    let err = pool
        .evaluate("while (true) {}", WorkflowData::default(), options)
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::TIMEOUT);
    assert_eq!(err.context().node_id.as_deref(), Some("Loop"));

    // The worker survives the timeout.
    let out = pool
        .evaluate("$json.n", item(5), EvaluateOptions::default())
        .await
        .unwrap();
    assert_eq!(out, json!(5));
}

#[tokio::test]
async fn shutdown_rejects_new_work() {
    let pool = pool(2);
    pool.shutdown();
    pool.shutdown();
    let err = pool
        .evaluate("1", WorkflowData::default(), EvaluateOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::BRIDGE_DISPOSED);
}
