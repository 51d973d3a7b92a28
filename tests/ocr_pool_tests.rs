mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{pool, ScriptedFactory};
use docsift::error::AppError;
use docsift::services::Deadline;

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_workers_are_handed_out_round_robin() {
    let factory = Arc::new(ScriptedFactory::default());
    let pool = pool(Arc::clone(&factory), 3, CALL_TIMEOUT);

    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(pool.acquire().await.unwrap().id());
    }
    assert_eq!(ids, vec![0, 1, 2, 0, 1, 2]);

    for page in 1..=6 {
        let text = pool.recognize(format!("page-{page}").into_bytes(), None).await.unwrap();
        assert_eq!(text, format!("text of page-{page}"));
    }
    assert_eq!(pool.worker_loads(), vec![2, 2, 2]);
    assert_eq!(pool.calls(), 6);
}

#[tokio::test]
async fn test_concurrent_init_creates_each_worker_once() {
    let factory = Arc::new(ScriptedFactory::default().starting_after(Duration::from_millis(20)));
    let pool = pool(Arc::clone(&factory), 4, CALL_TIMEOUT);
    assert!(!pool.is_initialized());

    let results = futures::future::join_all((0..10).map(|_| pool.init())).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(factory.created(), 4);
    assert!(pool.is_initialized());

    pool.init().await.unwrap();
    assert_eq!(factory.created(), 4);
}

#[tokio::test]
async fn test_init_failure_reaches_callers() {
    let factory = Arc::new(ScriptedFactory::failing());
    let pool = pool(factory, 2, CALL_TIMEOUT);

    let err = pool.recognize(b"page-1".to_vec(), None).await.unwrap_err();
    assert!(matches!(err, AppError::WorkerPoolInit { .. }));
    assert_eq!(err.error_code(), "WORKER_POOL_INIT_FAILURE");
    assert!(!pool.is_initialized());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_failed_init() {
    let factory = Arc::new(ScriptedFactory::failing().starting_after(Duration::from_millis(20)));
    let pool = pool(Arc::clone(&factory), 1, CALL_TIMEOUT);

    let results = futures::future::join_all((0..5).map(|_| pool.init())).await;
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(AppError::WorkerPoolInit { .. }))));
    assert_eq!(factory.created(), 1);
    assert!(!pool.is_initialized());

    // once the failure has settled, the next caller tries again
    assert!(pool.init().await.is_err());
    assert_eq!(factory.created(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_calls_bounded_by_pool_size() {
    let factory = Arc::new(ScriptedFactory::with_delay(Duration::from_millis(500)));
    let pool = pool(Arc::clone(&factory), 2, CALL_TIMEOUT);

    let results = futures::future::join_all(
        (1..=6).map(|page| pool.recognize(format!("page-{page}").into_bytes(), None)),
    )
    .await;

    assert!(results.iter().all(|r| r.as_ref().is_ok_and(|t| !t.is_empty())));
    assert_eq!(factory.max_in_flight(), 2);
    assert_eq!(pool.worker_loads().iter().sum::<u64>(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_call_timeout_yields_empty_text() {
    let factory = Arc::new(ScriptedFactory::with_delay(Duration::from_secs(10)));
    let pool = pool(factory, 1, Duration::from_secs(2));

    let text = pool.recognize(b"page-1".to_vec(), None).await.unwrap();
    assert_eq!(text, "");
}

#[tokio::test(start_paused = true)]
async fn test_deadline_caps_each_call() {
    let factory = Arc::new(ScriptedFactory::with_delay(Duration::from_secs(3)));
    let pool = pool(factory, 1, CALL_TIMEOUT);
    pool.init().await.unwrap();

    let deadline = Deadline::after(Duration::from_secs(1));
    let started = tokio::time::Instant::now();
    let text = pool.recognize(b"page-1".to_vec(), Some(&deadline)).await.unwrap();

    assert_eq!(text, "");
    assert!(started.elapsed() <= Duration::from_secs(1) + Duration::from_millis(10));
}

#[tokio::test]
async fn test_expired_deadline_skips_the_engine() {
    let factory = Arc::new(ScriptedFactory::default());
    let pool = pool(factory, 2, CALL_TIMEOUT);

    let deadline = Deadline::after(Duration::ZERO);
    let text = pool.recognize(b"page-1".to_vec(), Some(&deadline)).await.unwrap();

    assert_eq!(text, "");
    assert_eq!(pool.worker_loads(), vec![0, 0]);
}

#[tokio::test]
async fn test_engine_failure_leaves_pool_usable() {
    let factory = Arc::new(ScriptedFactory::default());
    let pool = pool(factory, 1, CALL_TIMEOUT);

    let err = pool.recognize(b"bad".to_vec(), None).await.unwrap_err();
    assert!(matches!(err, AppError::OcrError { .. }));

    let text = pool.recognize(b"page-2".to_vec(), None).await.unwrap();
    assert_eq!(text, "text of page-2");
}

#[tokio::test]
async fn test_shutdown_rejects_later_work() {
    let factory = Arc::new(ScriptedFactory::default());
    let pool = pool(factory, 2, CALL_TIMEOUT);
    pool.init().await.unwrap();

    pool.shutdown().await;

    assert!(pool.recognize(b"page-1".to_vec(), None).await.is_err());
    assert!(matches!(
        pool.init().await,
        Err(AppError::ServiceUnavailable { .. })
    ));
}
