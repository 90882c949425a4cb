//! End-to-end behavior of the session pool: ordering, isolation, eviction.

use convoy::{create_task_pool, PoolConfig, TaskPool};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Instant};

fn pool_with(aging: Duration, capacity: usize) -> TaskPool<&'static str> {
    create_task_pool(
        &PoolConfig::default()
            .with_nat_timeout(aging)
            .with_queue_capacity(capacity),
    )
    .unwrap()
}

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let result = timeout(Duration::from_secs(2), async {
        while !cond() {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expired_session_is_replaced_by_a_fresh_one() {
    let pool = pool_with(Duration::from_millis(50), 2);
    let log = Arc::new(Mutex::new(Vec::new()));

    for name in ["t1", "t2"] {
        let log = Arc::clone(&log);
        pool.submit("A", async move { log.lock().push(name) }).await;
    }
    eventually("t1 and t2", || log.lock().len() == 2).await;
    assert_eq!(*log.lock(), vec!["t1", "t2"]);

    sleep(Duration::from_millis(100)).await;
    eventually("eviction of A", || !pool.contains(&"A")).await;

    let t3_log = Arc::clone(&log);
    pool.submit("A", async move { t3_log.lock().push("t3") }).await;
    eventually("t3", || log.lock().len() == 3).await;

    let snap = pool.snapshot();
    assert_eq!(snap.sessions_created, 2);
    assert_eq!(snap.sessions_evicted, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_keys_get_two_sessions() {
    let pool = pool_with(Duration::from_secs(5), 8);
    let done = Arc::new(AtomicUsize::new(0));

    for key in ["A", "B"] {
        let done = Arc::clone(&done);
        pool.submit(key, async move {
            done.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    }

    eventually("both tasks", || done.load(Ordering::SeqCst) == 2).await;
    assert_eq!(pool.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn steady_burst_is_never_evicted() {
    let pool = pool_with(Duration::from_millis(50), 4);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let started = Instant::now();
    let mut seq = 0;
    while started.elapsed() < Duration::from_millis(200) {
        let seen = Arc::clone(&seen);
        pool.submit("A", async move { seen.lock().push(seq) }).await;
        seq += 1;
        sleep(Duration::from_millis(10)).await;
        assert!(pool.contains(&"A"));
    }

    eventually("burst to finish", || seen.lock().len() == seq).await;
    assert_eq!(*seen.lock(), (0..seq).collect::<Vec<_>>());
    let snap = pool.snapshot();
    assert_eq!(snap.sessions_created, 1);
    assert_eq!(snap.sessions_evicted, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_key_tasks_never_overlap() {
    let pool = pool_with(Duration::from_secs(5), 4);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let mut submitters = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        let (active, peak, done) = (Arc::clone(&active), Arc::clone(&peak), Arc::clone(&done));
        submitters.push(tokio::spawn(async move {
            for _ in 0..10 {
                let (active, peak, done) =
                    (Arc::clone(&active), Arc::clone(&peak), Arc::clone(&done));
                pool.submit("same", async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(1)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .await;
            }
        }));
    }
    for s in submitters {
        s.await.unwrap();
    }

    eventually("all tasks", || done.load(Ordering::SeqCst) == 40).await;
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(pool.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_keys_run_concurrently() {
    let pool = pool_with(Duration::from_secs(5), 4);
    let (a_tx, a_rx) = oneshot::channel::<()>();
    let b_done = Arc::new(AtomicUsize::new(0));

    // A is parked until B has run, which only works if B has its own worker.
    pool.submit("A", async move {
        let _ = a_rx.await;
    })
    .await;
    let flag = Arc::clone(&b_done);
    pool.submit("B", async move {
        flag.fetch_add(1, Ordering::SeqCst);
        let _ = a_tx.send(());
    })
    .await;

    eventually("B to unblock A", || b_done.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn evicted_buffers_are_reused_under_key_churn() {
    let pool = pool_with(Duration::from_millis(20), 8);

    for key in ["k1", "k2", "k3"] {
        pool.submit_fn(key, || {}).await;
    }
    eventually("first wave to idle out", || {
        pool.is_empty() && pool.idle_buffers() == 3
    })
    .await;

    for key in ["k4", "k5"] {
        pool.submit_fn(key, || {}).await;
    }
    let snap = pool.snapshot();
    assert_eq!(snap.buffers_allocated, 3);
    assert_eq!(snap.buffers_reused, 2);
    assert_eq!(pool.idle_buffers(), 1);
}
