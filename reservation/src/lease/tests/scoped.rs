use std::{
    future::pending,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::time::{sleep, timeout};

use super::{new_lease, test_config, SlowReplyStore};
use crate::{
    error::{Error, StoreError, StoreOp},
    lease::{Lease, LeaseConfig, LeaseState, LeaseStatus},
    signal::SignalDispatch,
    store::{MemoryStore, Store},
    tests::StubStore,
};

async fn wait_until_absent(store: &MemoryStore, key: &str) {
    for _ in 0..100 {
        if store.get(key).await.unwrap().is_none() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("lease key {key} still present");
}

#[tokio::test]
async fn test_with_lease_success() {
    let store = MemoryStore::new();
    let dispatch = SignalDispatch::new();
    let lease = new_lease(store.clone(), "test_worker", &dispatch);
    assert!(store.get(lease.key()).await.unwrap().is_none());

    let result = lease
        .with_lease(false, |status| {
            assert_eq!(status, LeaseStatus::Held);
            async {
                assert_eq!(
                    store.get(lease.key()).await.unwrap().as_deref(),
                    Some(lease.owner_token())
                );
                42
            }
        })
        .await
        .unwrap();

    assert_eq!(result, 42);
    assert!(store.get(lease.key()).await.unwrap().is_none());
    assert_eq!(lease.state().await, LeaseState::Released);
}

#[tokio::test]
async fn test_with_lease_contended() {
    let store = MemoryStore::new();
    let dispatch = SignalDispatch::new();
    let lease = new_lease(store.clone(), "test_worker", &dispatch);
    store
        .try_set_with_expiry(lease.key(), "MOCK", Duration::from_secs(60))
        .await
        .unwrap();

    let held = lease
        .with_lease(false, |status| async move {
            assert_eq!(
                status,
                LeaseStatus::Contended {
                    holder: Some("MOCK".to_owned())
                }
            );
            status.is_held()
        })
        .await
        .unwrap();

    assert!(!held, "reserved lock, while locked by someone else");
    assert_eq!(store.get(lease.key()).await.unwrap().as_deref(), Some("MOCK"));
    assert_eq!(lease.state().await, LeaseState::Unheld);
}

#[tokio::test]
async fn test_with_lease_releases_on_body_error() {
    let store = MemoryStore::new();
    let dispatch = SignalDispatch::new();
    let lease = new_lease(store.clone(), "test_worker", &dispatch);

    let result = lease
        .with_lease(false, |_status| async {
            assert_eq!(
                store.get(lease.key()).await.unwrap().as_deref(),
                Some(lease.owner_token())
            );
            Err::<(), _>("error within with")
        })
        .await
        .unwrap();

    assert_eq!(result, Err("error within with"));
    assert!(store.get(lease.key()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_with_lease_releases_on_panic() {
    let store = MemoryStore::new();
    let dispatch = SignalDispatch::new();
    let lease = Arc::new(new_lease(store.clone(), "test_worker", &dispatch));
    let key = lease.key().to_owned();

    let task_lease = lease.clone();
    let res = tokio::spawn(async move {
        task_lease
            .with_lease(false, |_status| async { panic!("panic within with") })
            .await
    })
    .await;
    assert!(res.unwrap_err().is_panic());

    wait_until_absent(&store, &key).await;
    assert_eq!(lease.state().await, LeaseState::Released);
}

#[tokio::test]
async fn test_with_lease_releases_when_cancelled() {
    let store = MemoryStore::new();
    let dispatch = SignalDispatch::new();
    let lease = new_lease(store.clone(), "test_worker", &dispatch);

    let res = timeout(
        Duration::from_millis(50),
        lease.with_lease(false, |_status| pending::<()>()),
    )
    .await;
    assert!(res.is_err());

    wait_until_absent(&store, lease.key()).await;
    assert_eq!(lease.state().await, LeaseState::Released);
}

#[tokio::test(start_paused = true)]
async fn test_with_lease_wait() {
    let store = MemoryStore::new();
    let dispatch = SignalDispatch::new();
    let config = LeaseConfig {
        heartbeat: Duration::from_millis(200),
        ..test_config()
    };
    let lease = Lease::with_dispatch(store.clone(), "test_system", "test_worker", config, &dispatch)
        .unwrap();
    store
        .try_set_with_expiry(lease.key(), "MOCK", Duration::from_secs(60))
        .await
        .unwrap();

    let deleter = store.clone();
    let key = lease.key().to_owned();
    tokio::spawn(async move {
        sleep(Duration::from_secs(1)).await;
        deleter.delete(&key).await.unwrap();
    });

    lease
        .with_lease(true, |status| {
            assert!(status.is_held());
            async {
                // Give the heartbeat a chance to run.
                sleep(Duration::from_secs(1)).await;
                assert_eq!(
                    store.get(lease.key()).await.unwrap().as_deref(),
                    Some(lease.owner_token())
                );
            }
        })
        .await
        .unwrap();

    assert!(store.get(lease.key()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_with_lease_store_error_skips_body() {
    let dispatch = SignalDispatch::new();
    let lease = new_lease(StubStore::failing(), "test_worker", &dispatch);
    let ran = AtomicBool::new(false);

    for wait in [false, true] {
        let err = lease
            .with_lease(wait, |_status| async {
                ran.store(true, Ordering::SeqCst);
            })
            .await
            .unwrap_err();
        assert_eq!(err.as_store().map(|e| e.op()), Some(StoreOp::SetIfAbsent));
    }
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(lease.state().await, LeaseState::Unheld);
}

#[tokio::test]
async fn test_with_lease_release_error_does_not_mask_body() {
    let mut store = StubStore::new();
    let deletes = Arc::new(AtomicUsize::new(0));
    let deletes_clone = deletes.clone();
    store.try_set_with_expiry_result =
        Arc::new(Mutex::new(|_key: &str, _value: &str, _ttl: Duration| Ok(true)));
    store.delete_result = Arc::new(Mutex::new(move |_key: &str| {
        deletes_clone.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::new(StoreOp::Delete, "connection reset"))
    }));

    let dispatch = SignalDispatch::new();
    let lease = new_lease(store, "test_worker", &dispatch);

    let result = lease
        .with_lease(false, |_status| async { Err::<(), _>("body failed") })
        .await
        .unwrap();
    assert_eq!(result, Err("body failed"));

    let result = lease
        .with_lease(false, |_status| async { "done" })
        .await
        .unwrap();
    assert_eq!(result, "done");

    assert_eq!(deletes.load(Ordering::SeqCst), 2);
    assert_eq!(lease.state().await, LeaseState::Released);
}

#[tokio::test]
async fn test_with_lease_on_held_lease_is_rejected() {
    let store = MemoryStore::new();
    let dispatch = SignalDispatch::new();
    let lease = new_lease(store.clone(), "test_worker", &dispatch);
    assert!(lease.try_acquire().await.unwrap());

    let err = lease
        .with_lease(false, |_status| async {})
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Reentrant { .. }));

    // The existing hold is untouched.
    assert_eq!(lease.state().await, LeaseState::Held);
    assert_eq!(
        store.get(lease.key()).await.unwrap().as_deref(),
        Some(lease.owner_token())
    );
    lease.release().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_with_lease_until_cancelled_while_waiting() {
    let store = MemoryStore::new();
    let dispatch = SignalDispatch::new();
    let lease = new_lease(store.clone(), "test_worker", &dispatch);
    store
        .try_set_with_expiry(lease.key(), "MOCK", Duration::from_secs(60))
        .await
        .unwrap();

    let cancel = tokio_util::sync::CancellationToken::new();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(2)).await;
        task_cancel.cancel();
    });

    let ran = AtomicBool::new(false);
    let err = lease
        .with_lease_until(&cancel, true, |_status| async {
            ran.store(true, Ordering::SeqCst);
        })
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(store.get(lease.key()).await.unwrap().as_deref(), Some("MOCK"));
}

#[tokio::test(start_paused = true)]
async fn test_with_lease_until_cancelled_mid_attempt_leaves_no_key() {
    let store = MemoryStore::new();
    let slow = SlowReplyStore {
        inner: store.clone(),
        delay: Duration::from_millis(100),
    };
    let dispatch = SignalDispatch::new();
    let lease = new_lease(slow, "test_worker", &dispatch);

    let cancel = tokio_util::sync::CancellationToken::new();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(50)).await;
        task_cancel.cancel();
    });

    let ran = AtomicBool::new(false);
    let err = lease
        .with_lease_until(&cancel, true, |_status| async {
            ran.store(true, Ordering::SeqCst);
        })
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(!ran.load(Ordering::SeqCst));
    assert!(store.get(lease.key()).await.unwrap().is_none());
    assert_ne!(lease.state().await, LeaseState::Held);
}
