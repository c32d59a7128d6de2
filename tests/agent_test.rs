//! Integration tests for `Agent`.
//!
//! Covers concurrent updates from tokio tasks and OS threads, atomic
//! get-and-update, fail-fast rejection, and async updates holding the agent.

use actorish_enqueuer::config::EnqueuerConfig;
use actorish_enqueuer::runtime::TokioSpawner;
use actorish_enqueuer::{Agent, EnqueuerError, TaskError};
use std::collections::HashSet;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_are_not_lost() {
    let counter = Agent::new(0_u64).unwrap();
    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let counter = counter.clone();
            tokio::spawn(async move { counter.update(|n| n + 1).unwrap() })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(counter.get().unwrap().await.unwrap(), 100);
}

#[test]
fn test_updates_from_plain_threads() {
    let executor = TokioSpawner::with_worker_threads(2).unwrap().into_executor();
    let counter =
        Agent::with_config(0_u64, &EnqueuerConfig::new().with_executor(executor)).unwrap();

    let threads: Vec<_> = (0..10)
        .map(|_| {
            let counter = counter.clone();
            std::thread::spawn(move || {
                for _ in 0..10 {
                    counter.update(|n| n + 1).unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(counter.get().unwrap().wait().unwrap(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_get_and_update_hands_out_distinct_values() {
    let tickets = Agent::new(0_u32).unwrap();
    let callers: Vec<_> = (0..5)
        .map(|_| {
            let tickets = tickets.clone();
            tokio::spawn(async move {
                let issued: Vec<_> = (0..10)
                    .map(|_| tickets.get_and_update(|n| (n + 1, *n)).unwrap())
                    .collect();
                let mut values = Vec::new();
                for deferred in issued {
                    values.push(deferred.await.unwrap());
                }
                values
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for caller in callers {
        let values = caller.await.unwrap();
        // Each caller's own tickets follow its acceptance order.
        assert!(values.windows(2).all(|pair| pair[0] < pair[1]));
        for value in values {
            assert!(seen.insert(value));
        }
    }
    assert_eq!(seen, (0..50).collect::<HashSet<_>>());
    assert_eq!(tickets.get().unwrap().await.unwrap(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_update_holds_the_agent() {
    let log = Agent::new(Vec::<&'static str>::new()).unwrap();
    log.update_async(|v| {
        let mut v = v.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            v.push("slow");
            v
        }
    })
    .unwrap();
    log.update(|v| {
        let mut v = v.clone();
        v.push("fast");
        v
    })
    .unwrap();

    let len = log.get_async(|v| {
        let len = v.len();
        async move { len }
    });
    assert_eq!(len.unwrap().await.unwrap(), 2);
    assert_eq!(log.get().unwrap().await.unwrap(), vec!["slow", "fast"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_agent_rejects_immediately() {
    let agent = Agent::with_config(0_u8, &EnqueuerConfig::new().with_name("tiny").with_capacity(1))
        .unwrap();
    // Hold the agent so queued commands cannot drain.
    let (release, hold) = tokio::sync::oneshot::channel::<()>();
    agent
        .update_async(move |n| {
            let n = *n;
            async move {
                let _ = hold.await;
                n
            }
        })
        .unwrap();
    while agent.stats().queued > 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    agent.update(|n| n + 1).unwrap();
    let err = agent.update(|n| n + 1).unwrap_err();
    assert!(matches!(err, EnqueuerError::Rejected { ref name, capacity: 1 } if name == "tiny"));

    release.send(()).unwrap();
    while agent.stats().queued > 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(agent.get().unwrap().await.unwrap(), 1);
}

#[tokio::test]
async fn test_failing_async_mapper_reports_panic() {
    let agent = Agent::new(3_i64).unwrap();
    let failed = agent
        .get_async(|n| {
            let n = *n;
            async move {
                assert!(n > 10, "too small");
                n
            }
        })
        .unwrap();
    assert!(matches!(failed.await, Err(TaskError::Panicked(msg)) if msg.contains("too small")));
    assert_eq!(agent.get().unwrap().await.unwrap(), 3);
}
