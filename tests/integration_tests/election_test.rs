//! Lease contention between several nodes sharing one store
//!
//! All tests run on a paused clock, so TTLs and backoffs advance
//! deterministically.

use crate::common::{counted_node, fast_election_config, leader_count, Hooks};
use replicore::election::Node;
use replicore::store::{CoordinationStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const KEY: &str = "it:leader";

async fn start_cluster(store: &Arc<MemoryStore>, n: usize) -> (Vec<Node>, Vec<Arc<Hooks>>) {
    let mut nodes = Vec::with_capacity(n);
    let mut hooks = Vec::with_capacity(n);
    for i in 0..n {
        let (node, h) = counted_node(store.clone(), fast_election_config(KEY), &format!("node-{i}"));
        node.start().await.unwrap();
        nodes.push(node);
        hooks.push(h);
    }
    (nodes, hooks)
}

async fn stop_all(nodes: &[Node]) {
    for node in nodes {
        node.stop().await.unwrap();
    }
}

// ============================================================================
// Exclusivity
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_at_most_one_leader_at_every_sample() {
    let store = Arc::new(MemoryStore::new());
    let (nodes, hooks) = start_cluster(&store, 5).await;

    for _ in 0..400 {
        sleep(Duration::from_millis(5)).await;
        assert!(leader_count(&nodes) <= 1);
    }

    assert_eq!(leader_count(&nodes), 1);
    let total_elected: usize = hooks.iter().map(|h| h.elected()).sum();
    assert_eq!(total_elected, 1, "lease renewals must keep a single tenure");
    assert!(hooks.iter().all(|h| h.started() == 1));

    let leader = nodes.iter().find(|n| n.is_leader()).unwrap();
    assert_eq!(store.get(KEY).await.unwrap().as_deref(), Some(leader.id()));

    stop_all(&nodes).await;
    assert_eq!(leader_count(&nodes), 0);
}

#[tokio::test(start_paused = true)]
async fn test_leader_stop_hands_over() {
    let store = Arc::new(MemoryStore::new());
    let (mut nodes, mut hooks) = start_cluster(&store, 3).await;
    sleep(Duration::from_millis(50)).await;

    let idx = nodes.iter().position(|n| n.is_leader()).unwrap();
    let old = nodes.remove(idx);
    let old_hooks = hooks.remove(idx);
    assert_eq!(old.current_term().unwrap().generation, Some(1));

    old.stop().await.unwrap();
    assert_eq!(old_hooks.renounced(), 1);
    assert!(!old.is_leader());

    // Released lease is free after at most one wait period
    sleep(Duration::from_millis(50)).await;
    assert_eq!(leader_count(&nodes), 1);

    let new_leader = nodes.iter().find(|n| n.is_leader()).unwrap();
    assert_ne!(new_leader.id(), old.id());
    assert_eq!(new_leader.current_term().unwrap().generation, Some(2));

    stop_all(&nodes).await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_start_stop_cycles() {
    let store = Arc::new(MemoryStore::new());
    let (node, hooks) = counted_node(store.clone(), fast_election_config(KEY), "cycler");

    for cycle in 1..=3u64 {
        node.start().await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert!(node.is_leader());
        assert_eq!(node.current_term().unwrap().generation, Some(cycle));

        node.stop().await.unwrap();
        assert!(!node.is_leader());
        assert_eq!(store.get(KEY).await.unwrap(), None);
    }

    assert_eq!(hooks.started(), 3);
    assert_eq!(hooks.elected(), 3);
    assert_eq!(hooks.renounced(), 3);
}

// ============================================================================
// Lease loss
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_hijacked_lease_makes_leader_step_down() {
    let store = Arc::new(MemoryStore::new());
    let (nodes, hooks) = start_cluster(&store, 2).await;
    sleep(Duration::from_millis(10)).await;

    let idx = nodes.iter().position(|n| n.is_leader()).unwrap();
    store.force_set(KEY, "intruder", Duration::from_secs(10)).await;

    // Next renewal (ttl / 2) notices the foreign holder
    sleep(Duration::from_millis(150)).await;
    assert_eq!(leader_count(&nodes), 0);
    assert_eq!(hooks[idx].renounced(), 1);

    store.force_delete(KEY).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(leader_count(&nodes), 1);

    stop_all(&nodes).await;
}

// ============================================================================
// Store outages
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unreachable_store_backs_off_then_elects() {
    let store = Arc::new(MemoryStore::new());
    store.set_available(false);
    let (node, hooks) = counted_node(store.clone(), fast_election_config(KEY), "patient");

    node.start().await.unwrap();
    sleep(Duration::from_millis(1_600)).await;

    // Attempts at 0, 500, 1000 and 1500ms rather than every `wait`
    let calls = store.call_count();
    assert!((3..=4).contains(&calls), "unexpected attempt count {calls}");
    assert!(!node.is_leader());
    assert_eq!(hooks.started(), 1);
    assert_eq!(hooks.elected(), 0);

    store.set_available(true);
    sleep(Duration::from_millis(600)).await;
    assert!(node.is_leader());
    assert_eq!(hooks.elected(), 1);

    node.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_outage_while_leading_steps_down_and_recovers() {
    let store = Arc::new(MemoryStore::new());
    let (node, hooks) = counted_node(store.clone(), fast_election_config(KEY), "leader");

    node.start().await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert!(node.is_leader());

    store.set_available(false);
    sleep(Duration::from_millis(350)).await;
    assert!(!node.is_leader());
    assert_eq!(hooks.renounced(), 1);

    store.set_available(true);
    sleep(Duration::from_millis(600)).await;
    assert!(node.is_leader());
    assert_eq!(hooks.elected(), 2);
    assert_eq!(*hooks.last_generation.lock().unwrap(), Some(2));

    node.stop().await.unwrap();
    assert_eq!(hooks.renounced(), 2);
}
