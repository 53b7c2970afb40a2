use std::sync::Arc;

use flint_core::config::AcquirePolicy;
use flint_core::peer::{Peer, PeerAvailability, PeerSet, SelectionStrategy};
use flint_core::time::ManualClock;

fn set_of(strategy: SelectionStrategy, peers: Vec<Peer>) -> PeerSet {
    PeerSet::new(
        peers,
        strategy,
        AcquirePolicy::default(),
        Arc::new(ManualClock::new()),
    )
}

fn three_peers() -> Vec<Peer> {
    vec![
        Peer::new("10.0.0.1:5000"),
        Peer::new("10.0.0.2:5000"),
        Peer::new("10.0.0.3:5000"),
    ]
}

#[test]
fn round_robin_visits_peers_in_registration_order() {
    let set = set_of(SelectionStrategy::RoundRobin, three_peers());

    let mut visited = Vec::new();
    for _ in 0..6 {
        let lease = set.try_acquire().unwrap();
        visited.push(lease.address().to_string());
        // 立即归还，游标推进不受在途影响。
    }
    assert_eq!(
        visited,
        vec![
            "10.0.0.1:5000",
            "10.0.0.2:5000",
            "10.0.0.3:5000",
            "10.0.0.1:5000",
            "10.0.0.2:5000",
            "10.0.0.3:5000",
        ]
    );
}

#[test]
fn round_robin_skips_unacquirable_peers() {
    let set = set_of(SelectionStrategy::RoundRobin, three_peers());
    set.peers()[0].set_availability(PeerAvailability::Draining);

    for _ in 0..4 {
        let lease = set.try_acquire().unwrap();
        assert_ne!(lease.address(), "10.0.0.1:5000");
    }
}

#[test]
fn fewest_pending_picks_the_least_loaded_available_peer() {
    let set = set_of(SelectionStrategy::FewestPending, three_peers());

    // 人为制造 2/1/0 的在途阶梯。
    let _hold_a1 = set.peers()[0].try_acquire().unwrap();
    let _hold_a2 = set.peers()[0].try_acquire().unwrap();
    let _hold_b = set.peers()[1].try_acquire().unwrap();

    let lease = set.try_acquire().unwrap();
    assert_eq!(lease.address(), "10.0.0.3:5000");
}

#[test]
fn fewest_pending_never_exceeds_the_minimum_inflight() {
    let set = set_of(SelectionStrategy::FewestPending, three_peers());
    let _hold = set.peers()[2].try_acquire().unwrap();

    for _ in 0..50 {
        let minimum = set
            .peers()
            .iter()
            .filter(|peer| peer.availability() == PeerAvailability::Available)
            .map(|peer| peer.inflight())
            .min()
            .unwrap();
        let lease = set.try_acquire().unwrap();
        // 选中者在选取时刻的在途数（租约自身占掉的 1 之前）不超过最小值。
        assert!(lease.peer().inflight() <= minimum + 1);
        drop(lease);
    }
}

#[test]
fn fewest_pending_spreads_ties_instead_of_herding() {
    let set = set_of(SelectionStrategy::FewestPending, three_peers());

    // 三个对等体同载：重复抽样应当至少命中两个不同对象。
    let mut seen = std::collections::HashSet::new();
    for _ in 0..100 {
        let lease = set.try_acquire().unwrap();
        seen.insert(lease.address().to_string());
        drop(lease);
    }
    assert!(seen.len() > 1, "随机并列裁决不应恒定选同一个对等体");
}

#[test]
fn fewest_pending_ignores_unavailable_peers_even_if_idle() {
    let set = set_of(SelectionStrategy::FewestPending, three_peers());
    set.peers()[0].set_availability(PeerAvailability::Unavailable);
    let _hold_b = set.peers()[1].try_acquire().unwrap();
    let _hold_c = set.peers()[2].try_acquire().unwrap();

    // 闲置但不可用的 0 号不得被选中。
    for _ in 0..10 {
        let lease = set.try_acquire().unwrap();
        assert_ne!(lease.address(), "10.0.0.1:5000");
    }
}

#[test]
fn snapshot_projects_load_and_breaker_state() {
    let set = set_of(SelectionStrategy::RoundRobin, three_peers());
    let _hold = set.peers()[1].try_acquire().unwrap();

    let snapshot = set.snapshot();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot[1].inflight, 1);
    assert!(snapshot[0].breaker.is_none());
}
