use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use flint_core::config::{AcquirePolicy, BreakerPolicy};
use flint_core::contract::{Cancellation, Deadline};
use flint_core::error::{DispatchError, ErrorCategory, codes};
use flint_core::peer::{CircuitBreaker, Peer, PeerSet, SelectionStrategy};
use flint_core::time::{Clock, ManualClock};

fn policy() -> AcquirePolicy {
    AcquirePolicy {
        time_to_live: Duration::from_millis(100),
        poll_interval: Duration::from_millis(5),
    }
}

/// 背景线程按小步推进手动时钟，直到测试体落下停止标志。
///
/// 等待循环的每次睡眠都挂在手动时钟上，离开真实时间推进它永远不醒；
/// 测试体只关心结果，节拍交给这根线程。
fn drive(clock: Arc<ManualClock>) -> (Arc<AtomicBool>, std::thread::JoinHandle<()>) {
    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    let handle = std::thread::spawn(move || {
        while !flag.load(Ordering::Acquire) {
            clock.advance(Duration::from_millis(1));
            std::thread::sleep(Duration::from_micros(200));
        }
    });
    (done, handle)
}

#[tokio::test]
async fn empty_pool_fails_fast_with_unavailable() {
    let set = PeerSet::new(
        Vec::new(),
        SelectionStrategy::RoundRobin,
        policy(),
        Arc::new(ManualClock::new()),
    );
    let error = set
        .acquire(Deadline::none(), &Cancellation::new())
        .await
        .unwrap_err();
    assert_eq!(error.code(), codes::PEER_UNAVAILABLE);
    assert_eq!(error.category(), ErrorCategory::Unavailable);
}

#[tokio::test]
async fn exhausting_the_ttl_reports_resource_exhausted_with_retry_advice() {
    let clock = Arc::new(ManualClock::new());
    let peer = Peer::new("10.0.0.1:5000").with_capacity(1);
    let set = PeerSet::new(
        vec![peer],
        SelectionStrategy::RoundRobin,
        policy(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    let _hold = set.peers()[0].try_acquire().unwrap();

    let (done, driver) = drive(Arc::clone(&clock));
    let error = set
        .acquire(Deadline::none(), &Cancellation::new())
        .await
        .unwrap_err();
    done.store(true, Ordering::Release);
    driver.join().unwrap();

    assert_eq!(error.code(), codes::PEER_EXHAUSTED);
    assert_eq!(error.category(), ErrorCategory::ResourceExhausted);
    assert!(error.retry_advice().is_some(), "繁忙拒绝应携带重试建议");
}

#[tokio::test]
async fn caller_deadline_earlier_than_ttl_wins() {
    let clock = Arc::new(ManualClock::new());
    let set = PeerSet::new(
        vec![Peer::new("10.0.0.1:5000").with_capacity(1)],
        SelectionStrategy::RoundRobin,
        policy(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    let _hold = set.peers()[0].try_acquire().unwrap();

    let deadline = Deadline::with_timeout(clock.now(), Duration::from_millis(20));
    let (done, driver) = drive(Arc::clone(&clock));
    let error = set.acquire(deadline, &Cancellation::new()).await.unwrap_err();
    done.store(true, Ordering::Release);
    driver.join().unwrap();

    assert_eq!(error.code(), codes::PEER_EXHAUSTED);
    assert!(
        clock.elapsed() < Duration::from_millis(60),
        "应按调用方更早的截止期放弃，而不是等满池的 100ms TTL"
    );
}

#[tokio::test]
async fn cancellation_interrupts_the_wait() {
    let clock = Arc::new(ManualClock::new());
    let set = PeerSet::new(
        vec![Peer::new("10.0.0.1:5000").with_capacity(1)],
        SelectionStrategy::RoundRobin,
        policy(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    let _hold = set.peers()[0].try_acquire().unwrap();

    let cancellation = Cancellation::new();
    cancellation.cancel();
    let error = set
        .acquire(Deadline::none(), &cancellation)
        .await
        .unwrap_err();
    assert_eq!(error.code(), codes::CALL_CANCELLED);
}

#[tokio::test]
async fn a_released_peer_unblocks_a_waiting_acquisition() {
    let clock = Arc::new(ManualClock::new());
    let set = Arc::new(PeerSet::new(
        vec![Peer::new("10.0.0.1:5000").with_capacity(1)],
        SelectionStrategy::RoundRobin,
        policy(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    let hold = set.peers()[0].try_acquire().unwrap();

    let waiter = {
        let set = Arc::clone(&set);
        tokio::spawn(async move { set.acquire(Deadline::none(), &Cancellation::new()).await })
    };

    // 让等待者先睡进一个轮询切片，再归还租约并推进时钟唤醒它。
    tokio::task::yield_now().await;
    drop(hold);
    let (done, driver) = drive(Arc::clone(&clock));
    let lease = waiter.await.unwrap().unwrap();
    done.store(true, Ordering::Release);
    driver.join().unwrap();

    assert_eq!(lease.address(), "10.0.0.1:5000");
}

#[tokio::test]
async fn with_lease_reports_the_outcome_to_the_breaker() {
    let clock = Arc::new(ManualClock::new());
    let breaker_policy = BreakerPolicy {
        failure_threshold: 1,
        base_delay: Duration::from_millis(50),
        ..BreakerPolicy::default()
    };
    let peer = Peer::new("10.0.0.1:5000").with_breaker(CircuitBreaker::new(
        breaker_policy,
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    let set = PeerSet::new(
        vec![peer],
        SelectionStrategy::RoundRobin,
        policy(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );

    let outcome: Result<(), DispatchError> = set
        .with_lease(Deadline::none(), &Cancellation::new(), |_peer| async {
            Err(DispatchError::new(
                codes::INTERNAL,
                "simulated transport failure",
                ErrorCategory::Internal,
            ))
        })
        .await;
    assert!(outcome.is_err());

    // 阈值为 1 的熔断器立即挂起，下一次直接获取必然被拒。
    assert!(set.try_acquire().is_none());
    assert_eq!(set.peers()[0].inflight(), 0, "失败收尾也要归还在途计数");
}
