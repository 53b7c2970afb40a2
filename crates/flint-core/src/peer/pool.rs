//! 对等体池：出站调用的负载均衡与租约管理。
//!
//! # 设计背景（Why）
//! 出站调用同时受三道闸门：可用性标记（运维切流）、在途上限（容量保护）
//! 与熔断器（故障隔离）。租约把“选中一个对等体”物化为一个必须归还的
//! 值：成功、失败、取消乃至中途丢弃，在途计数都会回落，不会泄漏。
//!
//! # 逻辑解析（How）
//! - 轮询策略推进共享游标后最多扫一圈；
//! - 最少在途策略对可用对等体快照在途数，在最小值的并列项里随机挑一个，
//!   避免并发调用全部涌向第一个轻载对等体；
//! - 两种策略都可能一时无人可用，异步获取在截止期内以短片轮询等待，
//!   睡眠走注入时钟，取消令牌随时可打断。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use rand::Rng;

use crate::config::AcquirePolicy;
use crate::contract::{Cancellation, Deadline};
use crate::error::{CallResult, DispatchError, ErrorCategory, RetryAdvice, codes};
use crate::time::Clock;

use super::breaker::{BreakerSnapshot, CircuitBreaker};

/// 对等体的运维可用性。
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PeerAvailability {
    /// 正常接收新调用。
    Available,
    /// 暂停接收，已在途的调用不受影响。
    Unavailable,
    /// 退场中：不接新调用，等待在途归零后摘除。
    Draining,
}

impl PeerAvailability {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerAvailability::Available => "available",
            PeerAvailability::Unavailable => "unavailable",
            PeerAvailability::Draining => "draining",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PeerAvailability::Available => 0,
            PeerAvailability::Unavailable => 1,
            PeerAvailability::Draining => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PeerAvailability::Available,
            1 => PeerAvailability::Unavailable,
            _ => PeerAvailability::Draining,
        }
    }
}

impl fmt::Display for PeerAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个可被出站调用选中的对等体。
pub struct Peer {
    address: String,
    capacity: Option<usize>,
    availability: AtomicU8,
    inflight: AtomicUsize,
    breaker: Option<CircuitBreaker>,
}

impl Peer {
    /// 创建一个不限容量、无熔断器的可用对等体。
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            capacity: None,
            availability: AtomicU8::new(PeerAvailability::Available.as_u8()),
            inflight: AtomicUsize::new(0),
            breaker: None,
        }
    }

    /// 限定并发在途上限。
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// 挂上一个熔断器。
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn availability(&self) -> PeerAvailability {
        PeerAvailability::from_u8(self.availability.load(Ordering::Acquire))
    }

    /// 运行期切换可用性，立即对后续获取生效。
    pub fn set_availability(&self, availability: PeerAvailability) {
        self.availability
            .store(availability.as_u8(), Ordering::Release);
    }

    /// 当前在途调用数。
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    /// 尝试取得一次调用的租约。
    ///
    /// 在途计数先行占位再询问熔断器，熔断器拒绝时占位回滚，保证计数与
    /// 实际放行严格一致。
    pub fn try_acquire(self: &Arc<Self>) -> Option<PeerLease> {
        if self.availability() != PeerAvailability::Available {
            return None;
        }
        self.inflight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match self.capacity {
                    Some(capacity) if current >= capacity => None,
                    _ => Some(current + 1),
                }
            })
            .ok()?;
        let via_breaker = match &self.breaker {
            Some(breaker) => {
                if breaker.try_enter() {
                    true
                } else {
                    self.inflight.fetch_sub(1, Ordering::AcqRel);
                    return None;
                }
            }
            None => false,
        };
        Some(PeerLease {
            peer: Arc::clone(self),
            via_breaker,
            settled: false,
        })
    }

    fn release(&self) {
        self.inflight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("address", &self.address)
            .field("availability", &self.availability())
            .field("inflight", &self.inflight())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// 一次出站调用对单个对等体的独占租约。
///
/// # 契约说明（What）
/// - [`complete_success`](Self::complete_success) /
///   [`complete_failure`](Self::complete_failure) 归还租约并把结果回执给
///   熔断器（若获取时经过了熔断器放行）；
/// - 不显式收尾而直接丢弃时只归还在途计数，不向熔断器上报，半开试探的
///   配额不会被一个没有结论的调用吃掉。
pub struct PeerLease {
    peer: Arc<Peer>,
    via_breaker: bool,
    settled: bool,
}

impl PeerLease {
    /// 租约指向的对等体。
    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    pub fn address(&self) -> &str {
        self.peer.address()
    }

    /// 以成功收尾。
    pub fn complete_success(mut self) {
        self.settle(true);
    }

    /// 以失败收尾。
    pub fn complete_failure(mut self) {
        self.settle(false);
    }

    fn settle(&mut self, success: bool) {
        if self.settled {
            return;
        }
        self.settled = true;
        if self.via_breaker && let Some(breaker) = self.peer.breaker() {
            if success {
                breaker.on_success();
            } else {
                breaker.on_failure();
            }
        }
        self.peer.release();
    }
}

impl Drop for PeerLease {
    fn drop(&mut self) {
        if !self.settled {
            self.settled = true;
            self.peer.release();
        }
    }
}

impl fmt::Debug for PeerLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLease")
            .field("peer", &self.peer.address)
            .field("via_breaker", &self.via_breaker)
            .finish()
    }
}

/// 对等体选取策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SelectionStrategy {
    /// 共享游标轮询。
    RoundRobin,
    /// 最少在途数优先，并列随机。
    FewestPending,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::RoundRobin => "round_robin",
            SelectionStrategy::FewestPending => "fewest_pending",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个对等体的只读投影。
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PeerSnapshot {
    pub address: String,
    pub availability: PeerAvailability,
    pub inflight: usize,
    pub capacity: Option<usize>,
    pub breaker: Option<BreakerSnapshot>,
}

/// 一组对等体与其选取策略。
pub struct PeerSet {
    peers: Vec<Arc<Peer>>,
    strategy: SelectionStrategy,
    policy: AcquirePolicy,
    cursor: AtomicUsize,
    clock: Arc<dyn Clock>,
}

impl PeerSet {
    pub fn new(
        peers: Vec<Peer>,
        strategy: SelectionStrategy,
        policy: AcquirePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            peers: peers.into_iter().map(Arc::new).collect(),
            strategy,
            policy,
            cursor: AtomicUsize::new(0),
            clock,
        }
    }

    /// 池内对等体句柄，可用于运行期切换可用性。
    pub fn peers(&self) -> &[Arc<Peer>] {
        &self.peers
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// 单次选取，无人可用立即返回 `None`。
    pub fn try_acquire(&self) -> Option<PeerLease> {
        if self.peers.is_empty() {
            return None;
        }
        match self.strategy {
            SelectionStrategy::RoundRobin => self.acquire_round_robin(),
            SelectionStrategy::FewestPending => self.acquire_fewest_pending(),
        }
    }

    fn acquire_round_robin(&self) -> Option<PeerLease> {
        let count = self.peers.len();
        let start = self.cursor.fetch_add(1, Ordering::AcqRel) % count;
        for offset in 0..count {
            let peer = &self.peers[(start + offset) % count];
            if let Some(lease) = peer.try_acquire() {
                return Some(lease);
            }
        }
        None
    }

    fn acquire_fewest_pending(&self) -> Option<PeerLease> {
        let mut candidates: Vec<(usize, Arc<Peer>)> = self
            .peers
            .iter()
            .filter(|peer| peer.availability() == PeerAvailability::Available)
            .map(|peer| (peer.inflight(), Arc::clone(peer)))
            .collect();
        let mut rng = rand::rng();
        while !candidates.is_empty() {
            let minimum = candidates.iter().map(|(inflight, _)| *inflight).min()?;
            let at_minimum: Vec<usize> = candidates
                .iter()
                .enumerate()
                .filter(|(_, (inflight, _))| *inflight == minimum)
                .map(|(index, _)| index)
                .collect();
            let chosen = at_minimum[rng.random_range(0..at_minimum.len())];
            if let Some(lease) = candidates[chosen].1.try_acquire() {
                return Some(lease);
            }
            // 占位失败（容量或熔断），从候选中剔除后重新找最小值。
            candidates.swap_remove(chosen);
        }
        None
    }

    /// 在截止期内等待一个租约。
    ///
    /// 有效截止期取调用方截止期与“现在 + 池的等待上限”中更早者；每轮
    /// 未果就睡一个短片（或不足一个短片的剩余时长），取消令牌可随时
    /// 打断等待。
    pub async fn acquire(
        &self,
        deadline: Deadline,
        cancellation: &Cancellation,
    ) -> CallResult<PeerLease> {
        if self.peers.is_empty() {
            return Err(DispatchError::new(
                codes::PEER_UNAVAILABLE,
                "peer set is empty, nothing to acquire",
                ErrorCategory::Unavailable,
            ));
        }
        let now = self.clock.now();
        let effective = deadline.earliest(Deadline::with_timeout(now, self.policy.time_to_live));
        loop {
            if cancellation.is_cancelled() {
                return Err(DispatchError::new(
                    codes::CALL_CANCELLED,
                    "caller cancelled while waiting for a peer",
                    ErrorCategory::Cancelled,
                ));
            }
            if let Some(lease) = self.try_acquire() {
                return Ok(lease);
            }
            let now = self.clock.now();
            if effective.is_expired(now) {
                tracing::debug!(
                    strategy = self.strategy.as_str(),
                    peers = self.peers.len(),
                    "peer acquisition deadline exhausted"
                );
                return Err(DispatchError::new(
                    codes::PEER_EXHAUSTED,
                    "all peers busy or suspended until the deadline",
                    ErrorCategory::ResourceExhausted,
                )
                .with_retry_advice(RetryAdvice::after(self.policy.poll_interval)));
            }
            let slice = match effective.remaining(now) {
                Some(remaining) => self.policy.poll_interval.min(remaining),
                None => self.policy.poll_interval,
            };
            self.clock.sleep(slice).await;
        }
    }

    /// 租约打底的调用样板：获取、执行、按结果收尾。
    pub async fn with_lease<T, F, Fut>(
        &self,
        deadline: Deadline,
        cancellation: &Cancellation,
        operation: F,
    ) -> CallResult<T>
    where
        F: FnOnce(Arc<Peer>) -> Fut,
        Fut: Future<Output = CallResult<T>>,
    {
        let lease = self.acquire(deadline, cancellation).await?;
        let peer = Arc::clone(lease.peer());
        match operation(peer).await {
            Ok(value) => {
                lease.complete_success();
                Ok(value)
            }
            Err(error) => {
                lease.complete_failure();
                Err(error)
            }
        }
    }

    /// 导出全部对等体的只读投影。
    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        self.peers
            .iter()
            .map(|peer| PeerSnapshot {
                address: peer.address.clone(),
                availability: peer.availability(),
                inflight: peer.inflight(),
                capacity: peer.capacity,
                breaker: peer.breaker.as_ref().map(CircuitBreaker::snapshot),
            })
            .collect()
    }
}

impl fmt::Debug for PeerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSet")
            .field("strategy", &self.strategy)
            .field("peers", &self.peers.len())
            .finish()
    }
}
