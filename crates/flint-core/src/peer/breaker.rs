//! 对等体熔断器：失败隔离与半开试探。
//!
//! # 设计背景（Why）
//! 连续失败的对等体继续接收流量只会放大故障。熔断器在失败数到阈值后挂起
//! 该对等体，挂起窗口按失败数指数退避并封顶；窗口走完进入半开，放行有限
//! 次试探，试探结果决定回到闭合还是再次挂起。
//!
//! # 契约说明（What）
//! - [`try_enter`](CircuitBreaker::try_enter) 返回 `false` 表示本次调用不得
//!   发往该对等体，调用方不需要也不应该再上报结果；
//! - 每次放行（返回 `true`）都应以 [`on_success`](CircuitBreaker::on_success)
//!   或 [`on_failure`](CircuitBreaker::on_failure) 收尾，半开状态依赖这对
//!   回执推进；
//! - 所有时间都取自注入的时钟，测试可用手动时钟推进窗口。

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::BreakerPolicy;
use crate::time::Clock;

/// 熔断器所处阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BreakerPhase {
    /// 正常放行。
    Closed,
    /// 挂起中，窗口未走完之前全部拒绝。
    Suspended,
    /// 半开试探，放行受配额限制。
    HalfOpen,
}

impl BreakerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerPhase::Closed => "closed",
            BreakerPhase::Suspended => "suspended",
            BreakerPhase::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct BreakerCore {
    phase: BreakerPhase,
    failures: u32,
    suspended_until: Option<Instant>,
    half_open_attempts: u32,
    half_open_successes: u32,
}

/// 熔断器状态的只读投影。
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BreakerSnapshot {
    pub phase: BreakerPhase,
    pub failures: u32,
    /// 距挂起窗口结束的剩余时长；非挂起状态为 `None`。
    pub suspended_remaining: Option<Duration>,
    pub half_open_attempts: u32,
    pub half_open_successes: u32,
}

/// 单个对等体的熔断器。
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    clock: Arc<dyn Clock>,
    core: Mutex<BreakerCore>,
}

impl CircuitBreaker {
    pub fn new(policy: BreakerPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            core: Mutex::new(BreakerCore {
                phase: BreakerPhase::Closed,
                failures: 0,
                suspended_until: None,
                half_open_attempts: 0,
                half_open_successes: 0,
            }),
        }
    }

    /// 询问是否放行一次调用。
    pub fn try_enter(&self) -> bool {
        let mut core = self.core.lock();
        match core.phase {
            BreakerPhase::Closed => true,
            BreakerPhase::Suspended => {
                let elapsed = core
                    .suspended_until
                    .is_none_or(|until| self.clock.now() >= until);
                if !elapsed {
                    return false;
                }
                core.phase = BreakerPhase::HalfOpen;
                core.half_open_attempts = 1;
                core.half_open_successes = 0;
                tracing::debug!(
                    max_attempts = self.policy.half_open_max_attempts,
                    "circuit breaker entered half-open probation"
                );
                self.policy.half_open_max_attempts > 0
            }
            BreakerPhase::HalfOpen => {
                if core.half_open_attempts < self.policy.half_open_max_attempts {
                    core.half_open_attempts += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// 上报一次成功。
    pub fn on_success(&self) {
        let mut core = self.core.lock();
        match core.phase {
            BreakerPhase::Closed | BreakerPhase::Suspended => {
                core.failures = 0;
            }
            BreakerPhase::HalfOpen => {
                core.half_open_successes += 1;
                if core.half_open_successes >= self.policy.half_open_success_threshold {
                    core.phase = BreakerPhase::Closed;
                    core.failures = 0;
                    core.suspended_until = None;
                    core.half_open_attempts = 0;
                    core.half_open_successes = 0;
                    tracing::info!("circuit breaker closed after successful probation");
                }
            }
        }
    }

    /// 上报一次失败。
    pub fn on_failure(&self) {
        let mut core = self.core.lock();
        match core.phase {
            BreakerPhase::HalfOpen => {
                // 半开期失败立即回到挂起，失败计数钉在阈值之上，窗口继续加深。
                core.failures = core.failures.saturating_add(1).max(self.policy.failure_threshold);
                core.half_open_attempts = 0;
                core.half_open_successes = 0;
                self.suspend(&mut core);
            }
            BreakerPhase::Closed | BreakerPhase::Suspended => {
                core.failures = core.failures.saturating_add(1);
                if core.failures >= self.policy.failure_threshold {
                    self.suspend(&mut core);
                }
            }
        }
    }

    fn suspend(&self, core: &mut BreakerCore) {
        let delay = self.suspend_delay(core.failures);
        let until = self.clock.now() + delay;
        core.phase = BreakerPhase::Suspended;
        // 迟到的失败回执只会把窗口向后推，绝不把已定的窗口提前。
        core.suspended_until = Some(match core.suspended_until {
            Some(existing) => existing.max(until),
            None => until,
        });
        tracing::warn!(
            failures = core.failures,
            delay_ms = delay.as_millis() as u64,
            "circuit breaker suspended after repeated failures"
        );
    }

    fn suspend_delay(&self, failures: u32) -> Duration {
        let exponent = failures
            .saturating_sub(self.policy.failure_threshold)
            .min(16);
        self.policy
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.policy.max_delay)
    }

    /// 当前阶段。
    pub fn phase(&self) -> BreakerPhase {
        self.core.lock().phase
    }

    /// 导出只读状态。
    pub fn snapshot(&self) -> BreakerSnapshot {
        let core = self.core.lock();
        let now = self.clock.now();
        let suspended_remaining = match core.phase {
            BreakerPhase::Suspended => core
                .suspended_until
                .map(|until| until.saturating_duration_since(now)),
            _ => None,
        };
        BreakerSnapshot {
            phase: core.phase,
            failures: core.failures,
            suspended_remaining,
            half_open_attempts: core.half_open_attempts,
            half_open_successes: core.half_open_successes,
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("CircuitBreaker")
            .field("phase", &snapshot.phase)
            .field("failures", &snapshot.failures)
            .field("suspended_remaining", &snapshot.suspended_remaining)
            .finish()
    }
}
