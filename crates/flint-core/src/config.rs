//! 可调参数集合：熔断策略、获取策略、流通道选项与分发器选项。
//!
//! 所有结构均派生 serde，便于宿主从配置文件反序列化后注入；`Default`
//! 实现承载设计常量，测试与生产共用同一套缺省值。

use std::time::Duration;

/// 熔断器策略。
///
/// # 契约说明（What）
/// - `failure_threshold`：连续失败达到该值进入 Suspended；
/// - 暂停窗口 = `min(base_delay · 2^(failures − failure_threshold), max_delay)`，
///   失败越多窗口越长；
/// - `half_open_max_attempts`：半开期允许的最大探测并发；
/// - `half_open_success_threshold`：半开期累计成功达到该值后闭合。
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub half_open_max_attempts: u32,
    pub half_open_success_threshold: u32,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            half_open_max_attempts: 1,
            half_open_success_threshold: 1,
        }
    }
}

/// 对等体获取策略。
///
/// `time_to_live` 约束单次获取的最长等待；`poll_interval` 是重试切片的
/// 上限（实际睡眠取“切片与剩余时间的较小值”）。
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AcquirePolicy {
    pub time_to_live: Duration,
    pub poll_interval: Duration,
}

impl Default for AcquirePolicy {
    fn default() -> Self {
        Self {
            time_to_live: Duration::from_secs(1),
            poll_interval: Duration::from_millis(5),
        }
    }
}

/// 流通道容量选项。
///
/// 缺省为无界通道——慢消费者下存在内存积压风险，这是有意暴露的配置点；
/// 需要背压时以 [`StreamOptions::bounded`] 指定容量。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StreamOptions {
    pub capacity: Option<usize>,
}

impl StreamOptions {
    /// 无界通道。
    pub const fn unbounded() -> Self {
        Self { capacity: None }
    }

    /// 有界通道，容量为 `capacity`。
    pub const fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
        }
    }
}

/// 分发器选项。
///
/// - `drain_poll_interval`：停机排水时轮询在途计数的切片；
/// - `reject_retry_hint`：非 Running 拒绝所携带的重试建议等待时长。
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DispatcherOptions {
    pub drain_poll_interval: Duration,
    pub reject_retry_hint: Duration,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            drain_poll_interval: Duration::from_millis(5),
            reject_retry_hint: Duration::from_millis(100),
        }
    }
}
