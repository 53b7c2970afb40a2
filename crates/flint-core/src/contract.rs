//! 调用契约三元组：取消令牌、截止时间与调用上下文。
//!
//! # 设计背景（Why）
//! - 每次调用都携带独立的取消与截止语义，中间件与终端处理器通过统一的
//!   [`CallContext`] 观察它们，而不是各自翻找全局状态；
//! - 分发器在每个入口接收外部提供的取消令牌并原样向下传递，截止时间由
//!   [`RequestMeta`] 声明，两者彼此独立：取消可先于截止发生，反之亦然。
//!
//! # 逻辑解析（How）
//! - [`Cancellation`] 以原子布尔实现一次性置位，支持父子派生：父令牌取消时
//!   所有子令牌立即观察到取消，子令牌取消不影响父令牌；
//! - [`Deadline`] 是可选时间点的轻量包装，比较与求最早值均为常数时间；
//! - [`CallContext`] 以 `Arc` 共享，克隆成本为一次引用计数操作。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

struct CancellationInner {
    flag: AtomicBool,
    parent: Option<Arc<CancellationInner>>,
}

impl CancellationInner {
    fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::Acquire) {
            return true;
        }
        match &self.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }
}

/// 一次性取消令牌。
///
/// # 契约说明（What）
/// - `cancel` 幂等：首次置位返回 `true`，其后调用返回 `false`；
/// - `is_cancelled` 沿父链向上检查，任何祖先取消都会令本令牌呈取消态；
/// - 克隆共享同一置位状态；[`child`](Cancellation::child) 派生独立子令牌。
#[derive(Clone)]
pub struct Cancellation {
    inner: Arc<CancellationInner>,
}

impl Cancellation {
    /// 创建未取消的根令牌。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationInner {
                flag: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// 创建已处于取消态的令牌，常用于“立即放弃”的停机路径与测试。
    pub fn cancelled() -> Self {
        let token = Self::new();
        token.cancel();
        token
    }

    /// 置位取消。首次置位返回 `true`。
    pub fn cancel(&self) -> bool {
        self.inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 是否已取消（含父链传播）。
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// 派生子令牌：父取消传播到子，子取消不回传。
    pub fn child(&self) -> Cancellation {
        Self {
            inner: Arc::new(CancellationInner {
                flag: AtomicBool::new(false),
                parent: Some(Arc::clone(&self.inner)),
            }),
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancellation")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// 可选截止时间点。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// 无截止约束。
    pub const fn none() -> Self {
        Self(None)
    }

    /// 指定绝对时间点。
    pub const fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// 以“当前时刻 + 超时”构造，`now` 来自注入的时钟。
    pub fn with_timeout(now: Instant, timeout: Duration) -> Self {
        Self(Some(now + timeout))
    }

    /// 是否已越过截止点；无截止时恒为 `false`。
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.0, Some(at) if now >= at)
    }

    /// 距截止点的剩余时长；已越过返回零，无截止返回 `None`。
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(now))
    }

    /// 取两个截止中更早的一个；`none` 视为无穷远。
    pub fn earliest(self, other: Deadline) -> Deadline {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Deadline(Some(a.min(b))),
            (Some(a), None) => Deadline(Some(a)),
            (None, b) => Deadline(b),
        }
    }

    /// 原始时间点。
    pub fn instant(&self) -> Option<Instant> {
        self.0
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

/// 一次入站调用的元数据：候选过程名与截止时间。
///
/// 传输层解析出元数据后交给分发器入口；过程名按大小写不敏感规则参与解析。
#[derive(Clone, Debug)]
pub struct RequestMeta {
    procedure: String,
    deadline: Deadline,
}

impl RequestMeta {
    /// 以候选过程名构造，默认无截止。
    pub fn new(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            deadline: Deadline::none(),
        }
    }

    /// 附加截止时间。
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// 候选过程名。
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// 调用截止。
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }
}

struct CallContextInner {
    cancellation: Cancellation,
    deadline: Deadline,
    procedure: Arc<str>,
}

/// 流经中间件与终端处理器的调用上下文。
///
/// # 契约说明（What）
/// - **输入**：由分发器在入口构造，取消令牌来自外部调用方；
/// - **后置条件**：克隆共享同一取消/截止视图；`procedure()` 为解析后的
///   规范过程名，供观测类中间件输出标签；
/// - **线程安全**：内部以 `Arc` 共享，可跨任务传递。
#[derive(Clone)]
pub struct CallContext {
    inner: Arc<CallContextInner>,
}

impl CallContext {
    /// 进入 Builder 流程。
    pub fn builder() -> CallContextBuilder {
        CallContextBuilder::default()
    }

    /// 调用的取消令牌。
    pub fn cancellation(&self) -> &Cancellation {
        &self.inner.cancellation
    }

    /// 调用的截止时间。
    pub fn deadline(&self) -> Deadline {
        self.inner.deadline
    }

    /// 解析后的规范过程名。
    pub fn procedure(&self) -> &str {
        &self.inner.procedure
    }

    /// 便捷判断：令牌是否已取消。
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("procedure", &self.inner.procedure)
            .field("deadline", &self.inner.deadline)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// [`CallContext`] 的构造器。
#[derive(Default)]
pub struct CallContextBuilder {
    cancellation: Option<Cancellation>,
    deadline: Deadline,
    procedure: Option<Arc<str>>,
}

impl CallContextBuilder {
    /// 指定取消令牌；缺省为全新的未取消令牌。
    pub fn cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// 指定截止时间；缺省为无截止。
    pub fn deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// 指定规范过程名；缺省为空串。
    pub fn procedure(mut self, procedure: impl AsRef<str>) -> Self {
        self.procedure = Some(Arc::from(procedure.as_ref()));
        self
    }

    /// 完成构造。
    pub fn build(self) -> CallContext {
        CallContext {
            inner: Arc::new(CallContextInner {
                cancellation: self.cancellation.unwrap_or_default(),
                deadline: self.deadline,
                procedure: self.procedure.unwrap_or_else(|| Arc::from("")),
            }),
        }
    }
}
