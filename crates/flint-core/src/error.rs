//! 分发内核的统一错误模型：稳定错误码 + 分类 + 可选重试建议。
//!
//! # 设计背景（Why）
//! - 内核对外的首要契约是“成功或结构化错误”，公开边界上的可预期失败一律
//!   通过 [`DispatchError`] 返回，绝不以 panic 形式穿越边界；
//! - 错误码遵循 `<领域>.<语义>` 的稳定命名（见 [`codes`]），传输层可据此映射
//!   到线协议状态码，观测链路可据此聚合告警。
//!
//! # 逻辑解析（How）
//! - [`DispatchError`] 以不可变 Builder 风格构造：`new` 给出码、消息与分类，
//!   `with_cause` / `with_retry_advice` 追加底层原因与退避建议；
//! - [`ErrorCategory`] 划分配置期致命错误与运行期可恢复错误两大族群，调用方
//!   依分类而非字符串匹配决定补救路径。
//!
//! # 契约说明（What）
//! - 错误码一经发布即保持稳定；新增语义只增不改；
//! - `ResourceExhausted` 与 `Unavailable` 类错误应尽量携带 [`RetryAdvice`]，
//!   帮助上游给出确定的退避节奏。

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// 内核调用的标准返回别名：成功值或结构化错误。
pub type CallResult<T> = Result<T, DispatchError>;

/// 错误分类，决定调用方的补救语义。
///
/// # 契约说明（What）
/// - `InvalidRegistration`：配置期致命错误（重复注册、空白名称、类型不匹配），
///   表示接线缺陷，必须在启动阶段快速失败；
/// - `NotFound`：过程/编解码器/出站绑定查找未命中，可恢复；
/// - `ResourceExhausted`：对等体繁忙或熔断开启，稍后重试通常可恢复；
/// - `Unavailable`：分发器未运行或无对等体注册，附带重试建议；
/// - `DeadlineExceeded` / `Cancelled`：调用自身的截止与取消语义；
/// - `Internal`：内核编排自身的意外状态，按缺陷处理。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    InvalidRegistration,
    NotFound,
    ResourceExhausted,
    Unavailable,
    DeadlineExceeded,
    Cancelled,
    Internal,
}

impl ErrorCategory {
    /// 判断该分类是否属于配置期致命错误。
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorCategory::InvalidRegistration)
    }
}

/// 重试建议：告知调用方等待多久后再次尝试。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryAdvice {
    wait: Duration,
    reason: Option<Cow<'static, str>>,
}

impl RetryAdvice {
    /// 构造仅包含等待时长的建议。
    pub const fn after(wait: Duration) -> Self {
        Self { wait, reason: None }
    }

    /// 附加原因描述，便于观测日志呈现。
    pub fn with_reason(mut self, reason: impl Into<Cow<'static, str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// 推荐等待时长。
    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// 可选的原因描述。
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

type ErrorCause = Arc<dyn StdError + Send + Sync + 'static>;

/// 分发内核的结构化错误。
///
/// # 设计意图（Why）
/// - 单一错误类型贯穿注册、组合、选路与生命周期全部路径，避免每个模块
///   各自发明错误枚举后在边界上互相转换；
/// - `code` 为 `&'static str` 常量（见 [`codes`]），保证跨版本稳定可比。
///
/// # 契约说明（What）
/// - **不可变性**：所有 Builder 方法消费并返回 `Self`，错误一旦构造完成即可
///   安全地跨线程克隆传递；
/// - **错误链**：`source()` 返回 `with_cause` 注入的底层错误，保持
///   `DispatchError → cause` 的排障链路；
/// - **重试语义**：`retry_advice()` 仅在拒绝类错误上出现，命中即表示“值得
///   在建议窗口后重试”。
#[derive(Clone, Debug)]
pub struct DispatchError {
    code: &'static str,
    message: Cow<'static, str>,
    category: ErrorCategory,
    retry: Option<RetryAdvice>,
    cause: Option<ErrorCause>,
}

impl DispatchError {
    /// 构造结构化错误。
    ///
    /// # 参数说明（What）
    /// - `code`：来自 [`codes`] 的稳定错误码；
    /// - `message`：面向排障人员的描述，不得包含敏感信息；
    /// - `category`：补救分类，见 [`ErrorCategory`]。
    pub fn new(
        code: &'static str,
        message: impl Into<Cow<'static, str>>,
        category: ErrorCategory,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            category,
            retry: None,
            cause: None,
        }
    }

    /// 追加底层原因，保留完整错误链。
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// 追加重试建议。
    pub fn with_retry_advice(mut self, advice: RetryAdvice) -> Self {
        self.retry = Some(advice);
        self
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 人类可读的错误消息。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 错误分类。
    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    /// 若存在，返回重试建议。
    pub fn retry_advice(&self) -> Option<&RetryAdvice> {
        self.retry.as_ref()
    }

    /// 是否属于配置期致命错误。
    pub fn is_fatal(&self) -> bool {
        self.category.is_fatal()
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl StdError for DispatchError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn StdError + 'static))
    }
}

/// 稳定错误码清单。
///
/// # 维护规则（How）
/// - 命名遵循 `<领域>.<语义>`；发布后语义不再变更；
/// - 新增错误码需同步补充文档注释，说明触发场景与补救建议。
pub mod codes {
    /// 过程或编解码器注册时名称/别名为空白字符串。
    pub const REGISTRY_BLANK_NAME: &str = "registry.blank_name";
    /// 过程名称或别名在 (服务, 形状) 命名空间内重复注册。
    pub const PROCEDURE_DUPLICATE: &str = "procedure.duplicate";
    /// 按候选名称未解析到任何过程。
    pub const PROCEDURE_NOT_FOUND: &str = "procedure.not_found";
    /// 编解码器键 (作用域, 服务, 名称, 形状) 重复注册。
    pub const CODEC_DUPLICATE: &str = "codec.duplicate";
    /// 按键未找到编解码器绑定，可恢复。
    pub const CODEC_NOT_FOUND: &str = "codec.not_found";
    /// 类型化解析时请求/响应类型标识与注册登记不符，属接线缺陷。
    pub const CODEC_TYPE_MISMATCH: &str = "codec.type_mismatch";
    /// 请求的 (服务, 形状, 键) 没有出站绑定。
    pub const OUTBOUND_NOT_FOUND: &str = "outbound.not_found";
    /// 出站绑定键重复注册。
    pub const OUTBOUND_DUPLICATE: &str = "outbound.duplicate";
    /// 对等体在有效截止前始终繁忙（含熔断拒绝）。
    pub const PEER_EXHAUSTED: &str = "peer.exhausted";
    /// 对等体集合为空，没有可选路目标。
    pub const PEER_UNAVAILABLE: &str = "peer.unavailable";
    /// 调用被其取消令牌终止。
    pub const CALL_CANCELLED: &str = "call.cancelled";
    /// 调用在执行前或执行中越过截止时间。
    pub const CALL_DEADLINE_EXCEEDED: &str = "call.deadline_exceeded";
    /// 分发器未处于 Running 状态。
    pub const DISPATCHER_NOT_RUNNING: &str = "dispatcher.not_running";
    /// 生命周期状态机收到非法迁移请求。
    pub const DISPATCHER_INVALID_TRANSITION: &str = "dispatcher.invalid_transition";
    /// 某个生命周期组件启动失败，分发器进入 Faulted。
    pub const COMPONENT_START_FAILED: &str = "component.start_failed";
    /// 某个生命周期组件停止失败，记录于停机报告。
    pub const COMPONENT_STOP_FAILED: &str = "component.stop_failed";
    /// 流通道的消费端已关闭，生产端无法继续写入。
    pub const STREAM_CLOSED: &str = "stream.closed";
    /// 内核编排自身的意外状态。
    pub const INTERNAL: &str = "dispatch.internal";
}
