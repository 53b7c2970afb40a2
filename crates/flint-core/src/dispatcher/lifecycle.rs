//! 生命周期契约与停机报告。
//!
//! # 设计背景（Why）
//! 分发器托管的组件（传输层、出站连接池、后台任务）形态各异，统一到
//! 最小的启停契约上；停机过程的每一步都落进 [`StopReport`]，调用方据此
//! 判断是干净退场还是带伤退场。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::contract::CallContext;
use crate::error::{CallResult, DispatchError};
use crate::sealed::Sealed;

/// 分发器的顶层状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DispatcherStatus {
    /// 已构建，尚未启动。
    Created,
    /// 正在启动组件。
    Starting,
    /// 正常接收调用。
    Running,
    /// 拒收新调用，排水与停组件进行中。
    Stopping,
    /// 已全部停止，可再次启动。
    Stopped,
    /// 启动失败后的终态，显式复位前不可再启动。
    Faulted,
}

impl DispatcherStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatcherStatus::Created => "created",
            DispatcherStatus::Starting => "starting",
            DispatcherStatus::Running => "running",
            DispatcherStatus::Stopping => "stopping",
            DispatcherStatus::Stopped => "stopped",
            DispatcherStatus::Faulted => "faulted",
        }
    }
}

impl fmt::Display for DispatcherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 可被分发器托管的组件。
///
/// # 契约说明（What）
/// - `start` 返回 `Ok` 即表示组件就绪，可以开始承接流量；
/// - `stop` 必须幂等：同一实例在一轮停机中只会被调用一次，但跨多轮
///   启停会被反复调用；
/// - 两个方法都拿到带取消令牌的上下文，长时间收尾应响应取消。
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static + Sealed {
    async fn start(&self, ctx: CallContext) -> CallResult<()>;

    async fn stop(&self, ctx: CallContext) -> CallResult<()>;
}

/// 传输层组件：在生命周期之上多一个用于内省的名字。
pub trait Transport: Lifecycle {
    fn name(&self) -> &str;
}

/// 单个组件的停机结局。
#[derive(Clone, Debug)]
pub enum ComponentStopStatus {
    /// 正常停止。
    Completed,
    /// 停止过程报错，错误原样保留。
    Failed(DispatchError),
}

impl ComponentStopStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, ComponentStopStatus::Completed)
    }
}

/// 停机报告中的一行：组件名、结局与耗时。
#[derive(Clone, Debug)]
pub struct ComponentStopRecord {
    pub name: String,
    pub status: ComponentStopStatus,
    pub elapsed: Duration,
}

/// 一轮停机的完整报告。
///
/// `drained` 表示在途调用是否在停组件之前自然归零；提前取消的停机会带着
/// `drained == false` 继续停掉全部组件。
#[derive(Clone, Debug, Default)]
pub struct StopReport {
    pub drained: bool,
    pub records: Vec<ComponentStopRecord>,
}

impl StopReport {
    /// 是否所有组件都干净停止。
    pub fn all_completed(&self) -> bool {
        self.records.iter().all(|record| record.status.is_completed())
    }
}

/// 一条组件注册：名字与实例。同一实例可以在不同名字下注册多次，
/// 启停按实例身份去重。
pub(crate) struct ComponentRegistration {
    pub(crate) name: String,
    pub(crate) type_name: &'static str,
    pub(crate) instance: Arc<dyn Lifecycle>,
}
