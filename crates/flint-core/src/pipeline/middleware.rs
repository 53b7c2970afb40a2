//! 中间件契约：按形状包裹终端处理器的洋葱层。
//!
//! # 设计背景（Why）
//! 五种形状的处理器签名不同，单一 `wrap` 钩子无法覆盖。本契约为每种形状
//! 提供一个包裹钩子并默认透传，中间件只需覆写自己关心的形状，其余形状
//! 零成本穿过。
//!
//! # 契约说明（What）
//! - 包裹在组合期发生一次，调用热路径上只剩下已折叠的处理器链；
//! - 钩子返回的处理器应在自身逻辑前后委托 `next`，不委托即短路；
//! - [`MiddlewareDescriptor`] 用于内省与日志，名称应稳定且可读。

use std::borrow::Cow;
use std::sync::Arc;

use crate::sealed::Sealed;

use super::handler::{
    ClientStreamHandler, DuplexHandler, OnewayHandler, ServerStreamHandler, UnaryHandler,
};

/// 中间件的自描述信息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MiddlewareDescriptor {
    name: Cow<'static, str>,
    summary: Cow<'static, str>,
}

impl MiddlewareDescriptor {
    /// 创建描述符。`name` 建议使用 `域.语义` 的稳定命名。
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        summary: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            name: name.into(),
            summary: summary.into(),
        }
    }

    /// 稳定名称。
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 一句话用途说明。
    pub fn summary(&self) -> &str {
        &self.summary
    }
}

/// 形状感知的调度中间件。
///
/// # 逻辑解析（How）
/// 组合器按注册顺序从最内层向外折叠：列表中第一个中间件成为最外层。
/// 每个钩子拿到已折叠的内层处理器 `next`，返回包裹后的处理器；默认实现
/// 原样返回 `next`，即对该形状不做任何事。
pub trait DispatchMiddleware: Send + Sync + 'static + Sealed {
    /// 自描述信息，用于内省清单与调试日志。
    fn descriptor(&self) -> MiddlewareDescriptor;

    /// 包裹一元处理器。
    fn wrap_unary(&self, next: Arc<dyn UnaryHandler>) -> Arc<dyn UnaryHandler> {
        next
    }

    /// 包裹单向处理器。
    fn wrap_oneway(&self, next: Arc<dyn OnewayHandler>) -> Arc<dyn OnewayHandler> {
        next
    }

    /// 包裹服务端流处理器。
    fn wrap_server_stream(
        &self,
        next: Arc<dyn ServerStreamHandler>,
    ) -> Arc<dyn ServerStreamHandler> {
        next
    }

    /// 包裹客户端流处理器。
    fn wrap_client_stream(
        &self,
        next: Arc<dyn ClientStreamHandler>,
    ) -> Arc<dyn ClientStreamHandler> {
        next
    }

    /// 包裹双工处理器。
    fn wrap_duplex(&self, next: Arc<dyn DuplexHandler>) -> Arc<dyn DuplexHandler> {
        next
    }
}
