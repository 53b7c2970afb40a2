#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![allow(private_bounds)]
#![doc = "flint-core: 进程内 RPC 分发内核的核心契约与实现。"]
#![doc = ""]
#![doc = "本 crate 是每个传输绑定、功能模块与客户端工厂共同依赖的架构底座："]
#![doc = "过程注册中心负责名称/别名解析（含通配特异度裁决），编解码注册中心"]
#![doc = "按 (方向, 服务, 过程, 形状) 绑定类型化编解码器，组合引擎把中间件"]
#![doc = "列表折叠成五种调用形状各自的洋葱管道，对等体层提供出站负载均衡与"]
#![doc = "熔断隔离，分发器编排生命周期并在停机时安全排水。"]
#![doc = ""]
#![doc = "== 边界与非目标 =="]
#![doc = "线格式解析、具体编解码实现、持久化与认证授权策略都不在本 crate；"]
#![doc = "传输绑定通过 [`dispatcher::Lifecycle`] / [`dispatcher::Transport`] 接入，"]
#![doc = "调用经由 `invoke_*` 入口进出。内核在公开边界上从不以 panic 表达可"]
#![doc = "预期失败，统一返回 [`error::DispatchError`]。"]

mod sealed;

pub mod config;
pub mod contract;
pub mod dispatcher;
pub mod error;
pub mod peer;
pub mod pipeline;
pub mod registry;
pub mod time;

pub use config::{AcquirePolicy, BreakerPolicy, DispatcherOptions, StreamOptions};
pub use contract::{CallContext, Cancellation, Deadline, RequestMeta};
pub use dispatcher::{Dispatcher, DispatcherStatus, Lifecycle, StopReport, Transport};
pub use error::{CallResult, DispatchError, ErrorCategory, RetryAdvice};
pub use pipeline::{DispatchMiddleware, Payload, PayloadStream, RpcShape, ShapeHandler};
pub use registry::{
    ClientConfiguration, CodecRegistration, CodecRegistry, CodecScope, OutboundBinding,
    OutboundRegistry, ProcedureRegistry, ProcedureSpec,
};
