//! 五种 RPC 形状的终端处理器契约与流通道原语。
//!
//! # 设计背景（Why）
//! - 内核对负载保持完全不透明：[`Payload`] 即字节序列，编解码由调用方借助
//!   编解码注册中心完成；
//! - 五种形状的签名各不相同，必须分别定义 Trait 才能让中间件按形状包裹，
//!   同时让组合器保持纯函数语义。
//!
//! # 契约说明（What）
//! - 处理器必须 `Send + Sync`，同一实例会被并发调用；
//! - 流式形状以 [`PayloadStream`] 承载条目流，`Err` 条目表示“带错误关闭”，
//!   其后流即结束；
//! - [`stream_channel`] 是生产端/消费端配对的标准构造方式：单生产者写入，
//!   消费端作为流读取，`fail` 显式以错误收尾。

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use futures::SinkExt;
use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};

use crate::config::StreamOptions;
use crate::contract::CallContext;
use crate::error::{CallResult, DispatchError, ErrorCategory, codes};
use crate::sealed::Sealed;

/// 不透明的调用负载。
pub type Payload = Bytes;

/// 负载条目流：`Err` 条目即“带错误关闭”信号，之后不再有条目。
pub type PayloadStream = BoxStream<'static, CallResult<Payload>>;

/// RPC 调用形状。
///
/// 五种形状构成封闭集合，注册中心以 (服务, 形状) 划分命名空间，组合器按
/// 形状选择包裹钩子。
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum RpcShape {
    Unary,
    Oneway,
    ServerStream,
    ClientStream,
    Duplex,
}

impl RpcShape {
    /// 全部形状，按约定顺序排列，供内省分组使用。
    pub const ALL: [RpcShape; 5] = [
        RpcShape::Unary,
        RpcShape::Oneway,
        RpcShape::ServerStream,
        RpcShape::ClientStream,
        RpcShape::Duplex,
    ];

    /// 小写稳定名称，用于日志与内省输出。
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcShape::Unary => "unary",
            RpcShape::Oneway => "oneway",
            RpcShape::ServerStream => "server_stream",
            RpcShape::ClientStream => "client_stream",
            RpcShape::Duplex => "duplex",
        }
    }
}

impl std::fmt::Display for RpcShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一元调用：单请求进，单响应出。
#[async_trait]
pub trait UnaryHandler: Send + Sync + 'static + Sealed {
    /// 处理一次一元调用。
    async fn call(&self, ctx: CallContext, request: Payload) -> CallResult<Payload>;
}

/// 单向调用：单请求进，只确认受理，不返回负载。
#[async_trait]
pub trait OnewayHandler: Send + Sync + 'static + Sealed {
    /// 处理一次单向调用。
    async fn call(&self, ctx: CallContext, request: Payload) -> CallResult<()>;
}

/// 服务端流：单请求进，附带流选项，返回响应条目流。
#[async_trait]
pub trait ServerStreamHandler: Send + Sync + 'static + Sealed {
    /// 处理一次服务端流调用。
    async fn call(
        &self,
        ctx: CallContext,
        request: Payload,
        options: StreamOptions,
    ) -> CallResult<PayloadStream>;
}

/// 客户端流：请求条目流进，单响应出。
#[async_trait]
pub trait ClientStreamHandler: Send + Sync + 'static + Sealed {
    /// 处理一次客户端流调用。
    async fn call(&self, ctx: CallContext, requests: PayloadStream) -> CallResult<Payload>;
}

/// 双工流：请求条目流进，响应条目流出。
#[async_trait]
pub trait DuplexHandler: Send + Sync + 'static + Sealed {
    /// 处理一次双工调用。
    async fn call(&self, ctx: CallContext, requests: PayloadStream) -> CallResult<PayloadStream>;
}

/// 按形状打包的处理器，注册中心与出站绑定共用此载体。
#[derive(Clone)]
pub enum ShapeHandler {
    Unary(Arc<dyn UnaryHandler>),
    Oneway(Arc<dyn OnewayHandler>),
    ServerStream(Arc<dyn ServerStreamHandler>),
    ClientStream(Arc<dyn ClientStreamHandler>),
    Duplex(Arc<dyn DuplexHandler>),
}

impl ShapeHandler {
    /// 所属形状。
    pub fn shape(&self) -> RpcShape {
        match self {
            ShapeHandler::Unary(_) => RpcShape::Unary,
            ShapeHandler::Oneway(_) => RpcShape::Oneway,
            ShapeHandler::ServerStream(_) => RpcShape::ServerStream,
            ShapeHandler::ClientStream(_) => RpcShape::ClientStream,
            ShapeHandler::Duplex(_) => RpcShape::Duplex,
        }
    }
}

impl std::fmt::Debug for ShapeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ShapeHandler").field(&self.shape()).finish()
    }
}

enum ProducerTx {
    Bounded(mpsc::Sender<CallResult<Payload>>),
    Unbounded(mpsc::UnboundedSender<CallResult<Payload>>),
}

/// 流通道的生产端。
///
/// # 契约说明（What）
/// - 有界通道的 `send` 在容量耗尽时等待消费端腾出空间（背压）；
/// - 消费端整体丢弃后，继续写入返回 [`codes::STREAM_CLOSED`]；
/// - `fail` 尽力投递终止错误后关闭；`close` 干净收尾。丢弃生产端等价于
///   `close`。
pub struct StreamProducer {
    tx: ProducerTx,
}

impl StreamProducer {
    /// 写入一个条目。
    pub async fn send(&mut self, item: Payload) -> CallResult<()> {
        match &mut self.tx {
            ProducerTx::Bounded(tx) => tx
                .send(Ok(item))
                .await
                .map_err(|_| closed_error()),
            ProducerTx::Unbounded(tx) => tx
                .unbounded_send(Ok(item))
                .map_err(|_| closed_error()),
        }
    }

    /// 以错误终止流：消费端收到 `Err` 条目后流结束。
    pub async fn fail(mut self, error: DispatchError) {
        let _ = match &mut self.tx {
            ProducerTx::Bounded(tx) => tx.send(Err(error)).await.map_err(|_| ()),
            ProducerTx::Unbounded(tx) => tx.unbounded_send(Err(error)).map_err(|_| ()),
        };
    }

    /// 干净关闭流。
    pub fn close(self) {}
}

fn closed_error() -> DispatchError {
    DispatchError::new(
        codes::STREAM_CLOSED,
        "stream consumer has gone away",
        ErrorCategory::Cancelled,
    )
}

/// 构造一对流通道：生产端写入，返回的流作为消费端。
///
/// 容量遵循 [`StreamOptions`]：`None` 为无界（缺省），`Some(n)` 为有界背压
/// 通道。
pub fn stream_channel(options: StreamOptions) -> (StreamProducer, PayloadStream) {
    match options.capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity);
            (
                StreamProducer {
                    tx: ProducerTx::Bounded(tx),
                },
                rx.boxed(),
            )
        }
        None => {
            let (tx, rx) = mpsc::unbounded();
            (
                StreamProducer {
                    tx: ProducerTx::Unbounded(tx),
                },
                rx.boxed(),
            )
        }
    }
}

type BoxUnaryFn =
    Box<dyn Fn(CallContext, Payload) -> BoxFuture<'static, CallResult<Payload>> + Send + Sync>;
type BoxOnewayFn =
    Box<dyn Fn(CallContext, Payload) -> BoxFuture<'static, CallResult<()>> + Send + Sync>;
type BoxServerStreamFn = Box<
    dyn Fn(CallContext, Payload, StreamOptions) -> BoxFuture<'static, CallResult<PayloadStream>>
        + Send
        + Sync,
>;
type BoxClientStreamFn =
    Box<dyn Fn(CallContext, PayloadStream) -> BoxFuture<'static, CallResult<Payload>> + Send + Sync>;
type BoxDuplexFn = Box<
    dyn Fn(CallContext, PayloadStream) -> BoxFuture<'static, CallResult<PayloadStream>>
        + Send
        + Sync,
>;

struct UnaryFn(BoxUnaryFn);
struct OnewayFn(BoxOnewayFn);
struct ServerStreamFn(BoxServerStreamFn);
struct ClientStreamFn(BoxClientStreamFn);
struct DuplexFn(BoxDuplexFn);

#[async_trait]
impl UnaryHandler for UnaryFn {
    async fn call(&self, ctx: CallContext, request: Payload) -> CallResult<Payload> {
        (self.0)(ctx, request).await
    }
}

#[async_trait]
impl OnewayHandler for OnewayFn {
    async fn call(&self, ctx: CallContext, request: Payload) -> CallResult<()> {
        (self.0)(ctx, request).await
    }
}

#[async_trait]
impl ServerStreamHandler for ServerStreamFn {
    async fn call(
        &self,
        ctx: CallContext,
        request: Payload,
        options: StreamOptions,
    ) -> CallResult<PayloadStream> {
        (self.0)(ctx, request, options).await
    }
}

#[async_trait]
impl ClientStreamHandler for ClientStreamFn {
    async fn call(&self, ctx: CallContext, requests: PayloadStream) -> CallResult<Payload> {
        (self.0)(ctx, requests).await
    }
}

#[async_trait]
impl DuplexHandler for DuplexFn {
    async fn call(&self, ctx: CallContext, requests: PayloadStream) -> CallResult<PayloadStream> {
        (self.0)(ctx, requests).await
    }
}

/// 以闭包构造一元处理器。
pub fn unary_fn<F, Fut>(f: F) -> Arc<dyn UnaryHandler>
where
    F: Fn(CallContext, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult<Payload>> + Send + 'static,
{
    Arc::new(UnaryFn(Box::new(move |ctx, request| f(ctx, request).boxed())))
}

/// 以闭包构造单向处理器。
pub fn oneway_fn<F, Fut>(f: F) -> Arc<dyn OnewayHandler>
where
    F: Fn(CallContext, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult<()>> + Send + 'static,
{
    Arc::new(OnewayFn(Box::new(move |ctx, request| f(ctx, request).boxed())))
}

/// 以闭包构造服务端流处理器。
pub fn server_stream_fn<F, Fut>(f: F) -> Arc<dyn ServerStreamHandler>
where
    F: Fn(CallContext, Payload, StreamOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult<PayloadStream>> + Send + 'static,
{
    Arc::new(ServerStreamFn(Box::new(move |ctx, request, options| {
        f(ctx, request, options).boxed()
    })))
}

/// 以闭包构造客户端流处理器。
pub fn client_stream_fn<F, Fut>(f: F) -> Arc<dyn ClientStreamHandler>
where
    F: Fn(CallContext, PayloadStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult<Payload>> + Send + 'static,
{
    Arc::new(ClientStreamFn(Box::new(move |ctx, requests| {
        f(ctx, requests).boxed()
    })))
}

/// 以闭包构造双工处理器。
pub fn duplex_fn<F, Fut>(f: F) -> Arc<dyn DuplexHandler>
where
    F: Fn(CallContext, PayloadStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult<PayloadStream>> + Send + 'static,
{
    Arc::new(DuplexFn(Box::new(move |ctx, requests| {
        f(ctx, requests).boxed()
    })))
}
