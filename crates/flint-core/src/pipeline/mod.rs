//! 调用管道：处理器契约、中间件与组合器。
//!
//! 管道在注册/组合期完成全部接线，调用期只执行折叠好的处理器链。分层：
//! - [`handler`]：五种形状的终端处理器契约与流通道原语；
//! - [`middleware`]：形状感知的包裹钩子；
//! - [`compose`]：把中间件列表折叠到终端处理器上。

pub mod compose;
pub mod handler;
pub mod middleware;

pub use compose::{
    compose_client_stream, compose_duplex, compose_oneway, compose_server_stream, compose_shape,
    compose_unary,
};
pub use handler::{
    ClientStreamHandler, DuplexHandler, OnewayHandler, Payload, PayloadStream, RpcShape,
    ServerStreamHandler, ShapeHandler, StreamProducer, UnaryHandler, client_stream_fn, duplex_fn,
    oneway_fn, server_stream_fn, stream_channel, unary_fn,
};
pub use middleware::{DispatchMiddleware, MiddlewareDescriptor};
