//! 中间件组合器：一次折叠，热路径零查找。
//!
//! # 逻辑解析（How）
//! 列表语义为“第一个元素在最外层”。实现上自尾部向头部折叠：先让最后一个
//! 中间件包裹终端处理器，再逐层向外。空列表直接返回终端处理器本身，不引入
//! 任何包装层。

use std::sync::Arc;

use super::handler::{
    ClientStreamHandler, DuplexHandler, OnewayHandler, ServerStreamHandler, ShapeHandler,
    UnaryHandler,
};
use super::middleware::DispatchMiddleware;

/// 组合一元处理器链。
pub fn compose_unary(
    middlewares: &[Arc<dyn DispatchMiddleware>],
    terminal: Arc<dyn UnaryHandler>,
) -> Arc<dyn UnaryHandler> {
    let mut current = terminal;
    for middleware in middlewares.iter().rev() {
        current = middleware.wrap_unary(current);
    }
    current
}

/// 组合单向处理器链。
pub fn compose_oneway(
    middlewares: &[Arc<dyn DispatchMiddleware>],
    terminal: Arc<dyn OnewayHandler>,
) -> Arc<dyn OnewayHandler> {
    let mut current = terminal;
    for middleware in middlewares.iter().rev() {
        current = middleware.wrap_oneway(current);
    }
    current
}

/// 组合服务端流处理器链。
pub fn compose_server_stream(
    middlewares: &[Arc<dyn DispatchMiddleware>],
    terminal: Arc<dyn ServerStreamHandler>,
) -> Arc<dyn ServerStreamHandler> {
    let mut current = terminal;
    for middleware in middlewares.iter().rev() {
        current = middleware.wrap_server_stream(current);
    }
    current
}

/// 组合客户端流处理器链。
pub fn compose_client_stream(
    middlewares: &[Arc<dyn DispatchMiddleware>],
    terminal: Arc<dyn ClientStreamHandler>,
) -> Arc<dyn ClientStreamHandler> {
    let mut current = terminal;
    for middleware in middlewares.iter().rev() {
        current = middleware.wrap_client_stream(current);
    }
    current
}

/// 组合双工处理器链。
pub fn compose_duplex(
    middlewares: &[Arc<dyn DispatchMiddleware>],
    terminal: Arc<dyn DuplexHandler>,
) -> Arc<dyn DuplexHandler> {
    let mut current = terminal;
    for middleware in middlewares.iter().rev() {
        current = middleware.wrap_duplex(current);
    }
    current
}

/// 按形状分派到对应的组合函数。
pub fn compose_shape(
    middlewares: &[Arc<dyn DispatchMiddleware>],
    terminal: ShapeHandler,
) -> ShapeHandler {
    match terminal {
        ShapeHandler::Unary(handler) => {
            ShapeHandler::Unary(compose_unary(middlewares, handler))
        }
        ShapeHandler::Oneway(handler) => {
            ShapeHandler::Oneway(compose_oneway(middlewares, handler))
        }
        ShapeHandler::ServerStream(handler) => {
            ShapeHandler::ServerStream(compose_server_stream(middlewares, handler))
        }
        ShapeHandler::ClientStream(handler) => {
            ShapeHandler::ClientStream(compose_client_stream(middlewares, handler))
        }
        ShapeHandler::Duplex(handler) => {
            ShapeHandler::Duplex(compose_duplex(middlewares, handler))
        }
    }
}
