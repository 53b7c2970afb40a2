//! 出站注册中心：远端服务的客户端处理器绑定与客户端中间件链。
//!
//! # 设计背景（Why）
//! 调用远端与被远端调用共用同一套管道抽象：出站“处理器”就是把请求递交
//! 传输层的客户端终端。同一 (服务, 形状) 可以注册多个变体（如主备线路、
//! 灰度通道），以 key 区分；不带 key 的取默认绑定，默认绑定缺席时回退到
//! 最早注册的那一条，保证单绑定场景零配置可用。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CallResult, DispatchError, ErrorCategory, codes};
use crate::pipeline::compose::compose_shape;
use crate::pipeline::handler::{RpcShape, ShapeHandler};
use crate::pipeline::middleware::DispatchMiddleware;

/// 不带 key 注册或解析时使用的绑定名。
pub const DEFAULT_OUTBOUND_KEY: &str = "default";

/// 一条出站绑定：目标服务、变体 key 与客户端终端处理器。
#[derive(Clone)]
pub struct OutboundBinding {
    service: String,
    key: String,
    handler: ShapeHandler,
}

impl OutboundBinding {
    /// 以默认 key 创建绑定。
    pub fn new(service: impl Into<String>, handler: ShapeHandler) -> Self {
        Self {
            service: service.into(),
            key: DEFAULT_OUTBOUND_KEY.to_string(),
            handler,
        }
    }

    /// 指定变体 key。
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn shape(&self) -> RpcShape {
        self.handler.shape()
    }

    pub fn handler(&self) -> &ShapeHandler {
        &self.handler
    }
}

impl fmt::Debug for OutboundBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundBinding")
            .field("service", &self.service)
            .field("key", &self.key)
            .field("shape", &self.shape())
            .finish()
    }
}

/// 解析出的客户端调用配置：绑定加上该 (服务, 形状) 的中间件链。
#[derive(Clone)]
pub struct ClientConfiguration {
    binding: OutboundBinding,
    middlewares: Vec<Arc<dyn DispatchMiddleware>>,
}

impl ClientConfiguration {
    pub fn binding(&self) -> &OutboundBinding {
        &self.binding
    }

    pub fn middlewares(&self) -> &[Arc<dyn DispatchMiddleware>] {
        &self.middlewares
    }

    /// 把中间件链折叠到绑定的终端处理器上。
    pub fn compose(&self) -> ShapeHandler {
        compose_shape(&self.middlewares, self.binding.handler.clone())
    }
}

impl fmt::Debug for ClientConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfiguration")
            .field("binding", &self.binding)
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct OutboundKey {
    service: String,
    shape: RpcShape,
    key: String,
}

#[derive(Default)]
struct OutboundTable {
    bindings: HashMap<OutboundKey, OutboundBinding>,
    order: Vec<OutboundKey>,
    middlewares: HashMap<(String, RpcShape), Vec<Arc<dyn DispatchMiddleware>>>,
}

/// 出站注册中心。
#[derive(Default)]
pub struct OutboundRegistry {
    inner: Mutex<OutboundTable>,
}

impl OutboundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 落表一条绑定；(服务, 形状, key) 撞表即拒绝。
    pub fn register(&self, binding: OutboundBinding) -> CallResult<()> {
        if binding.service.trim().is_empty() {
            return Err(blank_error("service"));
        }
        if binding.key.trim().is_empty() {
            return Err(blank_error("key"));
        }
        let key = OutboundKey {
            service: binding.service.to_lowercase(),
            shape: binding.shape(),
            key: binding.key.to_lowercase(),
        };
        let mut table = self.inner.lock();
        if table.bindings.contains_key(&key) {
            return Err(DispatchError::new(
                codes::OUTBOUND_DUPLICATE,
                format!(
                    "{} outbound binding {}:{} is already registered",
                    binding.shape(),
                    binding.service,
                    binding.key,
                ),
                ErrorCategory::InvalidRegistration,
            ));
        }
        table.order.push(key.clone());
        table.bindings.insert(key, binding);
        Ok(())
    }

    /// 为 (服务, 形状) 追加一个客户端中间件，作用于该组合下的全部变体。
    pub fn register_middleware(
        &self,
        service: &str,
        shape: RpcShape,
        middleware: Arc<dyn DispatchMiddleware>,
    ) -> CallResult<()> {
        if service.trim().is_empty() {
            return Err(blank_error("service"));
        }
        self.inner
            .lock()
            .middlewares
            .entry((service.to_lowercase(), shape))
            .or_default()
            .push(middleware);
        Ok(())
    }

    /// 解析默认绑定。默认 key 缺席时回退到该 (服务, 形状) 下最早注册的
    /// 绑定。
    pub fn client_config(&self, service: &str, shape: RpcShape) -> CallResult<ClientConfiguration> {
        self.lookup(service, shape, DEFAULT_OUTBOUND_KEY)
    }

    /// 解析指定 key 的绑定。key 等于默认名时行为与
    /// [`client_config`](Self::client_config) 相同。
    pub fn client_config_keyed(
        &self,
        service: &str,
        shape: RpcShape,
        key: &str,
    ) -> CallResult<ClientConfiguration> {
        self.lookup(service, shape, key)
    }

    fn lookup(&self, service: &str, shape: RpcShape, key: &str) -> CallResult<ClientConfiguration> {
        let service_key = service.to_lowercase();
        let key_lower = key.to_lowercase();
        let table = self.inner.lock();
        let exact = OutboundKey {
            service: service_key.clone(),
            shape,
            key: key_lower.clone(),
        };
        let mut binding = table.bindings.get(&exact).cloned();
        if binding.is_none() && key_lower == DEFAULT_OUTBOUND_KEY {
            binding = table
                .order
                .iter()
                .find(|candidate| candidate.service == service_key && candidate.shape == shape)
                .and_then(|candidate| table.bindings.get(candidate).cloned());
        }
        let binding = binding.ok_or_else(|| {
            DispatchError::new(
                codes::OUTBOUND_NOT_FOUND,
                format!("no {shape} outbound binding for {service}:{key}"),
                ErrorCategory::NotFound,
            )
        })?;
        let middlewares = table
            .middlewares
            .get(&(service_key, shape))
            .cloned()
            .unwrap_or_default();
        Ok(ClientConfiguration {
            binding,
            middlewares,
        })
    }

    /// 导出全部绑定，按 (服务, 形状, key) 排序。
    pub fn snapshot(&self) -> Vec<OutboundBinding> {
        let table = self.inner.lock();
        let mut bindings: Vec<OutboundBinding> = table.bindings.values().cloned().collect();
        bindings.sort_by(|a, b| {
            (
                a.service.to_lowercase(),
                a.shape(),
                a.key.to_lowercase(),
            )
                .cmp(&(b.service.to_lowercase(), b.shape(), b.key.to_lowercase()))
        });
        bindings
    }

    /// 导出全部客户端中间件链的名称，按 (服务, 形状) 排序。
    pub fn middleware_snapshot(&self) -> Vec<(String, RpcShape, Vec<String>)> {
        let table = self.inner.lock();
        let mut chains: Vec<(String, RpcShape, Vec<String>)> = table
            .middlewares
            .iter()
            .map(|((service, shape), list)| {
                (
                    service.clone(),
                    *shape,
                    list.iter()
                        .map(|middleware| middleware.descriptor().name().to_string())
                        .collect(),
                )
            })
            .collect();
        chains.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        chains
    }
}

fn blank_error(field: &'static str) -> DispatchError {
    DispatchError::new(
        codes::REGISTRY_BLANK_NAME,
        format!("outbound {field} must not be blank or whitespace"),
        ErrorCategory::InvalidRegistration,
    )
}
