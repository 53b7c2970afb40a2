//! 编解码注册中心：按 (方向, 服务, 过程, 形状) 绑定负载编解码器。
//!
//! # 设计背景（Why）
//! 内核以 [`Payload`] 原样搬运负载，类型信息在注册期被抹除、在解析期被
//! 找回。绑定里同时记录请求与响应的 [`TypeTag`]，解析方声明的类型与注册
//! 类型不符时报出明确的类型错配，而不是让 `Any` 向下转换静默失败。
//!
//! # 契约说明（What）
//! - 入站绑定的服务名恒为本地服务名，注册项即便带了别的服务名也会被覆盖；
//! - 过程名与别名逐条独立落表：哪条撞了哪条报错，先落表的不回滚；
//! - 匹配对服务名与过程名不区分大小写。

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CallResult, DispatchError, ErrorCategory, codes};
use crate::pipeline::handler::{Payload, RpcShape};
use crate::sealed::Sealed;

/// 编解码绑定的方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CodecScope {
    /// 本地服务收到的调用。
    Inbound,
    /// 发往远端服务的调用。
    Outbound,
}

impl CodecScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecScope::Inbound => "inbound",
            CodecScope::Outbound => "outbound",
        }
    }
}

impl fmt::Display for CodecScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 某一对请求/响应类型的负载编解码器。
pub trait Codec<Req, Rsp>: Send + Sync + 'static + Sealed {
    /// 编码名（如 `json`、`msgpack`），供内省与对账。
    fn encoding(&self) -> &str;

    fn encode_request(&self, request: &Req) -> CallResult<Payload>;

    fn decode_request(&self, payload: &Payload) -> CallResult<Req>;

    fn encode_response(&self, response: &Rsp) -> CallResult<Payload>;

    fn decode_response(&self, payload: &Payload) -> CallResult<Rsp>;
}

/// 运行期类型标签：`TypeId` 精确判等，类型名用于错误信息。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// 人类可读的类型名。
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// 一条已落表的编解码绑定。
///
/// `instance` 持有被抹除类型的 `Arc<dyn Codec<Req, Rsp>>`，通过
/// [`downcast`](Self::downcast) 以注册时的类型对找回。
#[derive(Clone)]
pub struct CodecBinding {
    scope: CodecScope,
    service: String,
    procedure: String,
    shape: RpcShape,
    encoding: String,
    request_type: TypeTag,
    response_type: TypeTag,
    instance: Arc<dyn Any + Send + Sync>,
}

impl CodecBinding {
    pub fn scope(&self) -> CodecScope {
        self.scope
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    pub fn shape(&self) -> RpcShape {
        self.shape
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn request_type(&self) -> TypeTag {
        self.request_type
    }

    pub fn response_type(&self) -> TypeTag {
        self.response_type
    }

    /// 以声明的类型对找回编解码器实例。
    ///
    /// 类型对与注册不符时返回 [`codes::CODEC_TYPE_MISMATCH`]，错误信息带上
    /// 双方类型名，便于定位是哪一侧声明错了。
    pub fn downcast<Req: 'static, Rsp: 'static>(&self) -> CallResult<Arc<dyn Codec<Req, Rsp>>> {
        let want_req = TypeTag::of::<Req>();
        let want_rsp = TypeTag::of::<Rsp>();
        if self.request_type != want_req || self.response_type != want_rsp {
            return Err(DispatchError::new(
                codes::CODEC_TYPE_MISMATCH,
                format!(
                    "codec for {}/{} is registered as ({}, {}) but resolved as ({}, {})",
                    self.service,
                    self.procedure,
                    self.request_type.name,
                    self.response_type.name,
                    want_req.name,
                    want_rsp.name,
                ),
                ErrorCategory::InvalidRegistration,
            ));
        }
        self.instance
            .downcast_ref::<Arc<dyn Codec<Req, Rsp>>>()
            .cloned()
            .ok_or_else(|| {
                DispatchError::new(
                    codes::INTERNAL,
                    "codec instance does not match its recorded type tags",
                    ErrorCategory::Internal,
                )
            })
    }
}

impl fmt::Debug for CodecBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecBinding")
            .field("scope", &self.scope)
            .field("service", &self.service)
            .field("procedure", &self.procedure)
            .field("shape", &self.shape)
            .field("encoding", &self.encoding)
            .field("request_type", &self.request_type.name)
            .field("response_type", &self.response_type.name)
            .finish()
    }
}

/// 一条待落表的编解码注册项。
pub struct CodecRegistration {
    scope: CodecScope,
    service: Option<String>,
    procedure: String,
    aliases: Vec<String>,
    shape: RpcShape,
    encoding: String,
    request_type: TypeTag,
    response_type: TypeTag,
    instance: Arc<dyn Any + Send + Sync>,
}

impl CodecRegistration {
    fn erase<Req: 'static, Rsp: 'static>(
        scope: CodecScope,
        service: Option<String>,
        procedure: String,
        shape: RpcShape,
        codec: Arc<dyn Codec<Req, Rsp>>,
    ) -> Self {
        Self {
            scope,
            service,
            procedure,
            aliases: Vec::new(),
            shape,
            encoding: codec.encoding().to_string(),
            request_type: TypeTag::of::<Req>(),
            response_type: TypeTag::of::<Rsp>(),
            instance: Arc::new(codec),
        }
    }

    /// 入站注册：服务名固定为注册中心的本地服务名。
    pub fn inbound<Req: 'static, Rsp: 'static>(
        procedure: impl Into<String>,
        shape: RpcShape,
        codec: Arc<dyn Codec<Req, Rsp>>,
    ) -> Self {
        Self::erase(CodecScope::Inbound, None, procedure.into(), shape, codec)
    }

    /// 出站注册：面向指定的远端服务。
    pub fn outbound<Req: 'static, Rsp: 'static>(
        service: impl Into<String>,
        procedure: impl Into<String>,
        shape: RpcShape,
        codec: Arc<dyn Codec<Req, Rsp>>,
    ) -> Self {
        Self::erase(
            CodecScope::Outbound,
            Some(service.into()),
            procedure.into(),
            shape,
            codec,
        )
    }

    /// 追加一个过程名别名。
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CodecKey {
    scope: CodecScope,
    service: String,
    procedure: String,
    shape: RpcShape,
}

/// 编解码注册中心。
pub struct CodecRegistry {
    local_service: String,
    entries: Mutex<HashMap<CodecKey, CodecBinding>>,
}

impl CodecRegistry {
    /// 创建空注册中心。本地服务名不允许为空白。
    pub fn new(local_service: impl Into<String>) -> CallResult<Self> {
        let local_service = local_service.into();
        if local_service.trim().is_empty() {
            return Err(DispatchError::new(
                codes::REGISTRY_BLANK_NAME,
                "local service name must not be blank or whitespace",
                ErrorCategory::InvalidRegistration,
            ));
        }
        Ok(Self {
            local_service,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// 创建并按序应用一批注册项，遇到第一条失败即返回，已落表的保留。
    pub fn with_registrations(
        local_service: impl Into<String>,
        registrations: Vec<CodecRegistration>,
    ) -> CallResult<Self> {
        let registry = Self::new(local_service)?;
        for registration in registrations {
            registry.register(registration)?;
        }
        Ok(registry)
    }

    /// 本地服务名。
    pub fn local_service(&self) -> &str {
        &self.local_service
    }

    /// 落表一条注册项：主名与各别名逐条独立插入。
    pub fn register(&self, registration: CodecRegistration) -> CallResult<()> {
        let service = match registration.scope {
            CodecScope::Inbound => self.local_service.clone(),
            CodecScope::Outbound => registration.service.unwrap_or_default(),
        };
        if service.trim().is_empty() {
            return Err(blank_error("service"));
        }
        if registration.procedure.trim().is_empty() {
            return Err(blank_error("procedure"));
        }
        if registration.aliases.iter().any(|alias| alias.trim().is_empty()) {
            return Err(blank_error("alias"));
        }

        let service_key = service.to_lowercase();
        let mut names = Vec::with_capacity(1 + registration.aliases.len());
        names.push(registration.procedure.clone());
        names.extend(registration.aliases.iter().cloned());

        let mut entries = self.entries.lock();
        for name in names {
            let key = CodecKey {
                scope: registration.scope,
                service: service_key.clone(),
                procedure: name.to_lowercase(),
                shape: registration.shape,
            };
            if entries.contains_key(&key) {
                return Err(DispatchError::new(
                    codes::CODEC_DUPLICATE,
                    format!(
                        "{} codec for {}/{} ({}) is already registered",
                        registration.scope, service, name, registration.shape,
                    ),
                    ErrorCategory::InvalidRegistration,
                ));
            }
            entries.insert(
                key,
                CodecBinding {
                    scope: registration.scope,
                    service: service.clone(),
                    procedure: name,
                    shape: registration.shape,
                    encoding: registration.encoding.clone(),
                    request_type: registration.request_type,
                    response_type: registration.response_type,
                    instance: Arc::clone(&registration.instance),
                },
            );
        }
        Ok(())
    }

    /// 查找绑定；未命中返回 `None`。
    pub fn try_resolve(
        &self,
        scope: CodecScope,
        service: &str,
        procedure: &str,
        shape: RpcShape,
    ) -> Option<CodecBinding> {
        let key = CodecKey {
            scope,
            service: service.to_lowercase(),
            procedure: procedure.to_lowercase(),
            shape,
        };
        self.entries.lock().get(&key).cloned()
    }

    /// 查找并以声明类型找回编解码器。
    pub fn resolve<Req: 'static, Rsp: 'static>(
        &self,
        scope: CodecScope,
        service: &str,
        procedure: &str,
        shape: RpcShape,
    ) -> CallResult<Arc<dyn Codec<Req, Rsp>>> {
        let binding = self.try_resolve(scope, service, procedure, shape).ok_or_else(|| {
            DispatchError::new(
                codes::CODEC_NOT_FOUND,
                format!("no {scope} codec bound for {service}/{procedure} ({shape})"),
                ErrorCategory::NotFound,
            )
        })?;
        binding.downcast::<Req, Rsp>()
    }

    /// 导出全部绑定，按 (方向, 服务, 形状, 过程) 排序以保证输出稳定。
    pub fn snapshot(&self) -> Vec<CodecBinding> {
        let mut bindings: Vec<CodecBinding> = self.entries.lock().values().cloned().collect();
        bindings.sort_by(|a, b| {
            (a.scope, &a.service, a.shape, &a.procedure)
                .cmp(&(b.scope, &b.service, b.shape, &b.procedure))
        });
        bindings
    }
}

fn blank_error(field: &'static str) -> DispatchError {
    DispatchError::new(
        codes::REGISTRY_BLANK_NAME,
        format!("codec {field} must not be blank or whitespace"),
        ErrorCategory::InvalidRegistration,
    )
}
