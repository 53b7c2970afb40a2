//! 分发器：注册表的属主、入站管道的组装者与生命周期编排者。
//!
//! # 设计背景（Why）
//! 传输层只做字节搬运，五个 `invoke_*` 入口承接它递上来的调用：先验状态
//! 闸门，再解析过程、取出（或现场折叠）管道，然后在在途计数的护栏内执行。
//! 停机反过来：先关闸门，等在途归零（或等不下去），再按启动的逆序停掉
//! 托管组件。
//!
//! # 逻辑解析（How）
//! - 管道缓存以 (请求名小写, 形状) 为键，记录组合时的注册版本号与中间件
//!   纪元，两者任一落后即重新折叠，注册表热更新无需显式清缓存；
//! - 在途计数靠守卫在每条退出路径上递减，流式形状的守卫随响应流存活，
//!   消费端放掉流才算调用结束；
//! - 组件启停按实例身份去重：同一实例注册多个名字只启停一次，名字合并
//!   进同一条记录。
//!
//! # 风险提示（Trade-offs）
//! 通配过程面对高基数的请求名会让管道缓存逐名膨胀；缓存键取请求名而非
//! 规范名是为了省去每次命中后的别名归一化，接受这一内存换时间的取舍。

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::stream::{Stream, StreamExt};
use parking_lot::Mutex;

use crate::config::{DispatcherOptions, StreamOptions};
use crate::contract::{CallContext, Cancellation, RequestMeta};
use crate::error::{CallResult, DispatchError, ErrorCategory, RetryAdvice, codes};
use crate::pipeline::compose::compose_shape;
use crate::pipeline::handler::{Payload, PayloadStream, RpcShape, ShapeHandler};
use crate::pipeline::middleware::DispatchMiddleware;
use crate::registry::codec::CodecRegistry;
use crate::registry::outbound::{ClientConfiguration, OutboundRegistry};
use crate::registry::procedure::{ProcedureRegistry, ProcedureSpec};
use crate::time::{Clock, SystemClock};

use super::lifecycle::{
    ComponentRegistration, ComponentStopRecord, ComponentStopStatus, DispatcherStatus, Lifecycle,
    StopReport, Transport,
};

/// 分发器构造器。
pub struct DispatcherBuilder {
    service: String,
    clock: Arc<dyn Clock>,
    options: DispatcherOptions,
}

impl DispatcherBuilder {
    fn new(service: String) -> Self {
        Self {
            service,
            clock: Arc::new(SystemClock::new()),
            options: DispatcherOptions::default(),
        }
    }

    /// 注入时钟，测试用手动时钟驱动排水与截止判断。
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: DispatcherOptions) -> Self {
        self.options = options;
        self
    }

    /// 完成构造。本地服务名为空白时拒绝。
    pub fn build(self) -> CallResult<Dispatcher> {
        let codecs = CodecRegistry::new(self.service.clone())?;
        Ok(Dispatcher {
            service: self.service,
            status: Mutex::new(DispatcherStatus::Created),
            accepting: AtomicBool::new(false),
            in_flight: Arc::new(AtomicUsize::new(0)),
            procedures: ProcedureRegistry::new(),
            codecs,
            outbounds: OutboundRegistry::new(),
            middlewares: Mutex::new(Vec::new()),
            middleware_epoch: AtomicU64::new(0),
            components: Mutex::new(Vec::new()),
            pipelines: DashMap::new(),
            clock: self.clock,
            options: self.options,
        })
    }
}

struct PipelineEntry {
    handler: ShapeHandler,
    spec: Arc<ProcedureSpec>,
    procedure_revision: u64,
    middleware_epoch: u64,
}

struct UniqueComponent {
    names: Vec<String>,
    type_name: &'static str,
    instance: Arc<dyn Lifecycle>,
}

impl UniqueComponent {
    fn joined_names(&self) -> String {
        self.names.join(", ")
    }
}

struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// 把在途守卫绑到响应流上：消费端放掉流，调用才算离场。
struct GuardedStream {
    inner: PayloadStream,
    _guard: InFlightGuard,
}

impl GuardedStream {
    fn wrap(inner: PayloadStream, guard: InFlightGuard) -> PayloadStream {
        GuardedStream {
            inner,
            _guard: guard,
        }
        .boxed()
    }
}

impl Stream for GuardedStream {
    type Item = CallResult<Payload>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// 进程内 RPC 分发器。
///
/// # 契约说明（What）
/// - 所有注册表实例归属于单个分发器，多个分发器之间不共享任何可变状态；
/// - `invoke_*` 在非 Running 状态一律立即拒绝，错误携带重试建议；
/// - `stop` 的排水受调用方取消令牌与截止期约束，但无论排水是否完成，
///   每个组件的 `stop` 都会被调用。
pub struct Dispatcher {
    service: String,
    status: Mutex<DispatcherStatus>,
    accepting: AtomicBool,
    in_flight: Arc<AtomicUsize>,
    procedures: ProcedureRegistry,
    codecs: CodecRegistry,
    outbounds: OutboundRegistry,
    middlewares: Mutex<Vec<Arc<dyn DispatchMiddleware>>>,
    middleware_epoch: AtomicU64,
    components: Mutex<Vec<ComponentRegistration>>,
    pipelines: DashMap<(String, RpcShape), PipelineEntry>,
    clock: Arc<dyn Clock>,
    options: DispatcherOptions,
}

impl Dispatcher {
    /// 以本地服务名开始构造。
    pub fn builder(service: impl Into<String>) -> DispatcherBuilder {
        DispatcherBuilder::new(service.into())
    }

    /// 本地服务名。
    pub fn service(&self) -> &str {
        &self.service
    }

    /// 当前生命周期状态。
    pub fn status(&self) -> DispatcherStatus {
        *self.status.lock()
    }

    /// 当前在途调用数。
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// 注册一条过程。
    pub fn register(&self, spec: ProcedureSpec) -> CallResult<()> {
        self.procedures.register(spec)
    }

    /// 过程注册中心。
    pub fn procedures(&self) -> &ProcedureRegistry {
        &self.procedures
    }

    /// 编解码注册中心。
    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// 出站注册中心。
    pub fn outbounds(&self) -> &OutboundRegistry {
        &self.outbounds
    }

    /// 追加一个全局入站中间件，排在所有过程专属中间件之前。
    pub fn add_middleware(&self, middleware: Arc<dyn DispatchMiddleware>) {
        self.middlewares.lock().push(middleware);
        self.middleware_epoch.fetch_add(1, Ordering::Release);
    }

    /// 托管一个生命周期组件。
    ///
    /// 同一实例可在不同名字下重复托管，启动与停止仍只执行一次。
    pub fn register_component<C: Lifecycle>(&self, name: impl Into<String>, instance: Arc<C>) {
        self.components.lock().push(ComponentRegistration {
            name: name.into(),
            type_name: std::any::type_name::<C>(),
            instance,
        });
    }

    /// 托管一个传输层组件，注册名取其自报名称。
    pub fn register_transport<T: Transport>(&self, transport: Arc<T>) {
        let name = transport.name().to_string();
        self.register_component(name, transport);
    }

    /// 启动全部托管组件并进入 Running。
    ///
    /// 任一组件启动失败时，已启动的组件按逆序尽力停止，分发器进入
    /// Faulted，需要 [`reset`](Self::reset) 后才能再次启动。
    pub async fn start(&self, ctx: CallContext) -> CallResult<()> {
        {
            let mut status = self.status.lock();
            match *status {
                DispatcherStatus::Created | DispatcherStatus::Stopped => {
                    *status = DispatcherStatus::Starting;
                }
                DispatcherStatus::Faulted => {
                    return Err(invalid_transition(
                        "dispatcher is faulted, call reset() before starting again",
                    ));
                }
                current => {
                    return Err(invalid_transition(format!(
                        "cannot start a dispatcher that is {current}"
                    )));
                }
            }
        }

        let components = self.unique_components();
        let mut started: Vec<UniqueComponent> = Vec::with_capacity(components.len());
        for component in components {
            tracing::debug!(
                component = %component.joined_names(),
                "starting lifecycle component"
            );
            match component.instance.start(ctx.clone()).await {
                Ok(()) => started.push(component),
                Err(error) => {
                    tracing::error!(
                        component = %component.joined_names(),
                        error = %error,
                        "component failed to start, unwinding started components"
                    );
                    for survivor in started.iter().rev() {
                        if let Err(stop_error) = survivor.instance.stop(ctx.clone()).await {
                            tracing::warn!(
                                component = %survivor.joined_names(),
                                error = %stop_error,
                                "unwind stop failed"
                            );
                        }
                    }
                    *self.status.lock() = DispatcherStatus::Faulted;
                    return Err(DispatchError::new(
                        codes::COMPONENT_START_FAILED,
                        format!("component {} failed to start", component.joined_names()),
                        ErrorCategory::Internal,
                    )
                    .with_cause(error));
                }
            }
        }

        *self.status.lock() = DispatcherStatus::Running;
        self.accepting.store(true, Ordering::Release);
        tracing::info!(service = %self.service, "dispatcher running");
        Ok(())
    }

    /// 停机：拒收新调用，排水，再按逆序停掉全部组件。
    ///
    /// 在 Created/Stopped 状态下调用是无害的幂等操作，返回空报告。
    pub async fn stop(&self, ctx: CallContext) -> CallResult<StopReport> {
        {
            let mut status = self.status.lock();
            match *status {
                DispatcherStatus::Running => {
                    *status = DispatcherStatus::Stopping;
                }
                DispatcherStatus::Created | DispatcherStatus::Stopped => {
                    return Ok(StopReport::default());
                }
                current => {
                    return Err(invalid_transition(format!(
                        "cannot stop a dispatcher that is {current}"
                    )));
                }
            }
        }

        self.accepting.store(false, Ordering::Release);
        tracing::info!(
            service = %self.service,
            in_flight = self.in_flight(),
            "dispatcher stopping, draining in-flight calls"
        );
        let drained = self.drain(&ctx).await;
        if !drained {
            tracing::warn!(
                service = %self.service,
                in_flight = self.in_flight(),
                "drain interrupted, stopping components with calls still in flight"
            );
        }

        let components = self.unique_components();
        let mut records = Vec::with_capacity(components.len());
        for component in components.iter().rev() {
            let begun = self.clock.now();
            let status = match component.instance.stop(ctx.clone()).await {
                Ok(()) => ComponentStopStatus::Completed,
                Err(error) => {
                    tracing::warn!(
                        component = %component.joined_names(),
                        error = %error,
                        "component stop failed"
                    );
                    ComponentStopStatus::Failed(error)
                }
            };
            records.push(ComponentStopRecord {
                name: component.joined_names(),
                status,
                elapsed: self.clock.now().saturating_duration_since(begun),
            });
        }

        *self.status.lock() = DispatcherStatus::Stopped;
        let report = StopReport { drained, records };
        tracing::info!(
            service = %self.service,
            drained = report.drained,
            all_completed = report.all_completed(),
            "dispatcher stopped"
        );
        Ok(report)
    }

    /// 把 Faulted 复位回 Created，允许修复接线后重新启动。
    pub fn reset(&self) -> CallResult<()> {
        let mut status = self.status.lock();
        match *status {
            DispatcherStatus::Faulted => {
                *status = DispatcherStatus::Created;
                Ok(())
            }
            current => Err(invalid_transition(format!(
                "only a faulted dispatcher can be reset, current status is {current}"
            ))),
        }
    }

    async fn drain(&self, ctx: &CallContext) -> bool {
        loop {
            if self.in_flight() == 0 {
                return true;
            }
            if ctx.is_cancelled() {
                return false;
            }
            let now = self.clock.now();
            if ctx.deadline().is_expired(now) {
                return false;
            }
            let slice = match ctx.deadline().remaining(now) {
                Some(remaining) => self.options.drain_poll_interval.min(remaining),
                None => self.options.drain_poll_interval,
            };
            self.clock.sleep(slice).await;
        }
    }

    fn unique_components(&self) -> Vec<UniqueComponent> {
        let registrations = self.components.lock();
        let mut unique: Vec<UniqueComponent> = Vec::new();
        for registration in registrations.iter() {
            match unique
                .iter_mut()
                .find(|component| Arc::ptr_eq(&component.instance, &registration.instance))
            {
                Some(existing) => existing.names.push(registration.name.clone()),
                None => unique.push(UniqueComponent {
                    names: vec![registration.name.clone()],
                    type_name: registration.type_name,
                    instance: Arc::clone(&registration.instance),
                }),
            }
        }
        unique
    }

    fn ensure_accepting(&self) -> CallResult<()> {
        if self.accepting.load(Ordering::Acquire) {
            return Ok(());
        }
        Err(DispatchError::new(
            codes::DISPATCHER_NOT_RUNNING,
            format!("dispatcher for {} is not accepting calls", self.service),
            ErrorCategory::Unavailable,
        )
        .with_retry_advice(RetryAdvice::after(self.options.reject_retry_hint)))
    }

    /// 先登记在途、再查闸门：`stop` 翻转 `accepting` 后读到的在途计数必然
    /// 覆盖所有已放行的调用，不存在“刚过闸门、尚未计数”的空窗。被拒绝的
    /// 调用由守卫析构立即归还计数。
    fn admit(&self) -> CallResult<InFlightGuard> {
        let guard = InFlightGuard::enter(&self.in_flight);
        self.ensure_accepting()?;
        Ok(guard)
    }

    /// 取出（或现场折叠并缓存）一条入站管道。
    fn pipeline_for(
        &self,
        requested: &str,
        shape: RpcShape,
    ) -> CallResult<(ShapeHandler, Arc<ProcedureSpec>)> {
        let key = (requested.to_lowercase(), shape);
        let revision = self.procedures.revision();
        let epoch = self.middleware_epoch.load(Ordering::Acquire);
        if let Some(entry) = self.pipelines.get(&key)
            && entry.procedure_revision == revision
            && entry.middleware_epoch == epoch
        {
            return Ok((entry.handler.clone(), Arc::clone(&entry.spec)));
        }

        let spec = self.procedures.resolve(&self.service, &key.0, shape)?;
        let chain: Vec<Arc<dyn DispatchMiddleware>> = {
            let global = self.middlewares.lock();
            global
                .iter()
                .cloned()
                .chain(spec.middlewares().iter().cloned())
                .collect()
        };
        let handler = compose_shape(&chain, spec.handler().clone());
        self.pipelines.insert(
            key,
            PipelineEntry {
                handler: handler.clone(),
                spec: Arc::clone(&spec),
                procedure_revision: revision,
                middleware_epoch: epoch,
            },
        );
        Ok((handler, spec))
    }

    fn call_context(&self, spec: &ProcedureSpec, meta: &RequestMeta, cancellation: Cancellation) -> CallContext {
        CallContext::builder()
            .cancellation(cancellation)
            .deadline(meta.deadline())
            .procedure(spec.name())
            .build()
    }

    fn preflight(&self, ctx: &CallContext) -> CallResult<()> {
        if ctx.is_cancelled() {
            return Err(DispatchError::new(
                codes::CALL_CANCELLED,
                "call was cancelled before dispatch",
                ErrorCategory::Cancelled,
            ));
        }
        if ctx.deadline().is_expired(self.clock.now()) {
            return Err(DispatchError::new(
                codes::CALL_DEADLINE_EXCEEDED,
                "deadline expired before dispatch",
                ErrorCategory::DeadlineExceeded,
            ));
        }
        Ok(())
    }

    /// 一元调用入口。
    pub async fn invoke_unary(
        &self,
        meta: RequestMeta,
        request: Payload,
        cancellation: Cancellation,
    ) -> CallResult<Payload> {
        let _guard = self.admit()?;
        let (handler, spec) = self.pipeline_for(meta.procedure(), RpcShape::Unary)?;
        let ShapeHandler::Unary(handler) = handler else {
            return Err(shape_corruption(RpcShape::Unary));
        };
        let ctx = self.call_context(&spec, &meta, cancellation);
        self.preflight(&ctx)?;
        handler.call(ctx, request).await
    }

    /// 单向调用入口。
    pub async fn invoke_oneway(
        &self,
        meta: RequestMeta,
        request: Payload,
        cancellation: Cancellation,
    ) -> CallResult<()> {
        let _guard = self.admit()?;
        let (handler, spec) = self.pipeline_for(meta.procedure(), RpcShape::Oneway)?;
        let ShapeHandler::Oneway(handler) = handler else {
            return Err(shape_corruption(RpcShape::Oneway));
        };
        let ctx = self.call_context(&spec, &meta, cancellation);
        self.preflight(&ctx)?;
        handler.call(ctx, request).await
    }

    /// 服务端流入口：返回的流带着在途守卫，放掉流才算调用离场。
    pub async fn invoke_server_stream(
        &self,
        meta: RequestMeta,
        request: Payload,
        options: StreamOptions,
        cancellation: Cancellation,
    ) -> CallResult<PayloadStream> {
        let guard = self.admit()?;
        let (handler, spec) = self.pipeline_for(meta.procedure(), RpcShape::ServerStream)?;
        let ShapeHandler::ServerStream(handler) = handler else {
            return Err(shape_corruption(RpcShape::ServerStream));
        };
        let ctx = self.call_context(&spec, &meta, cancellation);
        self.preflight(&ctx)?;
        let stream = handler.call(ctx, request, options).await?;
        Ok(GuardedStream::wrap(stream, guard))
    }

    /// 客户端流入口。
    pub async fn invoke_client_stream(
        &self,
        meta: RequestMeta,
        requests: PayloadStream,
        cancellation: Cancellation,
    ) -> CallResult<Payload> {
        let _guard = self.admit()?;
        let (handler, spec) = self.pipeline_for(meta.procedure(), RpcShape::ClientStream)?;
        let ShapeHandler::ClientStream(handler) = handler else {
            return Err(shape_corruption(RpcShape::ClientStream));
        };
        let ctx = self.call_context(&spec, &meta, cancellation);
        self.preflight(&ctx)?;
        handler.call(ctx, requests).await
    }

    /// 双工入口：响应流带着在途守卫。
    pub async fn invoke_duplex(
        &self,
        meta: RequestMeta,
        requests: PayloadStream,
        cancellation: Cancellation,
    ) -> CallResult<PayloadStream> {
        let guard = self.admit()?;
        let (handler, spec) = self.pipeline_for(meta.procedure(), RpcShape::Duplex)?;
        let ShapeHandler::Duplex(handler) = handler else {
            return Err(shape_corruption(RpcShape::Duplex));
        };
        let ctx = self.call_context(&spec, &meta, cancellation);
        self.preflight(&ctx)?;
        let stream = handler.call(ctx, requests).await?;
        Ok(GuardedStream::wrap(stream, guard))
    }

    /// 解析默认出站配置。
    pub fn client_config(&self, service: &str, shape: RpcShape) -> CallResult<ClientConfiguration> {
        self.outbounds.client_config(service, shape)
    }

    /// 解析指定 key 的出站配置。
    pub fn client_config_keyed(
        &self,
        service: &str,
        shape: RpcShape,
        key: &str,
    ) -> CallResult<ClientConfiguration> {
        self.outbounds.client_config_keyed(service, shape, key)
    }

    /// 非阻塞的只读快照：状态、过程、组件、出站绑定与中间件清单。
    pub fn introspect(&self) -> DispatcherSnapshot {
        let mut procedures: Vec<ProcedureInfo> = self
            .procedures
            .snapshot()
            .iter()
            .map(|spec| ProcedureInfo {
                shape: spec.shape(),
                service: spec.service().to_string(),
                name: spec.name().to_string(),
                encoding: spec.encoding().map(str::to_string),
                aliases: spec.aliases().to_vec(),
                middlewares: spec
                    .middlewares()
                    .iter()
                    .map(|middleware| middleware.descriptor().name().to_string())
                    .collect(),
            })
            .collect();
        procedures.sort_by(|a, b| {
            (a.shape, a.service.to_lowercase(), a.name.to_lowercase()).cmp(&(
                b.shape,
                b.service.to_lowercase(),
                b.name.to_lowercase(),
            ))
        });

        let components = self
            .unique_components()
            .into_iter()
            .map(|component| ComponentInfo {
                names: component.names,
                type_name: component.type_name.to_string(),
            })
            .collect();

        let outbounds = self
            .outbounds
            .snapshot()
            .into_iter()
            .map(|binding| OutboundInfo {
                service: binding.service().to_string(),
                shape: binding.shape(),
                key: binding.key().to_string(),
            })
            .collect();

        let mut middlewares: Vec<MiddlewareInfo> = self
            .middlewares
            .lock()
            .iter()
            .map(|middleware| MiddlewareInfo {
                direction: MiddlewareDirection::Inbound,
                service: None,
                shape: None,
                name: middleware.descriptor().name().to_string(),
            })
            .collect();
        for (service, shape, names) in self.outbounds.middleware_snapshot() {
            for name in names {
                middlewares.push(MiddlewareInfo {
                    direction: MiddlewareDirection::Outbound,
                    service: Some(service.clone()),
                    shape: Some(shape),
                    name,
                });
            }
        }

        DispatcherSnapshot {
            service: self.service.clone(),
            status: self.status(),
            in_flight: self.in_flight(),
            procedures,
            components,
            outbounds,
            middlewares,
        }
    }
}

fn invalid_transition(message: impl Into<std::borrow::Cow<'static, str>>) -> DispatchError {
    DispatchError::new(
        codes::DISPATCHER_INVALID_TRANSITION,
        message,
        ErrorCategory::Internal,
    )
}

fn shape_corruption(expected: RpcShape) -> DispatchError {
    DispatchError::new(
        codes::INTERNAL,
        format!("cached pipeline does not carry a {expected} handler"),
        ErrorCategory::Internal,
    )
}

/// 中间件作用方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MiddlewareDirection {
    Inbound,
    Outbound,
}

/// 内省快照：过程条目。
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ProcedureInfo {
    pub shape: RpcShape,
    pub service: String,
    pub name: String,
    pub encoding: Option<String>,
    pub aliases: Vec<String>,
    pub middlewares: Vec<String>,
}

/// 内省快照：托管组件条目（按实例身份合并名字）。
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ComponentInfo {
    pub names: Vec<String>,
    pub type_name: String,
}

/// 内省快照：出站绑定条目。
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct OutboundInfo {
    pub service: String,
    pub shape: RpcShape,
    pub key: String,
}

/// 内省快照：中间件条目。
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MiddlewareInfo {
    pub direction: MiddlewareDirection,
    pub service: Option<String>,
    pub shape: Option<RpcShape>,
    pub name: String,
}

/// 分发器全量只读快照。
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct DispatcherSnapshot {
    pub service: String,
    pub status: DispatcherStatus,
    pub in_flight: usize,
    pub procedures: Vec<ProcedureInfo>,
    pub components: Vec<ComponentInfo>,
    pub outbounds: Vec<OutboundInfo>,
    pub middlewares: Vec<MiddlewareInfo>,
}
