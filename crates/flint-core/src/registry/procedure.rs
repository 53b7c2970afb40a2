//! 过程注册中心：(服务, 形状) 命名空间下的名称解析。
//!
//! # 设计背景（Why）
//! - 名称与别名统一小写存储，匹配对服务名与过程名都不区分大小写；
//! - 通配模式（`*` 任意长度、`?` 恰好一个字符）允许一个处理器兜住一族
//!   过程名，宽松注册是刻意保留的能力：只要原始模式串不重复，重叠的
//!   模式可以共存，冲突在解析期按特异度裁决；
//! - 解析规则是确定性的：字面字符越多越特异，特异度相同按注册先后。
//!
//! # 风险提示（Trade-offs）
//! 通配条目是线性扫描，注册大量模式会拖慢解析。精确名走哈希表，热路径
//! 又有调度器侧的管道缓存兜底，实践中扫描规模很小。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{CallResult, DispatchError, ErrorCategory, codes};
use crate::pipeline::handler::{
    ClientStreamHandler, DuplexHandler, OnewayHandler, RpcShape, ServerStreamHandler,
    ShapeHandler, UnaryHandler,
};
use crate::pipeline::middleware::DispatchMiddleware;

/// 一条过程注册：名称、别名、编码期望、专属中间件与终端处理器。
pub struct ProcedureSpec {
    service: String,
    name: String,
    aliases: Vec<String>,
    encoding: Option<String>,
    middlewares: Vec<Arc<dyn DispatchMiddleware>>,
    handler: ShapeHandler,
}

impl ProcedureSpec {
    fn with_handler(service: impl Into<String>, name: impl Into<String>, handler: ShapeHandler) -> Self {
        Self {
            service: service.into(),
            name: name.into(),
            aliases: Vec::new(),
            encoding: None,
            middlewares: Vec::new(),
            handler,
        }
    }

    /// 注册一元过程。
    pub fn unary(
        service: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn UnaryHandler>,
    ) -> Self {
        Self::with_handler(service, name, ShapeHandler::Unary(handler))
    }

    /// 注册单向过程。
    pub fn oneway(
        service: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn OnewayHandler>,
    ) -> Self {
        Self::with_handler(service, name, ShapeHandler::Oneway(handler))
    }

    /// 注册服务端流过程。
    pub fn server_stream(
        service: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn ServerStreamHandler>,
    ) -> Self {
        Self::with_handler(service, name, ShapeHandler::ServerStream(handler))
    }

    /// 注册客户端流过程。
    pub fn client_stream(
        service: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn ClientStreamHandler>,
    ) -> Self {
        Self::with_handler(service, name, ShapeHandler::ClientStream(handler))
    }

    /// 注册双工过程。
    pub fn duplex(
        service: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn DuplexHandler>,
    ) -> Self {
        Self::with_handler(service, name, ShapeHandler::Duplex(handler))
    }

    /// 追加一个别名。别名与主名同等参与解析与查重。
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// 声明期望的编码名，供内省与编解码对账。
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// 追加一个过程专属中间件，排在调度器全局链之后。
    pub fn with_middleware(mut self, middleware: Arc<dyn DispatchMiddleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// 所属服务名（注册时原样保留大小写）。
    pub fn service(&self) -> &str {
        &self.service
    }

    /// 主名称。
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 别名列表。
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// 期望编码名。
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// 过程专属中间件。
    pub fn middlewares(&self) -> &[Arc<dyn DispatchMiddleware>] {
        &self.middlewares
    }

    /// 终端处理器。
    pub fn handler(&self) -> &ShapeHandler {
        &self.handler
    }

    /// 调用形状，由处理器决定。
    pub fn shape(&self) -> RpcShape {
        self.handler.shape()
    }
}

impl fmt::Debug for ProcedureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureSpec")
            .field("service", &self.service)
            .field("name", &self.name)
            .field("shape", &self.shape())
            .field("aliases", &self.aliases)
            .field("encoding", &self.encoding)
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

/// 预编译的通配模式。
///
/// # 逻辑解析（How）
/// `*` 匹配任意长度（含空），`?` 匹配恰好一个字符。匹配采用迭代回溯：
/// 记录最近一次 `*` 的位置，失配时让该 `*` 多吞一个字符重试，整体
/// O(模式长 × 文本长)。
#[derive(Clone, Debug)]
struct GlobPattern {
    chars: Vec<char>,
    raw: String,
    literal: usize,
}

impl GlobPattern {
    fn parse(raw: String) -> Self {
        let chars: Vec<char> = raw.chars().collect();
        let literal = chars.iter().filter(|c| **c != '*' && **c != '?').count();
        Self { chars, raw, literal }
    }

    fn matches(&self, input: &str) -> bool {
        let text: Vec<char> = input.chars().collect();
        let mut ti = 0usize;
        let mut pi = 0usize;
        let mut star_pi = usize::MAX;
        let mut star_ti = 0usize;
        while ti < text.len() {
            if pi < self.chars.len() && (self.chars[pi] == '?' || self.chars[pi] == text[ti]) {
                pi += 1;
                ti += 1;
            } else if pi < self.chars.len() && self.chars[pi] == '*' {
                star_pi = pi;
                star_ti = ti;
                pi += 1;
            } else if star_pi != usize::MAX {
                pi = star_pi + 1;
                star_ti += 1;
                ti = star_ti;
            } else {
                return false;
            }
        }
        while pi < self.chars.len() && self.chars[pi] == '*' {
            pi += 1;
        }
        pi == self.chars.len()
    }
}

fn is_glob(name: &str) -> bool {
    name.contains(['*', '?'])
}

struct ExactEntry {
    spec: Arc<ProcedureSpec>,
    seq: u64,
}

struct GlobEntry {
    pattern: GlobPattern,
    spec: Arc<ProcedureSpec>,
    seq: u64,
}

type NamespaceKey = (String, RpcShape);

#[derive(Default)]
struct ProcedureTable {
    exact: HashMap<NamespaceKey, HashMap<String, ExactEntry>>,
    globs: HashMap<NamespaceKey, Vec<GlobEntry>>,
    specs: Vec<Arc<ProcedureSpec>>,
    next_seq: u64,
}

/// 过程注册中心。
///
/// # 契约说明（What）
/// - [`register`](Self::register) 原子生效：任一名称校验失败则整条注册
///   （含全部别名）不落地；
/// - [`try_get`](Self::try_get) 按特异度解析，精确名天然胜过任何匹配同名
///   的通配条目；
/// - [`revision`](Self::revision) 在每次成功注册后递增，调度器据此失效
///   已组合的管道缓存。
pub struct ProcedureRegistry {
    table: Mutex<ProcedureTable>,
    revision: AtomicU64,
}

impl Default for ProcedureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(ProcedureTable::default()),
            revision: AtomicU64::new(0),
        }
    }

    /// 注册一条过程（含别名），全有或全无。
    pub fn register(&self, spec: ProcedureSpec) -> CallResult<()> {
        if spec.service.trim().is_empty() {
            return Err(blank_name_error("service"));
        }
        if spec.name.trim().is_empty() {
            return Err(blank_name_error("name"));
        }
        if spec.aliases.iter().any(|alias| alias.trim().is_empty()) {
            return Err(blank_name_error("alias"));
        }

        let shape = spec.shape();
        let service = spec.service.to_lowercase();
        let mut names: Vec<String> = Vec::with_capacity(1 + spec.aliases.len());
        names.push(spec.name.to_lowercase());
        names.extend(spec.aliases.iter().map(|alias| alias.to_lowercase()));
        for (index, name) in names.iter().enumerate() {
            if names[..index].contains(name) {
                return Err(duplicate_error(&service, name, shape));
            }
        }

        let mut table = self.table.lock();
        let key = (service.clone(), shape);
        for name in &names {
            let exact_hit = table
                .exact
                .get(&key)
                .is_some_and(|bucket| bucket.contains_key(name));
            let glob_hit = table
                .globs
                .get(&key)
                .is_some_and(|entries| entries.iter().any(|entry| entry.pattern.raw == *name));
            if exact_hit || glob_hit {
                return Err(duplicate_error(&service, name, shape));
            }
        }

        let seq = table.next_seq;
        table.next_seq += 1;
        let spec = Arc::new(spec);
        for name in names {
            if is_glob(&name) {
                table.globs.entry(key.clone()).or_default().push(GlobEntry {
                    pattern: GlobPattern::parse(name),
                    spec: Arc::clone(&spec),
                    seq,
                });
            } else {
                table.exact.entry(key.clone()).or_default().insert(
                    name,
                    ExactEntry {
                        spec: Arc::clone(&spec),
                        seq,
                    },
                );
            }
        }
        table.specs.push(spec);
        drop(table);
        self.revision.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// 解析一次调用目标；未命中返回 `None`。
    pub fn try_get(&self, service: &str, name: &str, shape: RpcShape) -> Option<Arc<ProcedureSpec>> {
        let service = service.to_lowercase();
        let name = name.to_lowercase();
        let key = (service, shape);
        let table = self.table.lock();

        // 精确命中直接返回，通配表只在精确表落空时才参与裁决。
        if let Some(bucket) = table.exact.get(&key)
            && let Some(entry) = bucket.get(&name)
        {
            return Some(Arc::clone(&entry.spec));
        }

        // (特异度, 注册序号) 上的字典序裁决：特异度大者胜，再早注册者胜。
        let mut best: Option<(usize, u64, Arc<ProcedureSpec>)> = None;
        if let Some(entries) = table.globs.get(&key) {
            for entry in entries {
                if !entry.pattern.matches(&name) {
                    continue;
                }
                let wins = match &best {
                    None => true,
                    Some((literal, seq, _)) => {
                        entry.pattern.literal > *literal
                            || (entry.pattern.literal == *literal && entry.seq < *seq)
                    }
                };
                if wins {
                    best = Some((entry.pattern.literal, entry.seq, Arc::clone(&entry.spec)));
                }
            }
        }
        best.map(|(_, _, spec)| spec)
    }

    /// 解析一次调用目标；未命中返回 [`codes::PROCEDURE_NOT_FOUND`]。
    pub fn resolve(
        &self,
        service: &str,
        name: &str,
        shape: RpcShape,
    ) -> CallResult<Arc<ProcedureSpec>> {
        self.try_get(service, name, shape).ok_or_else(|| {
            DispatchError::new(
                codes::PROCEDURE_NOT_FOUND,
                format!("no {shape} procedure matches {service}/{name}"),
                ErrorCategory::NotFound,
            )
        })
    }

    /// 当前注册版本号。
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// 按注册顺序导出全部过程，供内省使用。
    pub fn snapshot(&self) -> Vec<Arc<ProcedureSpec>> {
        self.table.lock().specs.iter().map(Arc::clone).collect()
    }
}

fn blank_name_error(field: &'static str) -> DispatchError {
    DispatchError::new(
        codes::REGISTRY_BLANK_NAME,
        format!("procedure {field} must not be blank or whitespace"),
        ErrorCategory::InvalidRegistration,
    )
}

fn duplicate_error(service: &str, name: &str, shape: RpcShape) -> DispatchError {
    DispatchError::new(
        codes::PROCEDURE_DUPLICATE,
        format!("{shape} procedure {service}/{name} is already registered"),
        ErrorCategory::InvalidRegistration,
    )
}
