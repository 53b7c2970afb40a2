//! 内部 sealed 标记，约束对外 Trait 的实现边界。
//!
//! # 设计背景（Why）
//! - 分发内核对外暴露处理器、中间件与生命周期等可实现 Trait；为了在 SemVer
//!   框架下保留追加默认方法的空间，统一挂载 `Sealed` 标记。
//!
//! # 逻辑解析（How）
//! - 定义 crate 私有 Trait 并提供 blanket 实现，任何类型默认满足；
//! - 公开 Trait 以 `crate::sealed::Sealed` 作为超 Trait，未来若需收紧实现者
//!   集合，只需调整此处的 blanket 条件。
//!
//! # 契约说明（What）
//! - 调用方无需也无法显式实现 `Sealed`；它不携带任何方法。
pub(crate) trait Sealed {}

impl<T: ?Sized> Sealed for T {}
