//! 管道集成测试入口：中间件折叠顺序与流通道终止语义。
//!
//! # 模块目的（Why）
//! - 验证组合引擎“第一个中间件在最外层”的洋葱顺序与空链恒等两条契约；
//! - 验证流通道的 `fail` 终止与消费端离场行为。
//!
//! # 结构概览（What）
//! - [`tests::pipeline::composition_order`]：折叠顺序、短路与形状覆盖；
//! - [`tests::pipeline::stream_termination`]：带错误关闭与背压通道。

pub mod tests {
    /// 集成测试命名空间：归档在 `tests::pipeline` 之下，便于过滤。
    pub mod pipeline {
        /// 组合引擎的顺序契约。
        pub mod composition_order {
            include!("composition_order.rs");
        }
        /// 流通道的收尾语义。
        pub mod stream_termination {
            include!("stream_termination.rs");
        }
    }
}
