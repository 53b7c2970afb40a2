//! 对等体层集成测试入口：选取策略与截止期内的获取等待。
//!
//! # 模块目的（Why）
//! - 验证轮询游标与最少在途两种策略的选取不变量；
//! - 验证获取等待循环的截止期、取消与熔断回执语义，全部跑在手动时钟上。
//!
//! # 结构概览（What）
//! - [`tests::peer::selection`]：策略不变量；
//! - [`tests::peer::acquisition`]：等待循环与租约收尾。

pub mod tests {
    /// 集成测试命名空间：归档在 `tests::peer` 之下，便于过滤。
    pub mod peer {
        /// 选取策略的确定性与公平性。
        pub mod selection {
            include!("selection.rs");
        }
        /// 异步获取与租约生命周期。
        pub mod acquisition {
            include!("acquisition.rs");
        }
    }
}
