//! 三张注册表：过程、编解码与出站绑定。
//!
//! 三者都以小写键匹配、保留注册时的原始大小写用于展示，且都把重复注册
//! 当作配置错误拒绝。差异在原子性：过程注册整条生效或整条不生效，编解码
//! 注册逐名独立落表。

pub mod codec;
pub mod outbound;
pub mod procedure;

pub use codec::{Codec, CodecBinding, CodecRegistration, CodecRegistry, CodecScope, TypeTag};
pub use outbound::{
    ClientConfiguration, DEFAULT_OUTBOUND_KEY, OutboundBinding, OutboundRegistry,
};
pub use procedure::{ProcedureRegistry, ProcedureSpec};
