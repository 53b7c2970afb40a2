//! 分发器本体与生命周期契约。

pub mod core;
pub mod lifecycle;

pub use self::core::{
    ComponentInfo, Dispatcher, DispatcherBuilder, DispatcherSnapshot, MiddlewareDirection,
    MiddlewareInfo, OutboundInfo, ProcedureInfo,
};
pub use self::lifecycle::{
    ComponentStopRecord, ComponentStopStatus, DispatcherStatus, Lifecycle, StopReport, Transport,
};
