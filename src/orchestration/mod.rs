//! 编排代数：以「报告成功 / 失败而非抛错」的异步单元为基础的控制流组合子

pub mod combinators;
pub mod types;
pub mod unit;

pub use combinators::{
    Bind, Conditional, Map, OrchestratorExt, Parallel, Tap, Then, Where, WithFallback, WithRetry,
};
pub use types::{MetricsSnapshot, OrchestratorMetrics, Outcome, RetryConfig};
pub use unit::{unit, FnOrchestrator, Orchestrator, SharedOrchestrator};
