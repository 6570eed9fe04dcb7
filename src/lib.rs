//! Bee Control - 智能体控制面
//!
//! 模块划分：
//! - **config**: 配置加载（TOML + 环境变量）
//! - **core**: 错误类型、协作者调用边界、有界历史缓冲区
//! - **observability**: tracing 初始化
//! - **orchestration**: 编排代数（Then / Map / Parallel / WithRetry 等组合子）
//! - **routing**: 置信度路由与确定性回退、校准画像
//! - **planning**: 分层计划、HTN、时间约束调度、计划修复与解释
//! - **mock**: 脚本化的协作者实现（测试用）

pub mod config;
pub mod core;
pub mod mock;
pub mod observability;
pub mod orchestration;
pub mod planning;
pub mod routing;

pub use crate::core::{CoreError, CoreResult};
pub use orchestration::{Orchestrator, OrchestratorExt, Outcome, SharedOrchestrator};
pub use planning::{HierarchicalPlanner, Plan, PlanStep};
pub use routing::{ConfidenceRouter, RoutingDecision};
