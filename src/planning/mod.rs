//! 规划：分层计划、HTN 分解、时间约束调度、计划修复与解释

pub mod explain;
mod graph;
pub mod hierarchical;
pub mod htn;
pub mod repair;
pub mod temporal;
pub mod traits;
pub mod types;

pub use explain::explain_plan;
pub use hierarchical::{HierarchicalPlanner, DEFAULT_TASK_DURATION};
pub use htn::decompose_network;
pub use repair::{PlanRepairer, RepairRecord};
pub use temporal::{check_acyclic, schedule, DURATION_PARAMETER};
pub use traits::{PlanExecutor, PlanProvider, PlanVerifier, VerificationResult};
pub use types::{
    ExecutionResult, ExecutionTrace, ExplanationLevel, HierarchicalPlan,
    HierarchicalPlanningConfig, HtnPlan, Plan, PlanStep, RepairStrategy, StepResult,
    TaskDecomposition, TemporalConstraint, TemporalPlan, TemporalRelation, TemporalTask,
    TracedStep,
};
