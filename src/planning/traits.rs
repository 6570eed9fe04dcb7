//! 规划协作者抽象
//!
//! 计划内容的生成、步骤的实际执行与结果校验都在控制面之外，这里只声明接口。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::CoreResult;
use crate::planning::types::{ExecutionResult, Plan};

/// 为目标生成平面计划；也用于子计划、重新规划与补丁生成
#[async_trait]
pub trait PlanProvider: Send + Sync {
    async fn plan(&self, goal: &str, context: Option<&str>) -> CoreResult<Plan>;
}

/// 执行一个计划中的所有原子步骤
#[async_trait]
pub trait PlanExecutor: Send + Sync {
    async fn execute(&self, plan: &Plan) -> CoreResult<ExecutionResult>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub score: f64,
    pub feedback: String,
}

/// 结果校验，由外层 Agent 循环使用
#[async_trait]
pub trait PlanVerifier: Send + Sync {
    async fn verify(&self, execution: &ExecutionResult) -> CoreResult<VerificationResult>;
}
