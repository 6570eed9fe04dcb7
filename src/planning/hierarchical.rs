//! 分层规划器
//!
//! 把一个目标变成有深度上限的计划层次：低置信度步骤按广度优先继续向 Planner 请求子计划，
//! 执行时把子计划的步骤结果原位替换进顶层结果。同时提供 HTN 分解、时间约束调度与计划修复入口。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::core::{guarded, CoreError, CoreResult};
use crate::planning::explain::explain_plan;
use crate::planning::htn::decompose_network;
use crate::planning::repair::{PlanRepairer, RepairRecord};
use crate::planning::temporal::{check_acyclic, schedule};
use crate::planning::traits::{PlanExecutor, PlanProvider};
use crate::planning::types::{
    ExecutionResult, ExecutionTrace, ExplanationLevel, HierarchicalPlan,
    HierarchicalPlanningConfig, HtnPlan, Plan, RepairStrategy, TaskDecomposition,
    TemporalConstraint, TemporalPlan,
};

const PLANNING_OP: &str = "Hierarchical planning";
const TEMPORAL_OP: &str = "Temporal planning";
/// 以 "Execution failed: <cause>" 形式报告执行阶段的协作者错误
const EXECUTION_OP: &str = "Execution";

/// 未指定时长的任务默认耗时
pub const DEFAULT_TASK_DURATION: Duration = Duration::from_millis(1000);

pub struct HierarchicalPlanner {
    planner: Arc<dyn PlanProvider>,
    executor: Arc<dyn PlanExecutor>,
    repairer: PlanRepairer,
    default_task_duration: Duration,
}

impl HierarchicalPlanner {
    pub fn new(planner: Arc<dyn PlanProvider>, executor: Arc<dyn PlanExecutor>) -> Self {
        Self {
            repairer: PlanRepairer::new(Arc::clone(&planner)),
            planner,
            executor,
            default_task_duration: DEFAULT_TASK_DURATION,
        }
    }

    pub fn with_default_task_duration(mut self, duration: Duration) -> Self {
        self.default_task_duration = duration;
        self
    }

    /// 修复历史容量（用于 CaseBased）
    pub fn with_repair_history_capacity(mut self, capacity: usize) -> Self {
        self.repairer = PlanRepairer::with_capacity(Arc::clone(&self.planner), capacity);
        self
    }

    /// 创建分层计划；空目标或 max_depth < 1 在调用 Planner 之前失败
    pub async fn create_hierarchical_plan(
        &self,
        goal: &str,
        context: Option<&str>,
        config: Option<HierarchicalPlanningConfig>,
        cancel: &CancellationToken,
    ) -> CoreResult<HierarchicalPlan> {
        let config = config.unwrap_or_default();
        config.validate()?;
        if goal.trim().is_empty() {
            return Err(CoreError::EmptyInput("Goal"));
        }

        let top = guarded(PLANNING_OP, cancel, self.planner.plan(goal, context))
            .await?
            .with_metadata("depth", 0.0);
        tracing::debug!(goal = %goal, steps = top.len(), "top-level plan created");

        let mut sub_plans: HashMap<String, Plan> = HashMap::new();
        let mut frontier: VecDeque<(Plan, u32)> = VecDeque::from([(top.clone(), 0)]);

        while let Some((plan, depth)) = frontier.pop_front() {
            if depth >= config.max_depth || plan.len() < config.min_steps_for_decomposition {
                continue;
            }
            for step in &plan.steps {
                if step.confidence >= config.complexity_threshold
                    || step.action == goal
                    || sub_plans.contains_key(&step.action)
                {
                    continue;
                }
                let sub_context = format!("Sub-task of '{}' (parent goal: {})", plan.goal, goal);
                let sub = guarded(
                    PLANNING_OP,
                    cancel,
                    self.planner.plan(&step.action, Some(&sub_context)),
                )
                .await?
                .with_metadata("depth", f64::from(depth + 1));
                tracing::debug!(
                    action = %step.action,
                    depth = depth + 1,
                    confidence = step.confidence,
                    "decomposed low-confidence step"
                );
                sub_plans.insert(step.action.clone(), sub.clone());
                frontier.push_back((sub, depth + 1));
            }
        }

        tracing::info!(
            goal = %goal,
            sub_plans = sub_plans.len(),
            "hierarchical plan created"
        );
        Ok(HierarchicalPlan {
            goal: goal.to_string(),
            top_level_plan: top,
            sub_plans,
            max_depth: config.max_depth,
            created_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// 执行分层计划；没有子计划时与直接执行顶层计划完全一致
    pub async fn execute_hierarchical(
        &self,
        plan: &HierarchicalPlan,
        cancel: &CancellationToken,
    ) -> CoreResult<ExecutionResult> {
        if plan.sub_plans.is_empty() {
            let result = self.execute_checked(&plan.top_level_plan, cancel).await?;
            return Ok(result);
        }
        let mut path = Vec::new();
        let result = self
            .execute_expanded(&plan.top_level_plan, &plan.sub_plans, &mut path, cancel)
            .await?;
        tracing::info!(
            goal = %plan.goal,
            steps = result.step_results.len(),
            "hierarchical execution completed"
        );
        Ok(result)
    }

    async fn execute_checked(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> CoreResult<ExecutionResult> {
        let result = guarded(EXECUTION_OP, cancel, self.executor.execute(plan)).await?;
        if !result.success {
            let reason = result
                .first_failure()
                .unwrap_or_else(|| format!("plan '{}' reported failure", plan.goal));
            tracing::warn!(goal = %plan.goal, reason = %reason, "execution failed");
            return Err(CoreError::Execution(reason));
        }
        Ok(result)
    }

    /// 执行计划，并把带子计划的步骤结果替换为子计划的（递归）执行结果
    fn execute_expanded<'a>(
        &'a self,
        plan: &'a Plan,
        sub_plans: &'a HashMap<String, Plan>,
        path: &'a mut Vec<String>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, CoreResult<ExecutionResult>> {
        async move {
            let executed = self.execute_checked(plan, cancel).await?;
            let mut duration = executed.duration;
            let mut step_results = Vec::with_capacity(executed.step_results.len());
            let mut expanded = 0usize;

            for result in executed.step_results {
                let action = &result.step.action;
                match sub_plans.get(action) {
                    Some(sub) if !path.contains(action) => {
                        path.push(action.clone());
                        let nested = self.execute_expanded(sub, sub_plans, path, cancel).await;
                        path.pop();
                        let nested = nested?;
                        duration += nested.duration;
                        step_results.extend(nested.step_results);
                        expanded += 1;
                    }
                    _ => step_results.push(result),
                }
            }

            let final_output = step_results
                .last()
                .map(|r| r.output.clone())
                .unwrap_or_default();
            let mut metadata = executed.metadata;
            metadata.insert("expanded_sub_plans".to_string(), serde_json::json!(expanded));

            Ok(ExecutionResult {
                plan: plan.clone(),
                step_results,
                success: true,
                final_output,
                metadata,
                duration,
            })
        }
        .boxed()
    }

    /// 按任务网络分解目标（纯计算）
    pub fn plan_htn(&self, goal: &str, network: &[TaskDecomposition]) -> CoreResult<HtnPlan> {
        decompose_network(goal, network)
    }

    /// 获取平面计划并按时间约束调度；约束成环在调用 Planner 之前失败
    pub async fn plan_with_constraints(
        &self,
        goal: &str,
        constraints: &[TemporalConstraint],
        cancel: &CancellationToken,
    ) -> CoreResult<TemporalPlan> {
        if goal.trim().is_empty() {
            return Err(CoreError::EmptyInput("Goal"));
        }
        check_acyclic(constraints)?;

        let plan = guarded(TEMPORAL_OP, cancel, self.planner.plan(goal, None)).await?;
        let temporal = schedule(&plan, constraints, self.default_task_duration)?;
        tracing::info!(
            goal = %goal,
            tasks = temporal.tasks.len(),
            total_ms = temporal.total_duration.as_millis() as u64,
            "temporal plan scheduled"
        );
        Ok(temporal)
    }

    pub async fn repair_plan(
        &self,
        plan: &Plan,
        trace: &ExecutionTrace,
        strategy: RepairStrategy,
        cancel: &CancellationToken,
    ) -> CoreResult<Plan> {
        self.repairer.repair(plan, trace, strategy, cancel).await
    }

    pub fn record_repair_outcome(
        &self,
        action: &str,
        failure_reason: &str,
        strategy: RepairStrategy,
        success: bool,
    ) -> CoreResult<()> {
        self.repairer
            .record_outcome(action, failure_reason, strategy, success)
    }

    pub fn repair_history(&self) -> Vec<RepairRecord> {
        self.repairer.history()
    }

    pub fn explain_plan(&self, plan: &Plan, level: ExplanationLevel) -> String {
        explain_plan(plan, level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockExecutor, MockPlanProvider};
    use crate::planning::types::PlanStep;
    use std::sync::atomic::Ordering;

    fn release_provider() -> MockPlanProvider {
        MockPlanProvider::new()
            .with_plan(
                "ship release",
                vec![
                    PlanStep::new("freeze", 0.9),
                    PlanStep::new("build", 0.55),
                    PlanStep::new("test", 0.8),
                    PlanStep::new("sign", 0.55),
                    PlanStep::new("publish", 0.9),
                ],
            )
            .with_plan(
                "build",
                vec![
                    PlanStep::new("compile", 0.4),
                    PlanStep::new("link", 0.9),
                    PlanStep::new("package", 0.9),
                ],
            )
            .with_plan(
                "sign",
                vec![
                    PlanStep::new("fetch key", 0.9),
                    PlanStep::new("sign artifacts", 0.9),
                    PlanStep::new("verify", 0.9),
                ],
            )
            .with_plan(
                "compile",
                vec![
                    PlanStep::new("compile core", 0.9),
                    PlanStep::new("compile cli", 0.9),
                    PlanStep::new("compile docs", 0.9),
                ],
            )
    }

    fn planner(provider: MockPlanProvider, executor: MockExecutor) -> HierarchicalPlanner {
        HierarchicalPlanner::new(Arc::new(provider), Arc::new(executor))
    }

    #[tokio::test]
    async fn test_decomposes_low_confidence_steps() {
        let config = HierarchicalPlanningConfig {
            max_depth: 2,
            ..Default::default()
        };
        let plan = planner(release_provider(), MockExecutor::new())
            .create_hierarchical_plan("ship release", None, Some(config), &CancellationToken::new())
            .await
            .unwrap();
        let mut keys: Vec<_> = plan.sub_plans.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["build", "compile", "sign"]);
        assert_eq!(plan.sub_plans["compile"].metadata["depth"], 2.0);
        assert_eq!(plan.top_level_plan.metadata["depth"], 0.0);
        assert!(plan.is_consistent());
    }

    #[tokio::test]
    async fn test_max_depth_one_stops_recursion() {
        let config = HierarchicalPlanningConfig {
            max_depth: 1,
            ..Default::default()
        };
        let plan = planner(release_provider(), MockExecutor::new())
            .create_hierarchical_plan("ship release", None, Some(config), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(plan.sub_plans.len(), 2);
        assert!(!plan.sub_plans.contains_key("compile"));
    }

    #[tokio::test]
    async fn test_zero_depth_fails_without_planner_call() {
        let provider = release_provider();
        let calls = provider.call_counter();
        let config = HierarchicalPlanningConfig {
            max_depth: 0,
            ..Default::default()
        };
        let p = planner(provider, MockExecutor::new());
        for goal in ["ship release", ""] {
            let err = p
                .create_hierarchical_plan(goal, None, Some(config), &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, CoreError::InvalidConfig(_)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_planner_error_is_rewrapped() {
        let p = planner(MockPlanProvider::failing("model offline"), MockExecutor::new());
        let err = p
            .create_hierarchical_plan("ship release", None, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Hierarchical planning failed: model offline");
    }

    #[tokio::test]
    async fn test_execution_splices_sub_plan_results() {
        let config = HierarchicalPlanningConfig {
            max_depth: 1,
            ..Default::default()
        };
        let p = planner(release_provider(), MockExecutor::new());
        let token = CancellationToken::new();
        let plan = p
            .create_hierarchical_plan("ship release", None, Some(config), &token)
            .await
            .unwrap();
        let result = p.execute_hierarchical(&plan, &token).await.unwrap();
        let actions: Vec<_> = result
            .step_results
            .iter()
            .map(|r| r.step.action.as_str())
            .collect();
        assert_eq!(
            actions,
            vec![
                "freeze", "compile", "link", "package", "test", "fetch key",
                "sign artifacts", "verify", "publish"
            ]
        );
        assert!(result.success);
        assert_eq!(result.final_output, "publish done");
        assert_eq!(result.duration, Duration::from_millis(110));
    }

    #[tokio::test]
    async fn test_failure_in_sub_plan_fails_whole_execution() {
        let config = HierarchicalPlanningConfig {
            max_depth: 1,
            ..Default::default()
        };
        let token = CancellationToken::new();
        let p = planner(release_provider(), MockExecutor::new().failing_on("link", "ld crashed"));
        let plan = p
            .create_hierarchical_plan("ship release", None, Some(config), &token)
            .await
            .unwrap();
        let err = p.execute_hierarchical(&plan, &token).await.unwrap_err();
        assert_eq!(err.to_string(), "Execution failed: step 'link': ld crashed");
    }

    #[tokio::test]
    async fn test_executor_error_reported_as_execution_failure() {
        let p = planner(MockPlanProvider::new(), MockExecutor::erroring("sandbox gone"));
        let plan = HierarchicalPlan::flat(Plan::new("g", vec![PlanStep::new("a", 1.0)]), 1);
        let err = p
            .execute_hierarchical(&plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Execution failed: sandbox gone");
    }

    #[tokio::test]
    async fn test_constraint_cycle_fails_before_planner_call() {
        let provider = MockPlanProvider::new();
        let calls = provider.call_counter();
        let p = planner(provider, MockExecutor::new());
        let constraints = [
            TemporalConstraint::before("a", "b"),
            TemporalConstraint::before("b", "a"),
        ];
        assert!(p
            .plan_with_constraints("g", &constraints, &CancellationToken::new())
            .await
            .is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_repair_history_evicts_oldest_at_capacity() {
        let p = planner(MockPlanProvider::new(), MockExecutor::new())
            .with_repair_history_capacity(3);
        for i in 0..5 {
            p.record_repair_outcome(&format!("step {i}"), "timeout", RepairStrategy::Patch, i % 2 == 0)
                .unwrap();
        }
        let history = p.repair_history();
        assert_eq!(history.len(), 3);
        let actions: Vec<_> = history.iter().map(|r| r.action.as_str()).collect();
        assert_eq!(actions, vec!["step 2", "step 3", "step 4"]);
    }

    #[tokio::test]
    async fn test_oversized_step_duration_is_reported_not_raised() {
        let provider = MockPlanProvider::new().with_plan(
            "g",
            vec![PlanStep::new("a", 0.9).with_parameter("duration_ms", serde_json::json!(1e300))],
        );
        let err = planner(provider, MockExecutor::new())
            .plan_with_constraints("g", &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Schedule(_)));
    }

    #[tokio::test]
    async fn test_cancelled_planning() {
        let token = CancellationToken::new();
        token.cancel();
        let err = planner(release_provider(), MockExecutor::new())
            .create_hierarchical_plan("ship release", None, None, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled(_)));
    }
}
