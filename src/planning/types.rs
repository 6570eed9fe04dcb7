//! 规划数据模型
//!
//! Plan / PlanStep 由协作者 Planner 产生，返回后视为不可变；修复与分层都生成新的 Plan。

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{clamp_unit, CoreError, CoreResult};

/// 计划中的原子步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub action: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub expected_outcome: String,
    pub confidence: f64,
}

impl PlanStep {
    pub fn new(action: impl Into<String>, confidence: f64) -> Self {
        Self {
            action: action.into(),
            parameters: HashMap::new(),
            expected_outcome: String::new(),
            confidence: clamp_unit(confidence),
        }
    }

    pub fn with_expected_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.expected_outcome = outcome.into();
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// 为达成目标而排好序的步骤序列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub metadata: HashMap<String, f64>,
    /// 毫秒时间戳
    pub created_at: i64,
}

impl Plan {
    /// 构造时把每个步骤的置信度夹到 [0, 1]
    pub fn new(goal: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        let steps = steps
            .into_iter()
            .map(|mut s| {
                s.confidence = clamp_unit(s.confidence);
                s
            })
            .collect();
        Self {
            goal: goal.into(),
            steps,
            metadata: HashMap::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.action.as_str())
    }

    /// 各步骤置信度均值；空计划为 0
    pub fn mean_confidence(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        self.steps.iter().map(|s| s.confidence).sum::<f64>() / self.steps.len() as f64
    }
}

/// 单个步骤的执行结果（由 Executor 产生）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: PlanStep,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration: Duration,
    #[serde(default)]
    pub observed_state: HashMap<String, serde_json::Value>,
}

impl StepResult {
    pub fn succeeded(step: PlanStep, output: impl Into<String>, duration: Duration) -> Self {
        Self {
            step,
            success: true,
            output: output.into(),
            error: None,
            duration,
            observed_state: HashMap::new(),
        }
    }

    pub fn failed(step: PlanStep, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            step,
            success: false,
            output: String::new(),
            error: Some(error.into()),
            duration,
            observed_state: HashMap::new(),
        }
    }
}

/// 一次执行尝试的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub plan: Plan,
    pub step_results: Vec<StepResult>,
    pub success: bool,
    pub final_output: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub duration: Duration,
}

impl ExecutionResult {
    /// 第一个失败步骤的错误信息
    pub fn first_failure(&self) -> Option<String> {
        self.step_results.iter().find(|r| !r.success).map(|r| {
            let reason = r.error.as_deref().unwrap_or("unknown error");
            format!("step '{}': {}", r.step.action, reason)
        })
    }
}

/// 分层规划配置；在消费它的入口处校验，而不是构造时
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalPlanningConfig {
    /// 顶层计划之下最多展开的子计划层数
    pub max_depth: u32,
    pub min_steps_for_decomposition: usize,
    /// 置信度低于此值的步骤会被继续分解
    pub complexity_threshold: f64,
}

impl HierarchicalPlanningConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_depth < 1 {
            return Err(CoreError::InvalidConfig(
                "max_depth must be at least 1".to_string(),
            ));
        }
        if self.min_steps_for_decomposition < 1 {
            return Err(CoreError::InvalidConfig(
                "min_steps_for_decomposition must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.complexity_threshold) {
            return Err(CoreError::InvalidConfig(format!(
                "complexity_threshold must be within [0, 1], got {}",
                self.complexity_threshold
            )));
        }
        Ok(())
    }
}

impl Default for HierarchicalPlanningConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            min_steps_for_decomposition: 3,
            complexity_threshold: 0.7,
        }
    }
}

/// 分层计划：顶层计划 + 按步骤 action 索引的子计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalPlan {
    pub goal: String,
    pub top_level_plan: Plan,
    pub sub_plans: HashMap<String, Plan>,
    pub max_depth: u32,
    pub created_at: i64,
}

impl HierarchicalPlan {
    /// 不含子计划的平面分层计划
    pub fn flat(plan: Plan, max_depth: u32) -> Self {
        Self {
            goal: plan.goal.clone(),
            top_level_plan: plan,
            sub_plans: HashMap::new(),
            max_depth,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 每个子计划的键都必须能在顶层计划或某个子计划的步骤中找到
    pub fn is_consistent(&self) -> bool {
        let mut known: BTreeSet<&str> = self.top_level_plan.actions().collect();
        for plan in self.sub_plans.values() {
            known.extend(plan.actions());
        }
        self.sub_plans.keys().all(|k| known.contains(k.as_str()))
    }

    /// 所有计划（顶层 + 子计划）中的步骤总数
    pub fn total_steps(&self) -> usize {
        self.top_level_plan.len() + self.sub_plans.values().map(Plan::len).sum::<usize>()
    }
}

/// 任务网络中的一条分解：task_name -> 有序子任务 + 先后约束
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDecomposition {
    pub task_name: String,
    pub subtasks: Vec<String>,
    /// (before, after)：before 必须排在 after 之前
    #[serde(default)]
    pub ordering_edges: Vec<(String, String)>,
}

impl TaskDecomposition {
    pub fn new(task_name: impl Into<String>, subtasks: Vec<&str>) -> Self {
        Self {
            task_name: task_name.into(),
            subtasks: subtasks.into_iter().map(String::from).collect(),
            ordering_edges: Vec::new(),
        }
    }

    pub fn with_ordering(mut self, before: &str, after: &str) -> Self {
        self.ordering_edges.push((before.to_string(), after.to_string()));
        self
    }
}

/// 基于任务网络分解的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtnPlan {
    pub goal: String,
    pub abstract_tasks: BTreeSet<String>,
    pub refinements: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalRelation {
    /// successor 不能早于 predecessor 结束（+ min_duration）开始
    Before,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalConstraint {
    pub predecessor: String,
    pub successor: String,
    pub relation: TemporalRelation,
    pub min_duration: Option<Duration>,
}

impl TemporalConstraint {
    pub fn before(predecessor: impl Into<String>, successor: impl Into<String>) -> Self {
        Self {
            predecessor: predecessor.into(),
            successor: successor.into(),
            relation: TemporalRelation::Before,
            min_duration: None,
        }
    }

    /// 带最小间隔的 Before
    pub fn before_with_gap(
        predecessor: impl Into<String>,
        successor: impl Into<String>,
        gap: Duration,
    ) -> Self {
        Self {
            min_duration: Some(gap),
            ..Self::before(predecessor, successor)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalTask {
    pub name: String,
    pub start_time: Duration,
    pub end_time: Duration,
}

impl TemporalTask {
    pub fn duration(&self) -> Duration {
        self.end_time.saturating_sub(self.start_time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalPlan {
    pub goal: String,
    pub tasks: Vec<TemporalTask>,
    pub total_duration: Duration,
}

impl TemporalPlan {
    pub fn task(&self, name: &str) -> Option<&TemporalTask> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// 执行轨迹中的单个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracedStep {
    pub name: String,
    pub success: bool,
    pub duration: Duration,
    #[serde(default)]
    pub observed_state: HashMap<String, serde_json::Value>,
}

impl TracedStep {
    pub fn new(name: impl Into<String>, success: bool) -> Self {
        Self {
            name: name.into(),
            success,
            duration: Duration::ZERO,
            observed_state: HashMap::new(),
        }
    }

    pub fn with_state(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.observed_state.insert(key.into(), value);
        self
    }

    /// 成功且未声明 resumable = false 的步骤可以安全地作为恢复点
    pub fn is_resumable(&self) -> bool {
        self.success
            && self
                .observed_state
                .get("resumable")
                .and_then(|v| v.as_bool())
                .unwrap_or(true)
    }
}

impl From<&StepResult> for TracedStep {
    fn from(result: &StepResult) -> Self {
        Self {
            name: result.step.action.clone(),
            success: result.success,
            duration: result.duration,
            observed_state: result.observed_state.clone(),
        }
    }
}

/// 执行到某一步失败时的轨迹
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub executed_steps: Vec<TracedStep>,
    pub failed_at_index: usize,
    pub failure_reason: String,
}

impl ExecutionTrace {
    /// 从一次失败的执行结果构造轨迹；全部成功时返回 None
    pub fn from_execution(result: &ExecutionResult) -> Option<Self> {
        let failed_at_index = result.step_results.iter().position(|r| !r.success)?;
        let failure_reason = result.step_results[failed_at_index]
            .error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string());
        Some(Self {
            executed_steps: result.step_results.iter().map(TracedStep::from).collect(),
            failed_at_index,
            failure_reason,
        })
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.failed_at_index >= self.executed_steps.len() {
            return Err(CoreError::InvalidTrace(format!(
                "failed_at_index {} out of range for {} executed steps",
                self.failed_at_index,
                self.executed_steps.len()
            )));
        }
        Ok(())
    }

    pub fn failed_step(&self) -> Option<&TracedStep> {
        self.executed_steps.get(self.failed_at_index)
    }
}

/// 计划修复策略（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepairStrategy {
    /// 丢弃失败点之后的所有步骤，为同一目标重新规划
    Replan,
    /// 保留失败点之前的步骤，补一个替换步骤
    Patch,
    /// 回退到最近的可恢复步骤再重新规划
    Backtrack,
    /// 参考历史修复结果，选表现最好的策略
    CaseBased,
}

impl fmt::Display for RepairStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RepairStrategy::Replan => "Replan",
            RepairStrategy::Patch => "Patch",
            RepairStrategy::Backtrack => "Backtrack",
            RepairStrategy::CaseBased => "CaseBased",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExplanationLevel {
    Brief,
    Detailed,
    Causal,
    Counterfactual,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_clamps_step_confidence() {
        let mut step = PlanStep::new("a", 0.5);
        step.confidence = 4.0;
        let plan = Plan::new("g", vec![step, PlanStep::new("b", -1.0)]);
        assert_eq!(plan.steps[0].confidence, 1.0);
        assert_eq!(plan.steps[1].confidence, 0.0);
        assert_eq!(plan.mean_confidence(), 0.5);
    }

    #[test]
    fn test_config_validation() {
        assert!(HierarchicalPlanningConfig::default().validate().is_ok());
        let zero_depth = HierarchicalPlanningConfig {
            max_depth: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_depth.validate(),
            Err(CoreError::InvalidConfig(_))
        ));
        let bad_threshold = HierarchicalPlanningConfig {
            complexity_threshold: 1.5,
            ..Default::default()
        };
        assert!(bad_threshold.validate().is_err());
    }

    #[test]
    fn test_trace_validation() {
        let trace = ExecutionTrace {
            executed_steps: vec![TracedStep::new("a", true), TracedStep::new("b", false)],
            failed_at_index: 2,
            failure_reason: "x".into(),
        };
        assert!(matches!(trace.validate(), Err(CoreError::InvalidTrace(_))));

        let trace = ExecutionTrace {
            failed_at_index: 1,
            ..trace
        };
        assert!(trace.validate().is_ok());
        assert_eq!(trace.failed_step().map(|s| s.name.as_str()), Some("b"));
    }

    #[test]
    fn test_resumable() {
        assert!(TracedStep::new("a", true).is_resumable());
        assert!(!TracedStep::new("a", false).is_resumable());
        assert!(!TracedStep::new("a", true)
            .with_state("resumable", json!(false))
            .is_resumable());
    }

    #[test]
    fn test_trace_from_execution() {
        let plan = Plan::new("g", vec![PlanStep::new("a", 1.0), PlanStep::new("b", 1.0)]);
        let result = ExecutionResult {
            plan: plan.clone(),
            step_results: vec![
                StepResult::succeeded(plan.steps[0].clone(), "ok", Duration::from_millis(5)),
                StepResult::failed(plan.steps[1].clone(), "disk full", Duration::from_millis(1)),
            ],
            success: false,
            final_output: String::new(),
            metadata: HashMap::new(),
            duration: Duration::from_millis(6),
        };
        let trace = ExecutionTrace::from_execution(&result).unwrap();
        assert_eq!(trace.failed_at_index, 1);
        assert_eq!(trace.failure_reason, "disk full");
        assert_eq!(
            result.first_failure().as_deref(),
            Some("step 'b': disk full")
        );
    }

    #[test]
    fn test_hierarchical_consistency() {
        let top = Plan::new("g", vec![PlanStep::new("a", 0.2), PlanStep::new("b", 0.9)]);
        let mut h = HierarchicalPlan::flat(top, 2);
        assert!(h.is_consistent());
        h.sub_plans.insert(
            "a".into(),
            Plan::new("a", vec![PlanStep::new("a1", 0.3)]),
        );
        h.sub_plans.insert("a1".into(), Plan::new("a1", vec![PlanStep::new("x", 1.0)]));
        assert!(h.is_consistent());
        assert_eq!(h.total_steps(), 4);
        h.sub_plans.insert("zzz".into(), Plan::new("zzz", vec![]));
        assert!(!h.is_consistent());
    }
}
