//! Mock 协作者（用于测试，无需真实模型后端）
//!
//! 全部为脚本化、确定性的实现，并统计调用次数，便于断言「校验失败时不调用协作者」。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::{CoreError, CoreResult};
use crate::planning::{ExecutionResult, Plan, PlanExecutor, PlanProvider, PlanStep, StepResult};
use crate::routing::{RouteSelection, RouteSelector};

/// Mock 步骤耗时（固定值，保证执行结果可逐字节比较）
pub const MOCK_STEP_DURATION: Duration = Duration::from_millis(10);

/// 固定返回 (route, confidence) 的路由选择器
#[derive(Debug)]
pub struct MockRouteSelector {
    route: String,
    confidence: f64,
    failure: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl MockRouteSelector {
    pub fn new(route: impl Into<String>, confidence: f64) -> Self {
        Self {
            route: route.into(),
            confidence,
            failure: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 每次调用都返回 Collaborator 错误
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new("", 0.0)
        }
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl RouteSelector for MockRouteSelector {
    async fn select_route(&self, task: &str, _context: Option<&str>) -> CoreResult<RouteSelection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = &self.failure {
            return Err(CoreError::Collaborator(msg.clone()));
        }
        Ok(RouteSelection::new(
            self.route.clone(),
            self.confidence,
            format!("mock selection for '{}'", task),
        ))
    }
}

/// 按目标脚本化返回计划；未登记的目标返回以目标本身为唯一步骤的计划
#[derive(Debug, Default)]
pub struct MockPlanProvider {
    scripted: HashMap<String, Vec<PlanStep>>,
    failure: Option<String>,
    calls: Arc<AtomicUsize>,
    requests: Mutex<Vec<(String, Option<String>)>>,
}

impl MockPlanProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(mut self, goal: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        self.scripted.insert(goal.into(), steps);
        self
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 收到过的 (goal, context)，按调用顺序
    pub fn requests(&self) -> Vec<(String, Option<String>)> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PlanProvider for MockPlanProvider {
    async fn plan(&self, goal: &str, context: Option<&str>) -> CoreResult<Plan> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((goal.to_string(), context.map(String::from)));
        }
        if let Some(msg) = &self.failure {
            return Err(CoreError::Collaborator(msg.clone()));
        }
        let steps = self
            .scripted
            .get(goal)
            .cloned()
            .unwrap_or_else(|| vec![PlanStep::new(goal, 1.0)]);
        Ok(Plan::new(goal, steps))
    }
}

/// 逐步「执行」计划：默认全部成功，可指定某些 action 失败；遇到第一个失败步骤即停止
#[derive(Debug, Default)]
pub struct MockExecutor {
    failing_actions: HashMap<String, String>,
    states: HashMap<String, HashMap<String, serde_json::Value>>,
    error: Option<String>,
    calls: Arc<AtomicUsize>,
    executed: Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 该 action 的步骤执行失败（StepResult.success = false）
    pub fn failing_on(mut self, action: impl Into<String>, error: impl Into<String>) -> Self {
        self.failing_actions.insert(action.into(), error.into());
        self
    }

    /// 为该 action 的步骤附加 observed_state
    pub fn with_state(
        mut self,
        action: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.states
            .entry(action.into())
            .or_default()
            .insert(key.into(), value);
        self
    }

    /// 每次调用都返回 Collaborator 错误（而非失败的 ExecutionResult）
    pub fn erroring(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 已执行计划的 goal，按调用顺序
    pub fn executed_goals(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PlanExecutor for MockExecutor {
    async fn execute(&self, plan: &Plan) -> CoreResult<ExecutionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(plan.goal.clone());
        }
        if let Some(msg) = &self.error {
            return Err(CoreError::Collaborator(msg.clone()));
        }

        let mut step_results = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let mut result = match self.failing_actions.get(&step.action) {
                Some(err) => StepResult::failed(step.clone(), err.clone(), MOCK_STEP_DURATION),
                None => StepResult::succeeded(
                    step.clone(),
                    format!("{} done", step.action),
                    MOCK_STEP_DURATION,
                ),
            };
            if let Some(state) = self.states.get(&step.action) {
                result.observed_state = state.clone();
            }
            let failed = !result.success;
            step_results.push(result);
            if failed {
                break;
            }
        }

        let success = step_results.iter().all(|r| r.success);
        let final_output = step_results
            .iter()
            .rev()
            .find(|r| r.success)
            .map(|r| r.output.clone())
            .unwrap_or_default();
        let duration = step_results.iter().map(|r| r.duration).sum();

        Ok(ExecutionResult {
            plan: plan.clone(),
            step_results,
            success,
            final_output,
            metadata: HashMap::new(),
            duration,
        })
    }
}
