//! 计划修复
//!
//! 某个步骤执行失败后，在不重启整个 Agent 循环的前提下修复计划：
//! Replan / Patch / Backtrack 三种基本策略，加上按历史修复结果挑选策略的 CaseBased。

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::{guarded, BoundedHistory, CoreError, CoreResult, DEFAULT_HISTORY_CAPACITY};
use crate::planning::traits::PlanProvider;
use crate::planning::types::{ExecutionTrace, Plan, PlanStep, RepairStrategy};

const OP: &str = "Plan repair";
/// 失败原因的 Jaccard 词重叠达到此值即视为相似
const SIMILARITY_THRESHOLD: f64 = 0.5;
/// CaseBased 并列时的优先顺序
const CANDIDATES: [RepairStrategy; 3] = [
    RepairStrategy::Patch,
    RepairStrategy::Backtrack,
    RepairStrategy::Replan,
];

/// 一次修复的结果记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairRecord {
    pub action: String,
    pub failure_reason: String,
    pub strategy: RepairStrategy,
    pub success: bool,
    pub recorded_at: i64,
}

impl RepairRecord {
    fn is_similar(&self, action: &str, failure_reason: &str) -> bool {
        self.action == action
            || jaccard(&tokens(&self.failure_reason), &tokens(failure_reason))
                >= SIMILARITY_THRESHOLD
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

pub struct PlanRepairer {
    planner: Arc<dyn PlanProvider>,
    history: BoundedHistory<RepairRecord>,
}

impl PlanRepairer {
    pub fn new(planner: Arc<dyn PlanProvider>) -> Self {
        Self::with_capacity(planner, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(planner: Arc<dyn PlanProvider>, capacity: usize) -> Self {
        Self {
            planner,
            history: BoundedHistory::new(capacity),
        }
    }

    /// 修复失败的计划；轨迹越界在调用 Planner 之前返回错误
    pub async fn repair(
        &self,
        plan: &Plan,
        trace: &ExecutionTrace,
        strategy: RepairStrategy,
        cancel: &CancellationToken,
    ) -> CoreResult<Plan> {
        trace.validate()?;
        let idx = trace.failed_at_index;
        if idx >= plan.steps.len() {
            return Err(CoreError::InvalidTrace(format!(
                "failed_at_index {} out of range for plan with {} steps",
                idx,
                plan.steps.len()
            )));
        }

        let strategy = match strategy {
            RepairStrategy::CaseBased => {
                let chosen = self.select_strategy(&plan.steps[idx].action, &trace.failure_reason);
                tracing::info!(chosen = %chosen, "case-based repair selected strategy");
                chosen
            }
            other => other,
        };
        tracing::info!(
            goal = %plan.goal,
            failed_at = idx,
            strategy = %strategy,
            "repairing plan"
        );

        let steps = match strategy {
            RepairStrategy::Patch => self.patch(plan, trace, cancel).await?,
            RepairStrategy::Backtrack => {
                let resume = resume_index(trace);
                tracing::debug!(resume_at = resume, "backtracking");
                self.replan_from(plan, trace, resume, cancel).await?
            }
            RepairStrategy::Replan | RepairStrategy::CaseBased => {
                self.replan_from(plan, trace, idx, cancel).await?
            }
        };

        let mut repaired = Plan::new(plan.goal.clone(), Vec::new());
        repaired.steps = steps;
        repaired.metadata = plan.metadata.clone();
        repaired.metadata.insert("repair_index".to_string(), idx as f64);
        Ok(repaired)
    }

    /// 保留 [0, keep) 的步骤，为同一目标重新规划后追加
    async fn replan_from(
        &self,
        plan: &Plan,
        trace: &ExecutionTrace,
        keep: usize,
        cancel: &CancellationToken,
    ) -> CoreResult<Vec<PlanStep>> {
        let completed: Vec<&str> = plan.steps[..keep].iter().map(|s| s.action.as_str()).collect();
        let failed_action = &plan.steps[trace.failed_at_index].action;
        let context = format!(
            "Completed steps: {}. Step '{}' failed: {}",
            if completed.is_empty() {
                "none".to_string()
            } else {
                completed.join(", ")
            },
            failed_action,
            trace.failure_reason
        );

        let fresh = guarded(OP, cancel, self.planner.plan(&plan.goal, Some(&context))).await?;
        let mut steps = plan.steps[..keep].to_vec();
        steps.extend(fresh.steps);
        Ok(steps)
    }

    /// 保留失败点之前的前缀，由 Planner 给出替换步骤（及其后续步骤）
    async fn patch(
        &self,
        plan: &Plan,
        trace: &ExecutionTrace,
        cancel: &CancellationToken,
    ) -> CoreResult<Vec<PlanStep>> {
        let idx = trace.failed_at_index;
        let action = &plan.steps[idx].action;
        let patch_goal = format!("Fix {}: {}", action, trace.failure_reason);
        let patch = guarded(OP, cancel, self.planner.plan(&patch_goal, Some(&plan.goal))).await?;
        if patch.steps.is_empty() {
            return Err(CoreError::Operation {
                op: OP,
                cause: format!("patch for step '{}' returned no steps", action),
            });
        }

        let mut steps = plan.steps[..idx].to_vec();
        steps.extend(patch.steps);
        Ok(steps)
    }

    /// 相似历史中成功率最高的策略；无相似历史时为 Replan
    pub fn select_strategy(&self, action: &str, failure_reason: &str) -> RepairStrategy {
        let similar = self.history.filter(|r| r.is_similar(action, failure_reason));
        let mut best: Option<(RepairStrategy, f64)> = None;
        for strategy in CANDIDATES {
            let outcomes: Vec<bool> = similar
                .iter()
                .filter(|r| r.strategy == strategy)
                .map(|r| r.success)
                .collect();
            if outcomes.is_empty() {
                continue;
            }
            let rate = outcomes.iter().filter(|s| **s).count() as f64 / outcomes.len() as f64;
            if best.map_or(true, |(_, b)| rate > b) {
                best = Some((strategy, rate));
            }
        }
        best.map(|(s, _)| s).unwrap_or(RepairStrategy::Replan)
    }

    /// 记录一次修复结果，供 CaseBased 参考
    pub fn record_outcome(
        &self,
        action: &str,
        failure_reason: &str,
        strategy: RepairStrategy,
        success: bool,
    ) -> CoreResult<()> {
        if strategy == RepairStrategy::CaseBased {
            return Err(CoreError::InvalidConfig(
                "repair outcomes must name a concrete strategy, not CaseBased".to_string(),
            ));
        }
        if action.trim().is_empty() {
            return Err(CoreError::EmptyInput("Action"));
        }
        self.history.push(RepairRecord {
            action: action.to_string(),
            failure_reason: failure_reason.to_string(),
            strategy,
            success,
            recorded_at: chrono::Utc::now().timestamp_millis(),
        });
        Ok(())
    }

    pub fn history(&self) -> Vec<RepairRecord> {
        self.history.snapshot()
    }
}

/// 从失败点向前回退，跳过不可安全恢复的步骤，返回需要保留的步骤数
fn resume_index(trace: &ExecutionTrace) -> usize {
    let mut resume = trace.failed_at_index;
    while resume > 0 && !trace.executed_steps[resume - 1].is_resumable() {
        resume -= 1;
    }
    resume
}
