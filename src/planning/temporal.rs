//! 时间约束调度
//!
//! 前向推算：无前驱的任务从 0 开始；对每条 Before(A, B[, gap])，B.start >= A.end (+ gap)。
//! 约束成环属于配置错误，在调用 Planner 之前检查。

use std::collections::HashMap;
use std::time::Duration;

use crate::core::{CoreError, CoreResult};
use crate::planning::graph::PrecedenceGraph;
use crate::planning::types::{Plan, PlanStep, TemporalConstraint, TemporalPlan, TemporalTask};

/// 步骤参数中表示时长（毫秒）的键
pub const DURATION_PARAMETER: &str = "duration_ms";

/// 仅按任务名检查约束是否成环
pub fn check_acyclic(constraints: &[TemporalConstraint]) -> CoreResult<()> {
    let mut names: HashMap<&str, usize> = HashMap::new();
    for c in constraints {
        for name in [c.predecessor.as_str(), c.successor.as_str()] {
            let next = names.len();
            names.entry(name).or_insert(next);
        }
    }
    let edges = constraints
        .iter()
        .map(|c| (names[c.predecessor.as_str()], names[c.successor.as_str()]));
    let graph = PrecedenceGraph::new(names.len(), edges);
    if graph.topological_order().is_none() {
        return Err(CoreError::InvalidConfig(
            "temporal constraints contain a cycle".to_string(),
        ));
    }
    Ok(())
}

/// 步骤时长：参数 duration_ms（非负数）优先，否则使用默认值；超出 Duration 表示范围时报错
pub fn step_duration(step: &PlanStep, default: Duration) -> CoreResult<Duration> {
    let Some(ms) = step
        .parameters
        .get(DURATION_PARAMETER)
        .and_then(|v| v.as_f64())
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
    else {
        return Ok(default);
    };
    Duration::try_from_secs_f64(ms / 1000.0).map_err(|_| {
        CoreError::Schedule(format!(
            "duration_ms {} of task '{}' is out of range",
            ms, step.action
        ))
    })
}

fn overflow(task: &str) -> CoreError {
    CoreError::Schedule(format!("schedule time overflows at task '{}'", task))
}

/// 为计划计算满足约束的最早开始时间表
///
/// 同名步骤共享约束；返回的任务按拓扑序排列，计划顺序决定并列时的先后。
pub fn schedule(
    plan: &Plan,
    constraints: &[TemporalConstraint],
    default_duration: Duration,
) -> CoreResult<TemporalPlan> {
    let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, step) in plan.steps.iter().enumerate() {
        by_name.entry(step.action.as_str()).or_default().push(i);
    }

    let mut edges = Vec::new();
    let mut gaps: HashMap<(usize, usize), Duration> = HashMap::new();
    for c in constraints {
        let lookup = |name: &str| {
            by_name.get(name).ok_or_else(|| {
                CoreError::Schedule(format!(
                    "constraint references unknown task '{}'",
                    name
                ))
            })
        };
        let predecessors = lookup(&c.predecessor)?;
        let successors = lookup(&c.successor)?;
        let gap = c.min_duration.unwrap_or(Duration::ZERO);
        for &p in predecessors {
            for &s in successors {
                edges.push((p, s));
                let entry = gaps.entry((p, s)).or_insert(gap);
                *entry = (*entry).max(gap);
            }
        }
    }

    let graph = PrecedenceGraph::new(plan.steps.len(), edges);
    let order = graph.topological_order().ok_or_else(|| {
        CoreError::Schedule("temporal constraints contain a cycle".to_string())
    })?;

    let durations = plan
        .steps
        .iter()
        .map(|s| step_duration(s, default_duration))
        .collect::<CoreResult<Vec<Duration>>>()?;
    let mut start = vec![Duration::ZERO; plan.steps.len()];
    let mut end = vec![Duration::ZERO; plan.steps.len()];
    for &node in &order {
        let action = plan.steps[node].action.as_str();
        end[node] = start[node]
            .checked_add(durations[node])
            .ok_or_else(|| overflow(action))?;
        for &next in graph.successors(node) {
            let gap = gaps.get(&(node, next)).copied().unwrap_or(Duration::ZERO);
            let earliest = end[node].checked_add(gap).ok_or_else(|| overflow(action))?;
            start[next] = start[next].max(earliest);
        }
    }

    let tasks: Vec<TemporalTask> = order
        .iter()
        .map(|&i| TemporalTask {
            name: plan.steps[i].action.clone(),
            start_time: start[i],
            end_time: end[i],
        })
        .collect();
    let total_duration = tasks
        .iter()
        .map(|t| t.end_time)
        .max()
        .unwrap_or(Duration::ZERO);

    Ok(TemporalPlan {
        goal: plan.goal.clone(),
        tasks,
        total_duration,
    })
}
