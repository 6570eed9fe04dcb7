//! 分层任务网络（HTN）分解
//!
//! 从目标出发广度优先遍历任务网络：网络中有分解的任务记录其子任务顺序，不在网络中的任务为原子任务。
//! 纯计算，不调用协作者。

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::core::{CoreError, CoreResult};
use crate::planning::graph::PrecedenceGraph;
use crate::planning::types::{HtnPlan, Plan, PlanStep, TaskDecomposition};

/// 按任务网络分解目标
pub fn decompose_network(goal: &str, network: &[TaskDecomposition]) -> CoreResult<HtnPlan> {
    if goal.trim().is_empty() {
        return Err(CoreError::EmptyInput("Goal"));
    }
    if network.is_empty() {
        return Err(CoreError::EmptyInput("Task network"));
    }

    let mut by_name: HashMap<&str, &TaskDecomposition> = HashMap::new();
    for decomposition in network {
        if by_name
            .insert(decomposition.task_name.as_str(), decomposition)
            .is_some()
        {
            return Err(CoreError::InvalidConfig(format!(
                "task '{}' is decomposed more than once",
                decomposition.task_name
            )));
        }
    }

    let mut abstract_tasks = BTreeSet::new();
    let mut refinements = HashMap::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue = VecDeque::from([goal]);
    visited.insert(goal);

    while let Some(task) = queue.pop_front() {
        abstract_tasks.insert(task.to_string());
        let Some(decomposition) = by_name.get(task) else {
            continue;
        };
        let ordered = order_subtasks(decomposition)?;
        tracing::debug!(task = %task, subtasks = ?ordered, "HTN refinement");
        for subtask in &decomposition.subtasks {
            if visited.insert(subtask.as_str()) {
                queue.push_back(subtask.as_str());
            }
        }
        refinements.insert(task.to_string(), ordered);
    }

    Ok(HtnPlan {
        goal: goal.to_string(),
        abstract_tasks,
        refinements,
    })
}

/// 按先后约束对子任务做稳定拓扑排序
fn order_subtasks(decomposition: &TaskDecomposition) -> CoreResult<Vec<String>> {
    let index: HashMap<&str, usize> = decomposition
        .subtasks
        .iter()
        .enumerate()
        .rev()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let mut edges = Vec::with_capacity(decomposition.ordering_edges.len());
    for (before, after) in &decomposition.ordering_edges {
        let (Some(&b), Some(&a)) = (index.get(before.as_str()), index.get(after.as_str())) else {
            return Err(CoreError::InvalidConfig(format!(
                "ordering edge ({}, {}) of task '{}' names a task that is not one of its subtasks",
                before, after, decomposition.task_name
            )));
        };
        edges.push((b, a));
    }

    let graph = PrecedenceGraph::new(decomposition.subtasks.len(), edges);
    let order = graph.topological_order().ok_or_else(|| {
        CoreError::InvalidConfig(format!(
            "ordering edges of task '{}' contain a cycle",
            decomposition.task_name
        ))
    })?;

    Ok(order
        .into_iter()
        .map(|i| decomposition.subtasks[i].clone())
        .collect())
}

impl HtnPlan {
    /// 深度优先展开为原子步骤组成的平面计划
    pub fn to_plan(&self) -> Plan {
        let mut steps = Vec::new();
        let mut path = Vec::new();
        self.flatten_into(&self.goal, &mut path, &mut steps);
        Plan::new(self.goal.clone(), steps)
    }

    /// 原子任务：出现在网络遍历中但没有分解的任务
    pub fn primitive_tasks(&self) -> impl Iterator<Item = &str> {
        self.abstract_tasks
            .iter()
            .filter(|t| !self.refinements.contains_key(*t))
            .map(String::as_str)
    }

    fn flatten_into<'a>(&'a self, task: &'a str, path: &mut Vec<&'a str>, steps: &mut Vec<PlanStep>) {
        match self.refinements.get(task) {
            // 网络中的环：当前路径上已经在展开的任务不再展开
            Some(_) if path.contains(&task) => {}
            Some(subtasks) => {
                path.push(task);
                for subtask in subtasks {
                    self.flatten_into(subtask, path, steps);
                }
                path.pop();
            }
            None => steps.push(PlanStep::new(task, 1.0)),
        }
    }
}
