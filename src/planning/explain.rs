//! 计划解释：按四个层次生成文本说明

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::planning::types::{ExplanationLevel, Plan, PlanStep};

pub fn explain_plan(plan: &Plan, level: ExplanationLevel) -> String {
    match level {
        ExplanationLevel::Brief => format!("{}, {} steps", plan.goal, plan.steps.len()),
        ExplanationLevel::Detailed => detailed(plan),
        ExplanationLevel::Causal => causal(plan),
        ExplanationLevel::Counterfactual => counterfactual(plan),
    }
}

fn outcome_of(step: &PlanStep) -> &str {
    if step.expected_outcome.trim().is_empty() {
        "progress toward the goal"
    } else {
        &step.expected_outcome
    }
}

fn detailed(plan: &Plan) -> String {
    let mut out = format!("Plan: {} ({} steps)", plan.goal, plan.steps.len());
    for (i, step) in plan.steps.iter().enumerate() {
        let _ = write!(
            out,
            "\n{}. {} (confidence {:.2})",
            i + 1,
            step.action,
            step.confidence
        );
        if !step.parameters.is_empty() {
            // 排序后输出，保证同一计划的说明稳定
            let params: BTreeMap<_, _> = step.parameters.iter().collect();
            let rendered: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            let _ = write!(out, "\n   parameters: {}", rendered.join(", "));
        }
        if !step.expected_outcome.is_empty() {
            let _ = write!(out, "\n   expected: {}", step.expected_outcome);
        }
    }
    out
}

fn causal(plan: &Plan) -> String {
    if plan.steps.is_empty() {
        return format!("Plan for '{}' has no steps", plan.goal);
    }
    let mut lines = Vec::with_capacity(plan.steps.len());
    for (i, step) in plan.steps.iter().enumerate() {
        let mut line = format!(
            "Step {} ({}) exists to achieve {}",
            i + 1,
            step.action,
            outcome_of(step)
        );
        if i > 0 {
            let _ = write!(line, ", building on {}", plan.steps[i - 1].action);
        }
        match plan.steps.get(i + 1) {
            Some(next) => {
                let _ = write!(line, ", so that {} can proceed", next.action);
            }
            None => {
                let _ = write!(line, ", completing the goal '{}'", plan.goal);
            }
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn counterfactual(plan: &Plan) -> String {
    if plan.steps.is_empty() {
        return format!("Plan for '{}' has no steps", plan.goal);
    }
    let mut lines = Vec::with_capacity(plan.steps.len());
    for (i, step) in plan.steps.iter().enumerate() {
        let mut line = format!(
            "Without step {} ({}): {} would not be achieved",
            i + 1,
            step.action,
            outcome_of(step)
        );
        match plan.steps.get(i + 1) {
            Some(next) => {
                let _ = write!(line, ", and {} would lose its prerequisite", next.action);
            }
            None => {
                let _ = write!(line, ", so the goal '{}' would remain unreached", plan.goal);
            }
        }
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan() -> Plan {
        Plan::new(
            "ship release",
            vec![
                PlanStep::new("build", 0.9)
                    .with_expected_outcome("artifacts")
                    .with_parameter("target", json!("x86_64"))
                    .with_parameter("profile", json!("release")),
                PlanStep::new("publish", 0.8),
            ],
        )
    }

    #[test]
    fn test_brief() {
        assert_eq!(
            explain_plan(&plan(), ExplanationLevel::Brief),
            "ship release, 2 steps"
        );
    }

    #[test]
    fn test_detailed_lists_steps_and_sorted_parameters() {
        let text = explain_plan(&plan(), ExplanationLevel::Detailed);
        assert!(text.contains("1. build (confidence 0.90)"));
        assert!(text.contains("parameters: profile=\"release\", target=\"x86_64\""));
        assert!(text.contains("expected: artifacts"));
        assert!(text.contains("2. publish"));
    }

    #[test]
    fn test_causal_and_counterfactual() {
        let causal = explain_plan(&plan(), ExplanationLevel::Causal);
        assert!(causal.contains("Step 1 (build) exists to achieve artifacts, so that publish can proceed"));
        assert!(causal.contains("completing the goal 'ship release'"));

        let cf = explain_plan(&plan(), ExplanationLevel::Counterfactual);
        assert!(cf.contains("Without step 1 (build): artifacts would not be achieved, and publish would lose its prerequisite"));
        assert!(cf.contains("Without step 2 (publish)"));
    }

    #[test]
    fn test_empty_plan() {
        let empty = Plan::new("idle", vec![]);
        assert_eq!(explain_plan(&empty, ExplanationLevel::Brief), "idle, 0 steps");
        assert!(explain_plan(&empty, ExplanationLevel::Causal).contains("no steps"));
    }
}
