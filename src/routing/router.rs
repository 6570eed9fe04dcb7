//! 置信度路由器
//!
//! 向 RouteSelector 询问 (route, confidence)，置信度达到阈值则直接信任；否则按任务长度与置信度
//! 确定性地选择一种回退策略，并在 metadata 中注明原始路由与原始置信度。
//! 路由结果与校准记录存放在有界历史中，用于 calculate_confidence 的历史修正与校准画像。

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::core::{clamp_unit, guarded, BoundedHistory, CoreError, CoreResult};
use crate::routing::traits::RouteSelector;
use crate::routing::types::{
    CalibrationProfile, CalibrationRecord, FallbackStrategy, RouterConfig, RoutingDecision,
    RoutingRecord,
};

/// 无历史时的基础置信度
const BASE_CONFIDENCE: f64 = 0.5;
/// 历史成功率向 0.5 收缩时的先验权重（相当于 2 个虚拟样本）
const HISTORY_PRIOR_WEIGHT: f64 = 2.0;
/// 低于此值视为「极低置信度」
const VERY_LOW_CONFIDENCE: f64 = 0.3;
const LOW_CONFIDENCE: f64 = 0.5;
/// 极低置信度下，不超过此字符数的任务请求澄清
const SHORT_TASK_CHARS: usize = 50;
/// 低置信度下，不超过此词数的任务走集成
const SHORT_TASK_WORDS: usize = 20;

pub struct ConfidenceRouter {
    selector: Arc<dyn RouteSelector>,
    threshold: f64,
    outcomes: BoundedHistory<RoutingRecord>,
    calibration: BoundedHistory<CalibrationRecord>,
}

impl ConfidenceRouter {
    pub fn new(selector: Arc<dyn RouteSelector>, config: RouterConfig) -> Self {
        Self {
            selector,
            threshold: clamp_unit(config.minimum_confidence_threshold),
            outcomes: BoundedHistory::new(config.history_capacity),
            calibration: BoundedHistory::new(config.history_capacity),
        }
    }

    /// 生效的（已夹紧的）阈值
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// 为任务选择路由；空任务在调用协作者之前直接失败
    pub async fn route(
        &self,
        task: &str,
        context: Option<&str>,
        cancel: &CancellationToken,
    ) -> CoreResult<RoutingDecision> {
        if task.trim().is_empty() {
            return Err(CoreError::EmptyInput("Task"));
        }

        let selection = guarded(
            "Routing",
            cancel,
            self.selector.select_route(task, context),
        )
        .await?;

        if selection.route.trim().is_empty() {
            return Err(CoreError::Operation {
                op: "Routing",
                cause: "route selector returned an empty route".to_string(),
            });
        }

        let confidence = clamp_unit(selection.confidence);
        if confidence >= self.threshold {
            tracing::info!(
                "route '{}' accepted directly (confidence {:.2} >= {:.2})",
                selection.route,
                confidence,
                self.threshold
            );
            let mut decision = RoutingDecision::new(selection.route, selection.reason, confidence);
            decision.metadata.extend(selection.metadata);
            decision.metadata.insert("threshold".into(), json!(self.threshold));
            decision.metadata.insert("strategy".into(), json!("direct"));
            return Ok(decision);
        }

        let strategy = Self::determine_fallback(task, confidence);
        tracing::warn!(
            "route '{}' below threshold ({:.2} < {:.2}), falling back to {}",
            selection.route,
            confidence,
            self.threshold,
            strategy
        );

        let mut decision = RoutingDecision::new(
            strategy.adjust_route(&selection.route),
            format!(
                "{} (fallback: {} at confidence {:.2})",
                selection.reason, strategy, confidence
            ),
            confidence,
        );
        decision.metadata.extend(selection.metadata);
        decision.metadata.insert("threshold".into(), json!(self.threshold));
        decision.metadata.insert("original_route".into(), json!(selection.route));
        decision.metadata.insert("fallback_strategy".into(), json!(strategy.as_str()));
        decision.metadata.insert("original_confidence".into(), json!(confidence));
        Ok(decision)
    }

    /// 纯函数：根据任务与置信度选择回退策略
    ///
    /// - confidence < 0.3：任务 ≤ 50 字符请求澄清，否则收集更多上下文
    /// - 0.3 ≤ confidence < 0.5：任务 ≤ 20 词走集成，否则拆分
    /// - 其余（低于调用方阈值）：集成
    pub fn determine_fallback(task: &str, confidence: f64) -> FallbackStrategy {
        let confidence = clamp_unit(confidence);
        if confidence < VERY_LOW_CONFIDENCE {
            if task.chars().count() <= SHORT_TASK_CHARS {
                FallbackStrategy::RequestClarification
            } else {
                FallbackStrategy::GatherMoreContext
            }
        } else if confidence < LOW_CONFIDENCE {
            if task.split_whitespace().count() <= SHORT_TASK_WORDS {
                FallbackStrategy::UseEnsemble
            } else {
                FallbackStrategy::DecomposeTask
            }
        } else {
            FallbackStrategy::UseEnsemble
        }
    }

    /// 本地估算某任务走某路由的置信度：基础值 × 复杂度 × 上下文 × 历史修正，夹到 [0, 1]
    pub fn calculate_confidence(&self, task: &str, route: &str, context: Option<&str>) -> f64 {
        if task.trim().is_empty() || route.trim().is_empty() {
            return 0.0;
        }
        clamp_unit(
            BASE_CONFIDENCE
                * complexity_factor(task)
                * context_factor(context)
                * self.history_adjustment(route),
        )
    }

    /// 记录一次路由的实际结果；同时追加一条校准记录
    ///
    /// 回退决策按原始路由记账，这样 calculate_confidence 看到的是底层路由的表现。
    pub fn record_routing_outcome(&self, decision: &RoutingDecision, success: bool) -> CoreResult<()> {
        if decision.route.trim().is_empty() {
            return Err(CoreError::EmptyInput("Decision route"));
        }
        let route = decision
            .metadata
            .get("original_route")
            .and_then(|v| v.as_str())
            .unwrap_or(decision.route.as_str())
            .to_string();
        let now = chrono::Utc::now().timestamp_millis();
        let confidence = clamp_unit(decision.confidence);

        self.outcomes.push(RoutingRecord {
            route,
            confidence,
            success,
            recorded_at: now,
        });
        self.calibration.push(CalibrationRecord {
            predicted_confidence: confidence,
            actual_success: success,
            recorded_at: now,
        });
        Ok(())
    }

    /// 某路由在保留窗口内的成功率；无样本时为 None
    pub fn route_success_rate(&self, route: &str) -> Option<f64> {
        let records = self.outcomes.filter(|r| r.route == route);
        if records.is_empty() {
            return None;
        }
        let successes = records.iter().filter(|r| r.success).count();
        Some(successes as f64 / records.len() as f64)
    }

    pub fn routing_history(&self) -> Vec<RoutingRecord> {
        self.outcomes.snapshot()
    }

    pub fn calibration_profile(&self) -> CalibrationProfile {
        CalibrationProfile::from_records(&self.calibration.snapshot())
    }

    /// 0 个样本时为 1.0（中性），样本增多时趋向 0.5 + 实际成功率
    fn history_adjustment(&self, route: &str) -> f64 {
        let records = self.outcomes.filter(|r| r.route == route);
        let successes = records.iter().filter(|r| r.success).count() as f64;
        let rate = (0.5 * HISTORY_PRIOR_WEIGHT + successes)
            / (HISTORY_PRIOR_WEIGHT + records.len() as f64);
        0.5 + rate
    }
}

/// 任务越长越复杂，因子越低，下限 0.5
fn complexity_factor(task: &str) -> f64 {
    let words = task.split_whitespace().count() as f64;
    let chars = task.chars().count() as f64;
    (1.0 - 0.02 * words - (chars / 2000.0).min(0.2)).max(0.5)
}

/// 有非空上下文时 > 1.0，否则为 1.0
fn context_factor(context: Option<&str>) -> f64 {
    match context.map(str::trim) {
        Some(c) if !c.is_empty() => 1.0 + (0.1 + c.chars().count() as f64 / 1000.0).min(0.3),
        _ => 1.0,
    }
}
