//! 路由相关类型：决策、回退策略、历史记录、校准画像

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{clamp_unit, DEFAULT_HISTORY_CAPACITY};

/// 默认最低置信度阈值
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// 路由器配置；阈值在构造 ConfidenceRouter 时夹到 [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    pub minimum_confidence_threshold: f64,
    /// 路由结果与校准记录各自保留的条数
    pub history_capacity: usize,
}

impl RouterConfig {
    pub fn new(minimum_confidence_threshold: f64) -> Self {
        Self {
            minimum_confidence_threshold,
            ..Self::default()
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            minimum_confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// 协作者给出的原始路由选择
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSelection {
    pub route: String,
    pub confidence: f64,
    pub reason: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RouteSelection {
    pub fn new(route: impl Into<String>, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            confidence,
            reason: reason.into(),
            metadata: HashMap::new(),
        }
    }
}

/// 路由决策：直接信任，或带回退注解
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub route: String,
    pub reason: String,
    pub confidence: f64,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RoutingDecision {
    pub fn new(route: impl Into<String>, reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            route: route.into(),
            reason: reason.into(),
            confidence: clamp_unit(confidence),
            metadata: HashMap::new(),
        }
    }

    /// 是否走了回退策略
    pub fn fallback_strategy(&self) -> Option<FallbackStrategy> {
        self.metadata
            .get("fallback_strategy")
            .and_then(|v| v.as_str())
            .and_then(FallbackStrategy::parse)
    }

    pub fn is_direct(&self) -> bool {
        self.metadata.get("strategy").and_then(|v| v.as_str()) == Some("direct")
    }
}

/// 置信度不足时的确定性回退策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FallbackStrategy {
    /// 任务太短、信号太弱：请用户澄清
    RequestClarification,
    /// 任务较长但置信度很低：先收集更多上下文
    GatherMoreContext,
    /// 交给多个路由共同决定
    UseEnsemble,
    /// 任务太长：拆分后分别路由
    DecomposeTask,
}

impl FallbackStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackStrategy::RequestClarification => "request_clarification",
            FallbackStrategy::GatherMoreContext => "gather_more_context",
            FallbackStrategy::UseEnsemble => "use_ensemble",
            FallbackStrategy::DecomposeTask => "decompose_task",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "request_clarification" => Some(FallbackStrategy::RequestClarification),
            "gather_more_context" => Some(FallbackStrategy::GatherMoreContext),
            "use_ensemble" => Some(FallbackStrategy::UseEnsemble),
            "decompose_task" => Some(FallbackStrategy::DecomposeTask),
            _ => None,
        }
    }

    /// 回退后的路由名：集成 / 拆分会改写路由，其余保持原路由
    pub fn adjust_route(&self, route: &str) -> String {
        match self {
            FallbackStrategy::UseEnsemble => format!("ensemble:{route}"),
            FallbackStrategy::DecomposeTask => format!("decompose:{route}"),
            FallbackStrategy::RequestClarification | FallbackStrategy::GatherMoreContext => {
                route.to_string()
            }
        }
    }
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 某条路由的一次实际结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRecord {
    pub route: String,
    pub confidence: f64,
    pub success: bool,
    pub recorded_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub predicted_confidence: f64,
    pub actual_success: bool,
    pub recorded_at: i64,
}

/// 校准画像：预测置信度与实际成功率的偏差
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub samples: usize,
    pub mean_predicted: f64,
    pub success_rate: f64,
    /// mean_predicted - success_rate；正值表示过度自信
    pub bias: f64,
}

impl CalibrationProfile {
    pub fn from_records(records: &[CalibrationRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let n = records.len() as f64;
        let mean_predicted = records.iter().map(|r| r.predicted_confidence).sum::<f64>() / n;
        let success_rate = records.iter().filter(|r| r.actual_success).count() as f64 / n;
        Self {
            samples: records.len(),
            mean_predicted,
            success_rate,
            bias: mean_predicted - success_rate,
        }
    }

    pub fn is_overconfident(&self) -> bool {
        self.bias > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_round_trip_names() {
        for s in [
            FallbackStrategy::RequestClarification,
            FallbackStrategy::GatherMoreContext,
            FallbackStrategy::UseEnsemble,
            FallbackStrategy::DecomposeTask,
        ] {
            assert_eq!(FallbackStrategy::parse(s.as_str()), Some(s));
        }
        assert_eq!(FallbackStrategy::parse("nope"), None);
    }

    #[test]
    fn test_adjust_route() {
        assert_eq!(FallbackStrategy::UseEnsemble.adjust_route("code"), "ensemble:code");
        assert_eq!(FallbackStrategy::DecomposeTask.adjust_route("code"), "decompose:code");
        assert_eq!(FallbackStrategy::GatherMoreContext.adjust_route("code"), "code");
    }

    #[test]
    fn test_decision_clamps_confidence() {
        assert_eq!(RoutingDecision::new("a", "r", 3.0).confidence, 1.0);
        assert_eq!(RoutingDecision::new("a", "r", -1.0).confidence, 0.0);
    }

    #[test]
    fn test_calibration_profile() {
        let records = vec![
            CalibrationRecord {
                predicted_confidence: 0.9,
                actual_success: true,
                recorded_at: 0,
            },
            CalibrationRecord {
                predicted_confidence: 0.9,
                actual_success: false,
                recorded_at: 0,
            },
        ];
        let profile = CalibrationProfile::from_records(&records);
        assert_eq!(profile.samples, 2);
        assert!((profile.mean_predicted - 0.9).abs() < 1e-9);
        assert!((profile.success_rate - 0.5).abs() < 1e-9);
        assert!(profile.is_overconfident());
        assert_eq!(CalibrationProfile::from_records(&[]).samples, 0);
    }
}
