//! 置信度路由：信任或确定性回退，并维护滚动校准信号

pub mod router;
pub mod traits;
pub mod types;

pub use router::ConfidenceRouter;
pub use traits::RouteSelector;
pub use types::{
    CalibrationProfile, CalibrationRecord, FallbackStrategy, RouteSelection, RouterConfig,
    RoutingDecision, RoutingRecord, DEFAULT_CONFIDENCE_THRESHOLD,
};
