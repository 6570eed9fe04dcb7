//! 路由协作者抽象
//!
//! 由外部（通常是同一个模型后端）根据任务文本给出 (route, confidence, reason)。

use async_trait::async_trait;

use crate::core::CoreResult;
use crate::routing::types::RouteSelection;

#[async_trait]
pub trait RouteSelector: Send + Sync {
    async fn select_route(&self, task: &str, context: Option<&str>) -> CoreResult<RouteSelection>;
}
