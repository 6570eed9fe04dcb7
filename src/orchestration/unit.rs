//! 编排单元 trait 与基于闭包的原子单元

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::orchestration::types::{MetricsSnapshot, OrchestratorMetrics, Outcome};

/// 共享的编排单元，组合子之间以此互相持有
pub type SharedOrchestrator<I, O> = Arc<dyn Orchestrator<I, O>>;

/// 编排单元：input -> Outcome
///
/// 实现者只需提供 `run`；`execute` 负责取消检查与计数，组合子总是通过 `execute` 调用子单元。
#[async_trait]
pub trait Orchestrator<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str;

    fn metrics(&self) -> &OrchestratorMetrics;

    async fn run(&self, input: I, cancel: &CancellationToken) -> Outcome<O>;

    async fn execute(&self, input: I, cancel: &CancellationToken) -> Outcome<O> {
        let outcome = if cancel.is_cancelled() {
            Outcome::failure(format!("{} cancelled", self.name()))
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::failure(format!("{} cancelled", self.name())),
                outcome = self.run(input, cancel) => outcome,
            }
        };
        self.metrics().record(outcome.success);
        outcome
    }

    fn stats(&self) -> MetricsSnapshot {
        self.metrics().snapshot()
    }
}

type UnitFn<I, O> = dyn Fn(I) -> BoxFuture<'static, Outcome<O>> + Send + Sync;

/// 由异步闭包构成的原子编排单元
pub struct FnOrchestrator<I, O> {
    name: String,
    f: Box<UnitFn<I, O>>,
    metrics: OrchestratorMetrics,
}

impl<I, O> FnOrchestrator<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<O>> + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(move |input| f(input).boxed()),
            metrics: OrchestratorMetrics::new(),
        }
    }

    pub fn shared(self) -> SharedOrchestrator<I, O> {
        Arc::new(self)
    }
}

#[async_trait]
impl<I, O> Orchestrator<I, O> for FnOrchestrator<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> &OrchestratorMetrics {
        &self.metrics
    }

    async fn run(&self, input: I, _cancel: &CancellationToken) -> Outcome<O> {
        (self.f)(input).await
    }
}

/// 便捷构造：直接得到 SharedOrchestrator
pub fn unit<I, O, F, Fut>(name: impl Into<String>, f: F) -> SharedOrchestrator<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome<O>> + Send + 'static,
{
    FnOrchestrator::new(name, f).shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fn_orchestrator_counts_executions() {
        let double = unit("double", |x: i32| async move {
            if x < 0 {
                Outcome::failure("negative")
            } else {
                Outcome::success(x * 2)
            }
        });
        let token = CancellationToken::new();

        assert_eq!(double.execute(4, &token).await.output, Some(8));
        assert!(!double.execute(-1, &token).await.success);

        let stats = double.stats();
        assert_eq!(stats.total_executions, 2);
        assert_eq!(stats.successful_executions, 1);
        assert_eq!(double.name(), "double");
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let slow = unit("slow", |_: ()| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Outcome::success(())
        });
        let token = CancellationToken::new();
        token.cancel();
        let outcome = slow.execute((), &token).await;
        assert!(!outcome.success);
        assert!(outcome.error().contains("cancelled"));
        assert_eq!(slow.stats().total_executions, 1);
    }
}
