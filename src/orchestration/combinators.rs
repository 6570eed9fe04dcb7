//! 编排组合子
//!
//! 顺序（Then / Bind）、变换（Map / Tap / Where）、扇出（Parallel）、容错（WithFallback / WithRetry）
//! 与分支（Conditional）。每个组合子自身也是一个编排单元，拥有独立计数。

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::core::{CoreError, CoreResult};
use crate::orchestration::types::{OrchestratorMetrics, Outcome, RetryConfig};
use crate::orchestration::unit::{Orchestrator, SharedOrchestrator};

/// 顺序组合：first 失败时 second 不会被调用，失败原样向上传递
pub struct Then<I, M, O>
where
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
{
    name: String,
    first: SharedOrchestrator<I, M>,
    second: SharedOrchestrator<M, O>,
    metrics: OrchestratorMetrics,
}

impl<I, M, O> Then<I, M, O>
where
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
{
    pub fn new(first: SharedOrchestrator<I, M>, second: SharedOrchestrator<M, O>) -> Self {
        Self {
            name: format!("{} -> {}", first.name(), second.name()),
            first,
            second,
            metrics: OrchestratorMetrics::new(),
        }
    }
}

#[async_trait]
impl<I, M, O> Orchestrator<I, O> for Then<I, M, O>
where
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> &OrchestratorMetrics {
        &self.metrics
    }

    async fn run(&self, input: I, cancel: &CancellationToken) -> Outcome<O> {
        let first = self.first.execute(input, cancel).await;
        if !first.success {
            return first.into_failure();
        }
        match first.output {
            Some(value) => self.second.execute(value, cancel).await,
            None => Outcome::empty(),
        }
    }
}

type MapFn<M, O> = dyn Fn(M) -> O + Send + Sync;

/// 对成功输出做纯函数变换；失败与空输出原样通过
pub struct Map<I, M, O>
where
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
{
    name: String,
    inner: SharedOrchestrator<I, M>,
    f: Arc<MapFn<M, O>>,
    metrics: OrchestratorMetrics,
}

impl<I, M, O> Map<I, M, O>
where
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
{
    pub fn new<F>(inner: SharedOrchestrator<I, M>, f: F) -> Self
    where
        F: Fn(M) -> O + Send + Sync + 'static,
    {
        Self {
            name: format!("{}.map", inner.name()),
            inner,
            f: Arc::new(f),
            metrics: OrchestratorMetrics::new(),
        }
    }
}

#[async_trait]
impl<I, M, O> Orchestrator<I, O> for Map<I, M, O>
where
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> &OrchestratorMetrics {
        &self.metrics
    }

    async fn run(&self, input: I, cancel: &CancellationToken) -> Outcome<O> {
        let outcome = self.inner.execute(input, cancel).await;
        if !outcome.success {
            return outcome.into_failure();
        }
        match outcome.output {
            Some(value) => Outcome::success((self.f)(value)),
            None => Outcome::empty(),
        }
    }
}

type TapFn<O> = dyn Fn(&O) + Send + Sync;

/// 成功时执行副作用，输出不变
pub struct Tap<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    name: String,
    inner: SharedOrchestrator<I, O>,
    action: Arc<TapFn<O>>,
    metrics: OrchestratorMetrics,
}

impl<I, O> Tap<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new<F>(inner: SharedOrchestrator<I, O>, action: F) -> Self
    where
        F: Fn(&O) + Send + Sync + 'static,
    {
        Self {
            name: format!("{}.tap", inner.name()),
            inner,
            action: Arc::new(action),
            metrics: OrchestratorMetrics::new(),
        }
    }
}

#[async_trait]
impl<I, O> Orchestrator<I, O> for Tap<I, O>
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

    async fn run(&self, input: I, cancel: &CancellationToken) -> Outcome<O> {
        let outcome = self.inner.execute(input, cancel).await;
        if outcome.success {
            if let Some(value) = &outcome.output {
                (self.action)(value);
            }
        }
        outcome
    }
}

type BindFn<M, O> = dyn Fn(M) -> BoxFuture<'static, Outcome<O>> + Send + Sync;

/// 单子绑定：成功输出喂给一个依赖它的异步变换；失败短路
pub struct Bind<I, M, O>
where
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
{
    name: String,
    inner: SharedOrchestrator<I, M>,
    f: Arc<BindFn<M, O>>,
    metrics: OrchestratorMetrics,
}

impl<I, M, O> Bind<I, M, O>
where
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
{
    pub fn new<F, Fut>(inner: SharedOrchestrator<I, M>, f: F) -> Self
    where
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<O>> + Send + 'static,
    {
        Self {
            name: format!("{}.bind", inner.name()),
            inner,
            f: Arc::new(move |value| f(value).boxed()),
            metrics: OrchestratorMetrics::new(),
        }
    }
}

#[async_trait]
impl<I, M, O> Orchestrator<I, O> for Bind<I, M, O>
where
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> &OrchestratorMetrics {
        &self.metrics
    }

    async fn run(&self, input: I, cancel: &CancellationToken) -> Outcome<O> {
        let outcome = self.inner.execute(input, cancel).await;
        if !outcome.success {
            return outcome.into_failure();
        }
        match outcome.output {
            Some(value) => (self.f)(value).await,
            None => Outcome::empty(),
        }
    }
}

type PredicateFn<T> = dyn Fn(&T) -> bool + Send + Sync;

/// 过滤：谓词不满足时报告「成功 + 空输出」，而不是失败
pub struct Where<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    name: String,
    inner: SharedOrchestrator<I, O>,
    predicate: Arc<PredicateFn<O>>,
    metrics: OrchestratorMetrics,
}

impl<I, O> Where<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new<F>(inner: SharedOrchestrator<I, O>, predicate: F) -> Self
    where
        F: Fn(&O) -> bool + Send + Sync + 'static,
    {
        Self {
            name: format!("{}.where", inner.name()),
            inner,
            predicate: Arc::new(predicate),
            metrics: OrchestratorMetrics::new(),
        }
    }
}

#[async_trait]
impl<I, O> Orchestrator<I, O> for Where<I, O>
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

    async fn run(&self, input: I, cancel: &CancellationToken) -> Outcome<O> {
        let outcome = self.inner.execute(input, cancel).await;
        if !outcome.success {
            return outcome;
        }
        match outcome.output {
            Some(value) if (self.predicate)(&value) => Outcome::success(value),
            _ => Outcome::empty(),
        }
    }
}

/// 并行扇出：所有分支对同一输入并发执行，全部结束后汇总
///
/// 某个分支失败不会取消其他分支；任一失败时返回一个聚合失败，output 中保留已成功分支的输出。
pub struct Parallel<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    name: String,
    units: Vec<SharedOrchestrator<I, O>>,
    metrics: OrchestratorMetrics,
}

impl<I, O> Parallel<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new(name: impl Into<String>, units: Vec<SharedOrchestrator<I, O>>) -> CoreResult<Self> {
        if units.is_empty() {
            return Err(CoreError::InvalidConfig(
                "Parallel requires at least one orchestrator".to_string(),
            ));
        }
        Ok(Self {
            name: name.into(),
            units,
            metrics: OrchestratorMetrics::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[async_trait]
impl<I, O> Orchestrator<I, Vec<O>> for Parallel<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> &OrchestratorMetrics {
        &self.metrics
    }

    async fn run(&self, input: I, cancel: &CancellationToken) -> Outcome<Vec<O>> {
        let outcomes = join_all(
            self.units
                .iter()
                .map(|unit| unit.execute(input.clone(), cancel)),
        )
        .await;

        let mut outputs = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (unit, outcome) in self.units.iter().zip(outcomes) {
            if outcome.success {
                outputs.extend(outcome.output);
            } else {
                failures.push(format!("{}: {}", unit.name(), outcome.error()));
            }
        }

        if failures.is_empty() {
            return Outcome::success(outputs);
        }

        tracing::warn!(
            "{}: {}/{} branches failed",
            self.name,
            failures.len(),
            self.units.len()
        );
        Outcome::partial_failure(
            outputs,
            format!(
                "Parallel orchestration had failures: {}",
                failures.join("; ")
            ),
        )
    }
}

/// 主单元失败时用同一输入执行备用单元
pub struct WithFallback<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    name: String,
    primary: SharedOrchestrator<I, O>,
    fallback: SharedOrchestrator<I, O>,
    metrics: OrchestratorMetrics,
}

impl<I, O> WithFallback<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new(primary: SharedOrchestrator<I, O>, fallback: SharedOrchestrator<I, O>) -> Self {
        Self {
            name: format!("{} | {}", primary.name(), fallback.name()),
            primary,
            fallback,
            metrics: OrchestratorMetrics::new(),
        }
    }
}

#[async_trait]
impl<I, O> Orchestrator<I, O> for WithFallback<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> &OrchestratorMetrics {
        &self.metrics
    }

    async fn run(&self, input: I, cancel: &CancellationToken) -> Outcome<O> {
        let primary = self.primary.execute(input.clone(), cancel).await;
        if primary.success {
            return primary;
        }
        tracing::debug!(
            "{} failed ({}), trying fallback {}",
            self.primary.name(),
            primary.error(),
            self.fallback.name()
        );

        let fallback = self.fallback.execute(input, cancel).await;
        if fallback.success {
            return fallback;
        }
        Outcome::failure(format!(
            "Both primary and fallback failed: primary: {}; fallback: {}",
            primary.error(),
            fallback.error()
        ))
    }
}

/// 顺序重试：最多 max_retries 次尝试，两次之间等待 delay；等待期间可被取消
pub struct WithRetry<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    name: String,
    inner: SharedOrchestrator<I, O>,
    config: RetryConfig,
    metrics: OrchestratorMetrics,
}

impl<I, O> WithRetry<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new(inner: SharedOrchestrator<I, O>, config: RetryConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            name: format!("{}.retry({})", inner.name(), config.max_retries),
            inner,
            config,
            metrics: OrchestratorMetrics::new(),
        })
    }
}

#[async_trait]
impl<I, O> Orchestrator<I, O> for WithRetry<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> &OrchestratorMetrics {
        &self.metrics
    }

    async fn run(&self, input: I, cancel: &CancellationToken) -> Outcome<O> {
        let max = self.config.max_retries;
        let mut last_error = String::new();

        for attempt in 1..=max {
            let outcome = self.inner.execute(input.clone(), cancel).await;
            if outcome.success {
                if attempt > 1 {
                    tracing::debug!("{} succeeded on attempt {}", self.inner.name(), attempt);
                }
                return outcome;
            }
            last_error = outcome.error().to_string();

            if attempt < max {
                tracing::debug!(
                    "{} attempt {}/{} failed: {}",
                    self.inner.name(),
                    attempt,
                    max,
                    last_error
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Outcome::failure(format!(
                            "{} cancelled during retry delay",
                            self.inner.name()
                        ));
                    }
                    _ = tokio::time::sleep(self.config.delay) => {}
                }
            }
        }

        tracing::warn!("{} exhausted {} attempts", self.inner.name(), max);
        Outcome::failure(format!(
            "{} failed after {} attempts: {}",
            self.inner.name(),
            max,
            last_error
        ))
    }
}

/// 条件分支：谓词只看输入，恰好执行一个分支
pub struct Conditional<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    name: String,
    predicate: Arc<PredicateFn<I>>,
    when_true: SharedOrchestrator<I, O>,
    when_false: SharedOrchestrator<I, O>,
    metrics: OrchestratorMetrics,
}

impl<I, O> Conditional<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new<F>(
        predicate: F,
        when_true: SharedOrchestrator<I, O>,
        when_false: SharedOrchestrator<I, O>,
    ) -> Self
    where
        F: Fn(&I) -> bool + Send + Sync + 'static,
    {
        Self {
            name: format!("if ? {} : {}", when_true.name(), when_false.name()),
            predicate: Arc::new(predicate),
            when_true,
            when_false,
            metrics: OrchestratorMetrics::new(),
        }
    }
}

#[async_trait]
impl<I, O> Orchestrator<I, O> for Conditional<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> &OrchestratorMetrics {
        &self.metrics
    }

    async fn run(&self, input: I, cancel: &CancellationToken) -> Outcome<O> {
        if (self.predicate)(&input) {
            self.when_true.execute(input, cancel).await
        } else {
            self.when_false.execute(input, cancel).await
        }
    }
}

/// 链式 API：`unit.then(next).map(f).with_retry(cfg)?`
pub trait OrchestratorExt<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn then<O2>(self, next: SharedOrchestrator<O, O2>) -> SharedOrchestrator<I, O2>
    where
        O2: Send + 'static;

    fn map<O2, F>(self, f: F) -> SharedOrchestrator<I, O2>
    where
        O2: Send + 'static,
        F: Fn(O) -> O2 + Send + Sync + 'static;

    fn tap<F>(self, action: F) -> SharedOrchestrator<I, O>
    where
        F: Fn(&O) + Send + Sync + 'static;

    fn bind<O2, F, Fut>(self, f: F) -> SharedOrchestrator<I, O2>
    where
        O2: Send + 'static,
        F: Fn(O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<O2>> + Send + 'static;

    /// 对应 Where（`where` 是关键字）
    fn filter<F>(self, predicate: F) -> SharedOrchestrator<I, O>
    where
        F: Fn(&O) -> bool + Send + Sync + 'static;

    fn with_fallback(self, fallback: SharedOrchestrator<I, O>) -> SharedOrchestrator<I, O>
    where
        I: Clone + Sync;

    fn with_retry(self, config: RetryConfig) -> CoreResult<SharedOrchestrator<I, O>>
    where
        I: Clone + Sync;
}

impl<I, O> OrchestratorExt<I, O> for SharedOrchestrator<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn then<O2>(self, next: SharedOrchestrator<O, O2>) -> SharedOrchestrator<I, O2>
    where
        O2: Send + 'static,
    {
        Arc::new(Then::new(self, next))
    }

    fn map<O2, F>(self, f: F) -> SharedOrchestrator<I, O2>
    where
        O2: Send + 'static,
        F: Fn(O) -> O2 + Send + Sync + 'static,
    {
        Arc::new(Map::new(self, f))
    }

    fn tap<F>(self, action: F) -> SharedOrchestrator<I, O>
    where
        F: Fn(&O) + Send + Sync + 'static,
    {
        Arc::new(Tap::new(self, action))
    }

    fn bind<O2, F, Fut>(self, f: F) -> SharedOrchestrator<I, O2>
    where
        O2: Send + 'static,
        F: Fn(O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<O2>> + Send + 'static,
    {
        Arc::new(Bind::new(self, f))
    }

    fn filter<F>(self, predicate: F) -> SharedOrchestrator<I, O>
    where
        F: Fn(&O) -> bool + Send + Sync + 'static,
    {
        Arc::new(Where::new(self, predicate))
    }

    fn with_fallback(self, fallback: SharedOrchestrator<I, O>) -> SharedOrchestrator<I, O>
    where
        I: Clone + Sync,
    {
        Arc::new(WithFallback::new(self, fallback))
    }

    fn with_retry(self, config: RetryConfig) -> CoreResult<SharedOrchestrator<I, O>>
    where
        I: Clone + Sync,
    {
        Ok(Arc::new(WithRetry::new(self, config)?))
    }
}
