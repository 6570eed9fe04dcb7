//! 编排单元的结果与计数器
//!
//! 编排单元从不以错误形式抛出预期失败：每次执行都返回一个 `Outcome`（成功标志 + 可选输出 + 可选错误信息）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{CoreError, CoreResult};

/// 单次编排执行的结果
///
/// - 成功且有输出：`success(v)`
/// - 成功但输出为空：`empty()`（`Where` 谓词不满足时产生）
/// - 失败：`failure(msg)`；`Parallel` 失败时 output 中保留已成功分支的输出
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub success: bool,
    pub output: Option<T>,
    pub error_message: Option<String>,
}

impl<T> Outcome<T> {
    pub fn success(output: T) -> Self {
        Self {
            success: true,
            output: Some(output),
            error_message: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            success: true,
            output: None,
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error_message: Some(message.into()),
        }
    }

    /// 失败，但携带部分输出
    pub fn partial_failure(output: T, message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Some(output),
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> &str {
        self.error_message.as_deref().unwrap_or("unknown error")
    }

    /// 把失败原样转换成另一种输出类型的失败（输出被丢弃）
    pub fn into_failure<U>(self) -> Outcome<U> {
        Outcome {
            success: false,
            output: None,
            error_message: self.error_message,
        }
    }

    pub fn into_result(self) -> Result<Option<T>, String> {
        if self.success {
            Ok(self.output)
        } else {
            Err(self.error_message.unwrap_or_else(|| "unknown error".to_string()))
        }
    }
}

/// 每个编排单元自带的执行计数
#[derive(Debug, Default)]
pub struct OrchestratorMetrics {
    total: AtomicU64,
    successful: AtomicU64,
}

impl OrchestratorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, success: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_executions: self.total.load(Ordering::Relaxed),
            successful_executions: self.successful.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_executions: u64,
    pub successful_executions: u64,
}

impl MetricsSnapshot {
    pub fn failed_executions(&self) -> u64 {
        self.total_executions - self.successful_executions
    }

    /// 尚未执行过时返回 0
    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.successful_executions as f64 / self.total_executions as f64
        }
    }
}

/// 重试配置：max_retries 为总尝试次数（≥1），delay 为两次尝试之间的等待
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryConfig {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.max_retries < 1 {
            return Err(CoreError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(100),
        }
    }
}
