//! 控制面配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE_CONTROL__*` 覆盖（双下划线表示嵌套，如 `BEE_CONTROL__ROUTER__MINIMUM_CONFIDENCE_THRESHOLD=0.8`）。
//! 这里只做反序列化与转换；各运行时结构在被消费的地方校验（路由器夹紧阈值，规划器拒绝 max_depth < 1）。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::core::DEFAULT_HISTORY_CAPACITY;
use crate::orchestration::RetryConfig;
use crate::planning::{HierarchicalPlanner, HierarchicalPlanningConfig, PlanExecutor, PlanProvider};
use crate::routing::{RouterConfig, DEFAULT_CONFIDENCE_THRESHOLD};

/// 配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub router: RouterSection,
    pub planning: PlanningSection,
    pub retry: RetrySection,
    pub history: HistorySection,
}

/// [router] 段
#[derive(Debug, Clone, Deserialize)]
pub struct RouterSection {
    #[serde(default = "default_confidence_threshold")]
    pub minimum_confidence_threshold: f64,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            minimum_confidence_threshold: default_confidence_threshold(),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

/// [planning] 段：分层规划与时间调度
#[derive(Debug, Clone, Deserialize)]
pub struct PlanningSection {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_min_steps")]
    pub min_steps_for_decomposition: usize,
    #[serde(default = "default_complexity_threshold")]
    pub complexity_threshold: f64,
    /// 未指定 duration_ms 的任务时长（毫秒）
    #[serde(default = "default_task_duration_ms")]
    pub default_task_duration_ms: u64,
}

impl Default for PlanningSection {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            min_steps_for_decomposition: default_min_steps(),
            complexity_threshold: default_complexity_threshold(),
            default_task_duration_ms: default_task_duration_ms(),
        }
    }
}

fn default_max_depth() -> u32 {
    3
}

fn default_min_steps() -> usize {
    3
}

fn default_complexity_threshold() -> f64 {
    0.7
}

fn default_task_duration_ms() -> u64 {
    1000
}

/// [retry] 段
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    /// 总尝试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: default_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    100
}

/// [history] 段：路由结果、校准记录与修复记录的缓冲区容量
#[derive(Debug, Clone, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl AppConfig {
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            minimum_confidence_threshold: self.router.minimum_confidence_threshold,
            history_capacity: self.history_capacity(),
        }
    }

    pub fn planning_config(&self) -> HierarchicalPlanningConfig {
        HierarchicalPlanningConfig {
            max_depth: self.planning.max_depth,
            min_steps_for_decomposition: self.planning.min_steps_for_decomposition,
            complexity_threshold: self.planning.complexity_threshold,
        }
    }

    pub fn default_task_duration(&self) -> Duration {
        Duration::from_millis(self.planning.default_task_duration_ms)
    }

    /// 路由结果、校准记录与修复记录共用的缓冲区容量
    pub fn history_capacity(&self) -> usize {
        self.history.capacity
    }

    /// 按配置组装分层规划器：默认任务时长与修复历史容量
    pub fn hierarchical_planner(
        &self,
        planner: Arc<dyn PlanProvider>,
        executor: Arc<dyn PlanExecutor>,
    ) -> HierarchicalPlanner {
        HierarchicalPlanner::new(planner, executor)
            .with_default_task_duration(self.default_task_duration())
            .with_repair_history_capacity(self.history_capacity())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.delay_ms),
        )
    }

    /// 启动时的整体检查；运行时各入口仍会各自校验
    pub fn validate(&self) -> Result<()> {
        if self.history.capacity == 0 {
            bail!("history.capacity must be at least 1");
        }
        if !self.router.minimum_confidence_threshold.is_finite() {
            bail!("router.minimum_confidence_threshold must be a finite number");
        }
        self.planning_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("[planning] {}", e))?;
        self.retry_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("[retry] {}", e))?;
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 BEE_CONTROL__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE_CONTROL__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE_CONTROL")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
