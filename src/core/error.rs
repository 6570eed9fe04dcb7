//! 控制面错误类型
//!
//! 所有公开操作返回 `CoreResult<T>`：预期内的领域错误（空输入、非法配置、越界索引、协作者失败）
//! 都以带标签的错误返回，不会 panic。

use thiserror::Error;

/// 控制面运行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// 空目标 / 空任务 / 空网络等，参数为被检查对象的名字（如 "Goal"）
    #[error("{0} cannot be empty")]
    EmptyInput(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid execution trace: {0}")]
    InvalidTrace(String),

    /// 协作者（Planner / Executor / RouteSelector）主动报告的失败
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Scheduling error: {0}")]
    Schedule(String),

    #[error("{0} cancelled")]
    Cancelled(&'static str),

    /// 在边界处捕获并重新包装的协作者异常，带操作名
    #[error("{op} failed: {cause}")]
    Operation { op: &'static str, cause: String },
}

impl CoreError {
    /// 是否为调用方输入 / 配置问题（这类错误在调用协作者之前就会返回）
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::EmptyInput(_) | CoreError::InvalidConfig(_) | CoreError::InvalidTrace(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
