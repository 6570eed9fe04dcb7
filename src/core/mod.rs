//! 核心基础设施：错误类型、协作者调用边界、有界历史缓冲区、分数归一化

pub mod error;
pub mod guard;
pub mod history;
pub mod score;

pub use error::{CoreError, CoreResult};
pub use guard::guarded;
pub use history::{BoundedHistory, DEFAULT_HISTORY_CAPACITY};
pub use score::clamp_unit;
