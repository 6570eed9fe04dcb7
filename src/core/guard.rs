//! 协作者调用边界
//!
//! 所有对 Planner / Executor / RouteSelector 的调用都经过 `guarded`：
//! - 与 CancellationToken 竞速，取消时立即返回 `CoreError::Cancelled`，协作者 future 被丢弃
//! - 捕获协作者内部的 panic，包装成 `"<op> failed: <cause>"`
//! - 协作者报告的失败同样包装成带操作名的错误；校验错误、执行错误原样透传

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::core::error::{CoreError, CoreResult};

/// 在取消与 panic 保护下等待一次协作者调用
pub async fn guarded<T, F>(op: &'static str, cancel: &CancellationToken, fut: F) -> CoreResult<T>
where
    F: Future<Output = CoreResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled(op));
    }

    let fut = AssertUnwindSafe(fut).catch_unwind();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!("{} cancelled while awaiting collaborator", op);
            Err(CoreError::Cancelled(op))
        }
        res = fut => match res {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(rewrap(op, err)),
            Err(payload) => {
                let cause = panic_message(payload.as_ref());
                tracing::error!("{} collaborator panicked: {}", op, cause);
                Err(CoreError::Operation { op, cause })
            }
        },
    }
}

fn rewrap(op: &'static str, err: CoreError) -> CoreError {
    match err {
        CoreError::Collaborator(cause) => CoreError::Operation { op, cause },
        other => other,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
