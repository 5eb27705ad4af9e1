//! 销毁回调
//!
//! 初始化成功的组件登记销毁回调，关闭时按装配的逆序执行，且只执行一次。

use crate::definition::DestroyHook;
use di_abstractions::Erased;
use infrastructure_common::LifecycleError;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::time::Instant;
use tracing::{debug, warn};

pub(crate) struct Destroyer {
    pub bean: String,
    pub instance: Erased,
    pub hooks: Vec<DestroyHook>,
}

impl Destroyer {
    pub fn run(self) -> Result<(), String> {
        let mut failures = Vec::new();
        for hook in &self.hooks {
            match catch_unwind(AssertUnwindSafe(|| hook(&self.instance))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(e.to_string()),
                Err(payload) => failures.push(format!("panic: {}", panic_message(payload.as_ref()))),
            }
        }
        if failures.is_empty() {
            debug!("组件已销毁: {}", self.bean);
            Ok(())
        } else {
            Err(format!("{}: {}", self.bean, failures.join("; ")))
        }
    }
}

/// 销毁回调栈
#[derive(Default)]
pub(crate) struct DestroyerStack {
    entries: Mutex<Option<Vec<Destroyer>>>,
}

impl DestroyerStack {
    /// 按装配顺序登记
    pub fn new(entries: Vec<Destroyer>) -> Self {
        Self {
            entries: Mutex::new(Some(entries)),
        }
    }

    fn take(&self) -> Option<Vec<Destroyer>> {
        self.entries.lock().take()
    }

    /// 同步执行全部销毁回调，用于启动失败时的清理
    pub fn run_blocking(&self) -> Result<(), LifecycleError> {
        let Some(entries) = self.take() else {
            return Ok(());
        };
        let errors: Vec<String> = entries
            .into_iter()
            .rev()
            .filter_map(|destroyer| destroyer.run().err())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::DestroyFailed { errors })
        }
    }

    /// 在截止时间内执行销毁回调
    ///
    /// 每个回调分得剩余时间除以剩余回调数；时间用尽后其余回调被跳过。
    pub async fn run(&self, deadline: Option<Instant>) -> Result<(), LifecycleError> {
        let Some(deadline) = deadline else {
            return self.run_blocking();
        };
        let Some(mut entries) = self.take() else {
            return Ok(());
        };
        entries.reverse();

        let mut failures = Vec::new();
        let mut skipped = Vec::new();
        let total = entries.len();
        let mut remaining = entries.into_iter();

        for position in 0..total {
            let Some(destroyer) = remaining.next() else {
                break;
            };
            let now = Instant::now();
            if now >= deadline {
                skipped.push(destroyer.bean);
                skipped.extend(remaining.by_ref().map(|d| d.bean));
                break;
            }

            let left = u32::try_from(total - position).unwrap_or(u32::MAX);
            let budget = (deadline - now) / left;
            let bean = destroyer.bean.clone();
            match tokio::time::timeout(budget, tokio::task::spawn_blocking(move || destroyer.run())).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(message))) => failures.push(message),
                Ok(Err(join)) => failures.push(format!("{bean}: {join}")),
                Err(_) => {
                    warn!("销毁回调超时: {} (预算 {:?})", bean, budget);
                    failures.push(format!("{bean}: 超过 {budget:?} 未完成"));
                }
            }
        }

        if !skipped.is_empty() {
            warn!("关闭宽限期已用尽，跳过 {} 个销毁回调", skipped.len());
        }

        let mut errors = Vec::new();
        if !failures.is_empty() {
            errors.push(LifecycleError::DestroyFailed { errors: failures });
        }
        if !skipped.is_empty() {
            errors.push(LifecycleError::ShutdownTimeout { skipped });
        }
        LifecycleError::combine(errors).map_or(Ok(()), Err)
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use di_abstractions::erase;
    use infrastructure_common::BoxError;
    use std::sync::Arc;
    use std::time::Duration;

    fn destroyer(bean: &str, log: Arc<Mutex<Vec<String>>>, fail: bool) -> Destroyer {
        let name = bean.to_string();
        Destroyer {
            bean: bean.to_string(),
            instance: erase(Arc::new(())),
            hooks: vec![Box::new(move |_: &Erased| -> Result<(), BoxError> {
                log.lock().push(name.clone());
                if fail {
                    Err("boom".into())
                } else {
                    Ok(())
                }
            }) as DestroyHook],
        }
    }

    #[tokio::test]
    async fn test_reverse_order_and_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = DestroyerStack::new(vec![
            destroyer("a", log.clone(), false),
            destroyer("b", log.clone(), true),
            destroyer("c", log.clone(), false),
        ]);

        let err = stack.run(None).await.unwrap_err();
        assert!(matches!(err, LifecycleError::DestroyFailed { ref errors } if errors == &vec!["b: boom".to_string()]));
        assert_eq!(*log.lock(), vec!["c", "b", "a"]);

        assert!(stack.run(None).await.is_ok());
        assert_eq!(log.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_expired_deadline_skips_remaining() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = DestroyerStack::new(vec![
            destroyer("a", log.clone(), false),
            destroyer("b", log.clone(), false),
        ]);
        let deadline = Instant::now() - Duration::from_millis(1);

        let err = stack.run(Some(deadline)).await.unwrap_err();
        match err {
            LifecycleError::ShutdownTimeout { skipped } => assert_eq!(skipped, vec!["b", "a"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_within_deadline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = DestroyerStack::new(vec![destroyer("a", log.clone(), false)]);
        stack
            .run(Some(Instant::now() + Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(*log.lock(), vec!["a"]);
    }
}
