//! 进程级注册
//!
//! 各模块在启动前把注册函数放入队列，由 `Application` 在用户注册之前统一应用。
//! 队列只会被取出一次。
//!
//! 队列是进程级的，不属于某个容器：同一进程里第一个调用
//! [`ApplicationContext::register_globals`] 的容器取走全部注册函数。
//! 同一进程中并行创建多个容器（例如并行运行的测试）时，注册函数可能落到
//! 另一个容器上，这类测试需要串行执行。

use crate::context::ApplicationContext;
use infrastructure_common::DependencyError;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, info};

type Registrant = Box<dyn FnOnce(&mut ApplicationContext) -> Result<(), DependencyError> + Send>;

static REGISTRANTS: Lazy<Mutex<Vec<(&'static str, Registrant)>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// 访问全局队列的测试持有此锁
#[cfg(test)]
pub(crate) static SERIAL: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// 登记一个注册函数
pub fn register<F>(name: &'static str, registrant: F)
where
    F: FnOnce(&mut ApplicationContext) -> Result<(), DependencyError> + Send + 'static,
{
    debug!("登记全局注册函数: {}", name);
    REGISTRANTS.lock().push((name, Box::new(registrant)));
}

/// 尚未应用的注册函数名称
pub fn pending() -> Vec<&'static str> {
    REGISTRANTS.lock().iter().map(|(name, _)| *name).collect()
}

impl ApplicationContext {
    /// 应用全部已登记的注册函数，返回应用的数量
    ///
    /// 所有注册函数都会执行，错误合并后返回。
    pub fn register_globals(&mut self) -> Result<usize, DependencyError> {
        let registrants = std::mem::take(&mut *REGISTRANTS.lock());
        let count = registrants.len();
        let mut errors = Vec::new();
        for (name, registrant) in registrants {
            debug!("应用全局注册函数: {}", name);
            if let Err(error) = registrant(self) {
                errors.push(error);
            }
        }
        if let Some(error) = DependencyError::combine(errors) {
            return Err(error);
        }
        if count > 0 {
            info!("已应用 {} 个全局注册函数", count);
        }
        Ok(count)
    }
}
