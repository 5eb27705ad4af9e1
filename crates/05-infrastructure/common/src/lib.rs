//! # Infrastructure Common
//!
//! IoC 容器各层共享的基础设施: 错误分类、类型元数据、应用上下文。
//!
//! ## 核心组件
//!
//! - [`ErrorKind`] - 错误分类，所有错误都可以通过 `kind()` 获取
//! - [`TypeInfo`] - 基于类型名的稳定标识和组件类型判断
//! - [`AppContext`] - 可取消的任务组，后台任务的唯一入口
//! - [`AppRunner`] / [`AppEvent`] - 应用级启动事件

pub mod errors;
pub mod lifecycle;
pub mod metadata;

pub use errors::*;
pub use lifecycle::*;
pub use metadata::*;
