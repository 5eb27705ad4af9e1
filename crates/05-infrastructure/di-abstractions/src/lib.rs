//! # Dependency Injection Abstractions
//!
//! 依赖注入抽象层，定义组件描述、条件和只读注册表接口。
//!
//! ## 核心接口
//!
//! - [`BeanInfo`] - 组件描述信息
//! - [`InjectionDirective`] - 注入指令
//! - [`Condition`] - 装配条件
//! - [`BeanRegistry`] / [`TypedRegistry`] - 刷新后的查找接口
//! - [`LazyRef`] - 延迟注入引用

pub mod condition;
pub mod container;
pub mod descriptor;
pub mod lazy;
pub mod registry;

pub use condition::*;
pub use container::*;
pub use descriptor::*;
pub use lazy::*;
pub use registry::*;
