//! # Configuration Abstractions
//!
//! 属性管理抽象层，定义属性来源、层级和只读视图。
//!
//! ## 核心接口
//!
//! - [`PropertySource`] - 属性来源接口
//! - [`LayerKind`] - 属性层级及优先级
//! - [`PropertyResolver`] - 冻结后的只读属性视图
//! - [`ValidationRule`] - 绑定校验规则

pub mod provider;
pub mod resolver;
pub mod validator;

pub use provider::*;
pub use resolver::*;
pub use validator::*;
