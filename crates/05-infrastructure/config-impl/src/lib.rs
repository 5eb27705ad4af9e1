//! # Configuration Implementation
//!
//! 分层属性存储的具体实现。
//!
//! ## 主要组件
//!
//! - [`PropertyStore`] / [`PropertyStoreBuilder`] - 分层属性存储
//! - [`FilePropertySource`] - `.properties`、YAML、TOML、JSON 配置文件
//! - [`EnvironmentPropertySource`] - 环境变量
//! - [`CommandLinePropertySource`] - 命令行参数
//! - [`Expression`] - 校验和条件共用的表达式语言

pub mod binder;
pub mod expr;
pub mod placeholder;
pub mod providers;
pub mod store;
pub mod validation;


pub use binder::parse_duration;
pub use expr::{ExprValue, Expression};
pub use providers::*;
pub use store::*;
pub use validation::check_value;
