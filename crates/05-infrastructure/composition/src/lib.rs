//! # 应用组合层
//!
//! 把属性层、依赖注入容器和生命周期管理组合成一个可运行的应用。
//!
//! ## 主要功能
//!
//! - **应用构建器**: 使用构建者模式准备启动参数
//! - **配置源管理**: 发现 `application.<ext>` 与 profile 文件，叠加环境变量和命令行
//! - **生命周期管理**: runner、启动/停止事件、关闭信号和有序销毁
//!
//! ## 基本使用
//!
//! ```rust,no_run
//! use infrastructure_composition::{Application, ExitStatus};
//!
//! #[tokio::main]
//! async fn main() -> std::process::ExitCode {
//!     let mut app = match Application::builder().with_args(std::env::args().skip(1)).build() {
//!         Ok(app) => app,
//!         Err(e) => {
//!             eprintln!("{e}");
//!             return ExitStatus::StartupFailed.into();
//!         }
//!     };
//!     if let Err(e) = app.context_mut().object(String::from("hello")) {
//!         eprintln!("{e}");
//!         return ExitStatus::StartupFailed.into();
//!     }
//!
//!     let result = app.run().await;
//!     ExitStatus::of(&result).into()
//! }
//! ```

pub mod application;
pub mod banner;
pub mod builder;
pub mod config_sources;

#[cfg(test)]
mod tests;

// 重新导出主要类型
pub use application::{
    Application, ExitStatus, RunMode, ShutdownHandle, APPLICATION_NAME_KEY, PID_FILE_KEY,
    SHUTDOWN_HANDLE_BEAN,
};
pub use builder::{ApplicationBuilder, LoggingConfig};
pub use config_sources::{
    ConfigSourceDescriptor, ConfigSourceOptions, PropertyBootstrap, CONFIG_EXTENSIONS_KEY,
    CONFIG_LOCATIONS_KEY,
};

// 重新导出错误类型
pub use infrastructure_common::InfrastructureError;
