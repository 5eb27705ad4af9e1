//! 应用构建器

use crate::application::Application;
use di_abstractions::ContainerConfig;
use infrastructure_common::InfrastructureError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// 应用构建器
///
/// 使用建造者模式准备启动参数，`build()` 之后再注册组件
pub struct ApplicationBuilder {
    /// 命令行参数，不含程序名
    args: Vec<String>,
    /// 环境变量，`None` 表示读取当前进程
    env_vars: Option<Vec<(String, String)>>,
    /// 代码中设置的属性
    properties: Vec<(String, String)>,
    /// 额外的配置文件目录，优先于 `spring.config.locations`
    config_locations: Vec<PathBuf>,
    /// 容器配置
    container_config: ContainerConfig,
    /// 是否启用日志初始化
    logging_enabled: bool,
    /// 日志配置
    logging_config: LoggingConfig,
    /// runner 执行完后是否等待关闭信号
    wait_for_shutdown: bool,
    /// 是否监听 Ctrl-C
    handle_signals: bool,
}

impl ApplicationBuilder {
    /// 创建新的应用构建器
    pub fn new() -> Self {
        Self {
            args: Vec::new(),
            env_vars: None,
            properties: Vec::new(),
            config_locations: Vec::new(),
            container_config: ContainerConfig::default(),
            logging_enabled: false, // 默认不启用日志初始化
            logging_config: LoggingConfig::default(),
            wait_for_shutdown: true,
            handle_signals: true,
        }
    }

    /// 命令行参数
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// 使用给定的环境变量代替当前进程的环境变量
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// 设置属性，优先级最低
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    /// 追加配置文件目录
    pub fn add_config_location(mut self, location: impl Into<PathBuf>) -> Self {
        let location = location.into();
        debug!("添加配置目录: {}", location.display());
        self.config_locations.push(location);
        self
    }

    /// 容器配置
    pub fn with_container_config(mut self, config: ContainerConfig) -> Self {
        self.container_config = config;
        self
    }

    /// 关闭宽限期
    pub fn with_shutdown_grace(mut self, grace: Option<Duration>) -> Self {
        self.container_config.shutdown_grace = grace;
        self
    }

    /// 配置日志
    pub fn with_logging(mut self, config: LoggingConfig) -> Self {
        self.logging_config = config;
        self.logging_enabled = true; // 启用日志初始化
        self
    }

    /// runner 执行完后是否等待关闭信号，关闭时直接进入停止流程
    pub fn wait_for_shutdown(mut self, wait: bool) -> Self {
        self.wait_for_shutdown = wait;
        self
    }

    /// 是否监听 Ctrl-C
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// 构建应用
    ///
    /// 在此之前登记的全局注册函数会先于用户注册应用。
    pub fn build(self) -> Result<Application, InfrastructureError> {
        if self.logging_enabled {
            self.logging_config.install();
        }
        info!("开始构建应用");
        Application::new(ApplicationSettings {
            args: self.args,
            env_vars: self.env_vars,
            properties: self.properties,
            config_locations: self.config_locations,
            container_config: self.container_config,
            wait_for_shutdown: self.wait_for_shutdown,
            handle_signals: self.handle_signals,
        })
    }
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 构建器整理后的启动参数
pub(crate) struct ApplicationSettings {
    pub args: Vec<String>,
    pub env_vars: Option<Vec<(String, String)>>,
    pub properties: Vec<(String, String)>,
    pub config_locations: Vec<PathBuf>,
    pub container_config: ContainerConfig,
    pub wait_for_shutdown: bool,
    pub handle_signals: bool,
}

/// 日志配置
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: tracing::Level,
    /// 是否显示目标
    pub show_target: bool,
    /// 是否显示线程ID
    pub show_thread_ids: bool,
    /// 是否显示文件名
    pub show_file: bool,
    /// 是否显示行号
    pub show_line_number: bool,
    /// 是否使用 JSON 格式
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: tracing::Level::INFO,
            show_target: true,
            show_thread_ids: false,
            show_file: false,
            show_line_number: false,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// 创建开发环境日志配置
    pub fn development() -> Self {
        Self {
            level: tracing::Level::DEBUG,
            show_target: true,
            show_thread_ids: true,
            show_file: true,
            show_line_number: true,
            json_format: false,
        }
    }

    /// 创建生产环境日志配置
    pub fn production() -> Self {
        Self {
            level: tracing::Level::INFO,
            show_target: false,
            show_thread_ids: false,
            show_file: false,
            show_line_number: false,
            json_format: true,
        }
    }

    /// 设置日志级别
    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = level;
        self
    }

    /// 安装全局订阅者
    ///
    /// `RUST_LOG` 存在时优先使用。已经安装过订阅者时返回 `false`。
    pub fn install(&self) -> bool {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_ascii_lowercase()));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(self.show_target)
            .with_thread_ids(self.show_thread_ids)
            .with_file(self.show_file)
            .with_line_number(self.show_line_number);

        let installed = if self.json_format {
            subscriber.json().try_init()
        } else {
            subscriber.try_init()
        };
        match installed {
            Ok(()) => {
                info!("日志系统初始化完成");
                true
            }
            Err(e) => {
                debug!("日志系统已初始化，跳过: {}", e);
                false
            }
        }
    }
}
