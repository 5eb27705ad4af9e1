//! 错误类型定义
//!
//! 容器内所有错误都可以通过 `kind()` 归类到 [`ErrorKind`]。

use std::fmt;
use thiserror::Error;

/// 通用的装箱错误类型，用户钩子和工厂返回的错误都会转换成它
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 名称或类型查找未命中
    NotFound,
    /// 多个候选且没有 primary
    Ambiguous,
    /// 解析值无法赋给目标类型
    TypeMismatch,
    /// 属性绑定时校验失败
    ValidationFailed,
    /// 属性引用展开出现循环
    CyclicReference,
    /// 条件之间循环依赖
    ConditionCycle,
    /// 非延迟注入图存在环
    DependencyCycle,
    /// 工厂返回错误或 panic
    ConstructionFailed,
    /// 容器已刷新后继续注册
    WireAfterRefresh,
    /// 关闭开始后继续提交任务
    ShutdownInProgress,
    /// 配置文件、解析或表达式语法错误
    InvalidConfiguration,
    /// 运行期的 runner / 事件错误
    RunnerFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "NotFound",
            Self::Ambiguous => "Ambiguous",
            Self::TypeMismatch => "TypeMismatch",
            Self::ValidationFailed => "ValidationFailed",
            Self::CyclicReference => "CyclicReference",
            Self::ConditionCycle => "ConditionCycle",
            Self::DependencyCycle => "DependencyCycle",
            Self::ConstructionFailed => "ConstructionFailed",
            Self::WireAfterRefresh => "WireAfterRefresh",
            Self::ShutdownInProgress => "ShutdownInProgress",
            Self::InvalidConfiguration => "InvalidConfiguration",
            Self::RunnerFailed => "RunnerFailed",
        };
        f.write_str(name)
    }
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    #[error("配置文件读取失败: {source}")]
    FileReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("配置解析失败: {path}, 原因: {source}")]
    ParseError { path: String, source: BoxError },

    #[error("配置文件格式不支持: {path}")]
    UnsupportedFormat { path: String },

    #[error("配置键不存在: {key}")]
    KeyNotFound { key: String },

    #[error("配置类型转换失败: {key}, 原因: {message}")]
    TypeMismatch { key: String, message: String },

    #[error("属性引用存在循环: {}", chain.join(" -> "))]
    CyclicReference { chain: Vec<String> },

    #[error("属性引用语法错误: {text}")]
    InvalidPlaceholder { text: String },

    #[error("表达式无效: {expr}, 原因: {message}")]
    InvalidExpression { expr: String, message: String },

    #[error("配置验证失败: {key}, 规则: {rule}, 值: {value}")]
    ValidationFailed {
        key: String,
        rule: String,
        value: String,
    },
}

impl ConfigError {
    /// 创建类型转换错误
    pub fn type_mismatch(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            key: key.into(),
            message: message.into(),
        }
    }

    /// 错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyNotFound { .. } => ErrorKind::NotFound,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::CyclicReference { .. } => ErrorKind::CyclicReference,
            Self::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            Self::FileNotFound { .. }
            | Self::FileReadError { .. }
            | Self::ParseError { .. }
            | Self::UnsupportedFormat { .. }
            | Self::InvalidPlaceholder { .. }
            | Self::InvalidExpression { .. } => ErrorKind::InvalidConfiguration,
        }
    }

    /// 为相对键补全前缀，绑定嵌套结构时使用
    #[must_use]
    pub fn with_key_prefix(self, prefix: &str) -> Self {
        if prefix.is_empty() {
            return self;
        }
        let join = |key: String| {
            if key.is_empty() {
                prefix.to_string()
            } else if key == prefix
                || key
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
            {
                key
            } else if key.starts_with('[') {
                format!("{prefix}{key}")
            } else {
                format!("{prefix}.{key}")
            }
        };
        match self {
            Self::KeyNotFound { key } => Self::KeyNotFound { key: join(key) },
            Self::TypeMismatch { key, message } => Self::TypeMismatch {
                key: join(key),
                message,
            },
            other => other,
        }
    }
}

impl serde::de::Error for ConfigError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::TypeMismatch {
            key: String::new(),
            message: msg.to_string(),
        }
    }

    fn missing_field(field: &'static str) -> Self {
        Self::KeyNotFound {
            key: field.to_string(),
        }
    }
}

/// 依赖注入错误类型
#[derive(Error, Debug)]
pub enum DependencyError {
    #[error("找不到组件: {selector} (被 {required_by} 依赖)")]
    BeanNotFound {
        selector: String,
        required_by: String,
    },

    #[error("组件选择不唯一: {selector} (被 {required_by} 依赖), 候选: {}", candidates.join(", "))]
    Ambiguous {
        selector: String,
        required_by: String,
        candidates: Vec<String>,
    },

    #[error("组件类型不匹配: {bean} 无法赋值给 {expected} (被 {required_by} 依赖)")]
    TypeMismatch {
        bean: String,
        expected: String,
        required_by: String,
    },

    #[error("注入指令无效: {bean}, 原因: {message}")]
    InvalidDirective { bean: String, message: String },

    #[error("组件重复定义: {id}")]
    DuplicateBean { id: String },

    #[error("组件名称重复: {name}, 组件: {}", beans.join(", "))]
    DuplicateName { name: String, beans: Vec<String> },

    #[error("条件存在循环依赖: {}", beans.join(", "))]
    ConditionCycle { beans: Vec<String> },

    #[error("检测到循环依赖: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("组件创建失败: {bean}, 原因: {source}")]
    ConstructionFailed { bean: String, source: BoxError },

    #[error("组件属性解析失败: {bean}, 原因: {source}")]
    Property { bean: String, source: ConfigError },

    #[error("容器已刷新，不能再执行: {operation}")]
    WireAfterRefresh { operation: String },

    #[error("容器尚未刷新")]
    NotRefreshed,

    #[error("组件装配失败:\n{}", errors.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n"))]
    Multiple { errors: Vec<DependencyError> },
}

impl DependencyError {
    /// 创建组件未找到错误
    pub fn not_found(selector: impl Into<String>, required_by: impl Into<String>) -> Self {
        Self::BeanNotFound {
            selector: selector.into(),
            required_by: required_by.into(),
        }
    }

    /// 创建组件构造失败错误
    pub fn construction_failed(bean: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ConstructionFailed {
            bean: bean.into(),
            source: source.into(),
        }
    }

    /// 错误分类，复合错误取第一个子错误的分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BeanNotFound { .. } | Self::NotRefreshed => ErrorKind::NotFound,
            Self::Ambiguous { .. } | Self::DuplicateBean { .. } | Self::DuplicateName { .. } => {
                ErrorKind::Ambiguous
            }
            Self::TypeMismatch { .. } | Self::InvalidDirective { .. } => ErrorKind::TypeMismatch,
            Self::ConditionCycle { .. } => ErrorKind::ConditionCycle,
            Self::DependencyCycle { .. } => ErrorKind::DependencyCycle,
            Self::ConstructionFailed { .. } => ErrorKind::ConstructionFailed,
            Self::Property { source, .. } => source.kind(),
            Self::WireAfterRefresh { .. } => ErrorKind::WireAfterRefresh,
            Self::Multiple { errors } => errors
                .first()
                .map_or(ErrorKind::NotFound, DependencyError::kind),
        }
    }

    /// 展开复合错误
    pub fn flatten(self) -> Vec<DependencyError> {
        match self {
            Self::Multiple { errors } => errors.into_iter().flat_map(Self::flatten).collect(),
            other => vec![other],
        }
    }

    /// 合并多个错误，只有一个时直接返回
    pub fn combine(mut errors: Vec<DependencyError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple { errors }),
        }
    }
}

/// 生命周期管理错误类型
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("应用正在关闭，拒绝启动任务: {task}")]
    ShutdownInProgress { task: String },

    #[error("当前线程没有可用的 tokio 运行时: {task}")]
    NoRuntime { task: String },

    #[error("Runner 执行失败: {runner}, 原因: {message}")]
    RunnerFailed { runner: String, message: String },

    #[error("应用事件执行失败: {bean}, 原因: {message}")]
    EventFailed { bean: String, message: String },

    #[error("组件销毁失败:\n{}", errors.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n"))]
    DestroyFailed { errors: Vec<String> },

    #[error("关闭超时，跳过销毁: {}", skipped.join(", "))]
    ShutdownTimeout { skipped: Vec<String> },

    #[error("生命周期管理失败:\n{}", errors.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n"))]
    Multiple { errors: Vec<LifecycleError> },
}

impl LifecycleError {
    /// 错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ShutdownInProgress { .. } => ErrorKind::ShutdownInProgress,
            Self::NoRuntime { .. }
            | Self::RunnerFailed { .. }
            | Self::EventFailed { .. }
            | Self::DestroyFailed { .. }
            | Self::ShutdownTimeout { .. } => ErrorKind::RunnerFailed,
            Self::Multiple { errors } => errors
                .first()
                .map_or(ErrorKind::RunnerFailed, LifecycleError::kind),
        }
    }

    /// 合并多个错误，只有一个时直接返回
    pub fn combine(mut errors: Vec<LifecycleError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple { errors }),
        }
    }
}

/// 基础设施错误类型
#[derive(Error, Debug)]
pub enum InfrastructureError {
    #[error("配置错误: {source}")]
    ConfigError {
        #[from]
        source: ConfigError,
    },

    #[error("依赖注入错误: {source}")]
    DependencyError {
        #[from]
        source: DependencyError,
    },

    #[error("生命周期错误: {source}")]
    LifecycleError {
        #[from]
        source: LifecycleError,
    },

    #[error("基础设施启动失败: {message}")]
    BootstrapFailed { message: String },
}

impl InfrastructureError {
    /// 错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigError { source } => source.kind(),
            Self::DependencyError { source } => source.kind(),
            Self::LifecycleError { source } => source.kind(),
            Self::BootstrapFailed { .. } => ErrorKind::InvalidConfiguration,
        }
    }
}

/// 结果类型别名
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type DependencyResult<T> = Result<T, DependencyError>;
pub type LifecycleResult<T> = Result<T, LifecycleError>;
pub type InfrastructureResult<T> = Result<T, InfrastructureError>;
