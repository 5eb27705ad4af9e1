//! 容器配置与统计

use std::time::Duration;

/// 容器配置
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// 关闭时等待任务和销毁回调的总时长，`None` 表示一直等待
    pub shutdown_grace: Option<Duration>,
    /// 刷新完成后是否逐个输出已装配组件
    pub log_wired_beans: bool,
}

impl ContainerConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self {
            shutdown_grace: Some(Duration::from_secs(30)),
            log_wired_beans: false,
        }
    }

    /// 设置关闭宽限期
    pub fn with_shutdown_grace(mut self, grace: Option<Duration>) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// 输出已装配组件
    pub fn with_wired_bean_logging(mut self, enabled: bool) -> Self {
        self.log_wired_beans = enabled;
        self
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 容器统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerStats {
    /// 已注册组件数量
    pub registered: usize,
    /// 条件通过的组件数量
    pub included: usize,
    /// 被条件排除的组件数量
    pub excluded: usize,
    /// 已装配组件数量
    pub wired: usize,
    /// 延迟注入填充次数
    pub lazy_fills: usize,
    /// 刷新耗时（毫秒）
    pub refresh_time_ms: u64,
}

impl ContainerStats {
    /// 排除比例
    pub fn exclusion_rate(&self) -> f64 {
        if self.registered == 0 {
            0.0
        } else {
            self.excluded as f64 / self.registered as f64
        }
    }
}
