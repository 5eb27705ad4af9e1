//! 属性来源抽象接口

use infrastructure_common::ConfigError;
use std::collections::BTreeMap;
use std::fmt;

/// 属性层级，按优先级从低到高排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LayerKind {
    /// 代码中设置的属性和内置默认值
    Programmatic,
    /// `application.<ext>` 默认配置文件
    DefaultFile,
    /// `application-<profile>.<ext>` 环境配置文件
    ProfileFile,
    /// 操作系统环境变量
    Environment,
    /// 命令行参数
    CommandLine,
}

impl LayerKind {
    /// 全部层级，低优先级在前
    pub const ALL: [LayerKind; 5] = [
        Self::Programmatic,
        Self::DefaultFile,
        Self::ProfileFile,
        Self::Environment,
        Self::CommandLine,
    ];
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Programmatic => "programmatic",
            Self::DefaultFile => "default-file",
            Self::ProfileFile => "profile-file",
            Self::Environment => "environment",
            Self::CommandLine => "command-line",
        };
        f.write_str(name)
    }
}

/// 属性来源 trait
///
/// 每个来源产出一组扁平化的键值对，键使用 `a.b[0].c` 形式。
pub trait PropertySource: Send + Sync {
    /// 来源名称，用于日志
    fn name(&self) -> &str;

    /// 所属层级
    fn layer(&self) -> LayerKind;

    /// 读取全部属性
    fn load(&self) -> Result<BTreeMap<String, String>, ConfigError>;
}

/// 内存属性来源
#[derive(Debug, Clone)]
pub struct MapPropertySource {
    name: String,
    layer: LayerKind,
    entries: BTreeMap<String, String>,
}

impl MapPropertySource {
    /// 创建新的内存属性来源
    pub fn new(name: impl Into<String>, layer: LayerKind) -> Self {
        Self {
            name: name.into(),
            layer,
            entries: BTreeMap::new(),
        }
    }

    /// 添加属性
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }
}

impl PropertySource for MapPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer(&self) -> LayerKind {
        self.layer
    }

    fn load(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        Ok(self.entries.clone())
    }
}

/// 引用展开缓存统计信息
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// 缓存命中次数
    pub hits: u64,
    /// 缓存未命中次数
    pub misses: u64,
    /// 缓存项数量
    pub size: usize,
}

impl CacheStats {
    /// 计算命中率
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_priority_order() {
        assert!(LayerKind::CommandLine > LayerKind::Environment);
        assert!(LayerKind::Environment > LayerKind::ProfileFile);
        assert!(LayerKind::ProfileFile > LayerKind::DefaultFile);
        assert!(LayerKind::DefaultFile > LayerKind::Programmatic);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            size: 2,
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
