//! 只读属性视图

use crate::provider::LayerKind;
use infrastructure_common::ConfigError;

/// 冻结后的属性视图
///
/// 容器刷新后通过该 trait 暴露属性存储，调用方只能读取。
pub trait PropertyResolver: Send + Sync {
    /// 获取最高优先级的原始值（不展开引用）
    fn get_raw(&self, key: &str) -> Option<String>;

    /// 获取展开引用后的值
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError>;

    /// 键是否存在，包括以该键为前缀的子树
    fn has(&self, key: &str) -> bool;

    /// 展开文本中的 `${key:=default}` 引用
    fn resolve(&self, text: &str) -> Result<String, ConfigError>;

    /// 值来自哪个层级
    fn source_of(&self, key: &str) -> Option<LayerKind>;

    /// 所有键，已排序去重
    fn keys(&self) -> Vec<String>;

    /// 当前激活的 profile
    fn active_profiles(&self) -> Vec<String>;

    /// 获取值，不存在时返回默认值
    fn get_or(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        Ok(self.get(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 获取必需的值
    fn require(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)?.ok_or_else(|| ConfigError::KeyNotFound {
            key: key.to_string(),
        })
    }

    /// profile 是否激活
    fn is_profile_active(&self, profile: &str) -> bool {
        self.active_profiles().iter().any(|p| p == profile)
    }
}
