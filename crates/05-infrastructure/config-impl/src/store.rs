//! 分层属性存储
//!
//! [`PropertyStoreBuilder`] 收集各层属性，`build()` 之后得到不可变的
//! [`PropertyStore`]。读取时高优先级层覆盖低优先级层。

use crate::placeholder;
use crate::providers::EnvironmentPropertySource;
use config_abstractions::{CacheStats, LayerKind, PropertyResolver, PropertySource};
use dashmap::DashMap;
use infrastructure_common::{ConfigError, ConfigResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// 激活 profile 的属性键
pub const PROFILES_ACTIVE_KEY: &str = "spring.profiles.active";

/// 单个属性层
#[derive(Debug, Clone)]
pub struct Layer {
    /// 层级
    pub kind: LayerKind,
    /// 来源名称
    pub name: String,
    /// 扁平化的属性
    pub entries: BTreeMap<String, String>,
}

/// 属性存储构建器
#[derive(Default)]
pub struct PropertyStoreBuilder {
    layers: Vec<Layer>,
    programmatic: BTreeMap<String, String>,
    environment: Option<EnvironmentPropertySource>,
    profiles: Option<Vec<String>>,
}

impl PropertyStoreBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置代码层属性
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(key, value);
        self
    }

    /// 设置代码层属性
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.programmatic.insert(key.into(), value.into());
    }

    /// 直接添加一层属性
    pub fn with_layer(
        mut self,
        kind: LayerKind,
        name: impl Into<String>,
        entries: BTreeMap<String, String>,
    ) -> Self {
        self.push_layer(kind, name, entries);
        self
    }

    /// 从属性来源加载一层
    pub fn with_source(mut self, source: &dyn PropertySource) -> ConfigResult<Self> {
        self.add_source(source)?;
        Ok(self)
    }

    /// 从属性来源加载一层
    pub fn add_source(&mut self, source: &dyn PropertySource) -> ConfigResult<()> {
        let entries = source.load()?;
        debug!(
            "加载属性来源: {} ({}), {} 个属性",
            source.name(),
            source.layer(),
            entries.len()
        );
        self.push_layer(source.layer(), source.name(), entries);
        Ok(())
    }

    /// 设置环境变量来源
    ///
    /// 环境层在 `build()` 时计算，因为覆盖规则依赖低层已声明的键。
    pub fn with_environment(mut self, environment: EnvironmentPropertySource) -> Self {
        self.set_environment(environment);
        self
    }

    /// 设置环境变量来源
    pub fn set_environment(&mut self, environment: EnvironmentPropertySource) {
        self.environment = Some(environment);
    }

    /// 显式指定激活的 profile，不再读取 `spring.profiles.active`
    pub fn with_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles = Some(profiles.into_iter().map(Into::into).collect());
        self
    }

    /// 当前已收集属性中的原始值，供启动阶段决定要加载哪些文件
    pub fn peek(&self, key: &str) -> Option<String> {
        self.ordered_layers()
            .iter()
            .rev()
            .find_map(|layer| layer.entries.get(key).cloned())
    }

    /// 冻结为属性存储
    pub fn build(self) -> ConfigResult<PropertyStore> {
        let mut layers = self.ordered_layers();

        if let Some(environment) = &self.environment {
            let declared: BTreeSet<String> = layers
                .iter()
                .flat_map(|layer| layer.entries.keys().cloned())
                .collect();
            let mut entries = environment.overrides(&declared);
            entries.extend(environment.load()?);
            debug!("环境变量层: {} 个属性", entries.len());
            layers.push(Layer {
                kind: LayerKind::Environment,
                name: environment.name().to_string(),
                entries,
            });
            layers.sort_by_key(|layer| layer.kind);
        }

        let mut store = PropertyStore {
            layers,
            profiles: Vec::new(),
            cache: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };

        store.profiles = match self.profiles {
            Some(profiles) => profiles,
            None => store
                .get(PROFILES_ACTIVE_KEY)?
                .map(|text| split_list(&text))
                .unwrap_or_default(),
        };
        store.cache.clear();

        info!(
            "属性存储已冻结: {} 层, {} 个键, profiles: {:?}",
            store.layers.len(),
            store.keys().len(),
            store.profiles
        );
        Ok(store)
    }

    fn push_layer(&mut self, kind: LayerKind, name: impl Into<String>, entries: BTreeMap<String, String>) {
        self.layers.push(Layer {
            kind,
            name: name.into(),
            entries,
        });
    }

    /// 按优先级排序，同级保持添加顺序，代码层属性放在最前
    fn ordered_layers(&self) -> Vec<Layer> {
        let mut layers = Vec::with_capacity(self.layers.len() + 1);
        if !self.programmatic.is_empty() {
            layers.push(Layer {
                kind: LayerKind::Programmatic,
                name: "programmatic".to_string(),
                entries: self.programmatic.clone(),
            });
        }
        layers.extend(self.layers.iter().cloned());
        layers.sort_by_key(|layer| layer.kind);
        layers
    }
}

/// 不可变的分层属性存储
pub struct PropertyStore {
    layers: Vec<Layer>,
    profiles: Vec<String>,
    cache: DashMap<String, String>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PropertyStore {
    /// 空存储
    pub fn empty() -> Self {
        Self {
            layers: Vec::new(),
            profiles: Vec::new(),
            cache: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// 所有层，低优先级在前
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// 某个前缀下的子树，键相对前缀，值为原始值，高优先级覆盖低优先级
    pub fn subtree(&self, prefix: &str) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        for layer in &self.layers {
            for (key, value) in &layer.entries {
                if let Some(relative) = relative_key(key, prefix) {
                    merged.insert(relative.to_string(), value.clone());
                }
            }
        }
        merged
    }

    /// 引用展开缓存统计
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.cache.len(),
        }
    }

    pub(crate) fn expand_in(&self, text: &str, visiting: &mut Vec<String>) -> ConfigResult<String> {
        let lookup = |key: &str| self.get_raw(key);
        placeholder::expand(text, &lookup, visiting)
    }
}

impl PropertyResolver for PropertyStore {
    fn get_raw(&self, key: &str) -> Option<String> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.entries.get(key).cloned())
    }

    fn get(&self, key: &str) -> ConfigResult<Option<String>> {
        if let Some(cached) = self.cache.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(cached.clone()));
        }
        let Some(raw) = self.get_raw(key) else {
            return Ok(None);
        };
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = self.expand_in(&raw, &mut vec![key.to_string()])?;
        self.cache.insert(key.to_string(), value.clone());
        Ok(Some(value))
    }

    fn has(&self, key: &str) -> bool {
        self.layers.iter().any(|layer| {
            layer.entries.contains_key(key)
                || layer
                    .entries
                    .keys()
                    .any(|candidate| relative_key(candidate, key).is_some_and(|r| !r.is_empty()))
        })
    }

    fn resolve(&self, text: &str) -> ConfigResult<String> {
        self.expand_in(text, &mut Vec::new())
    }

    fn source_of(&self, key: &str) -> Option<LayerKind> {
        self.layers
            .iter()
            .rev()
            .find(|layer| layer.entries.contains_key(key))
            .map(|layer| layer.kind)
    }

    fn keys(&self) -> Vec<String> {
        let keys: BTreeSet<&String> = self
            .layers
            .iter()
            .flat_map(|layer| layer.entries.keys())
            .collect();
        keys.into_iter().cloned().collect()
    }

    fn active_profiles(&self) -> Vec<String> {
        self.profiles.clone()
    }
}

impl std::fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyStore")
            .field(
                "layers",
                &self
                    .layers
                    .iter()
                    .map(|layer| format!("{}({})", layer.name, layer.kind))
                    .collect::<Vec<_>>(),
            )
            .field("profiles", &self.profiles)
            .finish()
    }
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::empty()
    }
}

/// 键相对前缀的部分，空前缀时返回原键
///
/// `server.port` 相对 `server` 为 `port`，`hosts[0]` 相对 `hosts` 为 `[0]`，
/// 与前缀完全相同时返回空字符串。
pub fn relative_key<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(key);
    }
    let rest = key.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('[') {
        Some(rest)
    } else {
        rest.strip_prefix('.')
    }
}

/// 逗号分隔列表，去除空白和空项
pub fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// 属性键 -> 分段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySegment {
    /// 字段名
    Field(String),
    /// 下标
    Index(usize),
}

/// 拆分 `a.b[0].c` 形式的键
pub fn split_key(key: &str) -> ConfigResult<Vec<KeySegment>> {
    let invalid = || ConfigError::TypeMismatch {
        key: key.to_string(),
        message: "属性键格式无效".to_string(),
    };

    let mut segments = Vec::new();
    for part in key.split('.').filter(|part| !part.is_empty()) {
        let (name, mut indexes) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if !name.is_empty() {
            segments.push(KeySegment::Field(name.to_string()));
        }
        while let Some(body) = indexes.strip_prefix('[') {
            let close = body.find(']').ok_or_else(invalid)?;
            let index = body[..close].trim().parse().map_err(|_| invalid())?;
            segments.push(KeySegment::Index(index));
            indexes = &body[close + 1..];
        }
        if !indexes.is_empty() {
            return Err(invalid());
        }
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_abstractions::MapPropertySource;

    fn layered() -> PropertyStore {
        PropertyStoreBuilder::new()
            .with_property("server.port", "80")
            .with_property("server.host", "0.0.0.0")
            .with_source(
                &MapPropertySource::new("application.properties", LayerKind::DefaultFile)
                    .with_property("server.port", "8080")
                    .with_property("hosts[0]", "a")
                    .with_property("hosts[1]", "b"),
            )
            .unwrap()
            .with_source(
                &MapPropertySource::new("cmdline", LayerKind::CommandLine)
                    .with_property("server.port", "9090"),
            )
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_highest_priority_wins() {
        let store = layered();
        assert_eq!(store.get("server.port").unwrap().as_deref(), Some("9090"));
        assert_eq!(store.source_of("server.port"), Some(LayerKind::CommandLine));
        assert_eq!(store.source_of("server.host"), Some(LayerKind::Programmatic));
        assert_eq!(store.get("nope").unwrap(), None);
    }

    #[test]
    fn test_layers_added_out_of_order_are_sorted() {
        let store = PropertyStoreBuilder::new()
            .with_layer(
                LayerKind::CommandLine,
                "cmd",
                BTreeMap::from([("a".to_string(), "cmd".to_string())]),
            )
            .with_layer(
                LayerKind::DefaultFile,
                "file",
                BTreeMap::from([("a".to_string(), "file".to_string())]),
            )
            .build()
            .unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("cmd"));
    }

    #[test]
    fn test_has_includes_subtrees() {
        let store = layered();
        assert!(store.has("server"));
        assert!(store.has("server.port"));
        assert!(store.has("hosts"));
        assert!(!store.has("serv"));
        assert!(!store.has("server.portal"));
    }

    #[test]
    fn test_subtree_merges_layers() {
        let store = layered();
        let tree = store.subtree("server");
        assert_eq!(tree.get("port").map(String::as_str), Some("9090"));
        assert_eq!(tree.get("host").map(String::as_str), Some("0.0.0.0"));

        let hosts = store.subtree("hosts");
        assert_eq!(hosts.keys().collect::<Vec<_>>(), vec!["[0]", "[1]"]);
    }

    #[test]
    fn test_expansion_is_cached() {
        let store = PropertyStoreBuilder::new()
            .with_property("a", "${b}")
            .with_property("b", "x")
            .build()
            .unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("x"));
        assert_eq!(store.get("a").unwrap().as_deref(), Some("x"));
        let stats = store.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_cyclic_reference() {
        let store = PropertyStoreBuilder::new()
            .with_property("a", "${a}")
            .build()
            .unwrap();
        let err = store.get("a").unwrap_err();
        assert_eq!(err.kind(), infrastructure_common::ErrorKind::CyclicReference);
    }

    #[test]
    fn test_profiles_from_property() {
        let store = PropertyStoreBuilder::new()
            .with_property(PROFILES_ACTIVE_KEY, "dev, test")
            .build()
            .unwrap();
        assert_eq!(store.active_profiles(), vec!["dev", "test"]);
        assert!(store.is_profile_active("test"));
    }

    #[test]
    fn test_split_key() {
        assert_eq!(
            split_key("a.b[0][2].c").unwrap(),
            vec![
                KeySegment::Field("a".into()),
                KeySegment::Field("b".into()),
                KeySegment::Index(0),
                KeySegment::Index(2),
                KeySegment::Field("c".into()),
            ]
        );
        assert_eq!(split_key("[1]").unwrap(), vec![KeySegment::Index(1)]);
        assert!(split_key("a[x]").is_err());
        assert!(split_key("a[1").is_err());
    }
}
