//! 属性绑定
//!
//! 把某个键前缀下的扁平属性组装成树，再通过 serde 反序列化成目标类型。
//! 字段名沿用 serde 名称（可用 `#[serde(rename)]` 改写），默认值使用
//! `#[serde(default)]`。值为空字符串的叶子视为未设置。

use crate::placeholder;
use crate::store::{split_key, KeySegment, PropertyStore};
use config_abstractions::PropertyResolver;
use infrastructure_common::{ConfigError, ConfigResult};
use serde::de::value::{SeqDeserializer, StringDeserializer};
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, EnumAccess, IntoDeserializer, MapAccess, SeqAccess,
    VariantAccess, Visitor,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

impl PropertyStore {
    /// 把 `root` 前缀下的属性绑定到 `T`，空前缀表示全部属性
    pub fn bind<T: DeserializeOwned>(&self, root: &str) -> ConfigResult<T> {
        debug!("绑定属性: {} -> {}", root, std::any::type_name::<T>());
        let tree = PropertyTree::from_entries(&self.subtree(root))?;
        let source = if tree.is_empty() {
            Source::Missing
        } else {
            Source::Node(&tree)
        };
        T::deserialize(NodeDeserializer::new(self, root.to_string(), source))
    }

    /// 按 `${key:=default}` 形式的文本绑定
    ///
    /// 文本恰好是一个引用且键存在时，绑定该键的整棵子树；否则展开文本后按标量解析。
    pub fn bind_value<T: DeserializeOwned>(&self, text: &str) -> ConfigResult<T> {
        if let Some(reference) = placeholder::parse_whole(text) {
            let key = reference.key.trim();
            if self.has(key) {
                return self.bind(key);
            }
            let Some(default) = reference.default else {
                return Err(ConfigError::KeyNotFound {
                    key: key.to_string(),
                });
            };
            let value = self.resolve(default)?;
            return T::deserialize(NodeDeserializer::new(
                self,
                key.to_string(),
                Source::Text(value),
            ));
        }
        let value = self.resolve(text)?;
        T::deserialize(NodeDeserializer::new(self, String::new(), Source::Text(value)))
    }
}

/// 属性树节点
#[derive(Debug, Default)]
pub(crate) struct PropertyTree {
    value: Option<String>,
    children: BTreeMap<String, PropertyTree>,
    items: BTreeMap<usize, PropertyTree>,
}

impl PropertyTree {
    pub(crate) fn from_entries(entries: &BTreeMap<String, String>) -> ConfigResult<Self> {
        let mut root = Self::default();
        for (key, value) in entries {
            let mut node = &mut root;
            for segment in split_key(key)? {
                node = match segment {
                    KeySegment::Field(name) => node.children.entry(name).or_default(),
                    KeySegment::Index(index) => node.items.entry(index).or_default(),
                };
            }
            node.value = Some(value.clone());
        }
        Ok(root)
    }

    fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty() && self.items.is_empty()
    }
}

enum Source<'a> {
    Missing,
    Node(&'a PropertyTree),
    /// 已展开的文本
    Text(String),
}

struct NodeDeserializer<'a> {
    store: &'a PropertyStore,
    path: String,
    source: Source<'a>,
}

impl<'a> NodeDeserializer<'a> {
    fn new(store: &'a PropertyStore, path: String, source: Source<'a>) -> Self {
        Self {
            store,
            path,
            source,
        }
    }

    fn node(&self) -> Option<&'a PropertyTree> {
        match self.source {
            Source::Node(node) => Some(node),
            _ => None,
        }
    }

    fn child_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.path)
        }
    }

    fn mismatch(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::type_mismatch(self.path.clone(), message)
    }

    /// 叶子文本，引用已展开
    fn text(&self) -> ConfigResult<Option<String>> {
        match &self.source {
            Source::Missing => Ok(None),
            Source::Text(text) => Ok(Some(text.clone())),
            Source::Node(node) => match &node.value {
                Some(raw) => self.store.resolve(raw).map(Some),
                None => Ok(None),
            },
        }
    }

    fn is_unset(&self) -> ConfigResult<bool> {
        match &self.source {
            Source::Missing => Ok(true),
            Source::Text(text) => Ok(text.is_empty()),
            Source::Node(node) => {
                if !node.children.is_empty() || !node.items.is_empty() {
                    return Ok(false);
                }
                Ok(self.text()?.map_or(true, |text| text.is_empty()))
            }
        }
    }

    /// 必需的标量文本
    fn scalar(&self) -> ConfigResult<String> {
        if let Some(node) = self.node() {
            if node.value.is_none() && (!node.children.is_empty() || !node.items.is_empty()) {
                return Err(self.mismatch("期望单个值，实际是嵌套结构"));
            }
        }
        match self.text()? {
            Some(text) => Ok(text),
            None => Err(ConfigError::KeyNotFound {
                key: self.path.clone(),
            }),
        }
    }

    /// 必需且非空的标量文本，数值、布尔等类型使用
    fn non_empty_scalar(&self) -> ConfigResult<String> {
        let text = self.scalar()?;
        if text.trim().is_empty() {
            return Err(ConfigError::KeyNotFound {
                key: self.path.clone(),
            });
        }
        Ok(text.trim().to_string())
    }

    fn seq_elements(self) -> ConfigResult<Vec<NodeDeserializer<'a>>> {
        match self.node() {
            Some(node) if !node.items.is_empty() => Ok(node
                .items
                .iter()
                .map(|(index, item)| {
                    NodeDeserializer::new(
                        self.store,
                        format!("{}[{index}]", self.path),
                        Source::Node(item),
                    )
                })
                .collect()),
            Some(node) if !node.children.is_empty() => Err(self.mismatch("期望列表，实际是映射")),
            _ => {
                let text = self.text()?.unwrap_or_default();
                Ok(text
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .enumerate()
                    .map(|(index, item)| {
                        NodeDeserializer::new(
                            self.store,
                            format!("{}[{index}]", self.path),
                            Source::Text(item.to_string()),
                        )
                    })
                    .collect())
            }
        }
    }

    /// 映射条目，`skip_unset` 时跳过未设置的子节点
    fn map_entries(&self, skip_unset: bool) -> ConfigResult<Vec<(String, NodeDeserializer<'a>)>> {
        if let Some(node) = self.node() {
            if !node.items.is_empty() && node.children.is_empty() {
                return Err(self.mismatch("期望映射，实际是列表"));
            }
            let mut entries = Vec::with_capacity(node.children.len());
            for (name, child) in &node.children {
                let de =
                    NodeDeserializer::new(self.store, self.child_path(name), Source::Node(child));
                if skip_unset && de.is_unset()? {
                    continue;
                }
                entries.push((name.clone(), de));
            }
            return Ok(entries);
        }
        match &self.source {
            Source::Text(text) if !text.is_empty() => {
                Err(self.mismatch(format!("期望映射，实际是文本 {text}")))
            }
            _ => Ok(Vec::new()),
        }
    }
}

macro_rules! deserialize_parsed {
    ($($method:ident => $visit:ident($ty:ty)),* $(,)?) => {$(
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
            let text = self.non_empty_scalar()?;
            let parsed: $ty = text.parse().map_err(|e| {
                self.mismatch(format!("无法将 '{text}' 解析为 {}: {e}", stringify!($ty)))
            })?;
            visitor.$visit(parsed)
        }
    )*};
}

impl<'de, 'a> de::Deserializer<'de> for NodeDeserializer<'a> {
    type Error = ConfigError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if matches!(self.source, Source::Missing) {
            return visitor.visit_unit();
        }
        match self.node() {
            Some(node) if !node.items.is_empty() => self.deserialize_seq(visitor),
            Some(node) if !node.children.is_empty() => self.deserialize_map(visitor),
            _ => visitor.visit_string(self.scalar()?),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        let text = self.non_empty_scalar()?;
        let value = match text.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => return Err(self.mismatch(format!("无法将 '{text}' 解析为 bool"))),
        };
        visitor.visit_bool(value)
    }

    deserialize_parsed! {
        deserialize_i8 => visit_i8(i8),
        deserialize_i16 => visit_i16(i16),
        deserialize_i32 => visit_i32(i32),
        deserialize_i64 => visit_i64(i64),
        deserialize_i128 => visit_i128(i128),
        deserialize_u8 => visit_u8(u8),
        deserialize_u16 => visit_u16(u16),
        deserialize_u32 => visit_u32(u32),
        deserialize_u64 => visit_u64(u64),
        deserialize_u128 => visit_u128(u128),
        deserialize_f32 => visit_f32(f32),
        deserialize_f64 => visit_f64(f64),
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        let text = self.non_empty_scalar()?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => visitor.visit_char(c),
            _ => Err(self.mismatch(format!("无法将 '{text}' 解析为 char"))),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_string(self.scalar()?)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_string(self.scalar()?)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_byte_buf(self.scalar()?.into_bytes())
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_byte_buf(self.scalar()?.into_bytes())
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if self.is_unset()? {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        let path = self.path.clone();
        let elements = self.seq_elements()?;
        visitor
            .visit_seq(Elements {
                iter: elements.into_iter(),
            })
            .map_err(|e| e.with_key_prefix(&path))
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        let entries = self.map_entries(false)?;
        visitor
            .visit_map(Entries {
                iter: entries.into_iter(),
                pending: None,
                store: self.store,
            })
            .map_err(|e| e.with_key_prefix(&self.path))
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        match (name, fields) {
            ("Duration", ["secs", "nanos"]) => {
                let text = self.non_empty_scalar()?;
                let duration = parse_duration(&text).map_err(|e| self.mismatch(e))?;
                visitor.visit_seq(SeqDeserializer::<_, ConfigError>::new(
                    [duration.as_secs(), u64::from(duration.subsec_nanos())].into_iter(),
                ))
            }
            ("SystemTime", ["secs_since_epoch", "nanos_since_epoch"]) => {
                let text = self.non_empty_scalar()?;
                let time = chrono::DateTime::parse_from_rfc3339(&text)
                    .map_err(|e| self.mismatch(format!("无法将 '{text}' 解析为 RFC 3339 时间: {e}")))?;
                let secs = u64::try_from(time.timestamp())
                    .map_err(|_| self.mismatch(format!("时间早于 1970 年: {text}")))?;
                visitor.visit_seq(SeqDeserializer::<_, ConfigError>::new(
                    [secs, u64::from(time.timestamp_subsec_nanos())].into_iter(),
                ))
            }
            _ => {
                let entries = self.map_entries(true)?;
                visitor
                    .visit_map(Entries {
                        iter: entries.into_iter(),
                        pending: None,
                        store: self.store,
                    })
                    .map_err(|e| e.with_key_prefix(&self.path))
            }
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        if let Some(node) = self.node() {
            if node.value.is_none() && node.items.is_empty() && node.children.len() == 1 {
                let entries = self.map_entries(false)?;
                if let Some((variant, content)) = entries.into_iter().next() {
                    return visitor.visit_enum(Variant { variant, content });
                }
            }
        }
        let variant = self.non_empty_scalar()?;
        let content = NodeDeserializer::new(self.store, self.path.clone(), Source::Missing);
        visitor.visit_enum(Variant { variant, content })
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_string(self.scalar()?)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }
}

struct Elements<'a> {
    iter: std::vec::IntoIter<NodeDeserializer<'a>>,
}

impl<'de, 'a> SeqAccess<'de> for Elements<'a> {
    type Error = ConfigError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, Self::Error> {
        match self.iter.next() {
            Some(element) => seed.deserialize(element).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct Entries<'a> {
    iter: std::vec::IntoIter<(String, NodeDeserializer<'a>)>,
    pending: Option<NodeDeserializer<'a>>,
    store: &'a PropertyStore,
}

impl<'de, 'a> MapAccess<'de> for Entries<'a> {
    type Error = ConfigError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Self::Error> {
        match self.iter.next() {
            Some((key, value)) => {
                let path = value.path.clone();
                self.pending = Some(value);
                seed.deserialize(NodeDeserializer::new(self.store, path, Source::Text(key)))
                    .map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> Result<V::Value, Self::Error> {
        match self.pending.take() {
            Some(value) => seed.deserialize(value),
            None => Err(de::Error::custom("映射值缺少对应的键")),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct Variant<'a> {
    variant: String,
    content: NodeDeserializer<'a>,
}

impl<'de, 'a> EnumAccess<'de> for Variant<'a> {
    type Error = ConfigError;
    type Variant = NodeDeserializer<'a>;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, Self::Variant), Self::Error> {
        let name: StringDeserializer<ConfigError> = self.variant.into_deserializer();
        let value = seed.deserialize(name)?;
        Ok((value, self.content))
    }
}

impl<'de, 'a> VariantAccess<'de> for NodeDeserializer<'a> {
    type Error = ConfigError;

    fn unit_variant(self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(
        self,
        seed: T,
    ) -> Result<T::Value, Self::Error> {
        seed.deserialize(self)
    }

    fn tuple_variant<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        de::Deserializer::deserialize_seq(self, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        de::Deserializer::deserialize_struct(self, "", fields, visitor)
    }
}

/// 解析 `5s`、`150ms`、`1m30s`、`2h` 形式的时长
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.is_empty() {
        return Err("时长为空".to_string());
    }

    let mut nanos = 0f64;
    let mut rest = text;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_end == 0 {
            return Err(format!("时长格式无效: {text}"));
        }
        let number: f64 = rest[..number_end]
            .parse()
            .map_err(|_| format!("时长格式无效: {text}"))?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let factor = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("时长缺少单位: {text}")),
            unit => return Err(format!("未知的时长单位 '{unit}': {text}")),
        };
        nanos += number * factor;
        rest = &rest[unit_end..];
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}
