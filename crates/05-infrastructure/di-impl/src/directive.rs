//! 注入指令
//!
//! 每个指令同时提供两样东西：刷新前可检查的描述数据，
//! 以及装配时的取值逻辑。

use config_impl::{check_value, placeholder, PropertyStore};
use di_abstractions::{
    downcast, AutowireSpec, DirectiveKind, InjectionDirective, ReceiverShape, Selector,
};
use infrastructure_common::{AppContext, DependencyError, TypeInfo, TypeKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::registry::WiredBean;

/// 装配单个组件时的解析上下文
pub struct ResolveContext<'a> {
    pub(crate) bean: &'a str,
    pub(crate) store: &'a PropertyStore,
    pub(crate) app: &'a AppContext,
    pub(crate) targets: &'a HashMap<String, Vec<usize>>,
    pub(crate) wired: &'a [Option<WiredBean>],
}

impl<'a> ResolveContext<'a> {
    /// 正在装配的组件
    pub fn bean(&self) -> &str {
        self.bean
    }

    /// 冻结后的属性存储
    pub fn properties(&self) -> &PropertyStore {
        self.store
    }

    /// 应用上下文
    pub fn app_context(&self) -> &AppContext {
        self.app
    }

    /// 取出注入目标已经选定的组件实例
    pub fn instances<T: ?Sized + Send + Sync + 'static>(
        &self,
        target: &str,
    ) -> Result<Vec<(String, Arc<T>)>, DependencyError> {
        let Some(indices) = self.targets.get(target) else {
            return Ok(Vec::new());
        };
        indices
            .iter()
            .map(|&index| {
                let wired = self
                    .wired
                    .get(index)
                    .and_then(Option::as_ref)
                    .ok_or_else(|| {
                        DependencyError::not_found(format!("#{index}"), self.bean)
                    })?;
                wired
                    .slots
                    .get(&TypeId::of::<T>())
                    .and_then(downcast::<T>)
                    .map(|instance| (wired.info.name.clone(), instance))
                    .ok_or_else(|| DependencyError::TypeMismatch {
                        bean: wired.info.id.to_string(),
                        expected: TypeInfo::of::<T>().type_name(),
                        required_by: self.bean.to_string(),
                    })
            })
            .collect()
    }
}

/// 注入指令
pub trait Directive: Send + Sync + 'static {
    /// 解析出的值
    type Output;

    /// 描述数据
    fn describe(&self, target: &str) -> InjectionDirective;

    /// 装配时取值
    fn resolve(&self, target: &str, ctx: &ResolveContext<'_>) -> Result<Self::Output, DependencyError>;
}

// ---------------------------------------------------------------------------
// value
// ---------------------------------------------------------------------------

type ToJson<V> = fn(&V) -> serde_json::Result<serde_json::Value>;

fn to_json<V: Serialize>(value: &V) -> serde_json::Result<serde_json::Value> {
    serde_json::to_value(value)
}

/// `value:"${key:=default}"` 指令
pub struct ValueDirective<V> {
    text: String,
    checks: Vec<String>,
    to_json: Option<ToJson<V>>,
    _marker: PhantomData<fn() -> V>,
}

/// 绑定属性值，整段引用可以绑定结构体、列表和映射
pub fn value<V: DeserializeOwned + 'static>(text: impl Into<String>) -> ValueDirective<V> {
    ValueDirective {
        text: text.into(),
        checks: Vec::new(),
        to_json: None,
        _marker: PhantomData,
    }
}

impl<V: Serialize> ValueDirective<V> {
    /// 追加校验表达式，`$` 表示绑定后的值
    pub fn check(mut self, expr: impl Into<String>) -> Self {
        self.checks.push(expr.into());
        self.to_json = Some(to_json::<V>);
        self
    }
}

impl<V: DeserializeOwned + 'static> Directive for ValueDirective<V> {
    type Output = V;

    fn describe(&self, target: &str) -> InjectionDirective {
        InjectionDirective::new(
            target,
            DirectiveKind::Value {
                text: self.text.clone(),
                checks: self.checks.clone(),
            },
        )
    }

    fn resolve(&self, _target: &str, ctx: &ResolveContext<'_>) -> Result<V, DependencyError> {
        let property_error = |source| DependencyError::Property {
            bean: ctx.bean().to_string(),
            source,
        };
        let store = ctx.properties();
        let value: V = store.bind_value(&self.text).map_err(property_error)?;

        if let Some(to_json) = self.to_json {
            let key = placeholder::parse_whole(&self.text)
                .map_or_else(|| self.text.clone(), |p| p.key.to_string());
            let json = to_json(&value).map_err(|e| {
                property_error(infrastructure_common::ConfigError::type_mismatch(
                    key.as_str(),
                    e.to_string(),
                ))
            })?;
            for expr in &self.checks {
                check_value(store, &key, expr, &json).map_err(property_error)?;
            }
        }
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// autowire
// ---------------------------------------------------------------------------

/// 可以接收组件的类型
pub trait AutowireTarget: Sized + 'static {
    /// 元素类型
    type Element: ?Sized + Send + Sync + 'static;

    /// 接收者形态
    const SHAPE: ReceiverShape;

    /// 由选定的实例组装，缺少必需实例时返回 `None`
    fn assemble(found: Vec<(String, Arc<Self::Element>)>) -> Option<Self>;
}

impl<T: ?Sized + Send + Sync + 'static> AutowireTarget for Arc<T> {
    type Element = T;
    const SHAPE: ReceiverShape = ReceiverShape::Single;

    fn assemble(found: Vec<(String, Arc<T>)>) -> Option<Self> {
        found.into_iter().next().map(|(_, instance)| instance)
    }
}

impl<T: ?Sized + Send + Sync + 'static> AutowireTarget for Option<Arc<T>> {
    type Element = T;
    const SHAPE: ReceiverShape = ReceiverShape::Optional;

    fn assemble(found: Vec<(String, Arc<T>)>) -> Option<Self> {
        Some(found.into_iter().next().map(|(_, instance)| instance))
    }
}

impl<T: ?Sized + Send + Sync + 'static> AutowireTarget for Vec<Arc<T>> {
    type Element = T;
    const SHAPE: ReceiverShape = ReceiverShape::Collection;

    fn assemble(found: Vec<(String, Arc<T>)>) -> Option<Self> {
        Some(found.into_iter().map(|(_, instance)| instance).collect())
    }
}

impl<T: ?Sized + Send + Sync + 'static> AutowireTarget for HashMap<String, Arc<T>> {
    type Element = T;
    const SHAPE: ReceiverShape = ReceiverShape::Map;

    fn assemble(found: Vec<(String, Arc<T>)>) -> Option<Self> {
        Some(found.into_iter().collect())
    }
}

impl<T: ?Sized + Send + Sync + 'static> AutowireTarget for BTreeMap<String, Arc<T>> {
    type Element = T;
    const SHAPE: ReceiverShape = ReceiverShape::Map;

    fn assemble(found: Vec<(String, Arc<T>)>) -> Option<Self> {
        Some(found.into_iter().collect())
    }
}

/// `autowire:"..."` 指令
pub struct AutowireDirective<R> {
    tag: String,
    _marker: PhantomData<fn() -> R>,
}

/// 注入组件
///
/// 接收者可以是 `Arc<T>`、`Option<Arc<T>>`、`Vec<Arc<T>>`
/// 或以组件名为键的 `HashMap` / `BTreeMap`。
pub fn autowire<R: AutowireTarget>(tag: impl Into<String>) -> AutowireDirective<R> {
    AutowireDirective {
        tag: tag.into(),
        _marker: PhantomData,
    }
}

impl<R: AutowireTarget> AutowireDirective<R> {
    fn spec(&self) -> Result<AutowireSpec, String> {
        AutowireSpec::parse(&self.tag, TypeInfo::of::<R::Element>(), R::SHAPE)
    }
}

impl<R: AutowireTarget> Directive for AutowireDirective<R> {
    type Output = R;

    fn describe(&self, target: &str) -> InjectionDirective {
        let kind = match self.spec() {
            Ok(spec) => DirectiveKind::Autowire(spec),
            Err(message) => DirectiveKind::Invalid { message },
        };
        InjectionDirective::new(target, kind)
    }

    fn resolve(&self, target: &str, ctx: &ResolveContext<'_>) -> Result<R, DependencyError> {
        let found = ctx.instances::<R::Element>(target)?;
        R::assemble(found).ok_or_else(|| {
            let selector = match self.spec().ok().and_then(|s| s.single_name().map(str::to_string)) {
                Some(name) => Selector::name(name),
                None => Selector::of::<R::Element>(),
            };
            DependencyError::not_found(selector.to_string(), ctx.bean())
        })
    }
}

// ---------------------------------------------------------------------------
// lazy
// ---------------------------------------------------------------------------

/// 延迟注入指令，只能配合 `lazy_field` 使用
pub struct LazyDirective<I: ?Sized> {
    tag: String,
    _marker: PhantomData<fn() -> Arc<I>>,
}

/// 延迟注入，目标装配完成后才填充
///
/// 标签语法与单值 `autowire` 相同，`?` 结尾表示可选。
pub fn lazy<I: ?Sized + Send + Sync + 'static>(tag: impl Into<String>) -> LazyDirective<I> {
    LazyDirective {
        tag: tag.into(),
        _marker: PhantomData,
    }
}

impl<I: ?Sized + Send + Sync + 'static> LazyDirective<I> {
    /// 描述数据
    pub fn describe(&self, target: &str) -> InjectionDirective {
        let shape = if self.tag.trim_end().ends_with('?') {
            ReceiverShape::Optional
        } else {
            ReceiverShape::Single
        };
        let element = TypeInfo::of::<I>();
        if element.kind() != TypeKind::Interface {
            return InjectionDirective::new(
                target,
                DirectiveKind::Invalid {
                    message: format!("延迟注入的目标必须是 trait 对象: {element}"),
                },
            );
        }
        let kind = match AutowireSpec::parse(&self.tag, element, shape) {
            Ok(spec) => DirectiveKind::Lazy(spec),
            Err(message) => DirectiveKind::Invalid { message },
        };
        InjectionDirective::new(target, kind)
    }
}

// ---------------------------------------------------------------------------
// context
// ---------------------------------------------------------------------------

/// 注入应用上下文
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextDirective;

/// 注入 [`AppContext`]，用于启动受管后台任务
pub fn context() -> ContextDirective {
    ContextDirective
}

impl Directive for ContextDirective {
    type Output = AppContext;

    fn describe(&self, target: &str) -> InjectionDirective {
        InjectionDirective::new(target, DirectiveKind::Context)
    }

    fn resolve(&self, _target: &str, ctx: &ResolveContext<'_>) -> Result<AppContext, DependencyError> {
        Ok(ctx.app_context().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Sink: Send + Sync {}

    #[test]
    fn test_describe_autowire() {
        let single = autowire::<Arc<dyn Sink>>("").describe("arg0");
        assert!(matches!(single.kind, DirectiveKind::Autowire(ref s) if s.shape == ReceiverShape::Single));

        let invalid = autowire::<Arc<dyn Sink>>("metrics?").describe("arg1");
        assert!(matches!(invalid.kind, DirectiveKind::Invalid { .. }));

        let optional = autowire::<Option<Arc<dyn Sink>>>("metrics?").describe("metrics");
        assert_eq!(optional.autowire_spec().map(|s| s.required), Some(false));

        let map = autowire::<BTreeMap<String, Arc<dyn Sink>>>("a,*").describe("sinks");
        assert_eq!(
            map.autowire_spec().map(|s| s.names.clone()),
            Some(vec!["a".to_string(), "*".to_string()])
        );
    }

    #[test]
    fn test_describe_lazy_and_value() {
        let required = lazy::<dyn Sink>("").describe("peer");
        assert!(required.is_lazy());
        assert_eq!(required.autowire_spec().map(|s| s.required), Some(true));

        let optional = lazy::<dyn Sink>("peer?").describe("peer");
        assert_eq!(optional.autowire_spec().map(|s| s.required), Some(false));

        struct Plain;
        let concrete = lazy::<Plain>("").describe("plain");
        assert!(matches!(concrete.kind, DirectiveKind::Invalid { .. }));

        let port = value::<u16>("${server.port:=8080}").check("$ > 0").describe("port");
        assert_eq!(
            port.kind,
            DirectiveKind::Value {
                text: "${server.port:=8080}".to_string(),
                checks: vec!["$ > 0".to_string()],
            }
        );
        assert_eq!(context().describe("ctx").kind, DirectiveKind::Context);
    }
}
