//! 组件注册表抽象接口
//!
//! [`BeanRegistry`] 是刷新后对外的只读查找面，保持对象安全；
//! 带泛型的便捷方法由 [`TypedRegistry`] 为所有实现统一提供。

use crate::descriptor::{BeanId, BeanInfo, Selector};
use config_abstractions::PropertyResolver;
use infrastructure_common::{DependencyError, TypeInfo};
use std::any::Any;
use std::sync::Arc;

/// 类型擦除后的组件实例，内部保存 `Arc<T>`
pub type Erased = Arc<dyn Any + Send + Sync>;

/// 擦除实例类型
pub fn erase<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Erased {
    Arc::new(value)
}

/// 还原实例类型
pub fn downcast<T: ?Sized + 'static>(erased: &Erased) -> Option<Arc<T>> {
    erased.downcast_ref::<Arc<T>>().cloned()
}

const REGISTRY_LOOKUP: &str = "registry";

/// 组件注册表 trait
///
/// 只在容器刷新完成后可用，所有方法都是只读的。
pub trait BeanRegistry: Send + Sync {
    /// 已装配的组件，按装配顺序
    fn beans(&self) -> Vec<BeanInfo>;

    /// 匹配选择器的已装配组件，按装配顺序
    fn find(&self, selector: &Selector) -> Vec<BeanInfo>;

    /// 以指定类型取出实例，组件不提供该类型时返回 `None`
    fn instance(&self, id: &BeanId, type_info: &TypeInfo) -> Option<Erased>;

    /// 冻结后的属性
    fn properties(&self) -> Arc<dyn PropertyResolver>;

    /// 装配顺序
    fn wired_order(&self) -> Vec<BeanId> {
        self.beans().into_iter().map(|info| info.id).collect()
    }
}

/// 带类型的查找扩展
pub trait TypedRegistry {
    /// 按名称查找
    fn get_by_name<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, DependencyError>;

    /// 按类型唯一查找，多个候选时取 primary
    fn get_by_type<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>, DependencyError>;

    /// 按类型查找，不存在时返回 `None`
    fn try_get_by_type<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>, DependencyError>;

    /// 收集全部匹配实例，按 order 再按注册顺序排列
    fn collect<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>, DependencyError>;

    /// 收集全部匹配实例及其名称
    fn collect_named<T: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Result<Vec<(String, Arc<T>)>, DependencyError>;
}

impl<R: BeanRegistry + ?Sized> TypedRegistry for R {
    fn get_by_name<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, DependencyError> {
        let type_info = TypeInfo::of::<T>();
        let named = self.find(&Selector::name(name));
        let info = named.first().ok_or_else(|| {
            DependencyError::not_found(format!("name={name}"), REGISTRY_LOOKUP)
        })?;
        typed_instance(self, info, &type_info)
    }

    fn get_by_type<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>, DependencyError> {
        self.try_get_by_type::<T>()?.ok_or_else(|| {
            DependencyError::not_found(Selector::of::<T>().to_string(), REGISTRY_LOOKUP)
        })
    }

    fn try_get_by_type<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>, DependencyError> {
        let type_info = TypeInfo::of::<T>();
        let selector = Selector::Type(type_info.clone());
        let candidates = self.find(&selector);
        let chosen = match candidates.len() {
            0 => return Ok(None),
            1 => &candidates[0],
            _ => {
                let primaries: Vec<&BeanInfo> = candidates.iter().filter(|c| c.primary).collect();
                if primaries.len() != 1 {
                    return Err(DependencyError::Ambiguous {
                        selector: selector.to_string(),
                        required_by: REGISTRY_LOOKUP.to_string(),
                        candidates: candidates.iter().map(|c| c.name.clone()).collect(),
                    });
                }
                primaries[0]
            }
        };
        typed_instance(self, chosen, &type_info).map(Some)
    }

    fn collect<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>, DependencyError> {
        Ok(self
            .collect_named::<T>()?
            .into_iter()
            .map(|(_, instance)| instance)
            .collect())
    }

    fn collect_named<T: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Result<Vec<(String, Arc<T>)>, DependencyError> {
        let type_info = TypeInfo::of::<T>();
        let mut candidates = self.find(&Selector::Type(type_info.clone()));
        candidates.sort_by_key(|c| (c.order, c.index));
        candidates
            .iter()
            .map(|info| Ok((info.name.clone(), typed_instance(self, info, &type_info)?)))
            .collect()
    }
}

fn typed_instance<R, T>(registry: &R, info: &BeanInfo, type_info: &TypeInfo) -> Result<Arc<T>, DependencyError>
where
    R: BeanRegistry + ?Sized,
    T: ?Sized + Send + Sync + 'static,
{
    registry
        .instance(&info.id, type_info)
        .as_ref()
        .and_then(downcast::<T>)
        .ok_or_else(|| DependencyError::TypeMismatch {
            bean: info.id.to_string(),
            expected: type_info.type_name(),
            required_by: REGISTRY_LOOKUP.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ConstructorKind;
    use config_abstractions::LayerKind;
    use infrastructure_common::{ConfigError, ErrorKind};
    use std::collections::HashMap;

    trait Greeter: Send + Sync + std::fmt::Debug {
        fn greet(&self) -> String;
    }

    #[derive(Debug)]
    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    #[derive(Debug)]
    struct French;

    impl Greeter for French {
        fn greet(&self) -> String {
            "bonjour".to_string()
        }
    }

    struct NoProperties;

    impl PropertyResolver for NoProperties {
        fn get_raw(&self, _key: &str) -> Option<String> {
            None
        }
        fn get(&self, _key: &str) -> Result<Option<String>, ConfigError> {
            Ok(None)
        }
        fn has(&self, _key: &str) -> bool {
            false
        }
        fn resolve(&self, text: &str) -> Result<String, ConfigError> {
            Ok(text.to_string())
        }
        fn source_of(&self, _key: &str) -> Option<LayerKind> {
            None
        }
        fn keys(&self) -> Vec<String> {
            Vec::new()
        }
        fn active_profiles(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[derive(Default)]
    struct MapRegistry {
        beans: Vec<BeanInfo>,
        slots: HashMap<(BeanId, std::any::TypeId), Erased>,
    }

    impl MapRegistry {
        fn add<T: Greeter + 'static>(&mut self, name: &str, value: T, order: i32, primary: bool) {
            let mut info = BeanInfo::new(TypeInfo::of::<T>(), ConstructorKind::Object, self.beans.len());
            info.rename(name);
            info.order = order;
            info.primary = primary;
            info.exports.push(TypeInfo::of::<dyn Greeter>());
            let own = Arc::new(value);
            let exported: Arc<dyn Greeter> = own.clone();
            self.slots.insert((info.id.clone(), TypeInfo::of::<T>().id), erase(own));
            self.slots.insert((info.id.clone(), TypeInfo::of::<dyn Greeter>().id), erase(exported));
            self.beans.push(info);
        }
    }

    impl BeanRegistry for MapRegistry {
        fn beans(&self) -> Vec<BeanInfo> {
            self.beans.clone()
        }

        fn find(&self, selector: &Selector) -> Vec<BeanInfo> {
            self.beans.iter().filter(|b| b.matches(selector)).cloned().collect()
        }

        fn instance(&self, id: &BeanId, type_info: &TypeInfo) -> Option<Erased> {
            self.slots.get(&(id.clone(), type_info.id)).cloned()
        }

        fn properties(&self) -> Arc<dyn PropertyResolver> {
            Arc::new(NoProperties)
        }
    }

    #[test]
    fn test_typed_lookup() {
        let mut registry = MapRegistry::default();
        registry.add("en", English, 5, false);
        registry.add("fr", French, 1, false);

        let fr = registry.get_by_name::<dyn Greeter>("fr").unwrap();
        assert_eq!(fr.greet(), "bonjour");
        assert!(registry.get_by_name::<French>("fr").is_ok());

        let err = registry.get_by_name::<English>("fr").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);

        let err = registry.get_by_type::<dyn Greeter>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Ambiguous);

        let ordered: Vec<String> = registry
            .collect::<dyn Greeter>()
            .unwrap()
            .iter()
            .map(|g| g.greet())
            .collect();
        assert_eq!(ordered, vec!["bonjour", "hello"]);
        assert_eq!(registry.wired_order().len(), 2);
    }

    #[test]
    fn test_primary_breaks_ties() {
        let mut registry = MapRegistry::default();
        registry.add("en", English, 0, true);
        registry.add("fr", French, 0, false);
        assert_eq!(registry.get_by_type::<dyn Greeter>().unwrap().greet(), "hello");
        assert!(registry.try_get_by_type::<String>().unwrap().is_none());
        assert_eq!(
            registry.get_by_type::<String>().unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
