//! 组件定义：描述数据加上构造、注入和生命周期闭包

use crate::directive::ResolveContext;
use di_abstractions::{erase, BeanInfo, Condition, Erased};
use infrastructure_common::{AppContext, BoxError, DependencyError, TypeInfo};
use std::any::Any;
use std::sync::Arc;

pub(crate) type Built = Box<dyn Any + Send>;

pub(crate) type Constructor =
    Box<dyn FnOnce(&ResolveContext<'_>) -> Result<Built, DependencyError> + Send + Sync>;

pub(crate) type FieldInjector = Box<
    dyn Fn(&mut (dyn Any + Send), &ResolveContext<'_>) -> Result<(), DependencyError> + Send + Sync,
>;

pub(crate) type Sealer = Box<dyn Fn(Built) -> Option<Erased> + Send + Sync>;

pub(crate) type InitHook = Box<dyn Fn(&Erased, &AppContext) -> Result<(), BoxError> + Send + Sync>;

pub(crate) type DestroyHook = Box<dyn Fn(&Erased) -> Result<(), BoxError> + Send + Sync>;

/// 导出的接口槽位
pub(crate) struct ExportSlot {
    pub type_info: TypeInfo,
    pub cast: Box<dyn Fn(&Erased) -> Option<Erased> + Send + Sync>,
}

/// 延迟注入字段
pub(crate) struct LazyFill {
    pub target: String,
    pub element: TypeInfo,
    /// 参数依次为持有者自身槽位、目标的接口槽位
    pub fill: Box<dyn Fn(&Erased, &Erased) -> bool + Send + Sync>,
}

pub(crate) struct BeanDefinition {
    pub info: BeanInfo,
    pub conditions: Vec<Condition>,
    pub constructor: Option<Constructor>,
    pub fields: Vec<FieldInjector>,
    pub seal: Sealer,
    pub exports: Vec<ExportSlot>,
    pub lazy_fills: Vec<LazyFill>,
    pub init: Vec<InitHook>,
    pub destroy: Vec<DestroyHook>,
}

impl BeanDefinition {
    pub fn new<T: Send + Sync + 'static>(info: BeanInfo, constructor: Constructor) -> Self {
        Self {
            info,
            conditions: Vec::new(),
            constructor: Some(constructor),
            fields: Vec::new(),
            seal: Box::new(|built: Built| {
                built
                    .downcast::<T>()
                    .ok()
                    .map(|boxed| erase(Arc::<T>::from(boxed)))
            }),
            exports: Vec::new(),
            lazy_fills: Vec::new(),
            init: Vec::new(),
            destroy: Vec::new(),
        }
    }

    pub fn id(&self) -> String {
        self.info.id.to_string()
    }
}
