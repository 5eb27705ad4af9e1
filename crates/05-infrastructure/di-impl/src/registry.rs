//! 刷新后的只读注册表

use config_abstractions::PropertyResolver;
use config_impl::PropertyStore;
use di_abstractions::{BeanId, BeanInfo, BeanRegistry, Erased, Selector};
use infrastructure_common::TypeInfo;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// 已装配的组件：描述信息加上按类型划分的实例槽位
pub(crate) struct WiredBean {
    pub info: BeanInfo,
    pub slots: HashMap<TypeId, Erased>,
}

/// 按装配顺序保存全部组件，刷新后不再变化
pub struct WiredRegistry {
    beans: Vec<WiredBean>,
    by_id: HashMap<BeanId, usize>,
    store: Arc<PropertyStore>,
}

impl WiredRegistry {
    pub(crate) fn new(beans: Vec<WiredBean>, store: Arc<PropertyStore>) -> Self {
        let by_id = beans
            .iter()
            .enumerate()
            .map(|(position, bean)| (bean.info.id.clone(), position))
            .collect();
        Self { beans, by_id, store }
    }

    /// 组件数量
    pub fn len(&self) -> usize {
        self.beans.len()
    }

    /// 是否没有任何组件
    pub fn is_empty(&self) -> bool {
        self.beans.is_empty()
    }

    /// 属性存储
    pub fn store(&self) -> Arc<PropertyStore> {
        self.store.clone()
    }
}

impl BeanRegistry for WiredRegistry {
    fn beans(&self) -> Vec<BeanInfo> {
        self.beans.iter().map(|bean| bean.info.clone()).collect()
    }

    fn find(&self, selector: &Selector) -> Vec<BeanInfo> {
        self.beans
            .iter()
            .filter(|bean| bean.info.matches(selector))
            .map(|bean| bean.info.clone())
            .collect()
    }

    fn instance(&self, id: &BeanId, type_info: &TypeInfo) -> Option<Erased> {
        let position = *self.by_id.get(id)?;
        self.beans[position].slots.get(&type_info.id).cloned()
    }

    fn properties(&self) -> Arc<dyn PropertyResolver> {
        self.store.clone()
    }
}

impl std::fmt::Debug for WiredRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WiredRegistry")
            .field("beans", &self.beans.iter().map(|b| b.info.id.as_str()).collect::<Vec<_>>())
            .finish()
    }
}
