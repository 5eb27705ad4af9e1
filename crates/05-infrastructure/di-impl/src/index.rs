//! 名称/类型索引与注入目标选择

use crate::definition::BeanDefinition;
use di_abstractions::{AutowireSpec, BeanInfo, ReceiverShape, Selector, COLLECT_REST};
use infrastructure_common::DependencyError;
use std::collections::{HashMap, HashSet};

/// 已包含组件的索引
pub(crate) struct BeanIndex<'a> {
    beans: Vec<&'a BeanInfo>,
}

impl<'a> BeanIndex<'a> {
    /// 建立索引，同一标识出现两次或不同类型的组件使用同一名称时报错
    pub fn build(defs: &'a [BeanDefinition], included: &[bool]) -> Result<Self, DependencyError> {
        let beans: Vec<&BeanInfo> = defs
            .iter()
            .zip(included)
            .filter(|(_, included)| **included)
            .map(|(def, _)| &def.info)
            .collect();

        let mut seen = HashSet::new();
        let mut names: HashMap<&str, &BeanInfo> = HashMap::new();
        let mut errors = Vec::new();
        for info in beans.iter().copied() {
            if !seen.insert(&info.id) {
                errors.push(DependencyError::DuplicateBean {
                    id: info.id.to_string(),
                });
                continue;
            }
            if let Some(first) = names.insert(info.name.as_str(), info) {
                errors.push(DependencyError::DuplicateName {
                    name: info.name.clone(),
                    beans: vec![first.id.to_string(), info.id.to_string()],
                });
            }
        }
        if let Some(error) = DependencyError::combine(errors) {
            return Err(error);
        }
        Ok(Self { beans })
    }

    /// 已包含的组件，按注册顺序
    pub fn beans(&self) -> &[&'a BeanInfo] {
        &self.beans
    }

    /// 匹配选择器的组件下标
    pub fn find(&self, selector: &Selector) -> Vec<usize> {
        self.beans
            .iter()
            .filter(|info| info.matches(selector))
            .map(|info| info.index)
            .collect()
    }

    /// 按注入规格选出目标组件的下标
    pub fn select(&self, spec: &AutowireSpec, required_by: &str) -> Result<Vec<usize>, DependencyError> {
        match spec.shape {
            ReceiverShape::Single | ReceiverShape::Optional => self.select_single(spec, required_by),
            ReceiverShape::Collection | ReceiverShape::Map => self.select_collect(spec, required_by),
        }
    }

    fn select_single(&self, spec: &AutowireSpec, required_by: &str) -> Result<Vec<usize>, DependencyError> {
        let (selector, candidates) = match spec.single_name() {
            Some(name) => {
                let named: Vec<&BeanInfo> = self.beans.iter().copied().filter(|b| b.name == name).collect();
                let typed: Vec<&BeanInfo> = named
                    .iter()
                    .copied()
                    .filter(|b| b.provides(&spec.element))
                    .collect();
                if let (Some(first), true) = (named.first(), typed.is_empty()) {
                    return Err(DependencyError::TypeMismatch {
                        bean: first.id.to_string(),
                        expected: spec.element.type_name(),
                        required_by: required_by.to_string(),
                    });
                }
                (Selector::name(name), typed)
            }
            None => (Selector::Type(spec.element.clone()), self.by_type(spec)),
        };

        match candidates.len() {
            0 if spec.required => Err(DependencyError::not_found(selector.to_string(), required_by)),
            0 => Ok(Vec::new()),
            1 => Ok(vec![candidates[0].index]),
            _ => {
                let primaries: Vec<&BeanInfo> = candidates.iter().copied().filter(|b| b.primary).collect();
                if primaries.len() == 1 {
                    Ok(vec![primaries[0].index])
                } else {
                    Err(DependencyError::Ambiguous {
                        selector: selector.to_string(),
                        required_by: required_by.to_string(),
                        candidates: candidates.iter().map(|b| b.name.clone()).collect(),
                    })
                }
            }
        }
    }

    fn select_collect(&self, spec: &AutowireSpec, required_by: &str) -> Result<Vec<usize>, DependencyError> {
        let mut ordered = self.by_type(spec);
        ordered.sort_by_key(|b| (b.order, b.index));

        let explicit: HashSet<&str> = spec
            .names
            .iter()
            .map(String::as_str)
            .filter(|name| *name != COLLECT_REST)
            .collect();
        let by_name: HashMap<&str, &BeanInfo> = ordered.iter().map(|b| (b.name.as_str(), *b)).collect();

        let mut picked = Vec::new();
        for name in &spec.names {
            if name == COLLECT_REST {
                picked.extend(
                    ordered
                        .iter()
                        .filter(|b| !explicit.contains(b.name.as_str()))
                        .map(|b| b.index),
                );
                continue;
            }
            match by_name.get(name.as_str()) {
                Some(bean) => picked.push(bean.index),
                None if spec.required => {
                    return Err(DependencyError::not_found(
                        Selector::name(name.clone()).to_string(),
                        required_by,
                    ))
                }
                None => {}
            }
        }

        if picked.is_empty() && spec.required {
            return Err(DependencyError::not_found(
                Selector::Type(spec.element.clone()).to_string(),
                required_by,
            ));
        }
        Ok(picked)
    }

    fn by_type(&self, spec: &AutowireSpec) -> Vec<&'a BeanInfo> {
        self.beans
            .iter()
            .copied()
            .filter(|b| b.provides(&spec.element))
            .collect()
    }
}
