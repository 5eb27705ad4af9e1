//! 条件求值
//!
//! 按不动点迭代：一个组件只有在它的条件所引用的候选组件全部
//! 决定之后才会求值，因此结果与注册顺序无关。

use crate::definition::BeanDefinition;
use config_abstractions::PropertyResolver;
use config_impl::{Expression, PropertyStore};
use di_abstractions::{ConditionContext, Selector};
use infrastructure_common::{ConfigError, DependencyError};
use tracing::debug;

struct Evaluation<'a> {
    store: &'a PropertyStore,
    defs: &'a [BeanDefinition],
    decided: &'a [Option<bool>],
    current: usize,
}

impl ConditionContext for Evaluation<'_> {
    fn properties(&self) -> &dyn PropertyResolver {
        self.store
    }

    fn has_bean(&self, selector: &Selector) -> bool {
        self.defs.iter().enumerate().any(|(index, def)| {
            index != self.current
                && self.decided[index] == Some(true)
                && def.info.matches(selector)
        })
    }

    fn evaluate_expression(&self, expr: &str) -> Result<bool, ConfigError> {
        Expression::parse(expr)?.evaluate_bool(None, self.store)
    }
}

/// 求出每个组件是否被包含
pub(crate) fn evaluate(defs: &[BeanDefinition], store: &PropertyStore) -> Result<Vec<bool>, DependencyError> {
    let mut decided: Vec<Option<bool>> = vec![None; defs.len()];

    loop {
        let mut progressed = false;
        for index in 0..defs.len() {
            if decided[index].is_some() {
                continue;
            }
            if is_waiting(defs, &decided, index) {
                continue;
            }

            let included = {
                let ctx = Evaluation {
                    store,
                    defs,
                    decided: &decided,
                    current: index,
                };
                let mut included = true;
                for condition in &defs[index].conditions {
                    let passed = condition.evaluate(&ctx).map_err(|source| DependencyError::Property {
                        bean: defs[index].id(),
                        source,
                    })?;
                    if !passed {
                        included = false;
                        break;
                    }
                }
                included
            };

            if !included {
                debug!("组件未满足条件，已排除: {}", defs[index].info.id);
            }
            decided[index] = Some(included);
            progressed = true;
        }
        if !progressed {
            break;
        }
    }

    let undecided: Vec<String> = defs
        .iter()
        .zip(&decided)
        .filter(|(_, state)| state.is_none())
        .map(|(def, _)| def.id())
        .collect();
    if !undecided.is_empty() {
        return Err(DependencyError::ConditionCycle { beans: undecided });
    }

    Ok(decided.into_iter().map(|state| state == Some(true)).collect())
}

/// 条件引用的候选组件中是否还有未决定的
fn is_waiting(defs: &[BeanDefinition], decided: &[Option<bool>], index: usize) -> bool {
    defs[index]
        .conditions
        .iter()
        .flat_map(|condition| condition.referenced_beans())
        .any(|selector| {
            defs.iter().enumerate().any(|(other, def)| {
                other != index && decided[other].is_none() && def.info.matches(selector)
            })
        })
}
