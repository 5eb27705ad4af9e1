//! 依赖图与拓扑排序
//!
//! 延迟注入不产生边；其余注入和 `depends_on` 都是“依赖先于使用者”。
//! 同一层内按注册顺序出队，保证装配顺序确定。

use crate::definition::BeanDefinition;
use crate::index::BeanIndex;
use di_abstractions::DirectiveKind;
use infrastructure_common::DependencyError;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

/// 装配计划
pub(crate) struct WiringPlan {
    /// 装配顺序
    pub order: Vec<usize>,
    /// 每个组件各注入目标选中的组件
    pub targets: Vec<HashMap<String, Vec<usize>>>,
}

/// 解析注入目标并排出装配顺序
pub(crate) fn plan(defs: &[BeanDefinition], index: &BeanIndex<'_>) -> Result<WiringPlan, DependencyError> {
    let mut targets: Vec<HashMap<String, Vec<usize>>> = vec![HashMap::new(); defs.len()];
    let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); defs.len()];
    let mut errors = Vec::new();

    for info in index.beans() {
        let bean = info.index;
        let required_by = info.id.to_string();

        for directive in &info.directives {
            match &directive.kind {
                DirectiveKind::Autowire(spec) | DirectiveKind::Lazy(spec) => {
                    match index.select(spec, &required_by) {
                        Ok(selected) => {
                            if !directive.is_lazy() {
                                deps[bean].extend(selected.iter().copied());
                            }
                            targets[bean].insert(directive.target.clone(), selected);
                        }
                        Err(error) => errors.push(error),
                    }
                }
                DirectiveKind::Invalid { message } => errors.push(DependencyError::InvalidDirective {
                    bean: required_by.clone(),
                    message: format!("{}: {}", directive.target, message),
                }),
                DirectiveKind::Value { .. } | DirectiveKind::Context => {}
            }
        }

        for selector in &info.depends_on {
            let found = index.find(selector);
            if found.is_empty() {
                errors.push(DependencyError::not_found(selector.to_string(), required_by.clone()));
            }
            deps[bean].extend(found);
        }
    }

    if let Some(error) = DependencyError::combine(errors) {
        return Err(error);
    }

    let nodes: Vec<usize> = index.beans().iter().map(|info| info.index).collect();
    let order = topological_order(&nodes, &deps).map_err(|cycles| {
        let errors = cycles
            .into_iter()
            .map(|cycle| DependencyError::DependencyCycle {
                cycle: cycle.into_iter().map(|i| defs[i].info.name.clone()).collect(),
            })
            .collect();
        DependencyError::combine(errors).unwrap_or(DependencyError::DependencyCycle { cycle: Vec::new() })
    })?;

    Ok(WiringPlan { order, targets })
}

/// Kahn 算法，失败时返回找到的环
fn topological_order(nodes: &[usize], deps: &[BTreeSet<usize>]) -> Result<Vec<usize>, Vec<Vec<usize>>> {
    let mut pending: HashMap<usize, usize> = nodes.iter().map(|&n| (n, deps[n].len())).collect();
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for &node in nodes {
        for &dep in &deps[node] {
            dependents.entry(dep).or_default().push(node);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(&node, _)| Reverse(node))
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &dependent in dependents.get(&node).map(Vec::as_slice).unwrap_or_default() {
            if let Some(count) = pending.get_mut(&dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
    }

    if order.len() == nodes.len() {
        return Ok(order);
    }

    let stuck: BTreeSet<usize> = pending
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(node, _)| node)
        .collect();
    Err(find_cycles(&stuck, deps))
}

/// 在未能排序的节点中找出环，每个环首尾相同
fn find_cycles(stuck: &BTreeSet<usize>, deps: &[BTreeSet<usize>]) -> Vec<Vec<usize>> {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut cycles = Vec::new();

    for &start in stuck {
        if visited.contains(&start) {
            continue;
        }
        let mut path: Vec<usize> = Vec::new();
        let mut position: HashMap<usize, usize> = HashMap::new();
        let mut current = start;
        loop {
            if let Some(&at) = position.get(&current) {
                let mut cycle = path[at..].to_vec();
                cycle.push(current);
                cycles.push(cycle);
                break;
            }
            if visited.contains(&current) {
                break;
            }
            position.insert(current, path.len());
            path.push(current);
            match deps[current].iter().find(|dep| stuck.contains(dep)) {
                Some(&next) => current = next,
                None => break,
            }
        }
        visited.extend(path);
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(usize, usize)], size: usize) -> Vec<BTreeSet<usize>> {
        let mut deps = vec![BTreeSet::new(); size];
        for &(from, to) in edges {
            deps[from].insert(to);
        }
        deps
    }

    #[test]
    fn test_order_respects_dependencies_and_registration() {
        // 0 依赖 2，1 无依赖，2 无依赖
        let deps = graph(&[(0, 2)], 3);
        assert_eq!(topological_order(&[0, 1, 2], &deps).unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn test_cycle_is_reported_in_dependency_direction() {
        // 0 -> 1 -> 2 -> 0，3 依赖环上的节点
        let deps = graph(&[(0, 1), (1, 2), (2, 0), (3, 0)], 4);
        let cycles = topological_order(&[0, 1, 2, 3], &deps).unwrap_err();
        assert_eq!(cycles, vec![vec![0, 1, 2, 0]]);
    }

    #[test]
    fn test_self_dependency() {
        let deps = graph(&[(0, 0)], 1);
        assert_eq!(topological_order(&[0], &deps).unwrap_err(), vec![vec![0, 0]]);
    }
}
