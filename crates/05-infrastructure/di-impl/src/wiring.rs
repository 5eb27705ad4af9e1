//! 按装配计划逐个构造组件
//!
//! 每个组件依次经过：构造、字段注入、封装为共享实例、填充延迟引用、初始化。
//! 持有未填充延迟引用的组件推迟初始化，直到全部引用都已填充。

use crate::definition::BeanDefinition;
use crate::destroy::{panic_message, Destroyer, DestroyerStack};
use crate::directive::ResolveContext;
use crate::graph::WiringPlan;
use crate::registry::WiredBean;
use config_impl::PropertyStore;
use di_abstractions::Erased;
use infrastructure_common::{AppContext, DependencyError};
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

/// 装配结果
pub(crate) struct Wired {
    /// 按装配顺序
    pub beans: Vec<WiredBean>,
    /// 按装配顺序，关闭时逆序执行
    pub destroyers: Vec<Destroyer>,
    pub lazy_fills: usize,
}

/// 执行装配，失败时先销毁已经初始化的组件
pub(crate) fn wire(
    defs: &mut [BeanDefinition],
    plan: &WiringPlan,
    store: &PropertyStore,
    app: &AppContext,
) -> Result<Wired, DependencyError> {
    let mut wiring = Wiring {
        wired: (0..defs.len()).map(|_| None).collect(),
        defs,
        plan,
        store,
        app,
        order: Vec::new(),
        destroyers: Vec::new(),
        waiting: HashMap::new(),
        unfilled: BTreeMap::new(),
        fills: 0,
    };

    match wiring.run() {
        Ok(()) => Ok(wiring.finish()),
        Err(error) => {
            let partial = wiring.finish();
            if !partial.destroyers.is_empty() {
                warn!("装配失败，销毁已初始化的 {} 个组件", partial.destroyers.len());
                if let Err(cleanup) = DestroyerStack::new(partial.destroyers).run_blocking() {
                    warn!("清理已初始化组件时出错: {}", cleanup);
                }
            }
            Err(error)
        }
    }
}

struct Wiring<'a> {
    defs: &'a mut [BeanDefinition],
    plan: &'a WiringPlan,
    store: &'a PropertyStore,
    app: &'a AppContext,
    wired: Vec<Option<WiredBean>>,
    order: Vec<usize>,
    destroyers: Vec<(usize, Destroyer)>,
    /// 目标组件 -> 等待它的 (持有者, 延迟字段)
    waiting: HashMap<usize, Vec<(usize, usize)>>,
    /// 持有者 -> 尚未填充的延迟字段数
    unfilled: BTreeMap<usize, usize>,
    fills: usize,
}

impl Wiring<'_> {
    fn run(&mut self) -> Result<(), DependencyError> {
        for position in 0..self.plan.order.len() {
            self.wire_one(self.plan.order[position])?;
        }
        if let Some((&holder, _)) = self.unfilled.iter().next() {
            return Err(DependencyError::InvalidDirective {
                bean: self.defs[holder].id(),
                message: "延迟注入的目标没有装配".to_string(),
            });
        }
        Ok(())
    }

    fn wire_one(&mut self, bean: usize) -> Result<(), DependencyError> {
        let own = self.construct(bean)?;
        let slots = self.slots(bean, &own)?;
        self.wired[bean] = Some(WiredBean {
            info: self.defs[bean].info.clone(),
            slots,
        });
        self.order.push(bean);
        debug!("组件已构造: {}", self.defs[bean].info.id);

        let mut pending = 0;
        for fill in 0..self.defs[bean].lazy_fills.len() {
            let label = &self.defs[bean].lazy_fills[fill].target;
            let target = self.plan.targets[bean]
                .get(label)
                .and_then(|selected| selected.first())
                .copied();
            match target {
                None => {}
                Some(target) if self.wired[target].is_some() => self.fill(bean, fill, target)?,
                Some(target) => {
                    pending += 1;
                    self.waiting.entry(target).or_default().push((bean, fill));
                }
            }
        }

        if let Some(holders) = self.waiting.remove(&bean) {
            for (holder, fill) in holders {
                self.fill(holder, fill, bean)?;
                let left = self.unfilled.get(&holder).copied().unwrap_or(1).saturating_sub(1);
                if left == 0 {
                    self.unfilled.remove(&holder);
                    self.initialize(holder)?;
                } else {
                    self.unfilled.insert(holder, left);
                }
            }
        }

        if pending == 0 {
            self.initialize(bean)
        } else {
            debug!("组件等待 {} 个延迟引用后再初始化: {}", pending, self.defs[bean].info.id);
            self.unfilled.insert(bean, pending);
            Ok(())
        }
    }

    fn construct(&mut self, bean: usize) -> Result<Erased, DependencyError> {
        let def = &mut self.defs[bean];
        let id = def.id();
        let constructor = def
            .constructor
            .take()
            .ok_or_else(|| DependencyError::construction_failed(id.as_str(), "组件已经构造过"))?;

        let ctx = ResolveContext {
            bean: &id,
            store: self.store,
            app: self.app,
            targets: &self.plan.targets[bean],
            wired: &self.wired,
        };

        let mut built = guarded(&id, || constructor(&ctx))?;
        for field in &def.fields {
            guarded(&id, || field(built.as_mut(), &ctx))?;
        }

        (def.seal)(built).ok_or_else(|| DependencyError::TypeMismatch {
            bean: id.clone(),
            expected: def.info.type_info.type_name(),
            required_by: id.clone(),
        })
    }

    fn slots(&self, bean: usize, own: &Erased) -> Result<HashMap<std::any::TypeId, Erased>, DependencyError> {
        let def = &self.defs[bean];
        let mut slots = HashMap::new();
        slots.insert(def.info.type_info.id, own.clone());
        for export in &def.exports {
            let slot = (export.cast)(own).ok_or_else(|| DependencyError::TypeMismatch {
                bean: def.id(),
                expected: export.type_info.type_name(),
                required_by: def.id(),
            })?;
            slots.insert(export.type_info.id, slot);
        }
        Ok(slots)
    }

    fn fill(&mut self, holder: usize, fill: usize, target: usize) -> Result<(), DependencyError> {
        let def = &self.defs[holder];
        let lazy = &def.lazy_fills[fill];
        let holder_slot = self.wired[holder]
            .as_ref()
            .and_then(|w| w.slots.get(&def.info.type_info.id));
        let target_slot = self.wired[target]
            .as_ref()
            .and_then(|w| w.slots.get(&lazy.element.id));

        match (holder_slot, target_slot) {
            (Some(holder_slot), Some(target_slot)) if (lazy.fill)(holder_slot, target_slot) => {
                debug!("延迟引用已填充: {}.{} -> {}", def.info.name, lazy.target, self.defs[target].info.name);
                self.fills += 1;
                Ok(())
            }
            _ => Err(DependencyError::TypeMismatch {
                bean: self.defs[target].id(),
                expected: lazy.element.type_name(),
                required_by: def.id(),
            }),
        }
    }

    fn initialize(&mut self, bean: usize) -> Result<(), DependencyError> {
        let app = self.app;
        let def = &mut self.defs[bean];
        let id = def.id();
        let own = self.wired[bean]
            .as_ref()
            .and_then(|w| w.slots.get(&def.info.type_info.id))
            .cloned()
            .ok_or_else(|| DependencyError::construction_failed(id.as_str(), "组件尚未构造"))?;

        for hook in &def.init {
            guarded(&id, || {
                hook(&own, app).map_err(|e| DependencyError::construction_failed(id.as_str(), e))
            })?;
        }

        if !def.destroy.is_empty() {
            let position = self
                .order
                .iter()
                .position(|&wired| wired == bean)
                .unwrap_or(self.order.len());
            self.destroyers.push((
                position,
                Destroyer {
                    bean: id.clone(),
                    instance: own,
                    hooks: std::mem::take(&mut def.destroy),
                },
            ));
        }
        debug!("组件已初始化: {}", id);
        Ok(())
    }

    fn finish(mut self) -> Wired {
        let mut wired = std::mem::take(&mut self.wired);
        let beans = self
            .order
            .iter()
            .filter_map(|&bean| wired[bean].take())
            .collect();
        self.destroyers.sort_by_key(|(position, _)| *position);
        Wired {
            beans,
            destroyers: self.destroyers.into_iter().map(|(_, d)| d).collect(),
            lazy_fills: self.fills,
        }
    }
}

/// 执行用户代码，panic 视为构造失败
fn guarded<R>(bean: &str, f: impl FnOnce() -> Result<R, DependencyError>) -> Result<R, DependencyError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(DependencyError::construction_failed(
            bean,
            format!("panic: {}", panic_message(payload.as_ref())),
        )),
    }
}
