//! 组件注册构建器

use crate::definition::{BeanDefinition, ExportSlot, LazyFill};
use crate::directive::{Directive, LazyDirective, ResolveContext};
use di_abstractions::{downcast, erase, Condition, Erased, LazyRef, Selector};
use infrastructure_common::{AppContext, AppEvent, AppRunner, BoxError, DependencyError, TypeInfo};
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

/// 注册后返回的构建器，用于补充名称、条件、导出和生命周期回调
pub struct BeanBuilder<'c, T> {
    def: &'c mut BeanDefinition,
    _marker: PhantomData<fn() -> T>,
}

impl<'c, T: Send + Sync + 'static> BeanBuilder<'c, T> {
    pub(crate) fn new(def: &'c mut BeanDefinition) -> Self {
        Self {
            def,
            _marker: PhantomData,
        }
    }

    /// 组件名
    pub fn name(self, name: impl Into<String>) -> Self {
        self.def.info.rename(name);
        self
    }

    /// 排序提示，收集注入时越小越靠前
    pub fn order(self, order: i32) -> Self {
        self.def.info.order = order;
        self
    }

    /// 按类型查找有多个候选时优先选择
    pub fn primary(self) -> Self {
        self.def.info.primary = true;
        self
    }

    /// 以接口类型导出
    ///
    /// ```ignore
    /// ctx.object(Console)?.export::<dyn Greeter>(|c| c as Arc<dyn Greeter>);
    /// ```
    pub fn export<I>(self, cast: impl Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let type_info = TypeInfo::of::<I>();
        if self.def.info.exports.iter().any(|e| e.id == type_info.id) {
            return self;
        }
        self.def.info.exports.push(type_info.clone());
        self.def.exports.push(ExportSlot {
            type_info,
            cast: Box::new(move |own: &Erased| downcast::<T>(own).map(|t| erase(cast(t)))),
        });
        self
    }

    /// 导出为启动后执行的 runner
    pub fn export_runner(self) -> Self
    where
        T: AppRunner,
    {
        self.export::<dyn AppRunner>(|runner| runner as Arc<dyn AppRunner>)
    }

    /// 导出为启动/停止事件监听者
    pub fn export_event(self) -> Self
    where
        T: AppEvent,
    {
        self.export::<dyn AppEvent>(|event| event as Arc<dyn AppEvent>)
    }

    /// 追加条件，多个条件之间为“且”
    pub fn condition(self, condition: Condition) -> Self {
        self.def.conditions.push(condition);
        self
    }

    /// 属性存在时才装配
    pub fn on_property(self, key: impl Into<String>) -> Self {
        self.condition(Condition::on_property(key))
    }

    /// 属性等于某值时才装配
    pub fn on_property_value(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.condition(Condition::on_property_value(key, value))
    }

    /// 属性不存在时才装配
    pub fn on_missing_property(self, key: impl Into<String>) -> Self {
        self.condition(Condition::on_missing_property(key))
    }

    /// profile 激活时才装配
    pub fn on_profile(self, profile: impl Into<String>) -> Self {
        self.condition(Condition::on_profile(profile))
    }

    /// 存在匹配组件时才装配
    pub fn on_bean(self, selector: Selector) -> Self {
        self.condition(Condition::on_bean(selector))
    }

    /// 不存在匹配组件时才装配
    pub fn on_missing_bean(self, selector: Selector) -> Self {
        self.condition(Condition::on_missing_bean(selector))
    }

    /// 表达式为真时才装配
    pub fn on_expression(self, expr: impl Into<String>) -> Self {
        self.condition(Condition::on_expression(expr))
    }

    /// 声明必须先装配的组件
    pub fn depends_on(self, selector: Selector) -> Self {
        self.def.info.depends_on.push(selector);
        self
    }

    /// 构造后注入字段
    pub fn field<D, S>(self, label: impl Into<String>, directive: D, setter: S) -> Self
    where
        D: Directive,
        S: Fn(&mut T, D::Output) + Send + Sync + 'static,
    {
        let label = label.into();
        self.def.info.directives.push(directive.describe(&label));
        self.def.fields.push(Box::new(move |target: &mut (dyn Any + Send), ctx: &ResolveContext<'_>| {
            let value = directive.resolve(&label, ctx)?;
            let instance = target.downcast_mut::<T>().ok_or_else(|| {
                DependencyError::TypeMismatch {
                    bean: ctx.bean().to_string(),
                    expected: TypeInfo::of::<T>().type_name(),
                    required_by: label.clone(),
                }
            })?;
            setter(instance, value);
            Ok(())
        }));
        self
    }

    /// 延迟注入字段，目标装配完成后填充，不参与拓扑排序
    pub fn lazy_field<I, A>(self, label: impl Into<String>, directive: LazyDirective<I>, accessor: A) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        A: Fn(&T) -> &LazyRef<I> + Send + Sync + 'static,
    {
        let label = label.into();
        self.def.info.directives.push(directive.describe(&label));
        self.def.lazy_fills.push(LazyFill {
            target: label,
            element: TypeInfo::of::<I>(),
            fill: Box::new(move |holder: &Erased, target: &Erased| {
                match (downcast::<T>(holder), downcast::<I>(target)) {
                    (Some(holder), Some(target)) => {
                        let _ = accessor(&holder).fill(target);
                        true
                    }
                    _ => false,
                }
            }),
        });
        self
    }

    /// 初始化回调，出错时中止启动
    pub fn init<E>(self, hook: impl Fn(&T) -> Result<(), E> + Send + Sync + 'static) -> Self
    where
        E: Into<BoxError> + 'static,
    {
        self.def.init.push(Box::new(move |own: &Erased, _app: &AppContext| {
            let instance = typed::<T>(own)?;
            hook(&instance).map_err(Into::into)
        }));
        self
    }

    /// 带应用上下文的初始化回调，可以在其中启动后台任务
    pub fn init_with_context<E>(
        self,
        hook: impl Fn(&T, &AppContext) -> Result<(), E> + Send + Sync + 'static,
    ) -> Self
    where
        E: Into<BoxError> + 'static,
    {
        self.def.init.push(Box::new(move |own: &Erased, app: &AppContext| {
            let instance = typed::<T>(own)?;
            hook(&instance, app).map_err(Into::into)
        }));
        self
    }

    /// 销毁回调，关闭时按装配的逆序执行
    pub fn destroy<E>(self, hook: impl Fn(&T) -> Result<(), E> + Send + Sync + 'static) -> Self
    where
        E: Into<BoxError> + 'static,
    {
        self.def.destroy.push(Box::new(move |own: &Erased| {
            let instance = typed::<T>(own)?;
            hook(&instance).map_err(Into::into)
        }));
        self
    }
}

fn typed<T: Send + Sync + 'static>(own: &Erased) -> Result<Arc<T>, BoxError> {
    downcast::<T>(own)
        .ok_or_else(|| BoxError::from(format!("实例类型不是 {}", TypeInfo::of::<T>())))
}
