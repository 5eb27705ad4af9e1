//! 应用容器
//!
//! 生命周期：注册 -> 刷新（条件、索引、依赖图、装配） -> 运行 -> 关闭。

use crate::builder::BeanBuilder;
use crate::conditions;
use crate::definition::{BeanDefinition, Built, Constructor};
use crate::destroy::DestroyerStack;
use crate::directive::{autowire, Directive, ResolveContext};
use crate::factory::{ArgList, Factory, MethodFactory};
use crate::graph;
use crate::index::BeanIndex;
use crate::registry::WiredRegistry;
use crate::wiring;
use config_abstractions::{PropertyResolver, PropertySource};
use config_impl::{PropertyStore, PropertyStoreBuilder};
use di_abstractions::{
    downcast, BeanId, BeanInfo, BeanRegistry, ConstructorKind, ContainerConfig, ContainerStats,
    Erased, InjectionDirective, Selector, TypedRegistry,
};
use infrastructure_common::{
    AppContext, AppEvent, AppRunner, BoxError, DependencyError, LifecycleError, LifecycleState,
    ShutdownReport, TypeInfo,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const RECEIVER: &str = "receiver";

/// 应用容器
pub struct ApplicationContext {
    config: ContainerConfig,
    state: Mutex<LifecycleState>,
    properties: PropertyStoreBuilder,
    definitions: Vec<BeanDefinition>,
    app: AppContext,
    registry: Option<Arc<WiredRegistry>>,
    destroyers: DestroyerStack,
    stats: ContainerStats,
}

impl ApplicationContext {
    /// 创建空容器
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    /// 使用指定配置创建容器
    pub fn with_config(config: ContainerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LifecycleState::Registering),
            properties: PropertyStoreBuilder::new(),
            definitions: Vec::new(),
            app: AppContext::new(),
            registry: None,
            destroyers: DestroyerStack::default(),
            stats: ContainerStats::default(),
        }
    }

    /// 容器配置
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// 当前状态
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// 统计信息
    pub fn stats(&self) -> &ContainerStats {
        &self.stats
    }

    /// 应用上下文
    pub fn app_context(&self) -> AppContext {
        self.app.clone()
    }

    fn ensure_registering(&self, operation: &str) -> Result<(), DependencyError> {
        if self.state().accepts_registration() {
            Ok(())
        } else {
            Err(DependencyError::WireAfterRefresh {
                operation: operation.to_string(),
            })
        }
    }

    // -----------------------------------------------------------------------
    // 属性
    // -----------------------------------------------------------------------

    /// 设置程序内属性，优先级最低
    pub fn property(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), DependencyError> {
        let key = key.into();
        self.ensure_registering(&format!("property({key})"))?;
        self.properties.set_property(key, value);
        Ok(())
    }

    /// 追加属性来源
    pub fn add_property_source(&mut self, source: &dyn PropertySource) -> Result<(), DependencyError> {
        self.ensure_registering(&format!("add_property_source({})", source.name()))?;
        self.properties
            .add_source(source)
            .map_err(|source_error| DependencyError::Property {
                bean: source.name().to_string(),
                source: source_error,
            })
    }

    /// 刷新前的属性构建器，启动引导在这里追加文件、环境变量和命令行层
    pub fn properties_mut(&mut self) -> Result<&mut PropertyStoreBuilder, DependencyError> {
        self.ensure_registering("properties_mut")?;
        Ok(&mut self.properties)
    }

    /// 刷新前查看某个属性当前的原始值
    pub fn peek_property(&self, key: &str) -> Option<String> {
        self.properties.peek(key)
    }

    /// 冻结后的属性存储
    pub fn property_store(&self) -> Result<Arc<PropertyStore>, DependencyError> {
        self.registry
            .as_ref()
            .map(|registry| registry.store())
            .ok_or(DependencyError::NotRefreshed)
    }

    // -----------------------------------------------------------------------
    // 注册
    // -----------------------------------------------------------------------

    /// 注册预先构造好的对象
    pub fn object<T: Send + Sync + 'static>(&mut self, value: T) -> Result<BeanBuilder<'_, T>, DependencyError> {
        self.register::<T>(
            ConstructorKind::Object,
            Vec::new(),
            Box::new(move |_ctx: &ResolveContext<'_>| Ok(Box::new(value) as Built)),
        )
    }

    /// 注册工厂函数，参数由指令元组描述
    ///
    /// ```ignore
    /// ctx.provide(
    ///     |repo: Arc<Repo>, port: u16| Server::new(repo, port),
    ///     (autowire::<Arc<Repo>>(""), value::<u16>("${server.port:=8080}")),
    /// )?;
    /// ```
    pub fn provide<F, Args>(&mut self, factory: F, args: Args) -> Result<BeanBuilder<'_, F::Output>, DependencyError>
    where
        Args: ArgList,
        F: Factory<Args::Output>,
        F::Output: Send + Sync + 'static,
    {
        let directives = args.describe();
        self.register::<F::Output>(
            ConstructorKind::Factory,
            directives,
            Box::new(move |ctx: &ResolveContext<'_>| {
                let resolved = args.resolve(ctx)?;
                Ok(Box::new(factory.call(resolved)) as Built)
            }),
        )
    }

    /// 注册可能失败的工厂函数
    pub fn try_provide<F, Args, T, E>(&mut self, factory: F, args: Args) -> Result<BeanBuilder<'_, T>, DependencyError>
    where
        Args: ArgList,
        F: Factory<Args::Output, Output = Result<T, E>>,
        T: Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let directives = args.describe();
        self.register::<T>(
            ConstructorKind::Factory,
            directives,
            Box::new(move |ctx: &ResolveContext<'_>| {
                let resolved = args.resolve(ctx)?;
                let value = factory
                    .call(resolved)
                    .map_err(|e| DependencyError::construction_failed(ctx.bean(), e))?;
                Ok(Box::new(value) as Built)
            }),
        )
    }

    /// 注册另一个组件上的工厂方法，接收者按 `receiver` 标签选择
    pub fn method<Recv, F, Args>(
        &mut self,
        receiver: &str,
        method: F,
        args: Args,
    ) -> Result<BeanBuilder<'_, F::Output>, DependencyError>
    where
        Recv: ?Sized + Send + Sync + 'static,
        Args: ArgList,
        F: MethodFactory<Recv, Args::Output>,
        F::Output: Send + Sync + 'static,
    {
        let receiver = autowire::<Arc<Recv>>(receiver);
        let mut directives = vec![receiver.describe(RECEIVER)];
        directives.extend(args.describe());
        self.register::<F::Output>(
            ConstructorKind::Method {
                receiver: TypeInfo::of::<Recv>(),
            },
            directives,
            Box::new(move |ctx: &ResolveContext<'_>| {
                let target: Arc<Recv> = receiver.resolve(RECEIVER, ctx)?;
                let resolved = args.resolve(ctx)?;
                Ok(Box::new(method.call(&*target, resolved)) as Built)
            }),
        )
    }

    /// 注册可能失败的工厂方法
    pub fn try_method<Recv, F, Args, T, E>(
        &mut self,
        receiver: &str,
        method: F,
        args: Args,
    ) -> Result<BeanBuilder<'_, T>, DependencyError>
    where
        Recv: ?Sized + Send + Sync + 'static,
        Args: ArgList,
        F: MethodFactory<Recv, Args::Output, Output = Result<T, E>>,
        T: Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let receiver = autowire::<Arc<Recv>>(receiver);
        let mut directives = vec![receiver.describe(RECEIVER)];
        directives.extend(args.describe());
        self.register::<T>(
            ConstructorKind::Method {
                receiver: TypeInfo::of::<Recv>(),
            },
            directives,
            Box::new(move |ctx: &ResolveContext<'_>| {
                let target: Arc<Recv> = receiver.resolve(RECEIVER, ctx)?;
                let resolved = args.resolve(ctx)?;
                let value = method
                    .call(&*target, resolved)
                    .map_err(|e| DependencyError::construction_failed(ctx.bean(), e))?;
                Ok(Box::new(value) as Built)
            }),
        )
    }

    fn register<T: Send + Sync + 'static>(
        &mut self,
        kind: ConstructorKind,
        directives: Vec<InjectionDirective>,
        constructor: Constructor,
    ) -> Result<BeanBuilder<'_, T>, DependencyError> {
        self.ensure_registering(&format!("register({})", TypeInfo::of::<T>()))?;
        let index = self.definitions.len();
        let mut info = BeanInfo::new(TypeInfo::of::<T>(), kind, index);
        info.directives = directives;
        debug!("注册组件: {}", info.id);
        self.definitions.push(BeanDefinition::new::<T>(info, constructor));
        Ok(BeanBuilder::new(&mut self.definitions[index]))
    }

    /// 已注册的组件描述
    pub fn definitions(&self) -> Vec<BeanInfo> {
        self.definitions.iter().map(|def| def.info.clone()).collect()
    }

    // -----------------------------------------------------------------------
    // 刷新
    // -----------------------------------------------------------------------

    /// 刷新容器：冻结属性，求值条件，建立索引和依赖图，按拓扑顺序装配
    ///
    /// 只能调用一次。失败时容器进入关闭状态，已启动的后台任务被取消。
    pub fn refresh(&mut self) -> Result<(), DependencyError> {
        {
            let mut state = self.state.lock();
            if !state.accepts_registration() {
                return Err(DependencyError::WireAfterRefresh {
                    operation: "refresh".to_string(),
                });
            }
            *state = LifecycleState::Refreshing;
        }

        let started = Instant::now();
        match self.refresh_inner() {
            Ok(()) => {
                self.stats.refresh_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                *self.state.lock() = LifecycleState::Refreshed;
                info!(
                    "容器刷新完成: 注册 {} 个组件, 装配 {} 个, 排除 {} 个, 耗时 {}ms",
                    self.stats.registered, self.stats.wired, self.stats.excluded, self.stats.refresh_time_ms
                );
                Ok(())
            }
            Err(error) => {
                // 初始化回调可能已经启动后台任务
                self.app.cancel();
                *self.state.lock() = LifecycleState::Closed;
                warn!("容器刷新失败: {}", error);
                Err(error)
            }
        }
    }

    fn refresh_inner(&mut self) -> Result<(), DependencyError> {
        let builder = std::mem::take(&mut self.properties);
        let store = Arc::new(builder.build().map_err(|source| DependencyError::Property {
            bean: "properties".to_string(),
            source,
        })?);

        let included = conditions::evaluate(&self.definitions, &store)?;
        let plan = {
            let index = BeanIndex::build(&self.definitions, &included)?;
            graph::plan(&self.definitions, &index)?
        };
        let wired = wiring::wire(&mut self.definitions, &plan, &store, &self.app)?;

        self.stats.registered = self.definitions.len();
        self.stats.included = included.iter().filter(|included| **included).count();
        self.stats.excluded = self.stats.registered - self.stats.included;
        self.stats.wired = wired.beans.len();
        self.stats.lazy_fills = wired.lazy_fills;

        if self.config.log_wired_beans {
            for bean in &wired.beans {
                info!("已装配组件: {}", bean.info.id);
            }
        }

        self.destroyers = DestroyerStack::new(wired.destroyers);
        self.registry = Some(Arc::new(WiredRegistry::new(wired.beans, store)));
        self.definitions.clear();
        Ok(())
    }

    /// 只读注册表，可以交给其他协作者
    pub fn registry(&self) -> Result<Arc<WiredRegistry>, DependencyError> {
        self.registry.clone().ok_or(DependencyError::NotRefreshed)
    }

    /// 导出为 runner 的组件，按 order 再按注册顺序
    pub fn runners(&self) -> Result<Vec<(String, Arc<dyn AppRunner>)>, DependencyError> {
        self.registry()?.collect_named::<dyn AppRunner>()
    }

    /// 导出为事件监听者的组件，按装配顺序
    pub fn events(&self) -> Result<Vec<(String, Arc<dyn AppEvent>)>, DependencyError> {
        let registry = self.registry()?;
        let type_info = TypeInfo::of::<dyn AppEvent>();
        registry
            .beans()
            .into_iter()
            .filter(|bean| bean.provides(&type_info))
            .map(|bean| {
                registry
                    .instance(&bean.id, &type_info)
                    .as_ref()
                    .and_then(downcast::<dyn AppEvent>)
                    .map(|event| (bean.name.clone(), event))
                    .ok_or_else(|| DependencyError::TypeMismatch {
                        bean: bean.id.to_string(),
                        expected: type_info.type_name(),
                        required_by: "events".to_string(),
                    })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // 关闭
    // -----------------------------------------------------------------------

    /// 关闭容器
    ///
    /// 拒绝新任务，取消后台任务并在宽限期内等待退出，然后按装配逆序执行销毁回调。
    /// 重复调用不会再次执行销毁回调。刷新失败后调用只等待残留的后台任务退出。
    pub async fn shutdown(&self, grace: Option<Duration>) -> Result<ShutdownReport, LifecycleError> {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if !matches!(previous, LifecycleState::ShuttingDown | LifecycleState::Closed) {
                *state = LifecycleState::ShuttingDown;
            }
            previous
        };
        match previous {
            LifecycleState::Closed if self.app.task_count() > 0 => {
                info!("容器已关闭，等待 {} 个残留后台任务退出", self.app.task_count());
                return Ok(self.app.shutdown(grace).await);
            }
            LifecycleState::ShuttingDown | LifecycleState::Closed => {
                debug!("容器已经关闭或正在关闭");
                return Ok(ShutdownReport::default());
            }
            _ => {}
        }

        let deadline = grace.map(|grace| tokio::time::Instant::now() + grace);
        info!("开始关闭容器");
        let report = self.app.shutdown(grace).await;
        let destroyed = self.destroyers.run(deadline).await;
        *self.state.lock() = LifecycleState::Closed;

        match destroyed {
            Ok(()) => {
                info!("容器已关闭");
                Ok(report)
            }
            Err(error) => {
                warn!("容器关闭时出错: {}", error);
                Err(error)
            }
        }
    }

    /// 使用配置中的宽限期关闭
    pub async fn close(&self) -> Result<ShutdownReport, LifecycleError> {
        self.shutdown(self.config.shutdown_grace).await
    }
}

impl Default for ApplicationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BeanRegistry for ApplicationContext {
    fn beans(&self) -> Vec<BeanInfo> {
        self.registry.as_ref().map(|r| r.beans()).unwrap_or_default()
    }

    fn find(&self, selector: &Selector) -> Vec<BeanInfo> {
        self.registry.as_ref().map(|r| r.find(selector)).unwrap_or_default()
    }

    fn instance(&self, id: &BeanId, type_info: &TypeInfo) -> Option<Erased> {
        self.registry.as_ref()?.instance(id, type_info)
    }

    fn properties(&self) -> Arc<dyn PropertyResolver> {
        match &self.registry {
            Some(registry) => registry.properties(),
            None => Arc::new(PropertyStore::empty()),
        }
    }
}

impl std::fmt::Debug for ApplicationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationContext")
            .field("state", &self.state())
            .field("definitions", &self.definitions.len())
            .field("stats", &self.stats)
            .finish()
    }
}
