//! # 依赖注入具体实现
//!
//! 提供 [`ApplicationContext`] 容器：注册组件描述，刷新时依次完成条件求值、
//! 建立索引、构建依赖图、拓扑排序和逐个装配，关闭时按装配逆序销毁。
//!
//! ```ignore
//! let mut ctx = ApplicationContext::new();
//! ctx.property("server.port", "8080")?;
//! ctx.object(Repo::default())?.name("repo");
//! ctx.provide(
//!     |repo: Arc<Repo>, port: u16| Server::new(repo, port),
//!     (autowire::<Arc<Repo>>("repo"), value::<u16>("${server.port:=80}")),
//! )?
//! .destroy(|server: &Server| server.stop());
//! ctx.refresh()?;
//! let server: Arc<Server> = ctx.get_by_type()?;
//! ```

mod builder;
mod conditions;
mod context;
mod definition;
mod destroy;
mod directive;
mod factory;
pub mod global;
mod graph;
mod index;
mod registry;
mod wiring;

pub use builder::BeanBuilder;
pub use context::ApplicationContext;
pub use directive::{
    autowire, context, lazy, value, AutowireDirective, AutowireTarget, ContextDirective, Directive,
    LazyDirective, ResolveContext, ValueDirective,
};
pub use factory::{arg_label, ArgList, Factory, MethodFactory};
pub use registry::WiredRegistry;

#[cfg(test)]
mod tests {
    use super::*;
    use di_abstractions::{BeanRegistry, LazyRef, Selector, TypedRegistry};
    use infrastructure_common::{DependencyError, ErrorKind, LifecycleState};
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<String>>>;

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn push(log: &Log, entry: impl Into<String>) {
        log.lock().push(entry.into());
    }

    #[derive(Debug)]
    struct Store;
    struct Cache {
        store: Arc<Store>,
    }
    struct Service {
        cache: Arc<Cache>,
        name: String,
    }

    #[test]
    fn test_linear_wiring_and_lookup() {
        let events = log();
        let mut ctx = ApplicationContext::new();

        let e = events.clone();
        ctx.provide(
            move |cache: Arc<Cache>| {
                push(&e, "service");
                Service {
                    cache,
                    name: String::new(),
                }
            },
            (autowire::<Arc<Cache>>(""),),
        )
        .unwrap();
        let e = events.clone();
        ctx.provide(
            move |store: Arc<Store>| {
                push(&e, "cache");
                Cache { store }
            },
            (autowire::<Arc<Store>>(""),),
        )
        .unwrap();
        let e = events.clone();
        ctx.provide(
            move || {
                push(&e, "store");
                Store
            },
            (),
        )
        .unwrap();

        ctx.refresh().unwrap();
        assert_eq!(*events.lock(), vec!["store", "cache", "service"]);
        assert_eq!(ctx.state(), LifecycleState::Refreshed);
        assert_eq!(ctx.stats().wired, 3);

        let service: Arc<Service> = ctx.get_by_type().unwrap();
        let cache: Arc<Cache> = ctx.get_by_name("Cache").unwrap();
        assert!(Arc::ptr_eq(&service.cache, &cache));
        let _: &Arc<Store> = &cache.store;

        let order: Vec<String> = ctx.wired_order().into_iter().map(|b| b.name).collect();
        assert_eq!(order, vec!["Store", "Cache", "Service"]);
    }

    #[test]
    fn test_registration_after_refresh_is_rejected() {
        let mut ctx = ApplicationContext::new();
        ctx.refresh().unwrap();

        let err = ctx.object(Store).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::WireAfterRefresh);
        assert_eq!(ctx.property("a", "b").unwrap_err().kind(), ErrorKind::WireAfterRefresh);
        assert_eq!(ctx.refresh().unwrap_err().kind(), ErrorKind::WireAfterRefresh);
    }

    #[test]
    fn test_registry_before_refresh() {
        let ctx = ApplicationContext::new();
        assert!(matches!(ctx.registry(), Err(DependencyError::NotRefreshed)));
        assert!(ctx.beans().is_empty());
        assert_eq!(ctx.get_by_type::<Store>().unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_value_and_field_injection() {
        let mut ctx = ApplicationContext::new();
        ctx.property("service.name", "orders").unwrap();
        ctx.object(Store).unwrap();
        ctx.provide(|store: Arc<Store>| Cache { store }, (autowire::<Arc<Store>>(""),))
            .unwrap();
        ctx.object(Service {
            cache: Arc::new(Cache { store: Arc::new(Store) }),
            name: String::new(),
        })
        .unwrap()
        .field("cache", autowire::<Arc<Cache>>(""), |s: &mut Service, c| s.cache = c)
        .field("name", value::<String>("${service.name:=default}"), |s: &mut Service, n| s.name = n);

        ctx.refresh().unwrap();
        let service: Arc<Service> = ctx.get_by_type().unwrap();
        let cache: Arc<Cache> = ctx.get_by_type().unwrap();
        assert_eq!(service.name, "orders");
        assert!(Arc::ptr_eq(&service.cache, &cache));
    }

    #[test]
    fn test_value_check_failure() {
        let mut ctx = ApplicationContext::new();
        ctx.property("pool.size", "0").unwrap();
        ctx.provide(|size: u32| size, (value::<u32>("${pool.size}").check("$ > 0"),))
            .unwrap();

        let err = ctx.refresh().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert_eq!(ctx.state(), LifecycleState::Closed);
    }

    #[test]
    fn test_cycle_is_reported() {
        struct A;
        struct B;
        let mut ctx = ApplicationContext::new();
        ctx.provide(|_: Arc<B>| A, (autowire::<Arc<B>>(""),)).unwrap();
        ctx.provide(|_: Arc<A>| B, (autowire::<Arc<A>>(""),)).unwrap();

        match ctx.refresh().unwrap_err() {
            DependencyError::DependencyCycle { cycle } => assert_eq!(cycle, vec!["A", "B", "A"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    trait Peer: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Node {
        name: &'static str,
        peer: LazyRef<dyn Peer>,
    }

    impl Peer for Node {
        fn name(&self) -> &str {
            self.name
        }
    }

    #[test]
    fn test_lazy_cycle_defers_init() {
        let events = log();
        let mut ctx = ApplicationContext::new();

        let e = events.clone();
        ctx.object(Node {
            name: "ping",
            peer: LazyRef::new(),
        })
        .unwrap()
        .name("ping")
        .export::<dyn Peer>(|n| n as Arc<dyn Peer>)
        .lazy_field("peer", lazy::<dyn Peer>("pong"), |n: &Node| &n.peer)
        .init(move |n: &Node| -> Result<(), DependencyError> {
            push(&e, format!("init ping -> {}", n.peer.get().map(|p| p.name().to_string()).unwrap_or_default()));
            Ok(())
        });

        let e = events.clone();
        ctx.object(Node {
            name: "pong",
            peer: LazyRef::new(),
        })
        .unwrap()
        .name("pong")
        .export::<dyn Peer>(|n| n as Arc<dyn Peer>)
        .lazy_field("peer", lazy::<dyn Peer>("ping"), |n: &Node| &n.peer)
        .init(move |n: &Node| -> Result<(), DependencyError> {
            push(&e, format!("init pong -> {}", n.peer.get().map(|p| p.name().to_string()).unwrap_or_default()));
            Ok(())
        });

        ctx.refresh().unwrap();
        assert_eq!(*events.lock(), vec!["init ping -> pong", "init pong -> ping"]);
        assert_eq!(ctx.stats().lazy_fills, 2);
    }

    struct Watcher {
        node: Arc<Node>,
    }

    impl Peer for Watcher {
        fn name(&self) -> &str {
            "watcher"
        }
    }

    #[test]
    fn test_dependent_constructed_before_deferred_init() {
        let events = log();
        let mut ctx = ApplicationContext::new();

        let e = events.clone();
        ctx.object(Node {
            name: "ping",
            peer: LazyRef::new(),
        })
        .unwrap()
        .name("ping")
        .lazy_field("peer", lazy::<dyn Peer>("watcher"), |n: &Node| &n.peer)
        .init(move |n: &Node| -> Result<(), DependencyError> {
            push(&e, format!("init ping -> {}", n.peer.get().map(|p| p.name().to_string()).unwrap_or_default()));
            Ok(())
        });

        let e = events.clone();
        let created = events.clone();
        ctx.provide(
            move |node: Arc<Node>| {
                push(&created, format!("new watcher of {}", node.name));
                Watcher { node }
            },
            (autowire::<Arc<Node>>("ping"),),
        )
        .unwrap()
        .name("watcher")
        .export::<dyn Peer>(|w| w as Arc<dyn Peer>)
        .init(move |w: &Watcher| -> Result<(), DependencyError> {
            push(&e, format!("init watcher of {}", w.node.name));
            Ok(())
        });

        ctx.refresh().unwrap();
        assert_eq!(
            *events.lock(),
            vec!["new watcher of ping", "init ping -> watcher", "init watcher of ping"]
        );
    }

    #[test]
    fn test_factory_error_and_panic() {
        let mut ctx = ApplicationContext::new();
        ctx.try_provide(|| -> Result<Store, String> { Err("disk full".to_string()) }, ())
            .unwrap();
        let err = ctx.refresh().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstructionFailed);
        assert!(err.to_string().contains("disk full"));

        let mut ctx = ApplicationContext::new();
        ctx.provide(|| -> Store { panic!("boom") }, ()).unwrap();
        let err = ctx.refresh().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstructionFailed);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_failed_refresh_destroys_initialized_beans() {
        let events = log();
        let mut ctx = ApplicationContext::new();
        let e = events.clone();
        ctx.object(Store)
            .unwrap()
            .destroy(move |_: &Store| -> Result<(), DependencyError> {
                push(&e, "store destroyed");
                Ok(())
            });
        ctx.try_provide(
            |_: Arc<Store>| -> Result<Cache, &'static str> { Err("no cache") },
            (autowire::<Arc<Store>>(""),),
        )
        .unwrap();

        assert!(ctx.refresh().is_err());
        assert_eq!(*events.lock(), vec!["store destroyed"]);
    }

    struct Greeting {
        text: String,
    }

    impl Store {
        fn greeting(&self, who: String) -> Greeting {
            Greeting {
                text: format!("hello {who}"),
            }
        }
    }

    #[test]
    fn test_method_constructor() {
        let mut ctx = ApplicationContext::new();
        ctx.property("greeting.who", "world").unwrap();
        ctx.object(Store).unwrap().name("store");
        ctx.method::<Store, _, _>("store", Store::greeting, (value::<String>("${greeting.who}"),))
            .unwrap();

        ctx.refresh().unwrap();
        let greeting: Arc<Greeting> = ctx.get_by_type().unwrap();
        assert_eq!(greeting.text, "hello world");
        let info = ctx.find(&Selector::of::<Greeting>());
        assert_eq!(info[0].directives[0].target, "receiver");
    }

    #[tokio::test]
    async fn test_shutdown_runs_destroyers_once_in_reverse() {
        let events = log();
        let mut ctx = ApplicationContext::new();
        let e = events.clone();
        ctx.object(Store).unwrap().destroy(move |_: &Store| -> Result<(), DependencyError> {
            push(&e, "store");
            Ok(())
        });
        let e = events.clone();
        ctx.provide(|store: Arc<Store>| Cache { store }, (autowire::<Arc<Store>>(""),))
            .unwrap()
            .destroy(move |_: &Cache| -> Result<(), DependencyError> {
                push(&e, "cache");
                Ok(())
            });
        ctx.refresh().unwrap();

        let report = ctx.shutdown(None).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(*events.lock(), vec!["cache", "store"]);
        assert_eq!(ctx.state(), LifecycleState::Closed);

        ctx.shutdown(None).await.unwrap();
        assert_eq!(events.lock().len(), 2);
    }

    #[test]
    fn test_global_registrants_are_applied_once() {
        let _serial = global::SERIAL.lock();
        global::register("test-store", |ctx| {
            ctx.object(Store)?.name("global-store");
            Ok(())
        });
        assert!(global::pending().contains(&"test-store"));

        let mut ctx = ApplicationContext::new();
        assert_eq!(ctx.register_globals().unwrap(), 1);
        assert_eq!(ctx.register_globals().unwrap(), 0);
        ctx.refresh().unwrap();
        assert!(ctx.get_by_name::<Store>("global-store").is_ok());
    }
}
