//! 容器端到端场景测试

use config_abstractions::PropertyResolver;
use di_abstractions::{BeanRegistry, Selector, TypedRegistry};
use di_impl::{autowire, value, ApplicationContext};
use infrastructure_common::{BoxError, DependencyError, ErrorKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

/// 记录构造、初始化和销毁的测试组件
struct Node {
    name: &'static str,
    log: Log,
}

impl Node {
    fn new(name: &'static str, log: &Log) -> Self {
        log.lock().push(format!("new:{name}"));
        Self { name, log: log.clone() }
    }

    fn record(&self, what: &str) {
        self.log.lock().push(format!("{}:{}", what, self.name));
    }
}

fn hooks(ctx: &mut ApplicationContext, name: &'static str, log: &Log, deps: &'static [&'static str], inits: &Arc<AtomicUsize>) {
    let log = log.clone();
    let counter = inits.clone();
    let builder = match deps {
        [] => ctx.provide(move || Node::new(name, &log), ()),
        [dep] => ctx.provide(
            move |_: Arc<Node>| Node::new(name, &log),
            (autowire::<Arc<Node>>(*dep),),
        ),
        _ => unreachable!("测试只需要单个依赖"),
    };
    builder
        .unwrap()
        .name(name)
        .init(move |node: &Node| {
            counter.fetch_add(1, Ordering::SeqCst);
            node.record("init");
            Ok::<(), BoxError>(())
        })
        .destroy(|node: &Node| {
            node.record("destroy");
            Ok::<(), BoxError>(())
        });
}

fn logged(log: &Log) -> Vec<String> {
    log.lock().clone()
}

#[tokio::test]
async fn test_linear_chain_wires_forward_and_destroys_backward() {
    let log: Log = Arc::default();
    let inits = Arc::new(AtomicUsize::new(0));
    let mut ctx = ApplicationContext::new();
    hooks(&mut ctx, "C", &log, &["B"], &inits);
    hooks(&mut ctx, "B", &log, &["A"], &inits);
    hooks(&mut ctx, "A", &log, &[], &inits);
    ctx.refresh().unwrap();

    assert_eq!(
        logged(&log),
        vec!["new:A", "init:A", "new:B", "init:B", "new:C", "init:C"]
    );
    assert_eq!(inits.load(Ordering::SeqCst), 3);

    ctx.shutdown(Some(Duration::from_secs(1))).await.unwrap();
    ctx.shutdown(Some(Duration::from_secs(1))).await.unwrap();
    let destroyed: Vec<String> = logged(&log).into_iter().filter(|e| e.starts_with("destroy")).collect();
    assert_eq!(destroyed, vec!["destroy:C", "destroy:B", "destroy:A"]);
}

#[test]
fn test_struct_binding_uses_defaults_for_empty_values() {
    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Server {
        port: u16,
        #[serde(default = "default_host")]
        host: String,
    }

    fn default_host() -> String {
        "localhost".to_string()
    }

    let mut ctx = ApplicationContext::new();
    ctx.property("server.port", "8080").unwrap();
    ctx.property("server.host", "").unwrap();
    ctx.provide(|server: Server| server, (value::<Server>("${server}"),))
        .unwrap();
    ctx.refresh().unwrap();

    let server = ctx.get_by_type::<Server>().unwrap();
    assert_eq!(
        *server,
        Server {
            port: 8080,
            host: "localhost".to_string()
        }
    );
}

#[test]
fn test_mutual_dependency_is_a_cycle() {
    let log: Log = Arc::default();
    let inits = Arc::new(AtomicUsize::new(0));
    let mut ctx = ApplicationContext::new();
    hooks(&mut ctx, "A", &log, &["B"], &inits);
    hooks(&mut ctx, "B", &log, &["A"], &inits);

    let err = ctx.refresh().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DependencyCycle);
    match err {
        DependencyError::DependencyCycle { cycle } => {
            assert!(cycle.iter().any(|n| n == "A"));
            assert!(cycle.iter().any(|n| n == "B"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(logged(&log).is_empty());
}

trait Feature: Send + Sync {
    fn label(&self) -> &'static str;
}

struct NewFeature;
struct LegacyFeature;

impl Feature for NewFeature {
    fn label(&self) -> &'static str {
        "new"
    }
}

impl Feature for LegacyFeature {
    fn label(&self) -> &'static str {
        "legacy"
    }
}

fn feature_context(feature_flag: bool, legacy_first: bool) -> ApplicationContext {
    let mut ctx = ApplicationContext::new();
    if feature_flag {
        ctx.property("feature.new", "true").unwrap();
    }
    let register_new = |ctx: &mut ApplicationContext| {
        ctx.object(NewFeature)
            .unwrap()
            .name("newFeature")
            .on_property("feature.new")
            .export::<dyn Feature>(|f| f as Arc<dyn Feature>);
    };
    let register_legacy = |ctx: &mut ApplicationContext| {
        ctx.object(LegacyFeature)
            .unwrap()
            .name("legacyFeature")
            .on_missing_bean(Selector::of::<dyn Feature>())
            .export::<dyn Feature>(|f| f as Arc<dyn Feature>);
    };
    if legacy_first {
        register_legacy(&mut ctx);
        register_new(&mut ctx);
    } else {
        register_new(&mut ctx);
        register_legacy(&mut ctx);
    }
    ctx.refresh().unwrap();
    ctx
}

fn labels(ctx: &ApplicationContext) -> Vec<&'static str> {
    ctx.collect::<dyn Feature>()
        .unwrap()
        .iter()
        .map(|f| f.label())
        .collect()
}

#[test]
fn test_conditional_providers_independent_of_registration_order() {
    for legacy_first in [false, true] {
        let with_flag = feature_context(true, legacy_first);
        assert_eq!(labels(&with_flag), vec!["new"]);
        assert_eq!(with_flag.stats().excluded, 1);

        let without_flag = feature_context(false, legacy_first);
        assert_eq!(labels(&without_flag), vec!["legacy"]);
        assert_eq!(without_flag.get_by_type::<dyn Feature>().unwrap().label(), "legacy");
    }
}

trait Handler: Send + Sync {
    fn id(&self) -> i32;
}

struct OrderedHandler(i32);

impl Handler for OrderedHandler {
    fn id(&self) -> i32 {
        self.0
    }
}

#[test]
fn test_collected_handlers_follow_order_hints() {
    let mut ctx = ApplicationContext::new();
    for (name, order) in [("h30", 30), ("h10", 10), ("h20", 20), ("h10b", 10)] {
        ctx.object(OrderedHandler(order))
            .unwrap()
            .name(name)
            .order(order)
            .export::<dyn Handler>(|h| h as Arc<dyn Handler>);
    }
    ctx.provide(
        |handlers: Vec<Arc<dyn Handler>>| handlers.iter().map(|h| h.id()).collect::<Vec<i32>>(),
        (autowire::<Vec<Arc<dyn Handler>>>(""),),
    )
    .unwrap();
    ctx.refresh().unwrap();

    assert_eq!(*ctx.get_by_type::<Vec<i32>>().unwrap(), vec![10, 10, 20, 30]);
    let named: Vec<String> = ctx
        .collect_named::<dyn Handler>()
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(named, vec!["h10", "h10b", "h20", "h30"]);
}

trait Metrics: Send + Sync {}

#[derive(Default)]
struct Reporter {
    metrics: Option<Arc<dyn Metrics>>,
    labels: Vec<Arc<dyn Feature>>,
}

#[test]
fn test_missing_optional_leaves_zero_value() {
    let mut ctx = ApplicationContext::new();
    ctx.object(Reporter::default())
        .unwrap()
        .field(
            "metrics",
            autowire::<Option<Arc<dyn Metrics>>>("metrics?"),
            |reporter: &mut Reporter, metrics| reporter.metrics = metrics,
        )
        .field(
            "labels",
            autowire::<Vec<Arc<dyn Feature>>>("*?"),
            |reporter: &mut Reporter, labels| reporter.labels = labels,
        );
    ctx.refresh().unwrap();

    let reporter = ctx.get_by_type::<Reporter>().unwrap();
    assert!(reporter.metrics.is_none());
    assert!(reporter.labels.is_empty());
}

#[test]
fn test_primary_must_be_unique() {
    let mut ctx = ApplicationContext::new();
    ctx.object(NewFeature)
        .unwrap()
        .primary()
        .export::<dyn Feature>(|f| f as Arc<dyn Feature>);
    ctx.object(LegacyFeature)
        .unwrap()
        .primary()
        .export::<dyn Feature>(|f| f as Arc<dyn Feature>);
    ctx.refresh().unwrap();

    let err = ctx.get_by_type::<dyn Feature>().err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Ambiguous);
    assert_eq!(ctx.collect::<dyn Feature>().unwrap().len(), 2);
}

#[test]
fn test_property_references_expand_and_detect_cycles() {
    let mut ctx = ApplicationContext::new();
    ctx.property("a", "${b}").unwrap();
    ctx.property("b", "x").unwrap();
    ctx.provide(|a: String| a, (value::<String>("${a}"),)).unwrap();
    ctx.refresh().unwrap();
    assert_eq!(*ctx.get_by_type::<String>().unwrap(), "x");
    assert_eq!(ctx.properties().resolve("${a}-${b}").unwrap(), "x-x");

    let mut ctx = ApplicationContext::new();
    ctx.property("a", "${a}").unwrap();
    ctx.provide(|a: String| a, (value::<String>("${a}"),)).unwrap();
    assert_eq!(ctx.refresh().unwrap_err().kind(), ErrorKind::CyclicReference);
}

#[tokio::test]
async fn test_shutdown_cancels_every_task_within_grace() {
    struct Workers;

    let observed = Arc::new(AtomicUsize::new(0));
    let mut ctx = ApplicationContext::new();
    let counter = observed.clone();
    ctx.object(Workers)
        .unwrap()
        .init_with_context(move |_: &Workers, app: &infrastructure_common::AppContext| {
            for index in 0..4 {
                let counter = counter.clone();
                app.go(&format!("worker-{index}"), move |token| async move {
                    token.cancelled().await;
                    counter.fetch_add(1, Ordering::SeqCst);
                })?;
            }
            Ok::<(), BoxError>(())
        });
    ctx.refresh().unwrap();
    assert_eq!(ctx.app_context().task_count(), 4);

    let report = ctx.shutdown(Some(Duration::from_secs(2))).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(observed.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_stuck_task_is_reported_as_abandoned() {
    struct Stubborn;

    let mut ctx = ApplicationContext::new();
    ctx.object(Stubborn)
        .unwrap()
        .init_with_context(|_: &Stubborn, app: &infrastructure_common::AppContext| {
            app.go("stubborn", |_token| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
            })
            .map(|_| ())
        });
    ctx.refresh().unwrap();

    let report = ctx.shutdown(Some(Duration::from_millis(50))).await.unwrap();
    assert_eq!(report.abandoned, 1);
    assert!(!report.is_clean());
}

#[tokio::test]
async fn test_failed_refresh_cancels_started_tasks() {
    struct Listener;
    struct Broken;

    let observed = Arc::new(AtomicUsize::new(0));
    let mut ctx = ApplicationContext::new();
    let counter = observed.clone();
    ctx.object(Listener)
        .unwrap()
        .init_with_context(move |_: &Listener, app: &infrastructure_common::AppContext| {
            let counter = counter.clone();
            app.go("listener", move |token| async move {
                token.cancelled().await;
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .map(|_| ())
        });
    ctx.try_provide(
        |_: Arc<Listener>| -> Result<Broken, &'static str> { Err("boom") },
        (autowire::<Arc<Listener>>(""),),
    )
    .unwrap();

    let err = ctx.refresh().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstructionFailed);
    assert!(ctx.app_context().is_cancelled());
    assert!(ctx.app_context().go("late", |_token| async {}).is_err());

    let report = ctx.shutdown(Some(Duration::from_millis(200))).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(observed.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.app_context().task_count(), 0);
}

#[test]
fn test_same_name_on_different_types_is_rejected() {
    struct Alpha;
    struct Beta;

    let mut ctx = ApplicationContext::new();
    ctx.object(Alpha).unwrap().name("cache");
    ctx.object(Beta).unwrap().name("cache");

    let err = ctx.refresh().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Ambiguous);
    assert!(matches!(
        &err,
        DependencyError::DuplicateName { name, beans } if name == "cache" && beans.len() == 2
    ));
}
