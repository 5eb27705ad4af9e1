//! # 示例应用程序
//!
//! 演示如何使用 Lorn Spring 容器：属性绑定、按类型注入、集合注入、
//! 条件装配、runner、启动/停止事件和后台任务。
//!
//! ```text
//! cargo run -p example-app -- --profile dev -D app.heartbeat=1s
//! ```

use async_trait::async_trait;
use clap::Parser;
use di_impl::{autowire, context, value, ApplicationContext};
use infrastructure_common::{AppContext, AppEvent, AppRunner, BoxError};
use infrastructure_composition::{Application, ExitStatus, LoggingConfig, ShutdownHandle, SHUTDOWN_HANDLE_BEAN};
use parking_lot::Mutex;
use serde::Deserialize;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "example-app")]
#[command(about = "Lorn Spring 示例应用")]
struct Args {
    /// 配置文件目录
    #[arg(short, long, default_value = "example-app/config")]
    config_dir: String,

    /// 激活的 profile，多个用逗号分隔
    #[arg(short, long)]
    profile: Option<String>,

    /// 属性定义 key=value，优先级最高
    #[arg(short = 'D', value_name = "KEY=VALUE")]
    define: Vec<String>,

    /// 日志级别
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    /// runner 执行完毕后直接退出
    #[arg(long)]
    once: bool,
}

impl Args {
    /// 转换成应用识别的属性参数
    fn property_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self.define.iter().map(|d| format!("-D{d}")).collect();
        if let Some(profile) = &self.profile {
            args.push(format!("-Dspring.profiles.active={profile}"));
        }
        args
    }
}

/// 问候配置，绑定 `app.greeting`
#[derive(Debug, Clone, Deserialize)]
struct GreetingConfig {
    prefix: String,
    #[serde(default)]
    shout: bool,
}

/// 订单存储
trait OrderStore: Send + Sync {
    fn add(&self, item: &str);
    fn all(&self) -> Vec<String>;
}

/// 内存中的订单存储
#[derive(Default)]
struct MemoryOrderStore {
    orders: Mutex<Vec<String>>,
}

impl OrderStore for MemoryOrderStore {
    fn add(&self, item: &str) {
        self.orders.lock().push(item.to_string());
    }

    fn all(&self) -> Vec<String> {
        self.orders.lock().clone()
    }
}

/// 通知渠道
trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;
    fn notify(&self, message: &str);
}

struct LogNotifier;

impl Notifier for LogNotifier {
    fn channel(&self) -> &'static str {
        "log"
    }

    fn notify(&self, message: &str) {
        info!("[log] {}", message);
    }
}

/// 只有配置了 `app.mail.host` 时才装配
struct MailNotifier {
    host: String,
}

impl Notifier for MailNotifier {
    fn channel(&self) -> &'static str {
        "mail"
    }

    fn notify(&self, message: &str) {
        info!("[mail {}] {}", self.host, message);
    }
}

/// 问候服务
struct Greeter {
    config: GreetingConfig,
    store: Arc<dyn OrderStore>,
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl Greeter {
    fn greet(&self, customer: &str) -> String {
        let text = format!("{} {}, 共 {} 个订单", self.config.prefix, customer, self.store.all().len());
        if self.config.shout {
            text.to_uppercase() + "!"
        } else {
            text
        }
    }

    fn announce(&self, customer: &str) {
        let message = self.greet(customer);
        for notifier in &self.notifiers {
            notifier.notify(&message);
        }
    }
}

/// 启动后写入初始订单并问候
struct SeedRunner {
    orders: Vec<String>,
    store: Arc<dyn OrderStore>,
    greeter: Arc<Greeter>,
    handle: Arc<ShutdownHandle>,
    once: bool,
}

#[async_trait]
impl AppRunner for SeedRunner {
    async fn run(&self, _ctx: &AppContext) -> Result<(), BoxError> {
        for order in &self.orders {
            self.store.add(order);
        }
        self.greeter.announce("访客");
        if self.once {
            self.handle.shut_down();
        }
        Ok(())
    }
}

/// 心跳，在启动事件中开启后台任务
struct Heartbeat {
    interval: Duration,
    store: Arc<dyn OrderStore>,
}

#[async_trait]
impl AppEvent for Heartbeat {
    async fn on_start(&self, ctx: &AppContext) -> Result<(), BoxError> {
        let interval = self.interval;
        let store = self.store.clone();
        ctx.go("heartbeat", move |token| async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => info!("心跳: 当前订单 {} 个", store.all().len()),
                }
            }
        })?;
        Ok(())
    }

    async fn on_stop(&self, _ctx: &AppContext) -> Result<(), BoxError> {
        info!("心跳停止");
        Ok(())
    }
}

/// 注册示例组件
fn register(ctx: &mut ApplicationContext, once: bool) -> anyhow::Result<()> {
    ctx.object(MemoryOrderStore::default())?
        .name("orderStore")
        .export::<dyn OrderStore>(|store| store as Arc<dyn OrderStore>)
        .destroy(|store: &MemoryOrderStore| {
            info!("订单存储关闭，共 {} 个订单", store.all().len());
            Ok::<(), BoxError>(())
        });

    ctx.object(LogNotifier)?
        .name("logNotifier")
        .order(1)
        .export::<dyn Notifier>(|n| n as Arc<dyn Notifier>);

    ctx.provide(|host: String| MailNotifier { host }, (value::<String>("${app.mail.host}"),))?
        .name("mailNotifier")
        .order(2)
        .on_property("app.mail.host")
        .export::<dyn Notifier>(|n| n as Arc<dyn Notifier>);

    ctx.provide(
        |config: GreetingConfig, store: Arc<dyn OrderStore>, notifiers: Vec<Arc<dyn Notifier>>| Greeter {
            config,
            store,
            notifiers,
        },
        (
            value::<GreetingConfig>("${app.greeting}"),
            autowire::<Arc<dyn OrderStore>>(""),
            autowire::<Vec<Arc<dyn Notifier>>>(""),
        ),
    )?
    .name("greeter")
    .init(|greeter: &Greeter| {
        let channels: Vec<&str> = greeter.notifiers.iter().map(|n| n.channel()).collect();
        info!("问候服务就绪，通知渠道: {:?}", channels);
        Ok::<(), BoxError>(())
    });

    ctx.provide(
        move |orders: Vec<String>, store: Arc<dyn OrderStore>, greeter: Arc<Greeter>, handle: Arc<ShutdownHandle>| {
            SeedRunner {
                orders,
                store,
                greeter,
                handle,
                once,
            }
        },
        (
            value::<Vec<String>>("${app.orders:=}"),
            autowire::<Arc<dyn OrderStore>>(""),
            autowire::<Arc<Greeter>>(""),
            autowire::<Arc<ShutdownHandle>>(SHUTDOWN_HANDLE_BEAN),
        ),
    )?
    .name("seedRunner")
    .export_runner();

    ctx.provide(
        |interval: Duration, store: Arc<dyn OrderStore>, _app: AppContext| Heartbeat { interval, store },
        (
            value::<Duration>("${app.heartbeat:=1s}"),
            autowire::<Arc<dyn OrderStore>>(""),
            context(),
        ),
    )?
    .name("heartbeat")
    .export_event();

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let built = Application::builder()
        .with_args(args.property_args())
        .add_config_location(&args.config_dir)
        .with_logging(LoggingConfig::default().with_level(args.log_level))
        .with_shutdown_grace(Some(Duration::from_secs(5)))
        .build();
    let mut app = match built {
        Ok(app) => app,
        Err(e) => {
            eprintln!("应用构建失败: {e}");
            return ExitStatus::StartupFailed.into();
        }
    };

    if let Err(e) = register(app.context_mut(), args.once) {
        error!("组件注册失败: {:#}", e);
        return ExitStatus::StartupFailed.into();
    }

    let result = app.run().await;
    let status = ExitStatus::of(&result);
    if let Err(e) = result {
        error!("应用退出: {}", e);
    }
    status.into()
}
