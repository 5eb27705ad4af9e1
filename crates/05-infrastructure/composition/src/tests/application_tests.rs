//! 应用启动、运行和关闭流程测试

use crate::{Application, ExitStatus, RunMode, ShutdownHandle, CONFIG_LOCATIONS_KEY, PID_FILE_KEY, SHUTDOWN_HANDLE_BEAN};
use async_trait::async_trait;
use di_abstractions::TypedRegistry;
use di_impl::{autowire, value};
use infrastructure_common::{AppContext, AppEvent, AppRunner, BoxError, InfrastructureError};
use parking_lot::Mutex;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

type Log = Arc<Mutex<Vec<String>>>;

struct Step {
    name: &'static str,
    log: Log,
}

impl Step {
    fn new(name: &'static str, log: &Log) -> Self {
        Self { name, log: log.clone() }
    }

    fn record(&self, what: &str) {
        self.log.lock().push(format!("{}:{}", what, self.name));
    }
}

#[async_trait]
impl AppRunner for Step {
    async fn run(&self, _ctx: &AppContext) -> Result<(), BoxError> {
        self.record("runner");
        Ok(())
    }
}

#[async_trait]
impl AppEvent for Step {
    async fn on_start(&self, _ctx: &AppContext) -> Result<(), BoxError> {
        self.record("start");
        Ok(())
    }

    async fn on_stop(&self, _ctx: &AppContext) -> Result<(), BoxError> {
        self.record("stop");
        Ok(())
    }
}

struct FailingRunner;

#[async_trait]
impl AppRunner for FailingRunner {
    async fn run(&self, _ctx: &AppContext) -> Result<(), BoxError> {
        Err("数据库不可用".into())
    }
}

struct PanickingRunner;

#[async_trait]
impl AppRunner for PanickingRunner {
    async fn run(&self, _ctx: &AppContext) -> Result<(), BoxError> {
        panic!("runner 崩溃");
    }
}

struct StopRunner {
    handle: Arc<ShutdownHandle>,
}

#[async_trait]
impl AppRunner for StopRunner {
    async fn run(&self, _ctx: &AppContext) -> Result<(), BoxError> {
        self.handle.shut_down();
        Ok(())
    }
}

fn app_in(dir: &Path) -> Application {
    Application::builder()
        .with_env_vars(Vec::<(String, String)>::new())
        .with_property("spring.banner.visible", "false")
        .with_property(CONFIG_LOCATIONS_KEY, "")
        .add_config_location(dir)
        .wait_for_shutdown(false)
        .handle_signals(false)
        .with_shutdown_grace(Some(Duration::from_secs(5)))
        .build()
        .unwrap()
}

fn logged(log: &Log) -> Vec<String> {
    log.lock().clone()
}

#[tokio::test]
async fn test_start_loads_config_files_and_profiles() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("application.yaml"),
        "spring:\n  profiles:\n    active: dev\ngreeting: hello from yaml\n",
    )
    .unwrap();
    fs::write(dir.path().join("application-dev.properties"), "greeting=hello from dev\n").unwrap();

    let mut app = app_in(dir.path());
    app.context_mut()
        .provide(|greeting: String| greeting, (value::<String>("${greeting}"),))
        .unwrap();
    app.start().unwrap();

    assert_eq!(app.config_files().len(), 2);
    assert_eq!(*app.context().get_by_type::<String>().unwrap(), "hello from dev");
    let handle = app.context().get_by_name::<ShutdownHandle>(SHUTDOWN_HANDLE_BEAN).unwrap();
    assert!(!handle.is_requested());
    app.context().close().await.unwrap();
}

#[tokio::test]
async fn test_run_executes_runners_then_events_and_stops_in_reverse() {
    let dir = TempDir::new().unwrap();
    let log: Log = Arc::default();
    let mut app = app_in(dir.path());
    let ctx = app.context_mut();

    ctx.object(Step::new("second", &log)).unwrap().name("second").order(2).export_runner();
    ctx.object(Step::new("first", &log)).unwrap().name("first").order(1).export_runner();
    ctx.object(Step::new("a", &log))
        .unwrap()
        .name("a")
        .export_event()
        .destroy(|step: &Step| {
            step.record("destroy");
            Ok::<(), BoxError>(())
        });
    ctx.object(Step::new("b", &log)).unwrap().name("b").export_event();

    let result = app.run().await;
    assert_eq!(ExitStatus::of(&result), ExitStatus::Success);
    assert_eq!(
        logged(&log),
        vec!["runner:first", "runner:second", "start:a", "start:b", "stop:b", "stop:a", "destroy:a"]
    );
}

#[tokio::test]
async fn test_runner_error_skips_events_and_still_destroys() {
    let dir = TempDir::new().unwrap();
    let log: Log = Arc::default();
    let mut app = app_in(dir.path());
    let ctx = app.context_mut();

    ctx.object(FailingRunner).unwrap().name("failing").export_runner();
    ctx.object(Step::new("a", &log))
        .unwrap()
        .name("a")
        .export_event()
        .destroy(|step: &Step| {
            step.record("destroy");
            Ok::<(), BoxError>(())
        });

    let result = app.run().await;
    let status = ExitStatus::of(&result);
    assert_eq!(status, ExitStatus::RunnerFailed);
    assert_eq!(status.code(), 2);
    assert!(result.unwrap_err().to_string().contains("数据库不可用"));
    assert_eq!(logged(&log), vec!["destroy:a"]);
}

#[tokio::test]
async fn test_runner_panic_is_reported() {
    let dir = TempDir::new().unwrap();
    let mut app = app_in(dir.path());
    app.context_mut().object(PanickingRunner).unwrap().name("panicking").export_runner();

    let result = app.run().await;
    assert_eq!(ExitStatus::of(&result), ExitStatus::RunnerFailed);
    assert!(result.unwrap_err().to_string().contains("runner 崩溃"));
}

#[tokio::test]
async fn test_wiring_failure_is_startup_failure() {
    struct Orphan;
    let dir = TempDir::new().unwrap();
    let mut app = app_in(dir.path());
    app.context_mut()
        .provide(|_: Arc<Step>| Orphan, (autowire::<Arc<Step>>("missing"),))
        .unwrap();

    let result = app.run().await;
    assert!(matches!(result, Err(InfrastructureError::DependencyError { .. })));
    assert_eq!(ExitStatus::of(&result).code(), 1);
}

#[tokio::test]
async fn test_destroy_failure_is_shutdown_failure() {
    let dir = TempDir::new().unwrap();
    let mut app = app_in(dir.path());
    app.context_mut()
        .object(String::from("pool"))
        .unwrap()
        .destroy(|_: &String| Err::<(), _>("连接池关闭失败"));

    let result = app.run().await;
    assert_eq!(ExitStatus::of(&result), ExitStatus::ShutdownFailed);
    assert_eq!(ExitStatus::of(&result).code(), 3);
}

#[tokio::test]
async fn test_shutdown_handle_releases_waiting_application() {
    let dir = TempDir::new().unwrap();
    let mut app = Application::builder()
        .with_env_vars(Vec::<(String, String)>::new())
        .with_property("spring.banner.visible", "false")
        .with_property(CONFIG_LOCATIONS_KEY, "")
        .add_config_location(dir.path())
        .handle_signals(false)
        .build()
        .unwrap();
    app.context_mut()
        .provide(
            |handle: Arc<ShutdownHandle>| StopRunner { handle },
            (autowire::<Arc<ShutdownHandle>>(SHUTDOWN_HANDLE_BEAN),),
        )
        .unwrap()
        .export_runner();
    let handle = app.shutdown_handle();

    let result = tokio::time::timeout(Duration::from_secs(5), app.run())
        .await
        .expect("应用应在关闭请求后退出");
    assert!(result.is_ok());
    assert!(handle.is_requested());
}

#[tokio::test]
async fn test_pid_file_lives_for_the_run() {
    struct PidWatcher {
        path: String,
        seen: Log,
    }

    #[async_trait]
    impl AppRunner for PidWatcher {
        async fn run(&self, _ctx: &AppContext) -> Result<(), BoxError> {
            let content = fs::read_to_string(&self.path)?;
            self.seen.lock().push(content);
            Ok(())
        }
    }

    let dir = TempDir::new().unwrap();
    let pid_path = dir.path().join("app.pid").display().to_string();
    let seen: Log = Arc::default();
    let mut app = Application::builder()
        .with_env_vars(Vec::<(String, String)>::new())
        .with_property("spring.banner.visible", "false")
        .with_property(CONFIG_LOCATIONS_KEY, "")
        .with_property(PID_FILE_KEY, pid_path.clone())
        .wait_for_shutdown(false)
        .handle_signals(false)
        .build()
        .unwrap();
    app.context_mut()
        .object(PidWatcher {
            path: pid_path.clone(),
            seen: seen.clone(),
        })
        .unwrap()
        .export_runner();

    app.run().await.unwrap();
    assert_eq!(logged(&seen), vec![std::process::id().to_string()]);
    assert!(!Path::new(&pid_path).exists());
}

#[test]
fn test_run_mode_from_environment() {
    let app = Application::builder()
        .with_env_vars(vec![("GS_REPLAY_MODE", "1")])
        .build()
        .unwrap();
    assert_eq!(app.run_mode(), RunMode::Replay);
    assert_eq!(app.run_mode().to_string(), "replay");

    let app = Application::builder()
        .with_env_vars(vec![("GS_RECORD_MODE", "true"), ("GS_REPLAY_MODE", "true")])
        .build()
        .unwrap();
    assert_eq!(app.run_mode(), RunMode::Record);
}
