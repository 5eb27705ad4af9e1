//! 应用启动与关闭
//!
//! 启动流程：装配属性层 -> 横幅 -> pid 文件 -> 刷新容器 -> runner -> 启动事件，
//! 然后等待关闭信号，再依次执行停止事件和容器关闭。

use crate::banner::{self, BANNER_VISIBLE_KEY};
use crate::builder::{ApplicationBuilder, ApplicationSettings};
use crate::config_sources::{ConfigSourceDescriptor, PropertyBootstrap};
use config_impl::{CommandLinePropertySource, EnvironmentPropertySource, GS_RECORD_MODE, GS_REPLAY_MODE};
use di_impl::ApplicationContext;
use futures::FutureExt;
use infrastructure_common::{AppEvent, InfrastructureError, LifecycleError};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 应用名
pub const APPLICATION_NAME_KEY: &str = "spring.application.name";
/// 默认应用名
pub const DEFAULT_APPLICATION_NAME: &str = "application";
/// pid 文件路径
pub const PID_FILE_KEY: &str = "spring.pid.file";
/// 关闭句柄在容器中的组件名
pub const SHUTDOWN_HANDLE_BEAN: &str = "shutdownHandle";

/// 运行模式，由 `GS_RECORD_MODE` / `GS_REPLAY_MODE` 选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// 正常运行
    #[default]
    Normal,
    /// 录制
    Record,
    /// 回放
    Replay,
}

impl RunMode {
    /// 从环境变量判断
    pub fn detect(environment: &EnvironmentPropertySource) -> Self {
        let enabled = |name: &str| environment.var(name).is_some_and(|v| !v.trim().is_empty());
        if enabled(GS_RECORD_MODE) {
            Self::Record
        } else if enabled(GS_REPLAY_MODE) {
            Self::Replay
        } else {
            Self::Normal
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::Record => "record",
            Self::Replay => "replay",
        };
        f.write_str(name)
    }
}

/// 进程退出状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// 正常关闭
    Success,
    /// 配置或装配失败
    StartupFailed,
    /// runner 或启动事件失败
    RunnerFailed,
    /// 停止事件或销毁回调失败
    ShutdownFailed,
}

impl ExitStatus {
    /// 进程退出码
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::StartupFailed => 1,
            Self::RunnerFailed => 2,
            Self::ShutdownFailed => 3,
        }
    }

    /// 由运行结果计算
    pub fn of(result: &Result<(), InfrastructureError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(InfrastructureError::LifecycleError { source }) if is_runner_failure(source) => Self::RunnerFailed,
            Err(InfrastructureError::LifecycleError { .. }) => Self::ShutdownFailed,
            Err(_) => Self::StartupFailed,
        }
    }
}

fn is_runner_failure(error: &LifecycleError) -> bool {
    match error {
        LifecycleError::RunnerFailed { .. } => true,
        LifecycleError::Multiple { errors } => errors.first().is_some_and(is_runner_failure),
        _ => false,
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        Self::from(status.code())
    }
}

/// 关闭句柄，可以在任意位置请求应用关闭
///
/// 应用启动时以 `shutdownHandle` 为名注册到容器中。
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    /// 请求关闭
    pub fn shut_down(&self) {
        if !self.token.is_cancelled() {
            info!("收到关闭请求");
        }
        self.token.cancel();
    }

    /// 是否已请求关闭
    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待关闭请求
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

/// 应用
pub struct Application {
    context: ApplicationContext,
    bootstrap: PropertyBootstrap,
    run_mode: RunMode,
    handle: ShutdownHandle,
    wait_for_shutdown: bool,
    handle_signals: bool,
    config_files: Vec<ConfigSourceDescriptor>,
}

impl Application {
    /// 创建应用构建器
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub(crate) fn new(settings: ApplicationSettings) -> Result<Self, InfrastructureError> {
        let environment = match settings.env_vars {
            Some(vars) => EnvironmentPropertySource::from_vars(vars)?,
            None => EnvironmentPropertySource::from_process()?,
        };
        let run_mode = RunMode::detect(&environment);
        let command_line = CommandLinePropertySource::from_args(&settings.args);
        let bootstrap = PropertyBootstrap::new(command_line, environment).with_locations(settings.config_locations);

        let mut context = ApplicationContext::with_config(settings.container_config);
        context.register_globals()?;
        for (key, value) in settings.properties {
            context.property(key, value)?;
        }

        let handle = ShutdownHandle::default();
        context.object(handle.clone())?.name(SHUTDOWN_HANDLE_BEAN);

        Ok(Self {
            context,
            bootstrap,
            run_mode,
            handle,
            wait_for_shutdown: settings.wait_for_shutdown,
            handle_signals: settings.handle_signals,
            config_files: Vec::new(),
        })
    }

    /// 容器
    pub fn context(&self) -> &ApplicationContext {
        &self.context
    }

    /// 可注册组件的容器
    pub fn context_mut(&mut self) -> &mut ApplicationContext {
        &mut self.context
    }

    /// 运行模式
    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    /// 关闭句柄
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// 已加载的配置文件
    pub fn config_files(&self) -> &[ConfigSourceDescriptor] {
        &self.config_files
    }

    /// 启动阶段读取属性
    fn lookup(&mut self, key: &str) -> Result<Option<String>, InfrastructureError> {
        let builder = self.context.properties_mut()?;
        Ok(self.bootstrap.lookup(builder, key)?)
    }

    /// 装配属性层并刷新容器，不执行 runner
    pub fn start(&mut self) -> Result<(), InfrastructureError> {
        let files = self.bootstrap.apply(self.context.properties_mut()?)?;
        self.config_files = files;
        self.context.register_globals()?;
        self.context.refresh()?;
        Ok(())
    }

    /// 运行应用直到关闭
    pub async fn run(mut self) -> Result<(), InfrastructureError> {
        let started = Instant::now();
        let files = self.bootstrap.apply(self.context.properties_mut()?)?;
        self.config_files = files;

        let name = self
            .lookup(APPLICATION_NAME_KEY)?
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_APPLICATION_NAME.to_string());
        if self.lookup(BANNER_VISIBLE_KEY)?.map_or(true, |v| v.trim() != "false") {
            println!("{}", banner::render(&name));
        }
        info!("启动应用: {}, 运行模式: {}", name, self.run_mode);

        let pid_file = match self.lookup(PID_FILE_KEY)? {
            Some(path) if !path.trim().is_empty() => Some(PidFile::create(path.trim())?),
            _ => None,
        };

        let result = self.run_refreshed(&name, started).await;
        if let Some(pid_file) = pid_file {
            pid_file.remove();
        }
        match &result {
            Ok(()) => info!("应用已退出: {}", name),
            Err(e) => error!("应用异常退出: {}, 原因: {}", name, e),
        }
        result
    }

    async fn run_refreshed(&mut self, name: &str, started: Instant) -> Result<(), InfrastructureError> {
        self.context.register_globals()?;
        if let Err(error) = self.context.refresh() {
            match self.context.close().await {
                Ok(report) if !report.is_clean() => warn!("{} 个后台任务未在宽限期内退出", report.abandoned),
                Ok(_) => {}
                Err(e) => warn!("刷新失败后关闭容器出错: {}", e),
            }
            return Err(error.into());
        }
        info!("应用 {} 启动完成，耗时 {}ms", name, started.elapsed().as_millis());

        let app = self.context.app_context();
        let mut started_events: Vec<(String, Arc<dyn AppEvent>)> = Vec::new();
        let startup = self.run_startup(&mut started_events).await;

        if startup.is_ok() && self.wait_for_shutdown {
            self.wait_for_signal().await;
        }

        let mut errors = Vec::new();
        if let Err(e) = startup {
            errors.push(e);
        }
        for (bean, event) in started_events.iter().rev() {
            debug!("停止事件: {}", bean);
            if let Err(e) = event.on_stop(&app).await {
                warn!("停止事件失败: {}, 原因: {}", bean, e);
                errors.push(LifecycleError::EventFailed {
                    bean: bean.clone(),
                    message: e.to_string(),
                });
            }
        }

        match self.context.close().await {
            Ok(report) if !report.is_clean() => warn!("{} 个后台任务未在宽限期内退出", report.abandoned),
            Ok(_) => {}
            Err(e) => errors.push(e),
        }

        match LifecycleError::combine(errors) {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    /// 依次执行 runner 和启动事件，失败时立即停止
    async fn run_startup(&self, started_events: &mut Vec<(String, Arc<dyn AppEvent>)>) -> Result<(), LifecycleError> {
        let app = self.context.app_context();
        let failed = |runner: &str, message: String| LifecycleError::RunnerFailed {
            runner: runner.to_string(),
            message,
        };

        let runners = self.context.runners().map_err(|e| failed("runners", e.to_string()))?;
        for (name, runner) in runners {
            info!("执行 runner: {}", name);
            match AssertUnwindSafe(runner.run(&app)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(failed(name.as_str(), e.to_string())),
                Err(payload) => return Err(failed(name.as_str(), format!("panic: {}", panic_message(payload.as_ref())))),
            }
        }

        let events = self.context.events().map_err(|e| failed("events", e.to_string()))?;
        for (name, event) in events {
            debug!("启动事件: {}", name);
            match AssertUnwindSafe(event.on_start(&app)).catch_unwind().await {
                Ok(Ok(())) => started_events.push((name, event)),
                Ok(Err(e)) => return Err(failed(name.as_str(), e.to_string())),
                Err(payload) => return Err(failed(name.as_str(), format!("panic: {}", panic_message(payload.as_ref())))),
            }
        }
        Ok(())
    }

    async fn wait_for_signal(&self) {
        info!("应用运行中，等待关闭信号");
        if !self.handle_signals {
            self.handle.wait().await;
            return;
        }
        tokio::select! {
            () = self.handle.wait() => {}
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => info!("收到 Ctrl-C，开始关闭"),
                Err(e) => {
                    warn!("无法监听 Ctrl-C: {}", e);
                    self.handle.wait().await;
                }
            },
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 启动时写入、退出时删除的 pid 文件
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn create(path: impl AsRef<Path>) -> Result<Self, InfrastructureError> {
        let path = path.as_ref().to_path_buf();
        std::fs::write(&path, std::process::id().to_string()).map_err(|e| InfrastructureError::BootstrapFailed {
            message: format!("写入 pid 文件失败: {}, 原因: {}", path.display(), e),
        })?;
        debug!("写入 pid 文件: {}", path.display());
        Ok(Self { path })
    }

    fn remove(self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("删除 pid 文件失败: {}, 原因: {}", self.path.display(), e);
        }
    }
}
