//! 配置文件发现与属性层装配
//!
//! 按 `spring.config.locations` 和 `spring.config.extensions` 查找
//! `application.<ext>` 和 `application-<profile>.<ext>`，
//! 再叠加环境变量和命令行两层。

use config_abstractions::{LayerKind, PropertySource};
use config_impl::{
    split_list, CommandLinePropertySource, EnvironmentPropertySource, FilePropertySource,
    PropertyStoreBuilder, PROFILES_ACTIVE_KEY,
};
use infrastructure_common::{ConfigError, InfrastructureError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 配置目录
pub const CONFIG_LOCATIONS_KEY: &str = "spring.config.locations";
/// 配置文件扩展名
pub const CONFIG_EXTENSIONS_KEY: &str = "spring.config.extensions";
/// 默认配置目录
pub const DEFAULT_CONFIG_LOCATION: &str = "config/";
/// 默认扩展名，按加载顺序
pub const DEFAULT_CONFIG_EXTENSIONS: &str = ".properties,.yaml,.yml,.toml,.tml,.json";
/// 配置文件基础名
pub const CONFIG_FILE_NAME: &str = "application";

/// 发现的配置文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSourceDescriptor {
    /// 文件路径
    pub path: PathBuf,
    /// 所属层级
    pub layer: LayerKind,
    /// profile 文件对应的 profile
    pub profile: Option<String>,
}

/// 文件发现选项
#[derive(Debug, Clone)]
pub struct ConfigSourceOptions {
    /// 配置目录，按顺序加载，后加载的覆盖先加载的
    pub locations: Vec<PathBuf>,
    /// 扩展名，带前导点
    pub extensions: Vec<String>,
    /// 激活的 profile
    pub profiles: Vec<String>,
}

impl Default for ConfigSourceOptions {
    fn default() -> Self {
        Self {
            locations: vec![PathBuf::from(DEFAULT_CONFIG_LOCATION)],
            extensions: split_list(DEFAULT_CONFIG_EXTENSIONS),
            profiles: Vec::new(),
        }
    }
}

impl ConfigSourceOptions {
    /// 查找存在的配置文件
    ///
    /// 先是每个目录下的 `application<ext>`，再是每个 profile 的 `application-<profile><ext>`。
    pub fn discover(&self) -> Vec<ConfigSourceDescriptor> {
        let mut found = Vec::new();
        for location in &self.locations {
            self.collect(location, CONFIG_FILE_NAME, LayerKind::DefaultFile, None, &mut found);
        }
        for profile in &self.profiles {
            let name = format!("{CONFIG_FILE_NAME}-{profile}");
            for location in &self.locations {
                self.collect(location, &name, LayerKind::ProfileFile, Some(profile), &mut found);
            }
        }
        found
    }

    fn collect(
        &self,
        location: &Path,
        name: &str,
        layer: LayerKind,
        profile: Option<&String>,
        found: &mut Vec<ConfigSourceDescriptor>,
    ) {
        for ext in &self.extensions {
            let ext = ext.trim_start_matches('.');
            let path = location.join(format!("{name}.{ext}"));
            if path.is_file() {
                debug!("发现配置文件: {}", path.display());
                found.push(ConfigSourceDescriptor {
                    path,
                    layer,
                    profile: profile.cloned(),
                });
            }
        }
    }
}

/// 启动阶段的属性装配
pub struct PropertyBootstrap {
    command_line: CommandLinePropertySource,
    environment: EnvironmentPropertySource,
    extra_locations: Vec<PathBuf>,
}

impl PropertyBootstrap {
    /// 从命令行参数和环境变量创建
    pub fn new(command_line: CommandLinePropertySource, environment: EnvironmentPropertySource) -> Self {
        Self {
            command_line,
            environment,
            extra_locations: Vec::new(),
        }
    }

    /// 追加配置目录
    pub fn with_locations(mut self, locations: Vec<PathBuf>) -> Self {
        self.extra_locations = locations;
        self
    }

    /// 环境变量来源
    pub fn environment(&self) -> &EnvironmentPropertySource {
        &self.environment
    }

    /// 启动阶段读取原始属性：命令行 > 环境变量 > 已有的低层属性
    pub fn lookup(&self, builder: &PropertyStoreBuilder, key: &str) -> Result<Option<String>, ConfigError> {
        if let Some(value) = self.command_line.entries().get(key) {
            return Ok(Some(value.clone()));
        }
        if let Some(value) = self.environment.load()?.remove(key) {
            return Ok(Some(value));
        }
        Ok(builder.peek(key))
    }

    /// 计算文件发现选项
    pub fn options(&self, builder: &PropertyStoreBuilder) -> Result<ConfigSourceOptions, InfrastructureError> {
        let mut options = ConfigSourceOptions::default();
        if let Some(locations) = self.lookup(builder, CONFIG_LOCATIONS_KEY)? {
            options.locations = split_list(&locations).into_iter().map(PathBuf::from).collect();
        }
        options.locations.extend(self.extra_locations.iter().cloned());
        if let Some(extensions) = self.lookup(builder, CONFIG_EXTENSIONS_KEY)? {
            options.extensions = split_list(&extensions);
        }
        if let Some(profiles) = self.lookup(builder, PROFILES_ACTIVE_KEY)? {
            options.profiles = split_list(&profiles);
        }
        Ok(options)
    }

    /// 把文件、环境变量和命令行层加入构建器，返回加载的文件
    ///
    /// profile 可以在 `application.<ext>` 中声明，所以先加载默认文件再确定 profile 文件。
    pub fn apply(&self, builder: &mut PropertyStoreBuilder) -> Result<Vec<ConfigSourceDescriptor>, InfrastructureError> {
        let mut options = self.options(builder)?;
        let requested_profiles = std::mem::take(&mut options.profiles);
        let mut loaded = options.discover();
        for descriptor in &loaded {
            builder.add_source(&FilePropertySource::new(&descriptor.path, descriptor.layer))?;
        }

        options.profiles = match self.lookup(builder, PROFILES_ACTIVE_KEY)? {
            Some(profiles) => split_list(&profiles),
            None => requested_profiles,
        };
        let profile_files: Vec<ConfigSourceDescriptor> = options
            .discover()
            .into_iter()
            .filter(|descriptor| descriptor.layer == LayerKind::ProfileFile)
            .collect();
        for descriptor in &profile_files {
            builder.add_source(&FilePropertySource::new(&descriptor.path, descriptor.layer))?;
        }
        loaded.extend(profile_files);

        builder.add_source(&self.command_line)?;
        builder.set_environment(self.environment.clone());

        info!(
            "加载配置文件 {} 个, profiles: {:?}, 命令行属性 {} 个",
            loaded.len(),
            options.profiles,
            self.command_line.entries().len()
        );
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_abstractions::PropertyResolver;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn no_env() -> EnvironmentPropertySource {
        EnvironmentPropertySource::from_vars(Vec::<(String, String)>::new()).unwrap()
    }

    #[test]
    fn test_discover_order() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "application.yaml", "a: 1");
        write(dir.path(), "application.properties", "a=0");
        write(dir.path(), "application-dev.toml", "a = 2");
        write(dir.path(), "application-prod.json", "{\"a\": 3}");
        write(dir.path(), "other.yaml", "a: 9");

        let options = ConfigSourceOptions {
            locations: vec![dir.path().to_path_buf()],
            profiles: vec!["dev".to_string()],
            ..ConfigSourceOptions::default()
        };
        let names: Vec<String> = options
            .discover()
            .iter()
            .map(|d| d.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["application.properties", "application.yaml", "application-dev.toml"]);
    }

    #[test]
    fn test_layers_and_profile_from_default_file() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "application.yaml",
            "spring:\n  profiles:\n    active: dev\nserver:\n  port: 8080\n  host: example.org\n",
        );
        write(dir.path(), "application-dev.properties", "server.port=9090\n");

        let environment = EnvironmentPropertySource::from_vars(vec![("SERVER_HOST", "env.example.org")]).unwrap();
        let command_line = CommandLinePropertySource::from_args(["--app.debug=true"]);
        let bootstrap = PropertyBootstrap::new(command_line, environment).with_locations(vec![dir.path().to_path_buf()]);

        let mut builder = PropertyStoreBuilder::new().with_property(CONFIG_LOCATIONS_KEY, "");
        let loaded = bootstrap.apply(&mut builder).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].profile.as_deref(), Some("dev"));

        let store = builder.build().unwrap();
        assert_eq!(store.get("server.port").unwrap().as_deref(), Some("9090"));
        assert_eq!(store.get("server.host").unwrap().as_deref(), Some("env.example.org"));
        assert_eq!(store.get("app.debug").unwrap().as_deref(), Some("true"));
        assert!(store.is_profile_active("dev"));
    }

    #[test]
    fn test_command_line_selects_locations_and_extensions() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "application.yaml", "a: yaml");
        write(dir.path(), "application.json", "{\"a\": \"json\"}");

        let location = format!("-Dspring.config.locations={}", dir.path().display());
        let command_line = CommandLinePropertySource::from_args([location.as_str(), "-Dspring.config.extensions=.json"]);
        let bootstrap = PropertyBootstrap::new(command_line, no_env());

        let mut builder = PropertyStoreBuilder::new();
        let loaded = bootstrap.apply(&mut builder).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(builder.build().unwrap().get("a").unwrap().as_deref(), Some("json"));
    }

    #[test]
    fn test_broken_file_is_reported() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "application.json", "{ not json");
        let bootstrap = PropertyBootstrap::new(CommandLinePropertySource::default(), no_env())
            .with_locations(vec![dir.path().to_path_buf()]);

        let err = bootstrap.apply(&mut PropertyStoreBuilder::new()).unwrap_err();
        assert!(matches!(err, InfrastructureError::ConfigError { .. }));
    }
}
