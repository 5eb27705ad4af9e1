//! 属性来源实现
//!
//! - [`FilePropertySource`] - `.properties`、YAML、TOML、JSON 配置文件
//! - [`EnvironmentPropertySource`] - 操作系统环境变量
//! - [`CommandLinePropertySource`] - `-Dkey=value` / `--key=value` 命令行参数

use config_abstractions::{LayerKind, PropertySource};
use infrastructure_common::{BoxError, ConfigError, ConfigResult};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 环境变量前缀，`GS_FOO_BAR` 映射为 `foo.bar`
pub const ENV_PREFIX: &str = "GS_";

/// 需要原样导入的环境变量正则，逗号分隔
pub const INCLUDE_ENV_PATTERNS: &str = "INCLUDE_ENV_PATTERNS";

/// 不导入的环境变量正则，逗号分隔
pub const EXCLUDE_ENV_PATTERNS: &str = "EXCLUDE_ENV_PATTERNS";

/// 录制模式开关
pub const GS_RECORD_MODE: &str = "GS_RECORD_MODE";

/// 回放模式开关
pub const GS_REPLAY_MODE: &str = "GS_REPLAY_MODE";

/// 永远不会作为属性导入的环境变量
pub const RESERVED_ENV_NAMES: [&str; 4] = [
    GS_RECORD_MODE,
    GS_REPLAY_MODE,
    INCLUDE_ENV_PATTERNS,
    EXCLUDE_ENV_PATTERNS,
];

/// 支持的配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Properties,
    Yaml,
    Toml,
    Json,
}

impl FileFormat {
    /// 按文件后缀判断格式
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "properties" => Some(Self::Properties),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" | "tml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// 配置文件属性来源
#[derive(Debug, Clone)]
pub struct FilePropertySource {
    path: PathBuf,
    name: String,
    layer: LayerKind,
}

impl FilePropertySource {
    /// 创建新的文件属性来源
    pub fn new<P: AsRef<Path>>(path: P, layer: LayerKind) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: path.display().to_string(),
            path,
            layer,
        }
    }

    /// 文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 解析文件内容
    pub fn parse(&self, content: &str) -> ConfigResult<BTreeMap<String, String>> {
        let format = FileFormat::from_path(&self.path).ok_or_else(|| {
            ConfigError::UnsupportedFormat {
                path: self.name.clone(),
            }
        })?;
        let parse_error = |source: BoxError| ConfigError::ParseError {
            path: self.name.clone(),
            source,
        };

        let tree = match format {
            FileFormat::Properties => return parse_properties(content),
            FileFormat::Yaml => {
                serde_yaml::from_str::<Value>(content).map_err(|e| parse_error(Box::new(e)))?
            }
            FileFormat::Toml => {
                let table = toml::from_str::<toml::Value>(content)
                    .map_err(|e| parse_error(Box::new(e)))?;
                toml_to_json(&table)
            }
            FileFormat::Json => {
                serde_json::from_str::<Value>(content).map_err(|e| parse_error(Box::new(e)))?
            }
        };

        let mut entries = BTreeMap::new();
        flatten_value("", &tree, &mut entries);
        Ok(entries)
    }
}

impl PropertySource for FilePropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer(&self) -> LayerKind {
        self.layer
    }

    fn load(&self) -> ConfigResult<BTreeMap<String, String>> {
        debug!("加载配置文件: {}", self.name);
        if !self.path.exists() {
            return Err(ConfigError::FileNotFound {
                path: self.name.clone(),
            });
        }
        let content = std::fs::read_to_string(&self.path)?;
        self.parse(&content)
    }
}

/// 解析 `.properties` 格式
///
/// 支持 `#`/`!` 注释、`=` 或 `:` 分隔、行尾 `\` 续行。
pub fn parse_properties(content: &str) -> ConfigResult<BTreeMap<String, String>> {
    let mut entries = BTreeMap::new();
    let mut pending = String::new();

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }
        if let Some(body) = line.strip_suffix('\\') {
            pending.push_str(body);
            continue;
        }
        pending.push_str(line);
        let logical = std::mem::take(&mut pending);

        let split = logical.find(['=', ':']);
        let (key, value) = match split {
            Some(pos) => (logical[..pos].trim(), logical[pos + 1..].trim()),
            None => (logical.trim(), ""),
        };
        if key.is_empty() {
            return Err(ConfigError::ParseError {
                path: "properties".to_string(),
                source: format!("缺少属性键: {logical}").into(),
            });
        }
        entries.insert(key.to_string(), value.to_string());
    }
    Ok(entries)
}

/// 将 TOML 值转换为 JSON 值
pub fn toml_to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::Number(serde_json::Number::from(*i)),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f)
            .map_or_else(|| Value::String(f.to_string()), Value::Number),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Array(arr) => Value::Array(arr.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
    }
}

/// 将结构化文档展开为 `a.b[0].c` 形式的扁平键
pub fn flatten_value(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(fields) if !fields.is_empty() => {
            for (key, child) in fields {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_value(&path, child, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                flatten_value(&format!("{prefix}[{index}]"), child, out);
            }
        }
        Value::Object(_) | Value::Array(_) | Value::Null => {
            if !prefix.is_empty() {
                out.insert(prefix.to_string(), String::new());
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
    }
}

/// 环境变量属性来源
#[derive(Debug, Clone)]
pub struct EnvironmentPropertySource {
    vars: BTreeMap<String, String>,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl EnvironmentPropertySource {
    /// 读取当前进程的环境变量
    pub fn from_process() -> ConfigResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// 从给定的变量集合创建，导入规则同样从集合中读取
    pub fn from_vars<I, K, V>(vars: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let include = compile_patterns(vars.get(INCLUDE_ENV_PATTERNS))?;
        let exclude = compile_patterns(vars.get(EXCLUDE_ENV_PATTERNS))?;
        Ok(Self {
            vars,
            include,
            exclude,
        })
    }

    /// 原始变量值，包括保留变量
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// `FOO_BAR` 覆盖已声明的 `foo.bar`
    pub fn overrides(&self, declared: &BTreeSet<String>) -> BTreeMap<String, String> {
        let mut result = BTreeMap::new();
        for key in declared {
            let env_name = property_to_env_name(key);
            if RESERVED_ENV_NAMES.contains(&env_name.as_str()) {
                continue;
            }
            if let Some(value) = self.vars.get(&env_name) {
                debug!("环境变量 {} 覆盖属性 {}", env_name, key);
                result.insert(key.clone(), value.clone());
            }
        }
        result
    }

    fn included(&self, name: &str) -> bool {
        self.include.iter().any(|re| re.is_match(name))
            && !self.exclude.iter().any(|re| re.is_match(name))
    }
}

impl PropertySource for EnvironmentPropertySource {
    fn name(&self) -> &str {
        "environment"
    }

    fn layer(&self) -> LayerKind {
        LayerKind::Environment
    }

    fn load(&self) -> ConfigResult<BTreeMap<String, String>> {
        let mut entries = BTreeMap::new();
        for (name, value) in &self.vars {
            if RESERVED_ENV_NAMES.contains(&name.as_str()) {
                continue;
            }
            if let Some(rest) = name.strip_prefix(ENV_PREFIX) {
                if !rest.is_empty() {
                    entries.insert(env_name_to_property(rest), value.clone());
                }
            } else if self.included(name) {
                entries.insert(name.clone(), value.clone());
            }
        }
        Ok(entries)
    }
}

/// `FOO_BAR` -> `foo.bar`
pub fn env_name_to_property(name: &str) -> String {
    name.to_ascii_lowercase().replace('_', ".")
}

/// `foo.bar-baz[0]` -> `FOO_BAR_BAZ_0`
pub fn property_to_env_name(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| match c {
            '.' | '-' | '[' => '_',
            c => c.to_ascii_uppercase(),
        })
        .filter(|c| *c != ']')
        .collect();
    while name.ends_with('_') {
        name.pop();
    }
    name
}

fn compile_patterns(text: Option<&String>) -> ConfigResult<Vec<Regex>> {
    let Some(text) = text else {
        return Ok(Vec::new());
    };
    text.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            Regex::new(p).map_err(|e| ConfigError::ParseError {
                path: INCLUDE_ENV_PATTERNS.to_string(),
                source: Box::new(e),
            })
        })
        .collect()
}

/// 命令行属性来源
#[derive(Debug, Clone, Default)]
pub struct CommandLinePropertySource {
    entries: BTreeMap<String, String>,
}

impl CommandLinePropertySource {
    /// 解析命令行参数
    ///
    /// 识别 `-Dkey=value`、`-D key=value`、`--key=value`，其他参数忽略。
    /// 没有 `=` 时值为 `true`。
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries = BTreeMap::new();
        let mut expect_define = false;
        for arg in args {
            let arg = arg.as_ref();
            let definition = if expect_define {
                expect_define = false;
                Some(arg)
            } else if arg == "-D" {
                expect_define = true;
                None
            } else if let Some(rest) = arg.strip_prefix("-D") {
                Some(rest)
            } else if let Some(rest) = arg.strip_prefix("--") {
                rest.contains('=').then_some(rest)
            } else {
                None
            };

            if let Some(definition) = definition {
                let (key, value) = definition
                    .split_once('=')
                    .unwrap_or((definition, "true"));
                if !key.trim().is_empty() {
                    entries.insert(key.trim().to_string(), value.to_string());
                }
            }
        }
        Self { entries }
    }

    /// 解析出的属性
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }
}

impl PropertySource for CommandLinePropertySource {
    fn name(&self) -> &str {
        "command-line"
    }

    fn layer(&self) -> LayerKind {
        LayerKind::CommandLine
    }

    fn load(&self) -> ConfigResult<BTreeMap<String, String>> {
        Ok(self.entries.clone())
    }
}
