//! 组件描述数据模型
//!
//! 描述符只记录数据：身份、构造方式、注入指令、导出类型等。
//! 真正的构造闭包由 `di-impl` 持有。

use infrastructure_common::TypeInfo;
use std::fmt;

/// 组件唯一标识，形式为 `模块路径/类型名:名称`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BeanId(String);

impl BeanId {
    /// 由类型和名称构造
    pub fn new(type_info: &TypeInfo, name: &str) -> Self {
        Self(format!("{}:{}", type_info.type_name(), name))
    }

    /// 字符串形式
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BeanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 组件选择器
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// 按名称
    Name(String),
    /// 按类型，包括导出的接口类型
    Type(TypeInfo),
}

impl Selector {
    /// 按名称选择
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// 按类型选择，接口使用 `Selector::of::<dyn Trait>()`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Type(TypeInfo::of::<T>())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "name={name}"),
            Self::Type(type_info) => write!(f, "type={type_info}"),
        }
    }
}

/// 构造方式，三选一
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstructorKind {
    /// 预先构造好的对象
    Object,
    /// 工厂函数
    Factory,
    /// 另一个组件上的方法
    Method {
        /// 接收者类型
        receiver: TypeInfo,
    },
}

/// 接收者形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiverShape {
    /// `Arc<T>`，必须唯一命中
    Single,
    /// `Option<Arc<T>>`，可以缺失
    Optional,
    /// `Vec<Arc<T>>`
    Collection,
    /// `HashMap<String, Arc<T>>` / `BTreeMap<String, Arc<T>>`，键为组件名
    Map,
}

impl ReceiverShape {
    /// 是否为收集型接收者
    pub fn is_collect(&self) -> bool {
        matches!(self, Self::Collection | Self::Map)
    }
}

/// 收集全部剩余匹配项的占位名
pub const COLLECT_REST: &str = "*";

/// `autowire:"..."` 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutowireSpec {
    /// 元素类型
    pub element: TypeInfo,
    /// 接收者形态
    pub shape: ReceiverShape,
    /// 单值时最多一个名称；收集时为有序名称列表，`*` 表示其余全部
    pub names: Vec<String>,
    /// 是否必需
    pub required: bool,
}

impl AutowireSpec {
    /// 解析标签
    ///
    /// - `""` 按类型唯一匹配
    /// - `"name"` 按名称
    /// - `"name?"` / `"?"` 可选
    /// - 收集型: `"a,b,*"`，空标签等同 `"*"`
    pub fn parse(tag: &str, element: TypeInfo, shape: ReceiverShape) -> Result<Self, String> {
        let tag = tag.trim();
        let (body, optional) = match tag.strip_suffix('?') {
            Some(body) => (body.trim(), true),
            None => (tag, false),
        };

        let names: Vec<String> = body
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToString::to_string)
            .collect();

        match shape {
            ReceiverShape::Single | ReceiverShape::Optional => {
                if names.len() > 1 || names.iter().any(|n| n == COLLECT_REST) {
                    return Err(format!("单值注入只能指定一个名称: \"{tag}\""));
                }
                if optional && shape == ReceiverShape::Single {
                    return Err(format!(
                        "可选注入 \"{tag}\" 需要 Option<Arc<{}>> 接收者",
                        element.short_name()
                    ));
                }
                Ok(Self {
                    element,
                    shape,
                    names,
                    required: shape == ReceiverShape::Single,
                })
            }
            ReceiverShape::Collection | ReceiverShape::Map => {
                if names.iter().filter(|n| *n == COLLECT_REST).count() > 1 {
                    return Err(format!("收集标签中 '*' 只能出现一次: \"{tag}\""));
                }
                let names = if names.is_empty() {
                    vec![COLLECT_REST.to_string()]
                } else {
                    names
                };
                Ok(Self {
                    element,
                    shape,
                    names,
                    required: !optional,
                })
            }
        }
    }

    /// 单值注入指定的名称
    pub fn single_name(&self) -> Option<&str> {
        match self.shape {
            ReceiverShape::Single | ReceiverShape::Optional => self.names.first().map(String::as_str),
            _ => None,
        }
    }

    /// 还原标签文本
    pub fn tag(&self) -> String {
        let mut tag = self.names.join(",");
        if self.shape.is_collect() && tag == COLLECT_REST {
            tag.clear();
        }
        if !self.required && self.shape != ReceiverShape::Optional
            || self.shape == ReceiverShape::Optional && !tag.is_empty()
        {
            tag.push('?');
        }
        tag
    }
}

/// 注入指令种类
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveKind {
    /// `value:"${key:=default}"`
    Value {
        /// 属性文本
        text: String,
        /// 校验表达式
        checks: Vec<String>,
    },
    /// `autowire:"..."`
    Autowire(AutowireSpec),
    /// 延迟注入，不参与拓扑排序
    Lazy(AutowireSpec),
    /// 注入应用上下文
    Context,
    /// 注册时就能发现的错误，刷新时报告
    Invalid {
        /// 错误信息
        message: String,
    },
}

/// 注入指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionDirective {
    /// 注入目标：`arg0`、`receiver` 或字段标签
    pub target: String,
    /// 指令种类
    pub kind: DirectiveKind,
}

impl InjectionDirective {
    /// 创建注入指令
    pub fn new(target: impl Into<String>, kind: DirectiveKind) -> Self {
        Self {
            target: target.into(),
            kind,
        }
    }

    /// 需要其他组件时返回规格
    pub fn autowire_spec(&self) -> Option<&AutowireSpec> {
        match &self.kind {
            DirectiveKind::Autowire(spec) | DirectiveKind::Lazy(spec) => Some(spec),
            _ => None,
        }
    }

    /// 是否为延迟注入
    pub fn is_lazy(&self) -> bool {
        matches!(self.kind, DirectiveKind::Lazy(_))
    }
}

impl fmt::Display for InjectionDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DirectiveKind::Value { text, .. } => write!(f, "{} value:\"{text}\"", self.target),
            DirectiveKind::Autowire(spec) => write!(
                f,
                "{} autowire:\"{}\" ({})",
                self.target,
                spec.tag(),
                spec.element
            ),
            DirectiveKind::Lazy(spec) => write!(
                f,
                "{} autowire:\"{}\" lazy ({})",
                self.target,
                spec.tag(),
                spec.element
            ),
            DirectiveKind::Context => write!(f, "{} context", self.target),
            DirectiveKind::Invalid { message } => write!(f, "{} invalid: {message}", self.target),
        }
    }
}

/// 组件描述信息，刷新后只读
#[derive(Debug, Clone)]
pub struct BeanInfo {
    /// 唯一标识
    pub id: BeanId,
    /// 组件名，未指定时为简单类型名
    pub name: String,
    /// 声明类型
    pub type_info: TypeInfo,
    /// 构造方式
    pub kind: ConstructorKind,
    /// 导出的接口类型
    pub exports: Vec<TypeInfo>,
    /// 构造参数、接收者和字段的注入指令
    pub directives: Vec<InjectionDirective>,
    /// 显式声明的前置依赖
    pub depends_on: Vec<Selector>,
    /// 排序提示，越小越靠前
    pub order: i32,
    /// 类型查找有歧义时优先
    pub primary: bool,
    /// 注册顺序
    pub index: usize,
}

impl BeanInfo {
    /// 创建描述信息，名称为空时使用简单类型名
    pub fn new(type_info: TypeInfo, kind: ConstructorKind, index: usize) -> Self {
        let name = type_info.short_name();
        Self {
            id: BeanId::new(&type_info, &name),
            name,
            type_info,
            kind,
            exports: Vec::new(),
            directives: Vec::new(),
            depends_on: Vec::new(),
            order: 0,
            primary: false,
            index,
        }
    }

    /// 修改名称，同时更新标识
    pub fn rename(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.name = if name.is_empty() {
            self.type_info.short_name()
        } else {
            name
        };
        self.id = BeanId::new(&self.type_info, &self.name);
    }

    /// 是否以该类型对外提供（自身类型或导出类型）
    pub fn provides(&self, type_info: &TypeInfo) -> bool {
        self.type_info.id == type_info.id || self.exports.iter().any(|e| e.id == type_info.id)
    }

    /// 是否匹配选择器
    pub fn matches(&self, selector: &Selector) -> bool {
        match selector {
            Selector::Name(name) => &self.name == name,
            Selector::Type(type_info) => self.provides(type_info),
        }
    }
}

impl fmt::Display for BeanInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
