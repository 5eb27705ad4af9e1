//! 类型元数据
//!
//! 基于 [`std::any::type_name`] 提供稳定的类型标识与类型分类。
//! 容器按类型查找时使用 `模块路径/简单类型名` 作为键的可读形式。

use std::any::TypeId;
use std::fmt;

/// 类型分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// trait 对象 (`dyn Trait`)
    Interface,
    /// 函数指针或闭包
    Function,
    /// 通道端点
    Channel,
    /// 共享指针或引用 (`Arc`/`Rc`/`Box`/`&`)
    Pointer,
    /// 变长序列 (`Vec`/切片)
    Sequence,
    /// 定长数组
    Array,
    /// 映射 (`HashMap`/`BTreeMap`)
    Map,
    /// 元组
    Tuple,
    /// 基础类型，包括字符串
    Primitive,
    /// 其他具名类型
    Struct,
}

const POINTER_WRAPPERS: &[&str] = &[
    "alloc::sync::Arc",
    "alloc::rc::Rc",
    "alloc::boxed::Box",
    "std::sync::Arc",
    "std::rc::Rc",
    "std::boxed::Box",
];

const SEQUENCE_WRAPPERS: &[&str] = &[
    "alloc::vec::Vec",
    "std::vec::Vec",
    "alloc::collections::vec_deque::VecDeque",
];

const MAP_WRAPPERS: &[&str] = &[
    "std::collections::hash::map::HashMap",
    "alloc::collections::btree::map::BTreeMap",
    "std::collections::HashMap",
    "std::collections::BTreeMap",
];

const OPTION_WRAPPERS: &[&str] = &["core::option::Option", "std::option::Option"];

const CHANNEL_MARKERS: &[&str] = &[
    "::mpsc::",
    "::broadcast::",
    "::watch::",
    "::oneshot::",
    "crossbeam_channel::",
];

const PRIMITIVES: &[&str] = &[
    "bool", "char", "str", "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32", "u64",
    "u128", "usize", "f32", "f64", "()",
];

/// 类型信息
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeInfo {
    /// 完整类型名称
    pub full_name: &'static str,
    /// 类型ID
    pub id: TypeId,
}

impl TypeInfo {
    /// 从类型获取类型信息
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            full_name: std::any::type_name::<T>(),
            id: TypeId::of::<T>(),
        }
    }

    /// `模块路径/简单类型名`，去除指针、序列等包装
    pub fn type_name(&self) -> String {
        type_name_of(self.full_name)
    }

    /// 简单类型名，不含模块路径
    pub fn short_name(&self) -> String {
        short_name_of(self.full_name)
    }

    /// 类型分类
    pub fn kind(&self) -> TypeKind {
        classify(self.full_name)
    }

    /// 是否为可按引用共享的组件类型
    pub fn is_component_type(&self) -> bool {
        is_component_type_name(self.full_name)
    }

    /// 是否可以接收组件（自身是组件类型，或元素是组件类型的集合）
    pub fn is_component_receiver(&self) -> bool {
        is_component_receiver_name(self.full_name)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name())
    }
}

/// 返回类型的 `模块路径/简单类型名`
pub fn type_name<T: ?Sized + 'static>() -> String {
    type_name_of(std::any::type_name::<T>())
}

/// 返回类型的简单名称
pub fn short_type_name<T: ?Sized + 'static>() -> String {
    short_name_of(std::any::type_name::<T>())
}

/// 判断是否为组件类型
pub fn is_component_type<T: ?Sized + 'static>() -> bool {
    is_component_type_name(std::any::type_name::<T>())
}

/// 判断是否为组件接收类型
pub fn is_component_receiver<T: ?Sized + 'static>() -> bool {
    is_component_receiver_name(std::any::type_name::<T>())
}

/// 对原始类型名计算 `模块路径/简单类型名`
pub fn type_name_of(raw: &str) -> String {
    let core = strip_wrappers(raw);
    let core = strip_trait_object(core);
    let head_end = core.find('<').unwrap_or(core.len());
    match core[..head_end].rfind("::") {
        Some(pos) => format!("{}/{}", &core[..pos], &core[pos + 2..]),
        None => core.to_string(),
    }
}

/// 对原始类型名计算简单名称
pub fn short_name_of(raw: &str) -> String {
    let name = type_name_of(raw);
    match name.rfind('/') {
        Some(pos) => name[pos + 1..].to_string(),
        None => name,
    }
}

/// 对原始类型名分类
pub fn classify(raw: &str) -> TypeKind {
    let raw = raw.trim();
    if raw.starts_with("dyn ") {
        return TypeKind::Interface;
    }
    if raw.starts_with("fn(") || raw.starts_with("unsafe fn(") || raw.contains("{{closure}}") {
        return TypeKind::Function;
    }
    if raw.starts_with('&') || raw.starts_with("*const ") || raw.starts_with("*mut ") {
        return TypeKind::Pointer;
    }
    if raw.starts_with('[') {
        return if raw.contains(';') {
            TypeKind::Array
        } else {
            TypeKind::Sequence
        };
    }
    if raw.starts_with('(') {
        return if raw == "()" {
            TypeKind::Primitive
        } else {
            TypeKind::Tuple
        };
    }
    if PRIMITIVES.contains(&raw) || raw == "alloc::string::String" {
        return TypeKind::Primitive;
    }
    let head = generic_head(raw);
    if POINTER_WRAPPERS.contains(&head) {
        return TypeKind::Pointer;
    }
    if SEQUENCE_WRAPPERS.contains(&head) {
        return TypeKind::Sequence;
    }
    if MAP_WRAPPERS.contains(&head) {
        return TypeKind::Map;
    }
    if CHANNEL_MARKERS.iter().any(|marker| head.contains(marker)) {
        return TypeKind::Channel;
    }
    TypeKind::Struct
}

/// 组件类型: 接口、通道、函数，或者指向结构体/基础类型的指针
pub fn is_component_type_name(raw: &str) -> bool {
    match classify(raw) {
        TypeKind::Interface | TypeKind::Channel | TypeKind::Function => true,
        TypeKind::Pointer => pointee(raw).is_some_and(|inner| {
            matches!(
                classify(inner),
                TypeKind::Struct | TypeKind::Primitive | TypeKind::Interface
            )
        }),
        _ => false,
    }
}

/// 组件接收类型: 组件类型，或元素为组件类型的序列/数组/映射
pub fn is_component_receiver_name(raw: &str) -> bool {
    if is_component_type_name(raw) {
        return true;
    }
    let raw = unwrap_option(raw.trim());
    if is_component_type_name(raw) {
        return true;
    }
    element_of(raw).is_some_and(is_component_type_name)
}

/// 集合类型的元素类型名
pub fn element_of(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    match classify(raw) {
        TypeKind::Sequence | TypeKind::Array if raw.starts_with('[') => {
            let inner = &raw[1..raw.len() - 1];
            Some(inner.split(';').next().unwrap_or(inner).trim())
        }
        TypeKind::Sequence => generic_args(raw).into_iter().next(),
        TypeKind::Map => generic_args(raw).into_iter().nth(1),
        _ => None,
    }
}

fn pointee(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('&') {
        let rest = rest.trim_start();
        return Some(rest.strip_prefix("mut ").unwrap_or(rest));
    }
    if let Some(rest) = raw
        .strip_prefix("*const ")
        .or_else(|| raw.strip_prefix("*mut "))
    {
        return Some(rest);
    }
    generic_args(raw).into_iter().next()
}

fn unwrap_option(raw: &str) -> &str {
    if OPTION_WRAPPERS.contains(&generic_head(raw)) {
        generic_args(raw).into_iter().next().unwrap_or(raw)
    } else {
        raw
    }
}

/// 去掉指针、序列、Option 包装
fn strip_wrappers(raw: &str) -> &str {
    let mut current = raw.trim();
    loop {
        let next = match classify(current) {
            TypeKind::Pointer => pointee(current),
            TypeKind::Sequence | TypeKind::Array => element_of(current),
            _ if OPTION_WRAPPERS.contains(&generic_head(current)) => {
                generic_args(current).into_iter().next()
            }
            _ => None,
        };
        match next {
            Some(inner) if inner != current => current = inner,
            _ => return current,
        }
    }
}

/// `dyn a::B + Send + Sync` -> `a::B`
fn strip_trait_object(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("dyn ") else {
        return raw;
    };
    let mut depth = 0usize;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            '+' if depth == 0 => return rest[..idx].trim(),
            _ => {}
        }
    }
    rest.trim()
}

fn generic_head(raw: &str) -> &str {
    raw.find('<').map_or(raw, |pos| &raw[..pos])
}

/// 拆分最外层泛型参数
fn generic_args(raw: &str) -> Vec<&str> {
    let Some(open) = raw.find('<') else {
        return Vec::new();
    };
    let Some(close) = raw.rfind('>') else {
        return Vec::new();
    };
    if close <= open {
        return Vec::new();
    }
    let body = &raw[open + 1..close];
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in body.char_indices() {
        match ch {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                args.push(body[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    args.push(body[start..].trim());
    args
}
