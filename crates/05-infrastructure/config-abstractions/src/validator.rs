//! 属性绑定校验规则

/// 绑定后校验规则
///
/// `path` 相对绑定根，空字符串表示整个值；`expr` 中用 `$` 引用该路径的值。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRule {
    /// 相对路径，例如 `server.port` 或 `hosts[0]`
    pub path: String,
    /// 校验表达式，例如 `$>=1024`
    pub expr: String,
}

impl ValidationRule {
    /// 创建新的校验规则
    pub fn new(path: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            expr: expr.into(),
        }
    }

    /// 对整个绑定值校验
    pub fn on_root(expr: impl Into<String>) -> Self {
        Self::new("", expr)
    }

    /// 拼接绑定根得到完整属性键
    pub fn full_key(&self, root: &str) -> String {
        match (root.is_empty(), self.path.is_empty()) {
            (true, _) => self.path.clone(),
            (false, true) => root.to_string(),
            (false, false) if self.path.starts_with('[') => format!("{root}{}", self.path),
            (false, false) => format!("{root}.{}", self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_key() {
        assert_eq!(ValidationRule::new("port", "$>0").full_key("server"), "server.port");
        assert_eq!(ValidationRule::on_root("$>0").full_key("server"), "server");
        assert_eq!(ValidationRule::new("[0]", "$>0").full_key("hosts"), "hosts[0]");
        assert_eq!(ValidationRule::new("port", "$>0").full_key(""), "port");
    }
}
