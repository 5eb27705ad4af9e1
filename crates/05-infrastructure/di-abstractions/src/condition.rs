//! 条件装配
//!
//! 条件是纯数据加一个可选的自定义谓词，通过 [`ConditionContext`]
//! 访问属性和已决定的组件，求值逻辑与容器实现无关。

use crate::descriptor::Selector;
use config_abstractions::PropertyResolver;
use infrastructure_common::ConfigError;
use std::fmt;
use std::sync::Arc;

/// 条件求值时可见的环境
pub trait ConditionContext {
    /// 属性解析器
    fn properties(&self) -> &dyn PropertyResolver;

    /// 是否存在已被包含的匹配组件，不含当前组件自身
    fn has_bean(&self, selector: &Selector) -> bool;

    /// 对布尔表达式求值
    fn evaluate_expression(&self, expr: &str) -> Result<bool, ConfigError>;
}

/// 自定义谓词
pub type ConditionFn = Arc<dyn Fn(&dyn ConditionContext) -> Result<bool, ConfigError> + Send + Sync>;

/// 装配条件
#[derive(Clone)]
pub enum Condition {
    /// 全部满足
    And(Vec<Condition>),
    /// 任一满足
    Or(Vec<Condition>),
    /// 取反
    Not(Box<Condition>),
    /// 属性存在，可选地要求等于某值
    OnProperty {
        /// 属性键
        key: String,
        /// 期望值
        having: Option<String>,
    },
    /// 属性不存在
    OnMissingProperty(String),
    /// 激活了某个 profile
    OnProfile(String),
    /// 存在匹配的组件
    OnBean(Selector),
    /// 不存在匹配的组件
    OnMissingBean(Selector),
    /// 布尔表达式
    OnExpression(String),
    /// 自定义谓词，不能引用其他组件
    Custom(ConditionFn),
}

impl Condition {
    /// 属性存在
    pub fn on_property(key: impl Into<String>) -> Self {
        Self::OnProperty {
            key: key.into(),
            having: None,
        }
    }

    /// 属性等于某值
    pub fn on_property_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::OnProperty {
            key: key.into(),
            having: Some(value.into()),
        }
    }

    /// 属性不存在
    pub fn on_missing_property(key: impl Into<String>) -> Self {
        Self::OnMissingProperty(key.into())
    }

    /// profile 激活
    pub fn on_profile(profile: impl Into<String>) -> Self {
        Self::OnProfile(profile.into())
    }

    /// 存在组件
    pub fn on_bean(selector: Selector) -> Self {
        Self::OnBean(selector)
    }

    /// 不存在组件
    pub fn on_missing_bean(selector: Selector) -> Self {
        Self::OnMissingBean(selector)
    }

    /// 表达式
    pub fn on_expression(expr: impl Into<String>) -> Self {
        Self::OnExpression(expr.into())
    }

    /// 自定义谓词
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&dyn ConditionContext) -> Result<bool, ConfigError> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// 取反
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// 条件引用到的组件选择器
    pub fn referenced_beans(&self) -> Vec<&Selector> {
        let mut selectors = Vec::new();
        self.collect_selectors(&mut selectors);
        selectors
    }

    fn collect_selectors<'a>(&'a self, out: &mut Vec<&'a Selector>) {
        match self {
            Self::And(all) | Self::Or(all) => all.iter().for_each(|c| c.collect_selectors(out)),
            Self::Not(inner) => inner.collect_selectors(out),
            Self::OnBean(selector) | Self::OnMissingBean(selector) => out.push(selector),
            _ => {}
        }
    }

    /// 求值
    pub fn evaluate(&self, ctx: &dyn ConditionContext) -> Result<bool, ConfigError> {
        match self {
            Self::And(all) => {
                for condition in all {
                    if !condition.evaluate(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(any) => {
                for condition in any {
                    if condition.evaluate(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(inner) => Ok(!inner.evaluate(ctx)?),
            Self::OnProperty { key, having } => match having {
                None => Ok(ctx.properties().has(key)),
                Some(expected) => Ok(ctx.properties().get(key)?.as_deref() == Some(expected.as_str())),
            },
            Self::OnMissingProperty(key) => Ok(!ctx.properties().has(key)),
            Self::OnProfile(profile) => Ok(ctx.properties().is_profile_active(profile)),
            Self::OnBean(selector) => Ok(ctx.has_bean(selector)),
            Self::OnMissingBean(selector) => Ok(!ctx.has_bean(selector)),
            Self::OnExpression(expr) => ctx.evaluate_expression(expr),
            Self::Custom(predicate) => predicate(ctx),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(all) => f.debug_tuple("And").field(all).finish(),
            Self::Or(any) => f.debug_tuple("Or").field(any).finish(),
            Self::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
            Self::OnProperty { key, having } => f
                .debug_struct("OnProperty")
                .field("key", key)
                .field("having", having)
                .finish(),
            Self::OnMissingProperty(key) => f.debug_tuple("OnMissingProperty").field(key).finish(),
            Self::OnProfile(profile) => f.debug_tuple("OnProfile").field(profile).finish(),
            Self::OnBean(selector) => f.debug_tuple("OnBean").field(selector).finish(),
            Self::OnMissingBean(selector) => f.debug_tuple("OnMissingBean").field(selector).finish(),
            Self::OnExpression(expr) => f.debug_tuple("OnExpression").field(expr).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
