//! 绑定后校验

use crate::expr::{ExprValue, Expression};
use crate::store::{split_key, KeySegment, PropertyStore};
use config_abstractions::{PropertyResolver, ValidationRule};
use infrastructure_common::{ConfigError, ConfigResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

impl PropertyStore {
    /// 绑定并按规则校验
    pub fn bind_validated<T>(&self, root: &str, rules: &[ValidationRule]) -> ConfigResult<T>
    where
        T: DeserializeOwned + Serialize,
    {
        let value: T = self.bind(root)?;
        self.validate(root, &value, rules)?;
        Ok(value)
    }

    /// 校验已绑定的值
    pub fn validate<T: Serialize>(
        &self,
        root: &str,
        value: &T,
        rules: &[ValidationRule],
    ) -> ConfigResult<()> {
        if rules.is_empty() {
            return Ok(());
        }
        let json = serde_json::to_value(value)
            .map_err(|e| ConfigError::type_mismatch(root, e.to_string()))?;
        for rule in rules {
            let target = select(&json, &rule.path)?;
            check_value(self, &rule.full_key(root), &rule.expr, &target)?;
        }
        debug!("属性校验通过: {} ({} 条规则)", root, rules.len());
        Ok(())
    }
}

/// 用表达式校验单个值，`$` 表示该值
pub fn check_value(
    properties: &dyn PropertyResolver,
    key: &str,
    expr: &str,
    value: &Value,
) -> ConfigResult<()> {
    let expression = Expression::parse(expr)?;
    let current = ExprValue::from(value);
    if expression.evaluate_bool(Some(&current), properties)? {
        Ok(())
    } else {
        Err(ConfigError::ValidationFailed {
            key: key.to_string(),
            rule: expr.to_string(),
            value: current.to_string(),
        })
    }
}

/// 按相对路径取出 JSON 子值，不存在时为 null
fn select(root: &Value, path: &str) -> ConfigResult<Value> {
    let mut current = root;
    for segment in split_key(path)? {
        let next = match (&segment, current) {
            (KeySegment::Field(name), Value::Object(fields)) => fields.get(name),
            (KeySegment::Index(index), Value::Array(items)) => items.get(*index),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Ok(Value::Null),
        }
    }
    Ok(current.clone())
}
