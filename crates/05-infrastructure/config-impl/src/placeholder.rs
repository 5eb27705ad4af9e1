//! `${key:=default}` 引用展开

use infrastructure_common::{ConfigError, ConfigResult};

/// 解析出的单个引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder<'a> {
    /// 引用的键
    pub key: &'a str,
    /// `:=` 后的默认值
    pub default: Option<&'a str>,
}

/// 文本是否恰好是一个完整的引用，例如 `${a.b:=1}`
pub fn parse_whole(text: &str) -> Option<Placeholder<'_>> {
    let text = text.trim();
    let body = text.strip_prefix("${")?;
    let close = matching_brace(body)?;
    if close != body.len() - 1 {
        return None;
    }
    Some(split_body(&body[..close]))
}

/// 文本中是否含有引用
pub fn contains_placeholder(text: &str) -> bool {
    text.contains("${")
}

/// 展开文本中的所有引用
///
/// `lookup` 返回键的原始值；`visiting` 记录当前展开链，用于发现循环。
pub fn expand<F>(text: &str, lookup: &F, visiting: &mut Vec<String>) -> ConfigResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    if !contains_placeholder(text) {
        return Ok(text.to_string());
    }

    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let body = &rest[start + 2..];
        let close = matching_brace(body).ok_or_else(|| ConfigError::InvalidPlaceholder {
            text: text.to_string(),
        })?;
        let placeholder = split_body(&body[..close]);
        output.push_str(&expand_one(&placeholder, lookup, visiting)?);
        rest = &body[close + 1..];
    }
    output.push_str(rest);
    Ok(output)
}

/// 展开单个引用
pub fn expand_one<F>(
    placeholder: &Placeholder<'_>,
    lookup: &F,
    visiting: &mut Vec<String>,
) -> ConfigResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let key = placeholder.key.trim();
    if key.is_empty() {
        return Err(ConfigError::InvalidPlaceholder {
            text: format!("${{{}}}", placeholder.key),
        });
    }

    if visiting.iter().any(|k| k == key) {
        let mut chain = visiting.clone();
        chain.push(key.to_string());
        return Err(ConfigError::CyclicReference { chain });
    }

    match lookup(key) {
        Some(raw) => {
            visiting.push(key.to_string());
            let result = expand(&raw, lookup, visiting);
            visiting.pop();
            result
        }
        None => match placeholder.default {
            Some(default) => expand(default, lookup, visiting),
            None => Err(ConfigError::KeyNotFound {
                key: key.to_string(),
            }),
        },
    }
}

/// 找到与 `${` 匹配的 `}`，`body` 不含开头的 `${`
fn matching_brace(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut depth = 0usize;
    let mut idx = 0usize;
    while idx < bytes.len() {
        match bytes[idx] {
            b'$' if bytes.get(idx + 1) == Some(&b'{') => {
                depth += 1;
                idx += 1;
            }
            b'}' if depth == 0 => return Some(idx),
            b'}' => depth -= 1,
            _ => {}
        }
        idx += 1;
    }
    None
}

fn split_body(body: &str) -> Placeholder<'_> {
    match body.find(":=") {
        Some(pos) => Placeholder {
            key: &body[..pos],
            default: Some(&body[pos + 2..]),
        },
        None => Placeholder {
            key: body,
            default: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn run(text: &str, props: &[(&str, &str)]) -> ConfigResult<String> {
        let map: HashMap<String, String> = props
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let lookup = |key: &str| map.get(key).cloned();
        expand(text, &lookup, &mut Vec::new())
    }

    #[test]
    fn test_chained_references() {
        let value = run("${a}", &[("a", "${b}"), ("b", "x")]).unwrap();
        assert_eq!(value, "x");
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let err = run("${a}", &[("a", "${a}")]).unwrap_err();
        match err {
            ConfigError::CyclicReference { chain } => assert_eq!(chain, vec!["a", "a"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_defaults_and_nesting() {
        assert_eq!(run("${missing:=8080}", &[]).unwrap(), "8080");
        assert_eq!(run("${missing:=}", &[]).unwrap(), "");
        assert_eq!(
            run("${missing:=${host}:80}", &[("host", "localhost")]).unwrap(),
            "localhost:80"
        );
        assert_eq!(
            run("http://${host}:${port:=80}/", &[("host", "h")]).unwrap(),
            "http://h:80/"
        );
    }

    #[test]
    fn test_missing_without_default() {
        let err = run("${nope}", &[]).unwrap_err();
        assert!(matches!(err, ConfigError::KeyNotFound { ref key } if key == "nope"));
    }

    #[test]
    fn test_unclosed_reference() {
        let err = run("${oops", &[]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPlaceholder { .. }));
    }

    #[test]
    fn test_parse_whole() {
        let p = parse_whole("${server.port:=8080}").unwrap();
        assert_eq!(p.key, "server.port");
        assert_eq!(p.default, Some("8080"));
        assert!(parse_whole("x${a}").is_none());
        assert!(parse_whole("${a}${b}").is_none());
    }
}
