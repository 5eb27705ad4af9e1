//! 表达式语言
//!
//! 用于属性校验（`$>=1024`）和条件判断（`feature.level > 2 && env == 'prod'`）。
//!
//! 支持的语法：
//! - 字面量：数字、单/双引号字符串、`true`、`false`、`null`
//! - `$` 表示被校验的值，`$.a.b` 访问其字段
//! - 点分标识符按属性键读取，`${key:=default}` 按引用展开
//! - 运算符：`! - * / % + - < <= > >= == != && ||` 和括号
//! - 函数：`len(x)`、`contains(x, y)`、`matches(x, regex)`

use config_abstractions::PropertyResolver;
use infrastructure_common::{ConfigError, ConfigResult};
use std::collections::BTreeMap;
use std::fmt;

/// 表达式的值
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<ExprValue>),
    Object(BTreeMap<String, ExprValue>),
}

impl ExprValue {
    /// 布尔语义
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::Text(s) => !(s.is_empty() || s.eq_ignore_ascii_case("false")),
            Self::List(items) => !items.is_empty(),
            Self::Object(fields) => !fields.is_empty(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn field(&self, name: &str) -> ExprValue {
        match self {
            Self::Object(fields) => fields.get(name).cloned().unwrap_or(Self::Null),
            Self::List(items) => name
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Self::Null),
            _ => Self::Null,
        }
    }
}

impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(","))
            }
            Self::Object(fields) => {
                let parts: Vec<String> = fields.iter().map(|(k, v)| format!("{k}:{v}")).collect();
                write!(f, "{{{}}}", parts.join(","))
            }
        }
    }
}

impl From<&serde_json::Value> for ExprValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            serde_json::Value::Array(items) => Self::List(items.iter().map(Self::from).collect()),
            serde_json::Value::Object(fields) => Self::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::Ne => 3,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 4,
            Self::Add | Self::Sub => 5,
            Self::Mul | Self::Div | Self::Rem => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(ExprValue),
    Current(Vec<String>),
    Property(String),
    Placeholder(String),
    Not(Box<Node>),
    Neg(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    Current(Vec<String>),
    Placeholder(String),
    Op(BinaryOp),
    Not,
    LParen,
    RParen,
    Comma,
}

/// 已解析的表达式
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    /// 解析表达式
    pub fn parse(source: &str) -> ConfigResult<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
        };
        let root = parser.expression(0)?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("表达式末尾有多余内容"));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// 原始文本
    pub fn source(&self) -> &str {
        &self.source
    }

    /// 求值
    pub fn evaluate(
        &self,
        current: Option<&ExprValue>,
        properties: &dyn PropertyResolver,
    ) -> ConfigResult<ExprValue> {
        let scope = Scope {
            source: &self.source,
            current,
            properties,
        };
        scope.eval(&self.root)
    }

    /// 求值并按布尔语义返回
    pub fn evaluate_bool(
        &self,
        current: Option<&ExprValue>,
        properties: &dyn PropertyResolver,
    ) -> ConfigResult<bool> {
        Ok(self.evaluate(current, properties)?.truthy())
    }
}

fn tokenize(source: &str) -> ConfigResult<Vec<Token>> {
    let invalid = |message: &str| ConfigError::InvalidExpression {
        expr: source.to_string(),
        message: message.to_string(),
    };

    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' | '-' | '*' | '/' | '%' => {
                tokens.push(Token::Op(match c {
                    '+' => BinaryOp::Add,
                    '-' => BinaryOp::Sub,
                    '*' => BinaryOp::Mul,
                    '/' => BinaryOp::Div,
                    _ => BinaryOp::Rem,
                }));
                i += 1;
            }
            '<' | '>' | '=' | '!' => {
                let next_eq = chars.get(i + 1) == Some(&'=');
                let token = match (c, next_eq) {
                    ('<', true) => Token::Op(BinaryOp::Le),
                    ('<', false) => Token::Op(BinaryOp::Lt),
                    ('>', true) => Token::Op(BinaryOp::Ge),
                    ('>', false) => Token::Op(BinaryOp::Gt),
                    ('=', true) => Token::Op(BinaryOp::Eq),
                    ('!', true) => Token::Op(BinaryOp::Ne),
                    ('!', false) => Token::Not,
                    _ => return Err(invalid("单独的 '=' 无效，比较请使用 '=='")),
                };
                tokens.push(token);
                i += if next_eq { 2 } else { 1 };
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(invalid("逻辑运算符应为 '&&' 或 '||'"));
                }
                tokens.push(Token::Op(if c == '&' {
                    BinaryOp::And
                } else {
                    BinaryOp::Or
                }));
                i += 2;
            }
            '\'' | '"' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(invalid("字符串未闭合")),
                        Some('\\') => {
                            if let Some(escaped) = chars.get(i + 1) {
                                text.push(*escaped);
                            }
                            i += 2;
                        }
                        Some(ch) if *ch == c => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Text(text));
            }
            '$' if chars.get(i + 1) == Some(&'{') => {
                let mut depth = 0usize;
                let start = i;
                let mut end = None;
                let mut j = i;
                while j < chars.len() {
                    if chars[j] == '{' {
                        depth += 1;
                    } else if chars[j] == '}' {
                        depth -= 1;
                        if depth == 0 {
                            end = Some(j);
                            break;
                        }
                    }
                    j += 1;
                }
                let end = end.ok_or_else(|| invalid("属性引用未闭合"))?;
                tokens.push(Token::Placeholder(chars[start..=end].iter().collect()));
                i = end + 1;
            }
            '$' => {
                i += 1;
                let mut path = Vec::new();
                while chars.get(i) == Some(&'.') {
                    i += 1;
                    let start = i;
                    while chars
                        .get(i)
                        .is_some_and(|ch| ch.is_alphanumeric() || *ch == '_' || *ch == '-')
                    {
                        i += 1;
                    }
                    if start == i {
                        return Err(invalid("'$.' 后缺少字段名"));
                    }
                    path.push(chars[start..i].iter().collect());
                }
                tokens.push(Token::Current(path));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|ch| ch.is_ascii_digit() || *ch == '.' || *ch == '_')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().filter(|ch| **ch != '_').collect();
                let number = text
                    .parse()
                    .map_err(|_| invalid(&format!("无效数字 {text}")))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while chars.get(i).is_some_and(|ch| {
                    ch.is_alphanumeric() || matches!(ch, '_' | '.' | '-' | '[' | ']')
                }) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(invalid(&format!("无法识别的字符 '{other}'"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> ConfigError {
        ConfigError::InvalidExpression {
            expr: self.source.to_string(),
            message: message.to_string(),
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expect(&mut self, expected: &Token, what: &str) -> ConfigResult<()> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            _ => Err(self.error(&format!("缺少 {what}"))),
        }
    }

    fn expression(&mut self, min_precedence: u8) -> ConfigResult<Node> {
        let mut left = self.unary()?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            let precedence = op.precedence();
            if precedence <= min_precedence {
                break;
            }
            self.pos += 1;
            let right = self.expression(precedence)?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> ConfigResult<Node> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Node::Not(Box::new(self.unary()?)))
            }
            Some(Token::Op(BinaryOp::Sub)) => {
                self.pos += 1;
                Ok(Node::Neg(Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> ConfigResult<Node> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Node::Literal(ExprValue::Number(n))),
            Some(Token::Text(s)) => Ok(Node::Literal(ExprValue::Text(s))),
            Some(Token::Current(path)) => Ok(Node::Current(path)),
            Some(Token::Placeholder(text)) => Ok(Node::Placeholder(text)),
            Some(Token::LParen) => {
                let inner = self.expression(0)?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.expression(0)?);
                            if self.peek() == Some(&Token::Comma) {
                                self.pos += 1;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(&Token::RParen, "')'")?;
                    return Ok(Node::Call(name, args));
                }
                Ok(match name.as_str() {
                    "true" => Node::Literal(ExprValue::Bool(true)),
                    "false" => Node::Literal(ExprValue::Bool(false)),
                    "null" => Node::Literal(ExprValue::Null),
                    _ => Node::Property(name),
                })
            }
            _ => Err(self.error("缺少操作数")),
        }
    }
}

struct Scope<'a> {
    source: &'a str,
    current: Option<&'a ExprValue>,
    properties: &'a dyn PropertyResolver,
}

impl Scope<'_> {
    fn error(&self, message: String) -> ConfigError {
        ConfigError::InvalidExpression {
            expr: self.source.to_string(),
            message,
        }
    }

    fn eval(&self, node: &Node) -> ConfigResult<ExprValue> {
        match node {
            Node::Literal(value) => Ok(value.clone()),
            Node::Current(path) => {
                let mut value = self.current.cloned().unwrap_or(ExprValue::Null);
                for field in path {
                    value = value.field(field);
                }
                Ok(value)
            }
            Node::Property(key) => Ok(self
                .properties
                .get(key)?
                .map_or(ExprValue::Null, ExprValue::Text)),
            Node::Placeholder(text) => Ok(ExprValue::Text(self.properties.resolve(text)?)),
            Node::Not(inner) => Ok(ExprValue::Bool(!self.eval(inner)?.truthy())),
            Node::Neg(inner) => {
                let value = self.eval(inner)?;
                let n = value
                    .as_number()
                    .ok_or_else(|| self.error(format!("无法对 {value} 取负")))?;
                Ok(ExprValue::Number(-n))
            }
            Node::Binary(BinaryOp::And, left, right) => {
                if !self.eval(left)?.truthy() {
                    return Ok(ExprValue::Bool(false));
                }
                Ok(ExprValue::Bool(self.eval(right)?.truthy()))
            }
            Node::Binary(BinaryOp::Or, left, right) => {
                if self.eval(left)?.truthy() {
                    return Ok(ExprValue::Bool(true));
                }
                Ok(ExprValue::Bool(self.eval(right)?.truthy()))
            }
            Node::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, &left, &right)
            }
            Node::Call(name, args) => {
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<ConfigResult<Vec<_>>>()?;
                self.call(name, &values)
            }
        }
    }

    fn binary(&self, op: BinaryOp, left: &ExprValue, right: &ExprValue) -> ConfigResult<ExprValue> {
        match op {
            BinaryOp::Eq => Ok(ExprValue::Bool(loose_eq(left, right))),
            BinaryOp::Ne => Ok(ExprValue::Bool(!loose_eq(left, right))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = match (left.as_number(), right.as_number()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => match (left, right) {
                        (ExprValue::Text(a), ExprValue::Text(b)) => Some(a.cmp(b)),
                        _ => None,
                    },
                }
                .ok_or_else(|| self.error(format!("无法比较 {left} 和 {right}")))?;
                let result = match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                };
                Ok(ExprValue::Bool(result))
            }
            BinaryOp::Add => match (left.as_number(), right.as_number()) {
                (Some(a), Some(b)) => Ok(ExprValue::Number(a + b)),
                _ => Ok(ExprValue::Text(format!("{left}{right}"))),
            },
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                let (a, b) = match (left.as_number(), right.as_number()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => return Err(self.error(format!("{left} 和 {right} 不是数值"))),
                };
                if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0.0 {
                    return Err(self.error("除数为零".to_string()));
                }
                Ok(ExprValue::Number(match op {
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    _ => a % b,
                }))
            }
            BinaryOp::And | BinaryOp::Or => Ok(ExprValue::Bool(match op {
                BinaryOp::And => left.truthy() && right.truthy(),
                _ => left.truthy() || right.truthy(),
            })),
        }
    }

    fn call(&self, name: &str, args: &[ExprValue]) -> ConfigResult<ExprValue> {
        let arity = |n: usize| -> ConfigResult<()> {
            if args.len() == n {
                Ok(())
            } else {
                Err(self.error(format!("{name} 需要 {n} 个参数，实际 {}", args.len())))
            }
        };
        match name {
            "len" => {
                arity(1)?;
                let len = match &args[0] {
                    ExprValue::Null => 0,
                    ExprValue::Text(s) => s.chars().count(),
                    ExprValue::List(items) => items.len(),
                    ExprValue::Object(fields) => fields.len(),
                    other => other.to_string().chars().count(),
                };
                Ok(ExprValue::Number(len as f64))
            }
            "contains" => {
                arity(2)?;
                let found = match &args[0] {
                    ExprValue::List(items) => items.iter().any(|item| loose_eq(item, &args[1])),
                    ExprValue::Object(fields) => fields.contains_key(&args[1].to_string()),
                    other => other.to_string().contains(&args[1].to_string()),
                };
                Ok(ExprValue::Bool(found))
            }
            "matches" => {
                arity(2)?;
                let pattern = regex::Regex::new(&args[1].to_string())
                    .map_err(|e| self.error(format!("正则表达式无效: {e}")))?;
                Ok(ExprValue::Bool(pattern.is_match(&args[0].to_string())))
            }
            _ => Err(self.error(format!("未知函数 {name}"))),
        }
    }
}

fn loose_eq(left: &ExprValue, right: &ExprValue) -> bool {
    match (left, right) {
        (ExprValue::Null, ExprValue::Null) => true,
        (ExprValue::Null, _) | (_, ExprValue::Null) => false,
        (ExprValue::Bool(_), _) | (_, ExprValue::Bool(_)) => {
            matches!((left.as_bool(), right.as_bool()), (Some(a), Some(b)) if a == b)
        }
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => left.to_string() == right.to_string(),
        },
    }
}
