//! Expression parser for `{{ ... }}` tags
//!
//! Grammar:
//!
//! ```text
//! expr    := primary ('|' filter)*
//! primary := literal | call | path
//! call    := 'enumerate_list' '(' expr ')'
//! path    := ident ('.' ident | '.' int | '[' int ']' | '[' string ']')*
//! filter  := ident ('(' literal (',' literal)* ')')?
//! literal := string | number | true | false | none
//! ```

use std::fmt;

use serde_yaml::{Mapping, Value};

use crate::filters::Filter;
use crate::scope::{kind_of, Scope};

/// Parse failure with an absolute byte position in the template
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub position: usize,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Key(String),
    Index(i64),
}

/// Variable reference such as `model.name` or `regions[0]`
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub root: String,
    pub segments: Vec<Segment>,
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.segments {
            match segment {
                Segment::Key(key) => write!(f, ".{}", key)?,
                Segment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

/// Global functions callable from expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// `[{i: 0, item: a}, {i: 1, item: b}, ...]` for serial chains
    EnumerateList,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "enumerate_list" => Some(Function::EnumerateList),
            _ => None,
        }
    }

    fn call(self, arg: &Value) -> Outcome {
        match self {
            Function::EnumerateList => match iterate(arg) {
                Some(items) => Outcome::Value(Value::Sequence(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, item)| {
                            let mut entry = Mapping::new();
                            entry.insert(Value::from("i"), Value::from(i as u64));
                            entry.insert(Value::from("item"), item);
                            Value::Mapping(entry)
                        })
                        .collect(),
                )),
                None => Outcome::Invalid(format!(
                    "enumerate_list() expects a list, found {}",
                    kind_of(arg)
                )),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Primary {
    Path(Path),
    Literal(Value),
    Call(Function, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterCall {
    pub filter: Filter,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub primary: Primary,
    pub filters: Vec<FilterCall>,
}

/// Result of evaluating an expression against a scope
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(Value),
    /// The named variable (or path) is not bound
    Undefined(String),
    /// Bound, but of the wrong type for the operation
    Invalid(String),
}

/// Why an expression produced no usable value
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    Undefined(String),
    Invalid(String),
}

impl Outcome {
    pub fn into_result(self) -> Result<Value, Fault> {
        match self {
            Outcome::Value(value) => Ok(value),
            Outcome::Undefined(name) => Err(Fault::Undefined(name)),
            Outcome::Invalid(details) => Err(Fault::Invalid(details)),
        }
    }
}

/// Items visited by `for` and `enumerate_list`
///
/// Lists yield their elements, mappings their keys, strings their characters.
pub fn iterate(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Sequence(seq) => Some(seq.clone()),
        Value::Mapping(map) => Some(map.keys().cloned().collect()),
        Value::String(s) => Some(s.chars().map(|c| Value::String(c.to_string())).collect()),
        Value::Tagged(tagged) => iterate(&tagged.value),
        _ => None,
    }
}

impl Expr {
    /// Parse the text between `{{` and `}}`; `base` is its offset in the template
    pub fn parse(src: &str, base: usize) -> Result<Self, SyntaxError> {
        let mut parser = Parser::new(src, base);
        parser.skip_ws();
        if parser.at_end() {
            return Err(parser.error("empty expression"));
        }
        let expr = parser.expression()?;
        parser.finish()?;
        Ok(expr)
    }

    /// Evaluate against `scope`
    ///
    /// `default` replaces an undefined operand; every other filter leaves an
    /// undefined operand undefined.
    pub fn eval(&self, scope: &Scope) -> Outcome {
        let mut outcome = match &self.primary {
            Primary::Literal(value) => Outcome::Value(value.clone()),
            Primary::Path(path) => lookup(path, scope),
            Primary::Call(function, arg) => match arg.eval(scope) {
                Outcome::Value(value) => function.call(&value),
                other => other,
            },
        };

        for call in &self.filters {
            outcome = match outcome {
                Outcome::Undefined(_) if call.filter == Filter::Default => Outcome::Value(
                    call.args
                        .first()
                        .cloned()
                        .unwrap_or_else(|| Value::String(String::new())),
                ),
                Outcome::Value(value) => Outcome::Value(call.filter.apply(value, &call.args)),
                other => other,
            };
        }
        outcome
    }
}

fn lookup(path: &Path, scope: &Scope) -> Outcome {
    let Some(mut current) = scope.get(&path.root) else {
        return Outcome::Undefined(path.root.clone());
    };

    for segment in &path.segments {
        while let Value::Tagged(tagged) = current {
            current = &tagged.value;
        }
        let next = match (segment, current) {
            (Segment::Key(key), Value::Mapping(map)) => map.get(key.as_str()),
            (Segment::Index(idx), Value::Sequence(seq)) => {
                let idx = if *idx < 0 { seq.len() as i64 + idx } else { *idx };
                usize::try_from(idx).ok().and_then(|i| seq.get(i))
            }
            (Segment::Index(idx), Value::Mapping(map)) => map.get(Value::from(*idx)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Outcome::Undefined(path.to_string()),
        }
    }
    Outcome::Value(current.clone())
}

/// Recursive-descent parser shared with statement tags
pub(crate) struct Parser<'a> {
    src: &'a str,
    pos: usize,
    base: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(src: &'a str, base: usize) -> Self {
        Self { src, pos: 0, base }
    }

    /// `primary ('|' filter)*`, stopping at the first character that cannot continue it
    pub(crate) fn expression(&mut self) -> Result<Expr, SyntaxError> {
        self.skip_ws();
        let primary = self.primary()?;
        let mut filters = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() != Some('|') {
                break;
            }
            self.bump();
            self.skip_ws();
            filters.push(self.filter()?);
        }
        Ok(Expr { primary, filters })
    }

    /// Fail unless only whitespace remains
    pub(crate) fn finish(&mut self) -> Result<(), SyntaxError> {
        self.skip_ws();
        match self.peek() {
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
            None => Ok(()),
        }
    }

    /// Consume `word` if it is the next identifier
    pub(crate) fn eat_keyword(&mut self, word: &str) -> bool {
        self.skip_ws();
        let start = self.pos;
        if self.ident() == Some(word) {
            return true;
        }
        self.pos = start;
        false
    }

    /// Consume `symbol` if the input continues with it
    pub(crate) fn eat(&mut self, symbol: &str) -> bool {
        self.skip_ws();
        if self.src[self.pos..].starts_with(symbol) {
            self.pos += symbol.len();
            return true;
        }
        false
    }

    /// Identifier that is not a keyword literal
    pub(crate) fn name(&mut self) -> Result<String, SyntaxError> {
        self.skip_ws();
        let start = self.pos;
        match self.ident() {
            Some(word) if keyword(word).is_none() => Ok(word.to_string()),
            _ => {
                self.pos = start;
                Err(self.error("expected a variable name"))
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.src[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    pub(crate) fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    pub(crate) fn error(&self, details: impl Into<String>) -> SyntaxError {
        SyntaxError {
            position: self.base + self.pos,
            details: details.into(),
        }
    }

    pub(crate) fn expect(&mut self, want: char) -> Result<(), SyntaxError> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c == want => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", want, c))),
            None => Err(self.error(format!("expected '{}', found end of expression", want))),
        }
    }

    fn ident(&mut self) -> Option<&'a str> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => {
                self.bump();
            }
            _ => return None,
        }
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        Some(&self.src[start..self.pos])
    }

    fn starts_number(&self) -> bool {
        match self.peek() {
            Some(c) if c.is_ascii_digit() => true,
            Some('-') => matches!(self.peek_second(), Some(c) if c.is_ascii_digit()),
            _ => false,
        }
    }

    fn primary(&mut self) -> Result<Primary, SyntaxError> {
        if let Some(value) = self.literal()? {
            return Ok(Primary::Literal(value));
        }

        let start = self.pos;
        let Some(root) = self.ident() else {
            return Err(self.error("expected a variable name or literal"));
        };
        if let Some(value) = keyword(root) {
            return Ok(Primary::Literal(value));
        }
        if self.peek() == Some('(') {
            let Some(function) = Function::from_name(root) else {
                self.pos = start;
                return Err(self.error(format!("unknown function '{}'", root)));
            };
            self.bump();
            let arg = self.expression()?;
            self.expect(')')?;
            return Ok(Primary::Call(function, Box::new(arg)));
        }
        let root = root.to_string();
        let mut segments = Vec::new();

        loop {
            match self.peek() {
                Some('.') => {
                    self.bump();
                    if matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                        segments.push(Segment::Index(self.integer()?));
                    } else {
                        let Some(key) = self.ident() else {
                            return Err(self.error("expected attribute name after '.'"));
                        };
                        segments.push(Segment::Key(key.to_string()));
                    }
                }
                Some('[') => {
                    self.bump();
                    self.skip_ws();
                    let segment = match self.peek() {
                        Some('\'') | Some('"') => Segment::Key(self.string()?),
                        _ if self.starts_number() => Segment::Index(self.integer()?),
                        _ => return Err(self.error("expected index or quoted key inside '[]'")),
                    };
                    self.expect(']')?;
                    segments.push(segment);
                }
                _ => break,
            }
        }

        Ok(Primary::Path(Path { root, segments }))
    }

    /// String, number or keyword literal; `None` when the input is a path
    fn literal(&mut self) -> Result<Option<Value>, SyntaxError> {
        match self.peek() {
            Some('\'') | Some('"') => Ok(Some(Value::String(self.string()?))),
            _ if self.starts_number() => self.number().map(Some),
            _ => Ok(None),
        }
    }

    fn argument(&mut self) -> Result<Value, SyntaxError> {
        if let Some(value) = self.literal()? {
            return Ok(value);
        }
        let start = self.pos;
        match self.ident().and_then(keyword) {
            Some(value) => Ok(value),
            None => {
                self.pos = start;
                Err(self.error("filter arguments must be literals"))
            }
        }
    }

    fn filter(&mut self) -> Result<FilterCall, SyntaxError> {
        let start = self.pos;
        let Some(name) = self.ident() else {
            return Err(self.error("expected filter name after '|'"));
        };
        let Some(filter) = Filter::from_name(name) else {
            self.pos = start;
            return Err(self.error(format!("unknown filter '{}'", name)));
        };

        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some('(') {
            self.bump();
            self.skip_ws();
            if self.peek() == Some(')') {
                self.bump();
            } else {
                loop {
                    self.skip_ws();
                    args.push(self.argument()?);
                    self.skip_ws();
                    match self.bump() {
                        Some(',') => continue,
                        Some(')') => break,
                        _ => return Err(self.error("expected ',' or ')' in filter arguments")),
                    }
                }
            }
        }

        let (min, max) = filter.arity();
        if args.len() < min || args.len() > max {
            return Err(SyntaxError {
                position: self.base + start,
                details: format!(
                    "filter '{}' takes {} argument(s), got {}",
                    filter.name(),
                    if min == max { min.to_string() } else { format!("{}-{}", min, max) },
                    args.len()
                ),
            });
        }
        Ok(FilterCall { filter, args })
    }

    fn integer(&mut self) -> Result<i64, SyntaxError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        self.src[start..self.pos]
            .parse()
            .map_err(|_| self.error("invalid integer"))
    }

    fn number(&mut self) -> Result<Value, SyntaxError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        let is_float = self.peek() == Some('.')
            && matches!(self.peek_second(), Some(c) if c.is_ascii_digit());
        if is_float {
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }

        let text = &self.src[start..self.pos];
        if is_float {
            text.parse::<f64>()
                .map(Value::from)
                .map_err(|_| self.error("invalid number"))
        } else {
            text.parse::<i64>()
                .map(Value::from)
                .map_err(|_| self.error("invalid number"))
        }
    }

    fn string(&mut self) -> Result<String, SyntaxError> {
        let start = self.pos;
        let Some(quote) = self.bump() else {
            return Err(self.error("expected string"));
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                None => {
                    self.pos = start;
                    return Err(self.error("unterminated string literal"));
                }
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c) => out.push(c),
                    None => {
                        self.pos = start;
                        return Err(self.error("unterminated string literal"));
                    }
                },
                Some(c) => out.push(c),
            }
        }
    }
}

fn keyword(word: &str) -> Option<Value> {
    match word {
        "true" | "True" => Some(Value::Bool(true)),
        "false" | "False" => Some(Value::Bool(false)),
        "none" | "None" | "null" => Some(Value::Null),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(root: &str, segments: Vec<Segment>) -> Primary {
        Primary::Path(Path {
            root: root.to_string(),
            segments,
        })
    }

    #[test]
    fn test_parse_simple_variable() {
        let expr = Expr::parse(" region ", 0).unwrap();
        assert_eq!(expr.primary, path("region", vec![]));
        assert!(expr.filters.is_empty());
    }

    #[test]
    fn test_parse_path_segments() {
        let expr = Expr::parse("model.ref[0].name", 0).unwrap();
        assert_eq!(
            expr.primary,
            path(
                "model",
                vec![
                    Segment::Key("ref".into()),
                    Segment::Index(0),
                    Segment::Key("name".into())
                ]
            )
        );

        let expr = Expr::parse("gpus.1", 0).unwrap();
        assert_eq!(expr.primary, path("gpus", vec![Segment::Index(1)]));

        let expr = Expr::parse("labels['app.kubernetes.io/name']", 0).unwrap();
        assert_eq!(
            expr.primary,
            path("labels", vec![Segment::Key("app.kubernetes.io/name".into())])
        );
    }

    #[test]
    fn test_parse_filters_with_args() {
        let expr = Expr::parse("model|replace('/', '-')|dns", 0).unwrap();
        assert_eq!(expr.filters.len(), 2);
        assert_eq!(expr.filters[0].filter, Filter::Replace);
        assert_eq!(
            expr.filters[0].args,
            vec![Value::from("/"), Value::from("-")]
        );
        assert_eq!(expr.filters[1].filter, Filter::Dns);
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(
            Expr::parse("'a b'", 0).unwrap().primary,
            Primary::Literal(Value::from("a b"))
        );
        assert_eq!(
            Expr::parse("-42", 0).unwrap().primary,
            Primary::Literal(Value::from(-42i64))
        );
        assert_eq!(
            Expr::parse("1.5", 0).unwrap().primary,
            Primary::Literal(Value::from(1.5f64))
        );
        assert_eq!(
            Expr::parse("True", 0).unwrap().primary,
            Primary::Literal(Value::Bool(true))
        );
    }

    #[test]
    fn test_parse_errors_carry_absolute_position() {
        let err = Expr::parse("  ", 10).unwrap_err();
        assert_eq!(err.details, "empty expression");

        let err = Expr::parse("x|bogus", 5).unwrap_err();
        assert_eq!(err.position, 7);
        assert!(err.details.contains("unknown filter 'bogus'"));

        let err = Expr::parse("a b", 0).unwrap_err();
        assert!(err.details.contains("unexpected character 'b'"));

        let err = Expr::parse("x|replace('a')", 0).unwrap_err();
        assert!(err.details.contains("takes 2 argument(s)"));

        let err = Expr::parse("'open", 0).unwrap_err();
        assert!(err.details.contains("unterminated"));
    }

    #[test]
    fn test_eval_default_on_undefined() {
        let scope = Scope::new();
        let expr = Expr::parse("missing|default('x')|upper", 0).unwrap();
        assert_eq!(expr.eval(&scope), Outcome::Value(Value::from("X")));

        let expr = Expr::parse("missing|dns", 0).unwrap();
        assert_eq!(expr.eval(&scope), Outcome::Undefined("missing".into()));
    }

    #[test]
    fn test_enumerate_list() {
        let values: Value = serde_yaml::from_str("models: [a, b]\nn: 3").unwrap();
        let scope = Scope::from_values(&values).unwrap();

        let expr = Expr::parse("enumerate_list(models)", 0).unwrap();
        let expected: Value = serde_yaml::from_str("[{i: 0, item: a}, {i: 1, item: b}]").unwrap();
        assert_eq!(expr.eval(&scope), Outcome::Value(expected));

        let expr = Expr::parse("enumerate_list(missing)|length", 0).unwrap();
        assert_eq!(expr.eval(&scope), Outcome::Undefined("missing".into()));

        let expr = Expr::parse("enumerate_list(n)", 0).unwrap();
        assert!(matches!(expr.eval(&scope), Outcome::Invalid(ref d) if d.contains("number")));

        let err = Expr::parse("shuffle(models)", 0).unwrap_err();
        assert!(err.details.contains("unknown function 'shuffle'"));
    }

    #[test]
    fn test_eval_nested_path() {
        let values: Value = serde_yaml::from_str("model: {name: llama, gpus: [a, b]}").unwrap();
        let scope = Scope::from_values(&values).unwrap();

        let expr = Expr::parse("model.gpus[-1]", 0).unwrap();
        assert_eq!(expr.eval(&scope), Outcome::Value(Value::from("b")));

        let expr = Expr::parse("model.size", 0).unwrap();
        assert_eq!(expr.eval(&scope), Outcome::Undefined("model.size".into()));
    }
}
