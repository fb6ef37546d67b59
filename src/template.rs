//! Single-pass template renderer with caching
//!
//! Templates are tokenized once into literal ranges, parsed `{{ ... }}`
//! expressions and matched `{% for %}` / `{% if %}` / `{% set %}` blocks,
//! then cached behind `Arc` for reuse. Rendering runs in one of two modes:
//! - `Strict`: an unbound variable is an error
//! - `PreserveUnknown`: an unbound expression is written back verbatim so a
//!   later pass can resolve it; in statements it is falsy and iterates as empty
//!
//! The first newline after a statement or comment tag is dropped. A `-` inside
//! a tag delimiter (`{%- ... -%}`) strips the whitespace on that side.

use std::borrow::Cow;
use std::ops::Range;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_yaml::{Mapping, Value};

use crate::block::{Cond, Statement};
use crate::error::{Result, TektoncError};
use crate::expr::{iterate, Expr, Fault, SyntaxError};
use crate::filters::display;
use crate::scope::{kind_of, Scope};

/// Name of the per-iteration variable inside `{% for %}`
const LOOP: &str = "loop";

/// How unbound variables are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Strict,
    PreserveUnknown,
}

/// Token representing a parsed template fragment
#[derive(Debug, Clone)]
pub enum Token {
    /// Literal text (stores range in original string)
    Literal(Range<usize>),
    /// `{{ expr }}`; `span` covers the braces
    Expr { span: Range<usize>, expr: Expr },
    /// `{% for target in iter %} body {% else %} otherwise {% endfor %}`
    For {
        target: String,
        iter: Expr,
        body: Vec<Token>,
        otherwise: Vec<Token>,
    },
    /// `{% if %}` with its `elif` branches in order
    If {
        branches: Vec<(Cond, Vec<Token>)>,
        otherwise: Vec<Token>,
    },
    Set { name: String, value: Expr },
}

/// Tag stream before statements are matched into blocks
enum Lexeme {
    Token(Token),
    Statement { position: usize, stmt: Statement },
}

/// True if `s` contains any tag opener
pub fn has_template_syntax(s: &str) -> bool {
    s.contains("{{") || s.contains("{%") || s.contains("{#")
}

/// Template renderer with a token cache
pub struct TemplateRenderer {
    /// Cache of parsed templates
    cache: DashMap<String, Arc<Vec<Token>>>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Parse template into tokens (with caching)
    pub fn tokenize(&self, template: &str) -> std::result::Result<Arc<Vec<Token>>, SyntaxError> {
        if let Some(cached) = self.cache.get(template) {
            return Ok(Arc::clone(&cached));
        }

        let tokens = Arc::new(blocks(scan(template)?)?);
        self.cache.insert(template.to_string(), Arc::clone(&tokens));
        Ok(tokens)
    }

    /// Render `template` against `scope`
    ///
    /// Returns `Cow::Borrowed` when the template has no tag syntax.
    pub fn render<'a>(
        &self,
        template: &'a str,
        scope: &Scope,
        mode: RenderMode,
    ) -> Result<Cow<'a, str>> {
        if !has_template_syntax(template) {
            return Ok(Cow::Borrowed(template));
        }

        let tokens = self
            .tokenize(template)
            .map_err(|e| TektoncError::TemplateSyntax {
                template: template.to_string(),
                position: e.position,
                details: e.details,
                scope_keys: scope.keys(),
            })?;

        let mut result = String::with_capacity(template.len() + 64);
        let pass = Pass { template, mode };
        pass.render(&tokens, &mut scope.clone(), &mut result)?;
        Ok(Cow::Owned(result))
    }

    /// Number of cached templates
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// One rendering of one template
struct Pass<'t> {
    template: &'t str,
    mode: RenderMode,
}

impl Pass<'_> {
    fn lenient(&self) -> bool {
        self.mode == RenderMode::PreserveUnknown
    }

    fn render(&self, tokens: &[Token], scope: &mut Scope, out: &mut String) -> Result<()> {
        for token in tokens {
            match token {
                Token::Literal(range) => out.push_str(&self.template[range.clone()]),
                Token::Expr { span, expr } => match expr.eval(scope).into_result() {
                    Ok(value) => out.push_str(&display(&value)),
                    // Keep original expression (filters included) for the next pass
                    Err(Fault::Undefined(_)) if self.lenient() => {
                        out.push_str(&self.template[span.clone()])
                    }
                    Err(fault) => return Err(self.fault(fault, scope)),
                },
                Token::Set { name, value } => match value.eval(scope).into_result() {
                    Ok(value) => *scope = scope.extend(vec![(name.clone(), value)]),
                    Err(Fault::Undefined(_)) if self.lenient() => {}
                    Err(fault) => return Err(self.fault(fault, scope)),
                },
                Token::If {
                    branches,
                    otherwise,
                } => {
                    let mut chosen = otherwise;
                    for (cond, body) in branches {
                        let hit = cond
                            .eval(scope, self.lenient())
                            .map_err(|fault| self.fault(fault, scope))?;
                        if hit {
                            chosen = body;
                            break;
                        }
                    }
                    // `set` inside an `if` stays visible afterwards
                    self.render(chosen, scope, out)?;
                }
                Token::For {
                    target,
                    iter,
                    body,
                    otherwise,
                } => {
                    let items = match iter.eval(scope).into_result() {
                        Ok(value) => iterate(&value).ok_or_else(|| {
                            self.fault(
                                Fault::Invalid(format!("cannot iterate over {}", kind_of(&value))),
                                scope,
                            )
                        })?,
                        Err(Fault::Undefined(_)) if self.lenient() => Vec::new(),
                        Err(fault) => return Err(self.fault(fault, scope)),
                    };

                    if items.is_empty() {
                        self.render(otherwise, &mut scope.clone(), out)?;
                    }
                    for (i, item) in items.iter().enumerate() {
                        let mut inner = scope.extend(vec![
                            (target.clone(), item.clone()),
                            (LOOP.to_string(), loop_info(&items, i)),
                        ]);
                        self.render(body, &mut inner, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn fault(&self, fault: Fault, scope: &Scope) -> TektoncError {
        match fault {
            Fault::Undefined(name) => TektoncError::UndefinedVariable {
                name,
                template: self.template.to_string(),
                scope_keys: scope.keys(),
            },
            Fault::Invalid(details) => TektoncError::TemplateType {
                template: self.template.to_string(),
                details,
                scope_keys: scope.keys(),
            },
        }
    }
}

/// `loop.index`, `loop.first`, `loop.previtem`, ... for iteration `i`
fn loop_info(items: &[Value], i: usize) -> Value {
    let len = items.len();
    let mut info = Mapping::new();
    info.insert("index".into(), Value::from((i + 1) as u64));
    info.insert("index0".into(), Value::from(i as u64));
    info.insert("revindex".into(), Value::from((len - i) as u64));
    info.insert("revindex0".into(), Value::from((len - i - 1) as u64));
    info.insert("first".into(), Value::Bool(i == 0));
    info.insert("last".into(), Value::Bool(i + 1 == len));
    info.insert("length".into(), Value::from(len as u64));
    if let Some(prev) = i.checked_sub(1).and_then(|p| items.get(p)) {
        info.insert("previtem".into(), prev.clone());
    }
    if let Some(next) = items.get(i + 1) {
        info.insert("nextitem".into(), next.clone());
    }
    Value::Mapping(info)
}

/// Split a template into literals, expressions and statement tags
fn scan(template: &str) -> std::result::Result<Vec<Lexeme>, SyntaxError> {
    let bytes = template.as_bytes();
    let mut lexemes = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i + 1 < bytes.len() {
        let kind = bytes[i + 1];
        if bytes[i] != b'{' || !matches!(kind, b'{' | b'%' | b'#') {
            i += 1;
            continue;
        }

        let closer = if kind == b'{' { b'}' } else { kind };
        let Some(close) = find_close(bytes, i + 2, closer, kind != b'#') else {
            let details = match kind {
                b'{' => "unclosed '{{' (missing '}}')",
                b'%' => "unclosed '{%' (missing '%}')",
                _ => "unclosed comment '{#' (missing '#}')",
            };
            return Err(SyntaxError {
                position: i,
                details: details.to_string(),
            });
        };

        let strip_before = bytes[i + 2] == b'-';
        let inner_start = i + 2 + usize::from(strip_before);
        let strip_after = close > inner_start && bytes[close - 1] == b'-';
        let inner = &template[inner_start..close - usize::from(strip_after)];

        let mut literal_end = i;
        if strip_before {
            while literal_end > literal_start && bytes[literal_end - 1].is_ascii_whitespace() {
                literal_end -= 1;
            }
        }
        if literal_end > literal_start {
            lexemes.push(Lexeme::Token(Token::Literal(literal_start..literal_end)));
        }

        match kind {
            b'{' => lexemes.push(Lexeme::Token(Token::Expr {
                span: i..close + 2,
                expr: Expr::parse(inner, inner_start)?,
            })),
            b'%' => lexemes.push(Lexeme::Statement {
                position: i,
                stmt: Statement::parse(inner, inner_start)?,
            }),
            _ => {}
        }

        let mut next = close + 2;
        if strip_after {
            while next < bytes.len() && bytes[next].is_ascii_whitespace() {
                next += 1;
            }
        } else if kind != b'{' {
            if bytes[next..].starts_with(b"\r\n") {
                next += 2;
            } else if bytes[next..].starts_with(b"\n") {
                next += 1;
            }
        }
        i = next;
        literal_start = next;
    }

    if literal_start < template.len() {
        lexemes.push(Lexeme::Token(Token::Literal(literal_start..template.len())));
    }
    Ok(lexemes)
}

/// Statement that ended a block, with its tag position
type Closer = (usize, Statement);

/// Match statement tags into nested blocks
fn blocks(lexemes: Vec<Lexeme>) -> std::result::Result<Vec<Token>, SyntaxError> {
    let mut stream = lexemes.into_iter();
    match block(&mut stream)? {
        (tokens, None) => Ok(tokens),
        (_, Some((position, stmt))) => Err(SyntaxError {
            position,
            details: format!("unexpected '{{% {} %}}'", stmt.keyword()),
        }),
    }
}

/// Tokens up to the first unmatched `else` / `elif` / `end*` tag
fn block(
    stream: &mut std::vec::IntoIter<Lexeme>,
) -> std::result::Result<(Vec<Token>, Option<Closer>), SyntaxError> {
    let mut tokens = Vec::new();
    while let Some(lexeme) = stream.next() {
        let (position, stmt) = match lexeme {
            Lexeme::Token(token) => {
                tokens.push(token);
                continue;
            }
            Lexeme::Statement { position, stmt } => (position, stmt),
        };

        match stmt {
            Statement::Set { name, value } => tokens.push(Token::Set { name, value }),
            Statement::For { target, iter } => {
                let (body, closer) = block(stream)?;
                let (otherwise, closer) = match closer {
                    Some((_, Statement::Else)) => block(stream)?,
                    other => (Vec::new(), other),
                };
                expect_end(closer, position, "for", &Statement::EndFor)?;
                tokens.push(Token::For {
                    target,
                    iter,
                    body,
                    otherwise,
                });
            }
            Statement::If(first) => {
                let mut branches = Vec::new();
                let mut cond = first;
                let otherwise = loop {
                    let (body, closer) = block(stream)?;
                    branches.push((cond, body));
                    match closer {
                        Some((_, Statement::Elif(next))) => cond = next,
                        Some((_, Statement::Else)) => {
                            let (body, closer) = block(stream)?;
                            expect_end(closer, position, "if", &Statement::EndIf)?;
                            break body;
                        }
                        other => {
                            expect_end(other, position, "if", &Statement::EndIf)?;
                            break Vec::new();
                        }
                    }
                };
                tokens.push(Token::If {
                    branches,
                    otherwise,
                });
            }
            closer => return Ok((tokens, Some((position, closer)))),
        }
    }
    Ok((tokens, None))
}

fn expect_end(
    closer: Option<Closer>,
    opened_at: usize,
    opener: &str,
    end: &Statement,
) -> std::result::Result<(), SyntaxError> {
    match closer {
        Some((_, stmt)) if stmt == *end => Ok(()),
        Some((position, stmt)) => Err(SyntaxError {
            position,
            details: format!(
                "expected '{{% end{} %}}', found '{{% {} %}}'",
                opener,
                stmt.keyword()
            ),
        }),
        None => Err(SyntaxError {
            position: opened_at,
            details: format!("unclosed '{{% {} %}}' (missing '{{% end{} %}}')", opener, opener),
        }),
    }
}

/// Find the `X}` closing a tag, skipping quoted strings when `quoted`
fn find_close(bytes: &[u8], from: usize, closer: u8, quoted: bool) -> Option<usize> {
    let mut quote: Option<u8> = None;
    let mut j = from;
    while j < bytes.len() {
        let b = bytes[j];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    j += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if quoted && (b == b'\'' || b == b'"') {
                    quote = Some(b);
                } else if b == closer && bytes.get(j + 1) == Some(&b'}') {
                    return Some(j);
                }
            }
        }
        j += 1;
    }
    None
}

/// Global renderer instance
pub static RENDERER: Lazy<TemplateRenderer> = Lazy::new(TemplateRenderer::new);

/// Convenience function for rendering with the global renderer
pub fn render<'a>(template: &'a str, scope: &Scope, mode: RenderMode) -> Result<Cow<'a, str>> {
    RENDERER.render(template, scope, mode)
}
