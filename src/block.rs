//! Statement tags: `{% for %}`, `{% if %}` and `{% set %}`
//!
//! ```text
//! stmt    := 'for' name 'in' expr | 'else' | 'endfor'
//!          | 'if' cond | 'elif' cond | 'endif'
//!          | 'set' name '=' expr
//! cond    := and ('or' and)*
//! and     := not ('and' not)*
//! not     := 'not' not | '(' cond ')' | compare
//! compare := expr (op expr | 'is' 'not'? ('defined' | 'undefined' | 'none'))?
//! op      := '==' | '!=' | '<=' | '>=' | '<' | '>' | 'in' | 'not' 'in'
//! ```

use std::cmp::Ordering;

use serde_yaml::Value;

use crate::expr::{Expr, Fault, Outcome, Parser, SyntaxError};
use crate::scope::Scope;

/// Parsed contents of one `{% ... %}` tag
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    For { target: String, iter: Expr },
    EndFor,
    If(Cond),
    Elif(Cond),
    Else,
    EndIf,
    Set { name: String, value: Expr },
}

impl Statement {
    /// Parse the text between `{%` and `%}`; `base` is its offset in the template
    pub fn parse(src: &str, base: usize) -> Result<Self, SyntaxError> {
        let mut p = Parser::new(src, base);
        p.skip_ws();
        if p.at_end() {
            return Err(p.error("empty statement"));
        }

        let stmt = if p.eat_keyword("for") {
            let target = p.name()?;
            if !p.eat_keyword("in") {
                return Err(p.error("expected 'in' after the loop variable"));
            }
            Statement::For {
                target,
                iter: p.expression()?,
            }
        } else if p.eat_keyword("endfor") {
            Statement::EndFor
        } else if p.eat_keyword("if") {
            Statement::If(Cond::parse(&mut p)?)
        } else if p.eat_keyword("elif") {
            Statement::Elif(Cond::parse(&mut p)?)
        } else if p.eat_keyword("else") {
            Statement::Else
        } else if p.eat_keyword("endif") {
            Statement::EndIf
        } else if p.eat_keyword("set") {
            let name = p.name()?;
            p.expect('=')?;
            Statement::Set {
                name,
                value: p.expression()?,
            }
        } else {
            return Err(p.error("unknown statement (expected for, if, elif, else, endfor, endif or set)"));
        };

        p.finish()?;
        Ok(stmt)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Statement::For { .. } => "for",
            Statement::EndFor => "endfor",
            Statement::If(_) => "if",
            Statement::Elif(_) => "elif",
            Statement::Else => "else",
            Statement::EndIf => "endif",
            Statement::Set { .. } => "set",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Test {
    Defined,
    Undefined,
    None,
}

/// Condition of an `if` / `elif` tag
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Truthy(Expr),
    Not(Box<Cond>),
    And(Box<Cond>, Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
    Compare(Expr, CompareOp, Expr),
    Is { expr: Expr, test: Test, negated: bool },
}

impl Cond {
    fn parse(p: &mut Parser<'_>) -> Result<Self, SyntaxError> {
        let mut left = Self::and(p)?;
        while p.eat_keyword("or") {
            left = Cond::Or(Box::new(left), Box::new(Self::and(p)?));
        }
        Ok(left)
    }

    fn and(p: &mut Parser<'_>) -> Result<Self, SyntaxError> {
        let mut left = Self::not(p)?;
        while p.eat_keyword("and") {
            left = Cond::And(Box::new(left), Box::new(Self::not(p)?));
        }
        Ok(left)
    }

    fn not(p: &mut Parser<'_>) -> Result<Self, SyntaxError> {
        if p.eat_keyword("not") {
            return Ok(Cond::Not(Box::new(Self::not(p)?)));
        }
        if p.eat("(") {
            let inner = Self::parse(p)?;
            p.expect(')')?;
            return Ok(inner);
        }
        Self::compare(p)
    }

    fn compare(p: &mut Parser<'_>) -> Result<Self, SyntaxError> {
        let left = p.expression()?;

        if p.eat_keyword("is") {
            let negated = p.eat_keyword("not");
            let test = if p.eat_keyword("defined") {
                Test::Defined
            } else if p.eat_keyword("undefined") {
                Test::Undefined
            } else if p.eat_keyword("none") {
                Test::None
            } else {
                return Err(p.error("expected 'defined', 'undefined' or 'none' after 'is'"));
            };
            return Ok(Cond::Is {
                expr: left,
                test,
                negated,
            });
        }

        // Two-character operators first so '<=' is not read as '<'
        let op = if p.eat("==") {
            CompareOp::Eq
        } else if p.eat("!=") {
            CompareOp::Ne
        } else if p.eat("<=") {
            CompareOp::Le
        } else if p.eat(">=") {
            CompareOp::Ge
        } else if p.eat("<") {
            CompareOp::Lt
        } else if p.eat(">") {
            CompareOp::Gt
        } else if p.eat_keyword("in") {
            CompareOp::In
        } else if p.eat_keyword("not") {
            if !p.eat_keyword("in") {
                return Err(p.error("expected 'in' after 'not'"));
            }
            CompareOp::NotIn
        } else {
            return Ok(Cond::Truthy(left));
        };
        Ok(Cond::Compare(left, op, p.expression()?))
    }

    /// Evaluate against `scope`
    ///
    /// With `lenient`, an undefined operand is falsy and compares unequal to
    /// everything; otherwise it is a `Fault::Undefined`.
    pub fn eval(&self, scope: &Scope, lenient: bool) -> Result<bool, Fault> {
        match self {
            Cond::Truthy(expr) => match operand(expr, scope, lenient)? {
                Some(value) => Ok(truthy(&value)),
                None => Ok(false),
            },
            Cond::Not(inner) => Ok(!inner.eval(scope, lenient)?),
            Cond::And(a, b) => Ok(a.eval(scope, lenient)? && b.eval(scope, lenient)?),
            Cond::Or(a, b) => Ok(a.eval(scope, lenient)? || b.eval(scope, lenient)?),
            Cond::Is {
                expr,
                test,
                negated,
            } => {
                let hit = match (test, expr.eval(scope)) {
                    (_, Outcome::Invalid(details)) => return Err(Fault::Invalid(details)),
                    (Test::Defined, Outcome::Value(_)) => true,
                    (Test::Undefined, Outcome::Undefined(_)) => true,
                    (Test::None, Outcome::Value(Value::Null)) => true,
                    (Test::None, Outcome::Undefined(name)) if !lenient => {
                        return Err(Fault::Undefined(name))
                    }
                    _ => false,
                };
                Ok(hit != *negated)
            }
            Cond::Compare(left, op, right) => {
                let (Some(l), Some(r)) = (operand(left, scope, lenient)?, operand(right, scope, lenient)?) else {
                    return Ok(matches!(op, CompareOp::Ne | CompareOp::NotIn));
                };
                Ok(match op {
                    CompareOp::Eq => equals(&l, &r),
                    CompareOp::Ne => !equals(&l, &r),
                    CompareOp::Lt => order(&l, &r) == Some(Ordering::Less),
                    CompareOp::Le => matches!(order(&l, &r), Some(Ordering::Less | Ordering::Equal)),
                    CompareOp::Gt => order(&l, &r) == Some(Ordering::Greater),
                    CompareOp::Ge => matches!(order(&l, &r), Some(Ordering::Greater | Ordering::Equal)),
                    CompareOp::In => contains(&r, &l),
                    CompareOp::NotIn => !contains(&r, &l),
                })
            }
        }
    }
}

/// `Ok(None)` for an undefined operand in lenient mode
fn operand(expr: &Expr, scope: &Scope, lenient: bool) -> Result<Option<Value>, Fault> {
    match expr.eval(scope).into_result() {
        Ok(value) => Ok(Some(value)),
        Err(Fault::Undefined(_)) if lenient => Ok(None),
        Err(fault) => Err(fault),
    }
}

/// Truthiness: empty strings and collections, zero, false and null are false
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Sequence(seq) => !seq.is_empty(),
        Value::Mapping(map) => !map.is_empty(),
        Value::Tagged(tagged) => truthy(&tagged.value),
    }
}

fn equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Sequence(seq) => seq.iter().any(|v| equals(v, needle)),
        Value::Mapping(map) => map.contains_key(needle),
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Tagged(tagged) => contains(&tagged.value, needle),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(yaml: &str) -> Scope {
        Scope::from_yaml_str(yaml).unwrap()
    }

    fn check(cond: &str, s: &Scope) -> bool {
        match Statement::parse(&format!("if {}", cond), 0).unwrap() {
            Statement::If(c) => c.eval(s, false).unwrap(),
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn test_parse_for_and_set() {
        match Statement::parse(" for m in enumerate_list(models) ", 0).unwrap() {
            Statement::For { target, .. } => assert_eq!(target, "m"),
            other => panic!("unexpected statement: {other:?}"),
        }
        match Statement::parse("set prev = m.item|dns", 0).unwrap() {
            Statement::Set { name, value } => {
                assert_eq!(name, "prev");
                assert_eq!(value.filters.len(), 1);
            }
            other => panic!("unexpected statement: {other:?}"),
        }
        assert_eq!(Statement::parse("endfor", 0).unwrap(), Statement::EndFor);
        assert_eq!(Statement::parse(" else ", 0).unwrap().keyword(), "else");
    }

    #[test]
    fn test_parse_errors() {
        let err = Statement::parse("while x", 4).unwrap_err();
        assert!(err.details.contains("unknown statement"));
        assert_eq!(err.position, 4);

        let err = Statement::parse("for m models", 0).unwrap_err();
        assert!(err.details.contains("expected 'in'"));

        let err = Statement::parse("endif now", 0).unwrap_err();
        assert!(err.details.contains("unexpected character 'n'"));

        let err = Statement::parse("if x is odd", 0).unwrap_err();
        assert!(err.details.contains("after 'is'"));
    }

    #[test]
    fn test_comparisons() {
        let s = scope("i: 2\nname: llama\nskip: [qwen]\nratio: 2.0");
        assert!(check("i == 2", &s));
        assert!(check("i == ratio", &s));
        assert!(check("i > 0 and i <= 2", &s));
        assert!(check("not i < 2", &s));
        assert!(check("name != 'qwen' or i == 0", &s));
        assert!(check("name not in skip", &s));
        assert!(check("'lla' in name", &s));
        assert!(check("(i == 1 or i == 2) and name", &s));
        assert!(!check("name < 3", &s));
    }

    #[test]
    fn test_tests_and_truthiness() {
        let s = scope("empty: []\nzero: 0\nnothing: null\nflag: true");
        assert!(!check("empty", &s));
        assert!(!check("zero", &s));
        assert!(check("flag", &s));
        assert!(check("nothing is none", &s));
        assert!(check("missing is undefined", &s));
        assert!(check("flag is defined", &s));
        assert!(check("missing is not defined", &s));
    }

    #[test]
    fn test_undefined_operands() {
        let s = scope("i: 1");
        let Statement::If(cond) = Statement::parse("if missing == 1", 0).unwrap() else {
            panic!("expected if");
        };
        assert_eq!(cond.eval(&s, true), Ok(false));
        assert_eq!(cond.eval(&s, false), Err(Fault::Undefined("missing".into())));

        let Statement::If(cond) = Statement::parse("if missing != 1", 0).unwrap() else {
            panic!("expected if");
        };
        assert_eq!(cond.eval(&s, true), Ok(true));

        let Statement::If(cond) = Statement::parse("if not missing", 0).unwrap() else {
            panic!("expected if");
        };
        assert_eq!(cond.eval(&s, true), Ok(true));
    }
}
