//! Persistent variable scope
//!
//! A `Scope` is a chain of immutable frames shared behind `Arc`. Extending a
//! scope pushes a new frame on top of the parent; the parent, and every other
//! scope built from it, never observes the new bindings.

use std::sync::Arc;

use serde_yaml::Value;

use crate::domain::Binding;
use crate::error::{Result, TektoncError};

#[derive(Debug)]
struct Frame {
    vars: Vec<(String, Value)>,
    parent: Option<Arc<Frame>>,
}

/// Variables visible at one point of the expansion
#[derive(Debug, Clone, Default)]
pub struct Scope {
    head: Option<Arc<Frame>>,
}

impl Scope {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the root scope from a values document
    ///
    /// `null` (an empty file) gives an empty scope; anything other than a
    /// mapping with string keys is rejected.
    pub fn from_values(values: &Value) -> Result<Self> {
        let map = match values {
            Value::Null => return Ok(Self::new()),
            Value::Mapping(map) => map,
            other => {
                return Err(TektoncError::InvalidValues {
                    details: format!("expected a mapping, found {}", kind_of(other)),
                })
            }
        };

        let mut vars = Vec::with_capacity(map.len());
        for (key, value) in map {
            let Value::String(name) = key else {
                return Err(TektoncError::InvalidValues {
                    details: format!("keys must be strings, found {}", kind_of(key)),
                });
            };
            vars.push((name.clone(), value.clone()));
        }
        Ok(Self::new().extend(vars))
    }

    /// Parse a YAML (or JSON) values file into a root scope
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        let values: Value = serde_yaml::from_str(text)?;
        Self::from_values(&values)
    }

    /// Return a new scope with `vars` overlaid on top of this one
    pub fn extend(&self, vars: Vec<(String, Value)>) -> Self {
        if vars.is_empty() {
            return self.clone();
        }
        Self {
            head: Some(Arc::new(Frame {
                vars,
                parent: self.head.clone(),
            })),
        }
    }

    /// Overlay a loop binding (binding wins on name collision)
    pub fn with_binding(&self, binding: &Binding) -> Self {
        let mut vars = Vec::with_capacity(binding.len());
        vars.extend(binding.iter().map(|(name, value)| (name.to_string(), value.clone())));
        self.extend(vars)
    }

    /// Look up a variable, innermost frame first
    pub fn get(&self, name: &str) -> Option<&Value> {
        let mut frame = self.head.as_deref();
        while let Some(f) = frame {
            if let Some((_, value)) = f.vars.iter().rev().find(|(n, _)| n == name) {
                return Some(value);
            }
            frame = f.parent.as_deref();
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Visible variable names in first-definition order
    pub fn keys(&self) -> Vec<String> {
        let mut frames = Vec::new();
        let mut frame = self.head.as_deref();
        while let Some(f) = frame {
            frames.push(f);
            frame = f.parent.as_deref();
        }

        let mut keys: Vec<String> = Vec::new();
        for f in frames.into_iter().rev() {
            for (name, _) in &f.vars {
                if !keys.iter().any(|k| k == name) {
                    keys.push(name.clone());
                }
            }
        }
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }
}

/// Short type name of a YAML value for diagnostics
pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}
