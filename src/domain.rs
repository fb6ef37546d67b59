//! Cartesian binding generation for `foreach.domain`

use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::error::{Result, TektoncError};
use crate::scope::kind_of;

/// One concrete assignment of every domain variable, ordered by name
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Binding {
    vars: Vec<(String, Value)>,
}

impl Binding {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Enumerate the Cartesian product of a domain
///
/// Keys are visited in lexicographic order whatever their authored order;
/// each key's values keep their authored order, and the last key varies
/// fastest. `at` locates the loop in error messages.
pub fn bindings(domain: &Value, at: &str) -> Result<Vec<Binding>> {
    let Value::Mapping(map) = domain else {
        return Err(TektoncError::DomainType {
            at: at.to_string(),
            variable: "*".to_string(),
            found: format!("{} (foreach.domain must be a mapping of {{var: [values]}})", kind_of(domain)),
        });
    };

    let axes = sorted_axes(map, at)?;

    let mut out = vec![Binding::default()];
    for (name, values) in &axes {
        if values.is_empty() {
            warn!(at, variable = %name, "empty domain list, loop expands to nothing");
        }
        let mut next = Vec::with_capacity(out.len() * values.len());
        for prefix in &out {
            for value in values.iter() {
                let mut binding = prefix.clone();
                binding.vars.push((name.to_string(), value.clone()));
                next.push(binding);
            }
        }
        out = next;
    }
    Ok(out)
}

fn sorted_axes<'a>(map: &'a Mapping, at: &str) -> Result<Vec<(&'a str, &'a [Value])>> {
    let mut axes = Vec::with_capacity(map.len());
    for (key, values) in map {
        let Value::String(name) = key else {
            return Err(TektoncError::DomainType {
                at: at.to_string(),
                variable: format!("{:?}", key),
                found: format!("{} key (variable names must be strings)", kind_of(key)),
            });
        };
        // A bare string must never be iterated character by character.
        let Value::Sequence(seq) = values else {
            return Err(TektoncError::DomainType {
                at: at.to_string(),
                variable: name.clone(),
                found: kind_of(values).to_string(),
            });
        };
        axes.push((name.as_str(), seq.as_slice()));
    }
    axes.sort_by(|a, b| a.0.cmp(b.0));
    Ok(axes)
}
