//! Loop/task classification of pipeline nodes

use serde_yaml::{Sequence, Value};

use crate::error::{Result, TektoncError};
use crate::scope::kind_of;

pub const LOOP_NAME: &str = "loopName";
pub const FOREACH: &str = "foreach";
pub const DOMAIN: &str = "domain";
pub const TASKS: &str = "tasks";

/// A loop construct, borrowed from the source tree
#[derive(Debug, Clone, Copy)]
pub struct LoopNode<'a> {
    pub name: &'a str,
    pub domain: &'a Value,
    pub tasks: &'a Sequence,
}

/// Classified node
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Loop(LoopNode<'a>),
    /// Opaque task payload
    Task(&'a Value),
}

/// Classify `node`; `at` locates it in error messages
///
/// A loop is a mapping carrying `loopName`, `foreach` (a mapping with
/// `domain`) and `tasks`. Anything missing one of these is a task. A node
/// that has all three but a non-list `tasks` or a non-string `loopName`
/// is malformed.
pub fn classify<'a>(node: &'a Value, at: &str) -> Result<Node<'a>> {
    let Value::Mapping(map) = node else {
        return Ok(Node::Task(node));
    };

    let (Some(name), Some(foreach), Some(tasks)) =
        (map.get(LOOP_NAME), map.get(FOREACH), map.get(TASKS))
    else {
        return Ok(Node::Task(node));
    };

    let Some(domain) = foreach.as_mapping().and_then(|f| f.get(DOMAIN)) else {
        return Ok(Node::Task(node));
    };

    let Value::Sequence(tasks) = tasks else {
        return Err(TektoncError::structural(
            at,
            format!("loop 'tasks' must be a list, found {}", kind_of(tasks)),
        ));
    };

    let Value::String(name) = name else {
        return Err(TektoncError::structural(
            at,
            format!("'loopName' must be a string, found {}", kind_of(name)),
        ));
    };

    Ok(Node::Loop(LoopNode {
        name: name.as_str(),
        domain,
        tasks,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_loop_node() {
        let node = yaml(
            r#"
loopName: per-region
foreach:
  domain:
    region: [us, eu]
tasks:
  - name: deploy
"#,
        );
        match classify(&node, "spec.tasks[0]").unwrap() {
            Node::Loop(l) => {
                assert_eq!(l.name, "per-region");
                assert_eq!(l.tasks.len(), 1);
                assert!(l.domain.is_mapping());
            }
            Node::Task(_) => panic!("expected loop"),
        }
    }

    #[test]
    fn test_plain_task_with_tasks_field() {
        // A task that happens to carry `tasks` is still a task.
        let node = yaml("name: build\ntasks: [a, b]");
        assert!(matches!(classify(&node, "x").unwrap(), Node::Task(_)));
    }

    #[test]
    fn test_foreach_without_domain_is_task() {
        let node = yaml("loopName: l\nforeach: {items: [1]}\ntasks: []");
        assert!(matches!(classify(&node, "x").unwrap(), Node::Task(_)));

        let node = yaml("loopName: l\nforeach: [1]\ntasks: []");
        assert!(matches!(classify(&node, "x").unwrap(), Node::Task(_)));
    }

    #[test]
    fn test_scalar_is_task() {
        let node = yaml("just-a-string");
        assert!(matches!(classify(&node, "x").unwrap(), Node::Task(_)));
    }

    #[test]
    fn test_loop_shaped_with_bad_tasks_is_structural() {
        let node = yaml("loopName: l\nforeach: {domain: {a: [1]}}\ntasks: {name: t}");
        let err = classify(&node, "spec.tasks[3]").unwrap_err();
        match err {
            TektoncError::Structural { at, details } => {
                assert_eq!(at, "spec.tasks[3]");
                assert!(details.contains("must be a list"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_string_loop_name_is_structural() {
        let node = yaml("loopName: 7\nforeach: {domain: {a: [1]}}\ntasks: []");
        assert!(matches!(
            classify(&node, "x"),
            Err(TektoncError::Structural { .. })
        ));
    }
}
