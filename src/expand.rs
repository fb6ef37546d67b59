//! Loop expansion
//!
//! Walks `spec.tasks` / `spec.finally`, replacing every loop node with the
//! concatenated expansion of its children for each Cartesian binding, and
//! rendering the string leaves of every task against the scope accumulated
//! from its enclosing loops.
//!
//! Names of tasks emitted by a loop are disambiguated per [`TaskNaming`].
//! A renamed task drags along the `runAfter` entries of the tasks emitted in
//! the same binding, so dependencies between siblings keep resolving.

use std::collections::{HashMap, HashSet};

use serde_yaml::{Mapping, Value};
use tracing::{debug, instrument, warn};

use crate::domain::bindings;
use crate::error::{Result, TektoncError};
use crate::node::{classify, Node, TASKS};
use crate::scope::{kind_of, Scope};
use crate::template::{RenderMode, TemplateRenderer, RENDERER};

const SPEC: &str = "spec";
const FINALLY: &str = "finally";
const NAME: &str = "name";
const RUN_AFTER: &str = "runAfter";

/// How names of tasks emitted by loops are made distinct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TaskNaming {
    /// Append `-{i}` (binding index within the loop) to names that would
    /// otherwise repeat across the loop's bindings
    #[default]
    LoopIndex,
    /// Append the binding index of every enclosing loop, outermost first
    BindingPath,
    /// Leave names as rendered
    Preserve,
}

/// Task produced by the expander
#[derive(Debug)]
struct Emitted {
    task: Value,
    /// Byte length of the rendered name before any loop suffix
    base_len: usize,
}

impl Emitted {
    fn new(task: Value) -> Self {
        let base_len = name_of(&task).map_or(0, str::len);
        Self { task, base_len }
    }

    fn name(&self) -> Option<&str> {
        name_of(&self.task)
    }

    fn set_name(&mut self, name: String) {
        if let Some(map) = self.task.as_mapping_mut() {
            map.insert(Value::from(NAME), Value::String(name));
        }
    }
}

/// Loop expander
pub struct Expander<'r> {
    renderer: &'r TemplateRenderer,
    naming: TaskNaming,
}

impl Default for Expander<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl Expander<'static> {
    /// Expander backed by the global renderer
    pub fn new() -> Self {
        Self {
            renderer: &RENDERER,
            naming: TaskNaming::default(),
        }
    }
}

impl<'r> Expander<'r> {
    pub fn with_renderer(renderer: &'r TemplateRenderer) -> Self {
        Self {
            renderer,
            naming: TaskNaming::default(),
        }
    }

    pub fn with_naming(mut self, naming: TaskNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Expand a list of nodes into a flat list of concrete tasks
    pub fn expand(&self, nodes: &[Value], scope: &Scope) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        self.expand_into(nodes, scope, "tasks", &mut out)?;
        Ok(out.into_iter().map(|e| e.task).collect())
    }

    /// Expand `spec.tasks` and `spec.finally` of a pipeline document
    ///
    /// Returns a new document; every other field is copied unchanged.
    #[instrument(skip_all)]
    pub fn expand_document(&self, doc: &Value, globals: &Scope) -> Result<Value> {
        let Value::Mapping(root) = doc else {
            return Err(TektoncError::structural(
                "document",
                format!("expected a mapping, found {}", kind_of(doc)),
            ));
        };
        let spec = match root.get(SPEC) {
            Some(Value::Mapping(spec)) => spec,
            Some(other) => {
                return Err(TektoncError::structural(
                    SPEC,
                    format!("expected a mapping, found {}", kind_of(other)),
                ))
            }
            None => return Err(TektoncError::structural(SPEC, "missing 'spec' section")),
        };

        let mut new_spec = spec.clone();

        let tasks = section(spec, TASKS)?
            .ok_or_else(|| TektoncError::structural("spec.tasks", "'spec.tasks' is required"))?;
        let expanded = self.expand_section(tasks, globals, "spec.tasks")?;
        new_spec.insert(Value::from(TASKS), Value::Sequence(expanded));

        if let Some(finally) = section(spec, FINALLY)? {
            let expanded = self.expand_section(finally, globals, "spec.finally")?;
            new_spec.insert(Value::from(FINALLY), Value::Sequence(expanded));
        }

        let mut out = root.clone();
        out.insert(Value::from(SPEC), Value::Mapping(new_spec));
        Ok(Value::Mapping(out))
    }

    fn expand_section(&self, nodes: &[Value], globals: &Scope, at: &str) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        self.expand_into(nodes, globals, at, &mut out)?;
        debug!(section = at, tasks = out.len(), "expanded section");
        warn_duplicate_names(&out, at);
        Ok(out.into_iter().map(|e| e.task).collect())
    }

    fn expand_into(
        &self,
        nodes: &[Value],
        scope: &Scope,
        at: &str,
        out: &mut Vec<Emitted>,
    ) -> Result<()> {
        for (pos, node) in nodes.iter().enumerate() {
            let here = format!("{}[{}]", at, pos);
            match classify(node, &here)? {
                Node::Loop(l) => {
                    let all = bindings(l.domain, &here)?;
                    debug!(loop_name = l.name, at = %here, bindings = all.len(), "expanding loop");

                    let children = format!("{}.{}", here, TASKS);
                    let mut branches = Vec::with_capacity(all.len());
                    for binding in &all {
                        let mut branch = Vec::new();
                        self.expand_into(l.tasks, &scope.with_binding(binding), &children, &mut branch)?;
                        branches.push(branch);
                    }
                    self.disambiguate(&mut branches);
                    out.extend(branches.into_iter().flatten());
                }
                Node::Task(task) => out.push(Emitted::new(self.render_value(task, scope)?)),
            }
        }
        Ok(())
    }

    /// Suffix the names of one loop's output, branch `i` holding the tasks of
    /// binding `i`
    fn disambiguate(&self, branches: &mut [Vec<Emitted>]) {
        let colliding = match self.naming {
            TaskNaming::Preserve => return,
            TaskNaming::LoopIndex => Some(names_in_several_branches(branches)),
            TaskNaming::BindingPath => None,
        };

        for (i, branch) in branches.iter_mut().enumerate() {
            let mut renames = HashMap::new();
            for emitted in branch.iter_mut() {
                let Some(name) = emitted.name().map(str::to_string) else {
                    continue;
                };
                if colliding.as_ref().is_some_and(|c| !c.contains(&name)) {
                    continue;
                }
                let renamed = match self.naming {
                    // Outer loops run last, so their index goes right after the base
                    TaskNaming::BindingPath => {
                        let (base, inner) = name.split_at(emitted.base_len);
                        format!("{}-{}{}", base, i, inner)
                    }
                    _ => format!("{}-{}", name, i),
                };
                emitted.set_name(renamed.clone());
                renames.insert(name, renamed);
            }
            rewrite_run_after(branch, &renames);
        }
    }

    /// Deep copy of `value` with every string leaf rendered strictly
    ///
    /// Mapping keys are copied as-is.
    fn render_value(&self, value: &Value, scope: &Scope) -> Result<Value> {
        Ok(match value {
            Value::String(s) => Value::String(
                self.renderer
                    .render(s, scope, RenderMode::Strict)?
                    .into_owned(),
            ),
            Value::Sequence(seq) => Value::Sequence(
                seq.iter()
                    .map(|v| self.render_value(v, scope))
                    .collect::<Result<_>>()?,
            ),
            Value::Mapping(map) => {
                let mut out = Mapping::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.render_value(v, scope)?);
                }
                Value::Mapping(out)
            }
            Value::Tagged(tagged) => {
                let mut tagged = tagged.clone();
                tagged.value = self.render_value(&tagged.value, scope)?;
                Value::Tagged(tagged)
            }
            other => other.clone(),
        })
    }
}

/// Optional list section of `spec`; present-but-not-a-list is structural
fn section<'a>(spec: &'a Mapping, key: &str) -> Result<Option<&'a [Value]>> {
    match spec.get(key) {
        None => Ok(None),
        Some(Value::Sequence(seq)) => Ok(Some(seq.as_slice())),
        Some(other) => Err(TektoncError::structural(
            format!("spec.{}", key),
            format!("expected a list, found {}", kind_of(other)),
        )),
    }
}

fn name_of(task: &Value) -> Option<&str> {
    task.as_mapping()?.get(NAME)?.as_str()
}

/// Names emitted by more than one binding of the same loop
fn names_in_several_branches(branches: &[Vec<Emitted>]) -> HashSet<String> {
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    let mut colliding = HashSet::new();
    for (i, branch) in branches.iter().enumerate() {
        for name in branch.iter().filter_map(Emitted::name) {
            if *first_seen.entry(name).or_insert(i) != i {
                colliding.insert(name.to_string());
            }
        }
    }
    colliding
}

fn rewrite_run_after(branch: &mut [Emitted], renames: &HashMap<String, String>) {
    if renames.is_empty() {
        return;
    }
    for emitted in branch {
        let Some(Value::Sequence(deps)) = emitted
            .task
            .as_mapping_mut()
            .and_then(|m| m.get_mut(RUN_AFTER))
        else {
            continue;
        };
        for dep in deps.iter_mut() {
            if let Value::String(target) = dep {
                if let Some(renamed) = renames.get(target.as_str()) {
                    *target = renamed.clone();
                }
            }
        }
    }
}

fn warn_duplicate_names(tasks: &[Emitted], at: &str) {
    let mut seen = HashSet::new();
    for name in tasks.iter().filter_map(Emitted::name) {
        if !seen.insert(name) {
            warn!(section = at, task = name, "duplicate task name after expansion");
        }
    }
}

/// Expand a list of nodes with the default expander
pub fn expand(nodes: &[Value], scope: &Scope) -> Result<Vec<Value>> {
    Expander::new().expand(nodes, scope)
}

/// Expand a pipeline document with the default expander
pub fn expand_document(doc: &Value, globals: &Scope) -> Result<Value> {
    Expander::new().expand_document(doc, globals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn names(tasks: &[Value]) -> Vec<String> {
        tasks
            .iter()
            .map(|t| t.get("name").and_then(Value::as_str).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_plain_tasks_rendered_without_suffix() {
        let nodes = yaml("[{name: 'build-{{ app }}', retries: 2}]");
        let scope = Scope::from_yaml_str("app: api").unwrap();
        let out = expand(nodes.as_sequence().unwrap(), &scope).unwrap();
        assert_eq!(out, vec![yaml("{name: build-api, retries: 2}")]);
    }

    #[test]
    fn test_nested_loops_naming_policies() {
        let nodes = yaml(
            r#"
- loopName: outer
  foreach: {domain: {a: [1, 2]}}
  tasks:
    - loopName: inner
      foreach: {domain: {b: [x, y]}}
      tasks:
        - name: "t-{{ a }}{{ b }}"
"#,
        );
        let nodes = nodes.as_sequence().unwrap();

        // Already distinct, so the default policy leaves them alone
        let out = Expander::new().expand(nodes, &Scope::new()).unwrap();
        assert_eq!(names(&out), vec!["t-1x", "t-1y", "t-2x", "t-2y"]);

        let out = Expander::new()
            .with_naming(TaskNaming::BindingPath)
            .expand(nodes, &Scope::new())
            .unwrap();
        assert_eq!(
            names(&out),
            vec!["t-1x-0-0", "t-1y-0-1", "t-2x-1-0", "t-2y-1-1"]
        );

        let out = Expander::new()
            .with_naming(TaskNaming::Preserve)
            .expand(nodes, &Scope::new())
            .unwrap();
        assert_eq!(names(&out), vec!["t-1x", "t-1y", "t-2x", "t-2y"]);
    }

    #[test]
    fn test_distinct_names_keep_run_after_intact() {
        let nodes = yaml(
            r#"
- loopName: models
  foreach: {domain: {model: [llama, qwen]}}
  tasks:
    - name: "deploy-{{ model }}"
    - name: "bench-{{ model }}"
      runAfter: ["deploy-{{ model }}"]
"#,
        );
        let out = expand(nodes.as_sequence().unwrap(), &Scope::new()).unwrap();
        assert_eq!(
            names(&out),
            vec!["deploy-llama", "bench-llama", "deploy-qwen", "bench-qwen"]
        );
        assert_eq!(out[1]["runAfter"], yaml("[deploy-llama]"));
        assert_eq!(out[3]["runAfter"], yaml("[deploy-qwen]"));
    }

    #[test]
    fn test_renamed_siblings_rewrite_run_after() {
        let nodes = yaml(
            r#"
- name: prepare
- loopName: regions
  foreach: {domain: {region: [us, eu]}}
  tasks:
    - name: deploy
      runAfter: [prepare]
    - name: bench
      runAfter: [deploy, prepare]
"#,
        );
        let nodes = nodes.as_sequence().unwrap();

        let out = expand(nodes, &Scope::new()).unwrap();
        assert_eq!(
            names(&out),
            vec!["prepare", "deploy-0", "bench-0", "deploy-1", "bench-1"]
        );
        assert_eq!(out[1]["runAfter"], yaml("[prepare]"));
        assert_eq!(out[2]["runAfter"], yaml("[deploy-0, prepare]"));
        assert_eq!(out[4]["runAfter"], yaml("[deploy-1, prepare]"));

        let out = Expander::new()
            .with_naming(TaskNaming::BindingPath)
            .expand(nodes, &Scope::new())
            .unwrap();
        assert_eq!(out[4]["runAfter"], yaml("[deploy-1, prepare]"));
    }

    #[test]
    fn test_outer_collisions_get_outer_index() {
        let nodes = yaml(
            r#"
- loopName: outer
  foreach: {domain: {a: [1, 2]}}
  tasks:
    - name: "setup-{{ a }}"
    - loopName: inner
      foreach: {domain: {b: [x, y]}}
      tasks:
        - name: "run-{{ b }}"
          runAfter: ["setup-{{ a }}"]
"#,
        );
        let out = expand(nodes.as_sequence().unwrap(), &Scope::new()).unwrap();
        assert_eq!(
            names(&out),
            vec!["setup-1", "run-x-0", "run-y-0", "setup-2", "run-x-1", "run-y-1"]
        );
        assert_eq!(out[5]["runAfter"], yaml("[setup-2]"));
    }

    #[test]
    fn test_keys_are_not_rendered() {
        let nodes = yaml(r#"[{"{{ k }}": "{{ k }}"}]"#);
        let scope = Scope::from_yaml_str("k: v").unwrap();
        let out = expand(nodes.as_sequence().unwrap(), &scope).unwrap();
        assert_eq!(out, vec![yaml(r#"{"{{ k }}": v}"#)]);
    }

    #[test]
    fn test_non_string_leaves_untouched() {
        let nodes = yaml("[{name: t, retries: 3, enabled: true, timeout: null}]");
        let out = expand(nodes.as_sequence().unwrap(), &Scope::new()).unwrap();
        assert_eq!(out[0], yaml("{name: t, retries: 3, enabled: true, timeout: null}"));
    }

    #[test]
    fn test_missing_spec_tasks_is_structural() {
        let doc = yaml("apiVersion: tekton.dev/v1\nspec: {finally: []}");
        let err = expand_document(&doc, &Scope::new()).unwrap_err();
        assert!(matches!(err, TektoncError::Structural { ref at, .. } if at == "spec.tasks"));

        let doc = yaml("kind: Pipeline");
        let err = expand_document(&doc, &Scope::new()).unwrap_err();
        assert!(matches!(err, TektoncError::Structural { ref at, .. } if at == "spec"));
    }

    #[test]
    fn test_finally_must_be_list() {
        let doc = yaml("spec: {tasks: [], finally: oops}");
        let err = expand_document(&doc, &Scope::new()).unwrap_err();
        assert!(matches!(err, TektoncError::Structural { ref at, .. } if at == "spec.finally"));
    }

    #[test]
    fn test_error_location_points_into_nested_loop() {
        let doc = yaml(
            r#"
spec:
  tasks:
    - name: first
    - loopName: l
      foreach: {domain: {a: [1]}}
      tasks:
        - loopName: bad
          foreach: {domain: {region: eu}}
          tasks: []
"#,
        );
        let err = expand_document(&doc, &Scope::new()).unwrap_err();
        match err {
            TektoncError::DomainType { at, variable, .. } => {
                assert_eq!(at, "spec.tasks[1].tasks[0]");
                assert_eq!(variable, "region");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
