//! tektonc - render and expand Tekton pipeline templates with loop nodes
//!
//! Authoring grammar (one construct only):
//!
//! ```text
//! Loop node := { loopName: str, foreach: { domain: { var: [..], ... } }, tasks: [ <task or loop>, ... ] }
//! Task node := any Tekton task map (name, taskRef/taskSpec, params, runAfter, when, timeout, ...)
//! ```
//!
//! Expansion is Cartesian over `foreach.domain` with keys sorted; loops nest
//! and inner loops see the variables of outer ones. `finally` supports the
//! same loop nodes as `tasks`. Dependencies stay native `runAfter` fields; when a
//! loop renames a task to keep names unique, the `runAfter` entries of its
//! siblings in the same binding follow the rename.
//!
//! Before expansion the whole template is rendered once against the values
//! file, so `{% for %}` / `{% if %}` / `{% set %}` blocks and the
//! `enumerate_list()` global can generate YAML from values.

pub mod block;
pub mod compile;
pub mod domain;
pub mod error;
pub mod expand;
pub mod explain;
pub mod expr;
pub mod filters;
pub mod node;
pub mod scope;
pub mod template;

pub use compile::{compile, Compiler};
pub use domain::{bindings, Binding};
pub use error::{FixSuggestion, Result, TektoncError};
pub use expand::{expand, expand_document, Expander, TaskNaming};
pub use explain::explain_table;
pub use node::{classify, LoopNode, Node};
pub use scope::Scope;
pub use template::{render, RenderMode, TemplateRenderer};
