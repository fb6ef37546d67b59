//! Name/runAfter table for expanded pipelines (`--explain`)

use std::fmt::{self, Write};

use serde_yaml::Value;

use crate::filters::display;

const NAME_WIDTH: usize = 60;
const RULE_WIDTH: usize = 90;

/// Render the explain table for `spec.tasks` and, if present, `spec.finally`
pub fn explain_table(expanded: &Value) -> String {
    let mut out = String::new();
    write_table(&mut out, expanded).expect("Writing to a String cannot fail");
    out
}

fn write_table(out: &mut impl Write, expanded: &Value) -> fmt::Result {
    let spec = expanded.get("spec");
    let empty = Vec::new();

    let tasks = spec
        .and_then(|s| s.get("tasks"))
        .and_then(Value::as_sequence)
        .unwrap_or(&empty);
    write_section(out, "spec.tasks", tasks)?;

    if let Some(finally) = spec.and_then(|s| s.get("finally")) {
        write_section(out, "spec.finally", finally.as_sequence().unwrap_or(&empty))?;
    }
    Ok(())
}

fn write_section(out: &mut impl Write, title: &str, tasks: &[Value]) -> fmt::Result {
    writeln!(out, "# {}", title)?;
    writeln!(out, "{:<width$}  RUNAFTER", "TASK NAME", width = NAME_WIDTH)?;
    writeln!(out, "{}", "-".repeat(RULE_WIDTH))?;
    for task in tasks {
        let name = task
            .get("name")
            .map(display)
            .unwrap_or_else(|| "<unnamed>".to_string());
        let run_after = match task.get("runAfter") {
            None => String::new(),
            Some(Value::Sequence(items)) => items.iter().map(display).collect::<Vec<_>>().join(", "),
            Some(other) => display(other),
        };
        writeln!(out, "{:<width$}  {}", name, run_after, width = NAME_WIDTH)?;
    }
    writeln!(out)
}
