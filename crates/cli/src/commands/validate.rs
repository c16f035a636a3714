use std::path::Path;

use anyhow::Context;
use arbor_core::{load_path, GraphReport};

use crate::commands::{demo, render_pretty, CommandResult};

fn build_report(path: &Path) -> anyhow::Result<GraphReport> {
    let graph = load_path(path, &demo::bindings())
        .with_context(|| format!("loading graph description from {}", path.display()))?;
    Ok(graph.validate_graph())
}

/// Prints the structural report for a graph description. Exit code 0 for a
/// structurally sound graph, 1 for a loadable but invalid one, 2 when the
/// description cannot be loaded at all.
pub fn run(path: &Path) -> CommandResult {
    match build_report(path) {
        Ok(report) => {
            let sound = report.routing_valid && !report.has_cycles && report.orphaned_count == 0;
            CommandResult {
                exit_code: u8::from(!sound),
                output: render_pretty("validate", &report),
            }
        }
        Err(error) => CommandResult::failure("validate", "load", format!("{error:#}"), 2),
    }
}
