use std::path::Path;

use arbor_core::{ExecutionError, IntentGraph, PathEntry};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::commands::{demo, render_pretty, CommandResult};

#[derive(Debug, Serialize)]
struct RoutePayload<'a> {
    success: bool,
    output: &'a Option<Value>,
    error: &'a Option<ExecutionError>,
    path: &'a [PathEntry],
}

pub(crate) fn render(graph: &IntentGraph, input: &str) -> CommandResult {
    let outcome = graph.route(input);
    let payload = RoutePayload {
        success: outcome.success,
        output: &outcome.output,
        error: &outcome.error,
        path: &outcome.path,
    };
    CommandResult {
        exit_code: u8::from(!outcome.success),
        output: render_pretty("route", &payload),
    }
}

pub fn run(path: &Path, input: &str) -> CommandResult {
    match arbor_core::load_path(path, &demo::bindings()) {
        Ok(graph) => {
            debug!(
                event_name = "cli.graph_loaded",
                path = %path.display(),
                nodes = graph.len(),
                "graph description loaded"
            );
            render(&graph, input)
        }
        Err(error) => CommandResult::failure("route", "load", error.to_string(), 2),
    }
}
