//! Built-in demo graph: greeting, calculator, and farewell intents with
//! deterministic handlers and keyword-fallback routing. No network access.

use std::sync::Arc;

use arbor_core::{
    handler_fn, Bindings, GraphError, Handler, HandlerError, HeuristicExtractor, IntentGraph,
    KeywordClassify, NodeDef, ParamKind, ParamMap, ParamSchema,
};
use serde_json::{json, Value};

use crate::commands::{route, CommandResult};

fn operand(params: &ParamMap, name: &str) -> Result<f64, HandlerError> {
    params
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| HandlerError::new("MissingOperand", format!("operand {name:?} is required")))
}

fn greet_handler() -> Arc<dyn Handler> {
    handler_fn(|_, _| Ok(json!("Hello! How can I help you today?")))
}

fn calculate_handler() -> Arc<dyn Handler> {
    handler_fn(|params, _| {
        let a = operand(params, "a")?;
        let b = operand(params, "b")?;
        Ok(json!(a + b))
    })
}

fn goodbye_handler() -> Arc<dyn Handler> {
    handler_fn(|_, _| Ok(json!("Goodbye!")))
}

/// Handler bindings shared by `route` and `validate` for description files
/// that reference the demo handler names.
pub fn bindings() -> Bindings {
    Bindings::new()
        .with_handler("greet", greet_handler())
        .with_handler("calculate", calculate_handler())
        .with_handler("goodbye", goodbye_handler())
}

pub fn demo_graph() -> Result<IntentGraph, GraphError> {
    let mut schema = ParamSchema::new();
    schema.insert("a".to_owned(), ParamKind::Float);
    schema.insert("b".to_owned(), ParamKind::Float);

    let root = NodeDef::classifier("assistant", Arc::new(KeywordClassify::new()))
        .describe("demo assistant routing greetings, sums, and farewells")
        .remedy("keyword_fallback")
        .child(
            NodeDef::action(
                "greet",
                ParamSchema::new(),
                Arc::new(HeuristicExtractor::new()),
                greet_handler(),
            )
            .describe("say hello")
            .keywords(["hello", "hi", "hey"]),
        )
        .child(
            NodeDef::action(
                "calculate",
                schema,
                Arc::new(HeuristicExtractor::new()),
                calculate_handler(),
            )
            .describe("add two numbers")
            .keywords(["add", "sum", "plus"]),
        )
        .child(
            NodeDef::action(
                "goodbye",
                ParamSchema::new(),
                Arc::new(HeuristicExtractor::new()),
                goodbye_handler(),
            )
            .describe("say goodbye")
            .keywords(["bye", "farewell"]),
        );

    let mut graph = IntentGraph::new();
    graph.add_root(root)?;
    Ok(graph)
}

pub fn run(input: &str) -> CommandResult {
    match demo_graph() {
        Ok(graph) => route::render(&graph, input),
        Err(error) => CommandResult::failure("demo", "graph", error.to_string(), 2),
    }
}
