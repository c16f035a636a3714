//! End-to-end routing flows through full graphs.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use arbor_core::{
    error_kind, handler_fn, ExecutionContext, HandlerError, HeuristicExtractor, IntentGraph,
    KeywordClassify, NodeDef, NodeKind, ParamKind, ParamSchema, RegexClassify, RuleSplit,
};

fn echo_action(name: &str) -> NodeDef {
    NodeDef::action(
        name,
        ParamSchema::new(),
        Arc::new(HeuristicExtractor::new()),
        handler_fn(move |_, _| Ok(json!("handled"))),
    )
}

#[test]
fn route_handles_atomic_input_end_to_end() {
    let mut graph = IntentGraph::new();
    graph
        .add_root(
            NodeDef::classifier("support", Arc::new(KeywordClassify::new()))
                .child(echo_action("status"))
                .child(echo_action("refund")),
        )
        .expect("valid graph");

    let outcome = graph.route("what is the refund status");
    assert!(outcome.success);
    assert_eq!(outcome.output, Some(json!("handled")));
    assert!(outcome.error.is_none());

    let names = outcome.path.iter().map(|entry| entry.node_name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["graph", "support", "status"]);
    assert_eq!(outcome.path[0].node_type, NodeKind::Graph);
}

#[test]
fn route_rejects_empty_input() {
    let mut graph = IntentGraph::new();
    graph
        .add_root(
            NodeDef::classifier("support", Arc::new(KeywordClassify::new()))
                .child(echo_action("status")),
        )
        .expect("valid graph");

    let outcome = graph.route("   ");
    assert!(!outcome.success);
    let error = outcome.error.expect("rejection recorded");
    assert_eq!(error.error_type, error_kind::INVALID_INPUT);
}

#[test]
fn route_surfaces_first_error_with_breadcrumbs() {
    let mut graph = IntentGraph::new();
    graph
        .add_root(
            NodeDef::classifier("support", Arc::new(KeywordClassify::new())).child(
                NodeDef::action(
                    "refund",
                    ParamSchema::new(),
                    Arc::new(HeuristicExtractor::new()),
                    handler_fn(|_, _| {
                        Err(HandlerError::new("LedgerUnavailable", "ledger is offline"))
                    }),
                ),
            ),
        )
        .expect("valid graph");

    let outcome = graph.route("refund my order");
    assert!(!outcome.success);
    let error = outcome.error.expect("handler failure recorded");
    assert_eq!(error.error_type, "LedgerUnavailable");
    assert_eq!(error.node_name, "refund");
    assert_eq!(error.node_path, vec!["support", "refund"]);
}

#[test]
fn splitter_routes_each_chunk_and_synthesizes_unhandled_entries() {
    let chunk_router = NodeDef::classifier("x", Arc::new(KeywordClassify::new()))
        .child(echo_action("xhandler"));

    let mut graph = IntentGraph::new();
    graph
        .add_root(
            NodeDef::classifier("entry", Arc::new(RegexClassify::new())).child(
                NodeDef::splitter("multi", Arc::new(RuleSplit::default()))
                    .patterns([".*"])
                    .child(chunk_router),
            ),
        )
        .expect("valid graph");

    let context = ExecutionContext::new();
    let outcome = graph.route_with("xhandler alpha, xhandler beta, gamma", &context, false);

    assert!(outcome.success);
    let splitter_result = &outcome.result.children_results[0].children_results[0];
    assert_eq!(splitter_result.node_type, NodeKind::Splitter);
    assert_eq!(splitter_result.children_results.len(), 3);
    assert_eq!(splitter_result.params.get("chunks_processed"), Some(&json!(3)));
    assert_eq!(splitter_result.params.get("chunks_handled"), Some(&json!(2)));

    let unhandled = splitter_result
        .children_results
        .iter()
        .filter(|entry| entry.node_type == NodeKind::UnhandledChunk)
        .collect::<Vec<_>>();
    assert_eq!(unhandled.len(), 1);
    assert_eq!(unhandled[0].error_type(), Some(error_kind::UNHANDLED_CHUNK));
    assert_eq!(unhandled[0].input, "gamma");
}

#[test]
fn splitter_with_no_handled_chunks_fails() {
    let chunk_router = NodeDef::classifier("claims", Arc::new(KeywordClassify::new()))
        .child(echo_action("zebra"));

    let mut graph = IntentGraph::new();
    graph
        .add_root(
            NodeDef::classifier("entry", Arc::new(RegexClassify::new())).child(
                NodeDef::splitter("multi", Arc::new(RuleSplit::default()))
                    .patterns([".*"])
                    .child(chunk_router),
            ),
        )
        .expect("valid graph");

    let outcome = graph.route("alpha, beta");
    assert!(!outcome.success);
    let error = outcome.error.expect("splitter failure recorded");
    assert_eq!(error.error_type, error_kind::UNHANDLED_CHUNK);
}

#[test]
fn multi_root_selection_uses_keyword_affinity() {
    let mut graph = IntentGraph::new();
    graph
        .add_root(
            NodeDef::classifier("billing", Arc::new(KeywordClassify::new()))
                .keywords(["invoice", "payment"])
                .child(echo_action("invoice_lookup")),
        )
        .expect("billing root");
    graph
        .add_root(
            NodeDef::classifier("shipping", Arc::new(KeywordClassify::new()))
                .keywords(["parcel", "delivery"])
                .child(echo_action("track_parcel")),
        )
        .expect("shipping root");

    let outcome = graph.route("where is my parcel, track_parcel please");
    assert!(outcome.success);
    assert_eq!(outcome.result.params.get("root"), Some(&json!("shipping")));

    let ambiguous = graph.route("ramble with no affinity whatsoever");
    assert!(!ambiguous.success);
    let error = ambiguous.error.expect("clarification requested");
    assert_eq!(error.error_type, error_kind::CLARIFICATION_NEEDED);
    assert!(ambiguous.output.is_some(), "clarification question exposed as output");
}

#[test]
fn context_values_flow_into_extraction_and_handlers() {
    let mut schema = ParamSchema::new();
    schema.insert("account_id".to_owned(), ParamKind::Text);

    let mut graph = IntentGraph::new();
    graph
        .add_root(
            NodeDef::classifier("support", Arc::new(KeywordClassify::new())).child(
                NodeDef::action(
                    "balance",
                    schema,
                    Arc::new(HeuristicExtractor::new()),
                    handler_fn(|params, context| {
                        let account = params
                            .get("account_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned();
                        if let Some(context) = context {
                            context.set("last_account", json!(account.clone()));
                        }
                        Ok(json!({ "account": account, "balance": 42 }))
                    }),
                )
                .context_keys(["account_id"])
                .uses_context(),
            ),
        )
        .expect("valid graph");

    let context = ExecutionContext::new();
    context.set("account_id", json!("ACME-1"));
    let outcome = graph.route_with("show my balance", &context, false);

    assert!(outcome.success);
    assert_eq!(
        outcome.output,
        Some(json!({ "account": "ACME-1", "balance": 42 }))
    );
    assert_eq!(context.get("last_account"), Some(json!("ACME-1")));
}

#[test]
fn retry_remedy_recovers_flaky_handlers_during_routing() {
    let calls = Arc::new(AtomicU32::new(0));
    let flaky_calls = calls.clone();

    let mut graph = IntentGraph::new();
    graph
        .add_root(
            NodeDef::classifier("support", Arc::new(KeywordClassify::new())).child(
                NodeDef::action(
                    "sync",
                    ParamSchema::new(),
                    Arc::new(HeuristicExtractor::new()),
                    handler_fn(move |_, _| {
                        if flaky_calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(HandlerError::new("Transient", "not yet"))
                        } else {
                            Ok(json!("synced"))
                        }
                    }),
                )
                .remedy("retry_on_fail"),
            ),
        )
        .expect("valid graph");

    let outcome = graph.route("sync the records");
    assert!(outcome.success);
    assert_eq!(outcome.output, Some(json!("synced")));
    // First invocation fails in the pipeline, the retry strategy makes two
    // more: three calls total.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
