//! Recursive node executor. Produces a result tree mirroring the part of the
//! node tree actually visited; expected failures never unwind past a node.

use serde_json::json;
use tracing::{debug, warn};

use crate::classify::{ClassifyRequest, Routing};
use crate::context::ExecutionContext;
use crate::extract::coerce;
use crate::graph::IntentGraph;
use crate::node::{ActionNode, ChildView, ClarifyNode, ClassifierNode, Node, NodeBody, NodeId, SplitterNode};
use crate::remedy::{FailureScope, RemedyAttempt};
use crate::result::{error_kind, ExecutionError, ExecutionResult, NodeKind, ParamMap};

pub(crate) struct Executor<'g> {
    graph: &'g IntentGraph,
    debug: bool,
}

impl<'g> Executor<'g> {
    pub(crate) fn new(graph: &'g IntentGraph, debug: bool) -> Self {
        Self { graph, debug }
    }

    pub(crate) fn execute(
        &self,
        id: NodeId,
        input: &str,
        context: &ExecutionContext,
    ) -> ExecutionResult {
        let node = self.graph.node(id);
        let path = self.graph.path_of(id);
        match &node.body {
            NodeBody::Classifier(classifier) => {
                self.execute_classifier(node, &path, classifier, input, context)
            }
            NodeBody::Action(action) => self.execute_action(node, &path, action, input, context),
            NodeBody::Splitter(splitter) => {
                self.execute_splitter(node, &path, splitter, input, context)
            }
            NodeBody::Clarify(clarify) => Self::execute_clarify(node, &path, clarify, input),
        }
    }

    fn apply_remedies(&self, node: &Node, attempt: &RemedyAttempt<'_>) -> Option<ExecutionResult> {
        for strategy in self.graph.registry().resolve(&node.remedies) {
            if let Some(result) = strategy.apply(attempt) {
                warn!(
                    event_name = "remedy.applied",
                    node = attempt.node_name,
                    strategy = strategy.name(),
                    error_type = attempt.error.error_type.as_str(),
                    "remediation produced a replacement result"
                );
                return Some(result);
            }
        }
        None
    }

    fn execute_classifier(
        &self,
        node: &Node,
        path: &[String],
        classifier: &ClassifierNode,
        input: &str,
        context: &ExecutionContext,
    ) -> ExecutionResult {
        let child_ids = node.children();
        let views = child_ids
            .iter()
            .map(|&child_id| {
                let child = self.graph.node(child_id);
                ChildView {
                    name: &child.name,
                    description: &child.description,
                    keywords: &child.keywords,
                    patterns: &child.patterns,
                    kind: child.kind(),
                }
            })
            .collect::<Vec<_>>();
        let llm = classifier.llm.as_ref().or_else(|| self.graph.default_llm());
        let request = ClassifyRequest { input, children: &views, context, llm };

        let error = match classifier.strategy.classify(&request) {
            Routing::Child(index) if index < child_ids.len() => {
                debug!(
                    event_name = "route.classified",
                    node = node.name.as_str(),
                    strategy = classifier.strategy.name(),
                    chosen_child = views[index].name,
                    "classifier selected a child"
                );
                let child_result = self.execute(child_ids[index], input, context);
                let names = views.iter().map(|view| view.name).collect::<Vec<_>>();
                let mut result = ExecutionResult::success(
                    &node.name,
                    path.to_vec(),
                    NodeKind::Classifier,
                    input,
                    child_result.output.clone(),
                );
                result.success = child_result.success;
                result.error = child_result.error.clone();
                return result
                    .with_param("chosen_child", json!(views[index].name))
                    .with_param("available_children", json!(names))
                    .with_child(child_result);
            }
            Routing::Child(index) => ExecutionError::new(
                error_kind::CLASSIFIER_ROUTING,
                format!("classification selected child index {index} out of range"),
                &node.name,
                path.to_vec(),
            ),
            Routing::NoMatch => ExecutionError::new(
                error_kind::CLASSIFIER_ROUTING,
                format!("no child claimed input {input:?}"),
                &node.name,
                path.to_vec(),
            ),
            Routing::Failed(failure) => {
                ExecutionError::new(failure.error_type, failure.message, &node.name, path.to_vec())
                    .with_params(failure.params)
            }
        };
        let error = error.with_node_id(node.id).with_input(input);

        let run_child =
            |index: usize, chunk: &str| self.execute(child_ids[index], chunk, context);
        let attempt = RemedyAttempt {
            node_name: &node.name,
            node_path: path,
            node_kind: NodeKind::Classifier,
            input,
            context,
            error: &error,
            scope: FailureScope::Routing { children: &views, run_child: &run_child },
        };
        if let Some(result) = self.apply_remedies(node, &attempt) {
            return result;
        }

        ExecutionResult::failure(&node.name, path.to_vec(), NodeKind::Classifier, input, error)
    }

    fn execute_action(
        &self,
        node: &Node,
        path: &[String],
        action: &ActionNode,
        input: &str,
        context: &ExecutionContext,
    ) -> ExecutionResult {
        let view = context.view(&action.context_keys);
        let extracted = match action.extractor.extract(input, &action.schema, &view) {
            Ok(params) => params,
            Err(failure) => {
                let error =
                    ExecutionError::new(failure.kind, failure.message, &node.name, path.to_vec())
                        .with_node_id(node.id)
                        .with_input(input);
                return self.fail_action(node, path, action, input, context, ParamMap::new(), error);
            }
        };

        if let Some(validator) = &action.input_validator {
            if !validator(&extracted) {
                let error = ExecutionError::new(
                    error_kind::INPUT_VALIDATION,
                    "extracted parameters failed input validation",
                    &node.name,
                    path.to_vec(),
                )
                .with_node_id(node.id)
                .with_input(input)
                .with_params(extracted.clone());
                return self.fail_action(node, path, action, input, context, extracted, error);
            }
        }

        let mut coerced = ParamMap::new();
        for (name, kind) in &action.schema {
            let Some(value) = extracted.get(name) else {
                let error = ExecutionError::new(
                    error_kind::MISSING_ARGUMENT,
                    format!("no value extracted for parameter {name:?}"),
                    &node.name,
                    path.to_vec(),
                )
                .with_node_id(node.id)
                .with_input(input);
                return self.fail_action(node, path, action, input, context, coerced, error);
            };
            match coerce(name, value, *kind) {
                Ok(value) => {
                    coerced.insert(name.clone(), value);
                }
                Err(failure) => {
                    let error = ExecutionError::new(
                        failure.kind,
                        failure.message,
                        &node.name,
                        path.to_vec(),
                    )
                    .with_node_id(node.id)
                    .with_input(input)
                    .with_params(coerced.clone());
                    return self.fail_action(node, path, action, input, context, coerced, error);
                }
            }
        }

        let handler_context = action.uses_context.then_some(context);
        let output = match action.handler.call(&coerced, handler_context) {
            Ok(output) => output,
            Err(handler_error) => {
                let error = ExecutionError::new(
                    handler_error.kind.clone(),
                    handler_error.message,
                    &node.name,
                    path.to_vec(),
                )
                .with_node_id(node.id)
                .with_input(input)
                .with_params(coerced.clone())
                .with_cause(handler_error.kind);
                return self.fail_action(node, path, action, input, context, coerced, error);
            }
        };

        if let Some(validator) = &action.output_validator {
            if !validator(&output) {
                let error = ExecutionError::new(
                    error_kind::OUTPUT_VALIDATION,
                    "handler output failed validation",
                    &node.name,
                    path.to_vec(),
                )
                .with_node_id(node.id)
                .with_input(input)
                .with_output(output.clone())
                .with_params(coerced.clone());
                return self.fail_action(node, path, action, input, context, coerced, error);
            }
        }

        debug!(event_name = "action.completed", node = node.name.as_str(), "handler succeeded");
        ExecutionResult::success(&node.name, path.to_vec(), NodeKind::Action, input, Some(output))
            .with_params(coerced)
    }

    /// Remediation entry for every action stage: strategies see the handler
    /// and whatever validated parameters exist so far.
    fn fail_action(
        &self,
        node: &Node,
        path: &[String],
        action: &ActionNode,
        input: &str,
        context: &ExecutionContext,
        params: ParamMap,
        error: ExecutionError,
    ) -> ExecutionResult {
        let attempt = RemedyAttempt {
            node_name: &node.name,
            node_path: path,
            node_kind: NodeKind::Action,
            input,
            context,
            error: &error,
            scope: FailureScope::Handler {
                handler: action.handler.as_ref(),
                params: &params,
                uses_context: action.uses_context,
            },
        };
        if let Some(result) = self.apply_remedies(node, &attempt) {
            return result;
        }
        ExecutionResult::failure(&node.name, path.to_vec(), NodeKind::Action, input, error)
            .with_params(params)
    }

    fn execute_splitter(
        &self,
        node: &Node,
        path: &[String],
        splitter: &SplitterNode,
        input: &str,
        context: &ExecutionContext,
    ) -> ExecutionResult {
        let chunks = splitter.strategy.split(input, self.debug);
        if chunks.is_empty() {
            // Terminal: no remediation path exists for an empty chunk list.
            let error = ExecutionError::new(
                error_kind::NO_INTENT_CHUNKS,
                "splitter produced no chunks",
                &node.name,
                path.to_vec(),
            )
            .with_node_id(node.id)
            .with_input(input);
            return ExecutionResult::failure(
                &node.name,
                path.to_vec(),
                NodeKind::Splitter,
                input,
                error,
            );
        }

        let preview_len = self.graph.config().routing.chunk_preview_len;
        let mut children_results = Vec::with_capacity(chunks.len());
        let mut handled = 0usize;
        for chunk in &chunks {
            // A child result tagged as a routing failure means the child did
            // not claim the chunk; any other result counts as handled.
            let claimed = node.children().iter().find_map(|&child_id| {
                let candidate = self.execute(child_id, &chunk.text, context);
                if candidate.error_type() == Some(error_kind::CLASSIFIER_ROUTING) {
                    None
                } else {
                    Some(candidate)
                }
            });
            match claimed {
                Some(result) => {
                    handled += 1;
                    children_results.push(result);
                }
                None => {
                    let preview = truncate_chars(&chunk.text, preview_len);
                    warn!(
                        event_name = "split.unhandled_chunk",
                        node = node.name.as_str(),
                        chunk = preview.as_str(),
                        "no child claimed chunk"
                    );
                    let error = ExecutionError::new(
                        error_kind::UNHANDLED_CHUNK,
                        format!("no child handled chunk {preview:?}"),
                        &node.name,
                        path.to_vec(),
                    )
                    .with_input(chunk.text.clone());
                    children_results.push(ExecutionResult::failure(
                        &node.name,
                        path.to_vec(),
                        NodeKind::UnhandledChunk,
                        chunk.text.clone(),
                        error,
                    ));
                }
            }
        }

        let mut params = ParamMap::new();
        params.insert("chunks_processed".to_owned(), json!(chunks.len()));
        params.insert("chunks_handled".to_owned(), json!(handled));
        params.insert(
            "chunks".to_owned(),
            json!(chunks.iter().map(|chunk| chunk.text.as_str()).collect::<Vec<_>>()),
        );

        if handled > 0 {
            let mut result = ExecutionResult::success(
                &node.name,
                path.to_vec(),
                NodeKind::Splitter,
                input,
                None,
            );
            result.params = params;
            result.children_results = children_results;
            return result;
        }

        let error = ExecutionError::new(
            error_kind::UNHANDLED_CHUNK,
            "no chunk was handled by any child",
            &node.name,
            path.to_vec(),
        )
        .with_node_id(node.id)
        .with_input(input);
        let attempt = RemedyAttempt {
            node_name: &node.name,
            node_path: path,
            node_kind: NodeKind::Splitter,
            input,
            context,
            error: &error,
            scope: FailureScope::Bare,
        };
        if let Some(result) = self.apply_remedies(node, &attempt) {
            return result;
        }
        let mut result = ExecutionResult::failure(
            &node.name,
            path.to_vec(),
            NodeKind::Splitter,
            input,
            error,
        );
        result.params = params;
        result.children_results = children_results;
        result
    }

    fn execute_clarify(
        node: &Node,
        path: &[String],
        clarify: &ClarifyNode,
        input: &str,
    ) -> ExecutionResult {
        let error = ExecutionError::new(
            error_kind::CLARIFICATION_NEEDED,
            clarify.question.clone(),
            &node.name,
            path.to_vec(),
        )
        .with_node_id(node.id)
        .with_input(input);
        ExecutionResult::failure(&node.name, path.to_vec(), NodeKind::Clarify, input, error)
            .with_output(json!(clarify.question))
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let mut truncated = text.chars().take(max).collect::<String>();
    truncated.push_str("...");
    truncated
}
