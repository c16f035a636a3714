use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Parameters extracted or produced by a node during one execution.
pub type ParamMap = BTreeMap<String, Value>;

/// Variant tag carried by every [`ExecutionResult`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Action,
    Classifier,
    Splitter,
    Clarify,
    Graph,
    UnhandledChunk,
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Action => "action",
            NodeKind::Classifier => "classifier",
            NodeKind::Splitter => "splitter",
            NodeKind::Clarify => "clarify",
            NodeKind::Graph => "graph",
            NodeKind::UnhandledChunk => "unhandled_chunk",
        }
    }
}

/// Error-kind tags with fixed names. Kinds named after an underlying cause
/// (handler domain errors, extraction causes) are free-form strings.
pub mod error_kind {
    pub const CLASSIFIER_ROUTING: &str = "ClassifierRoutingError";
    pub const INPUT_VALIDATION: &str = "InputValidationError";
    pub const OUTPUT_VALIDATION: &str = "OutputValidationError";
    pub const TYPE_COERCION: &str = "TypeCoercionError";
    pub const MISSING_ARGUMENT: &str = "MissingArgument";
    pub const NO_INTENT_CHUNKS: &str = "NoIntentChunksFound";
    pub const UNHANDLED_CHUNK: &str = "UnhandledChunk";
    pub const CLARIFICATION_NEEDED: &str = "ClarificationNeeded";
    pub const INVALID_INPUT: &str = "InvalidInput";
    pub const LLM_CLIENT: &str = "LlmClientError";
    pub const RESPONSE_PARSE: &str = "ResponseParseError";
}

/// Captured expected failure. Never unwinds: every expected failure is data on
/// the returned result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub error_type: String,
    pub message: String,
    pub node_name: String,
    pub node_path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: ParamMap,
    /// Name of the underlying cause, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ExecutionError {
    pub fn new(
        error_type: impl Into<String>,
        message: impl Into<String>,
        node_name: impl Into<String>,
        node_path: Vec<String>,
    ) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            node_name: node_name.into(),
            node_path,
            ..Self::default()
        }
    }

    pub fn with_node_id(mut self, node_id: Uuid) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input_data = Some(input.into());
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output_data = Some(output);
        self
    }

    pub fn with_params(mut self, params: ParamMap) -> Self {
        self.params = params;
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

/// Result of executing one node. `children_results` mirrors the exact sequence
/// of child invocations, so a `route()` call yields a result tree isomorphic to
/// the part of the node tree actually visited.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub node_name: String,
    pub node_path: Vec<String>,
    pub node_type: NodeKind,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: ParamMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children_results: Vec<ExecutionResult>,
}

impl Default for NodeKind {
    fn default() -> Self {
        NodeKind::Graph
    }
}

impl ExecutionResult {
    pub fn success(
        node_name: impl Into<String>,
        node_path: Vec<String>,
        node_type: NodeKind,
        input: impl Into<String>,
        output: Option<Value>,
    ) -> Self {
        Self {
            success: true,
            node_name: node_name.into(),
            node_path,
            node_type,
            input: input.into(),
            output,
            error: None,
            params: ParamMap::new(),
            children_results: Vec::new(),
        }
    }

    pub fn failure(
        node_name: impl Into<String>,
        node_path: Vec<String>,
        node_type: NodeKind,
        input: impl Into<String>,
        error: ExecutionError,
    ) -> Self {
        Self {
            success: false,
            node_name: node_name.into(),
            node_path,
            node_type,
            input: input.into(),
            output: None,
            error: Some(error),
            params: ParamMap::new(),
            children_results: Vec::new(),
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_params(mut self, params: ParamMap) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_child(mut self, child: ExecutionResult) -> Self {
        self.children_results.push(child);
        self
    }

    pub fn error_type(&self) -> Option<&str> {
        self.error.as_ref().map(|error| error.error_type.as_str())
    }

    /// First error in pre-order among failed nodes.
    pub fn first_error(&self) -> Option<&ExecutionError> {
        if let Some(error) = &self.error {
            return Some(error);
        }
        self.children_results.iter().find_map(ExecutionResult::first_error)
    }

    /// Output of the last successful terminal node in pre-order. Terminal
    /// means the node invoked no children itself.
    pub fn last_terminal_output(&self) -> Option<&Value> {
        let mut found = None;
        self.visit(&mut |result| {
            if result.success && result.children_results.is_empty() {
                if let Some(output) = &result.output {
                    found = Some(output);
                }
            }
        });
        found
    }

    /// Flattens the result tree into the linear pre-order execution path.
    pub fn execution_path(&self) -> Vec<PathEntry> {
        let mut path = Vec::new();
        self.flatten_into(0, &mut path);
        path
    }

    fn flatten_into(&self, depth: usize, path: &mut Vec<PathEntry>) {
        path.push(PathEntry {
            node_name: self.node_name.clone(),
            node_type: self.node_type,
            success: self.success,
            error_type: self.error_type().map(str::to_owned),
            depth,
        });
        for child in &self.children_results {
            child.flatten_into(depth + 1, path);
        }
    }

    fn visit<'a>(&'a self, visitor: &mut impl FnMut(&'a ExecutionResult)) {
        visitor(self);
        for child in &self.children_results {
            child.visit(visitor);
        }
    }
}

/// One step of the flattened execution path, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    pub node_name: String,
    pub node_type: NodeKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub depth: usize,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{error_kind, ExecutionError, ExecutionResult, NodeKind};

    fn leaf(name: &str, success: bool, output: Option<serde_json::Value>) -> ExecutionResult {
        if success {
            ExecutionResult::success(name, vec![name.to_owned()], NodeKind::Action, "in", output)
        } else {
            ExecutionResult::failure(
                name,
                vec![name.to_owned()],
                NodeKind::Action,
                "in",
                ExecutionError::new(
                    error_kind::INPUT_VALIDATION,
                    "bad input",
                    name,
                    vec![name.to_owned()],
                ),
            )
        }
    }

    #[test]
    fn execution_path_is_pre_order() {
        let tree = ExecutionResult::success("root", vec![], NodeKind::Classifier, "in", None)
            .with_child(leaf("a", true, Some(json!(1))))
            .with_child(leaf("b", false, None));

        let path = tree.execution_path();
        let names = path.iter().map(|entry| entry.node_name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["root", "a", "b"]);
        assert_eq!(path[1].depth, 1);
    }

    #[test]
    fn first_error_prefers_earliest_failure() {
        let tree = ExecutionResult::success("root", vec![], NodeKind::Splitter, "in", None)
            .with_child(leaf("a", false, None))
            .with_child(leaf("b", false, None));

        let error = tree.first_error().expect("one failure");
        assert_eq!(error.node_name, "a");
    }

    #[test]
    fn last_terminal_output_skips_failures_and_wrappers() {
        let tree = ExecutionResult::success("root", vec![], NodeKind::Splitter, "in", None)
            .with_output(json!("wrapper"))
            .with_child(leaf("a", true, Some(json!("first"))))
            .with_child(leaf("b", false, None))
            .with_child(leaf("c", true, Some(json!("last"))));

        assert_eq!(tree.last_terminal_output(), Some(&json!("last")));
    }

    #[test]
    fn serializes_without_empty_fields() {
        let rendered = serde_json::to_string(&leaf("a", true, None)).expect("serialize");
        assert!(!rendered.contains("children_results"));
        assert!(!rendered.contains("error"));
    }
}
