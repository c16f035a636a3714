//! Composition root: the arena-backed intent graph, its structural
//! validation, and the `route()` entry point.

pub mod arena;
pub mod validate;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::errors::GraphError;
use crate::exec::Executor;
use crate::graph::arena::NodeArena;
use crate::graph::validate::{check_splitter_children, detect_cycles, Adjacency, GraphReport};
use crate::llm::LlmConfig;
use crate::node::{Node, NodeDef, NodeId};
use crate::remedy::{ids, KeywordFallback, RemedyRegistry, RemedySpec, RetryOnFail};
use crate::result::{
    error_kind, ExecutionError, ExecutionResult, NodeKind, ParamMap, PathEntry,
};
use crate::split::{RuleSplit, SplitStrategy};

/// Whole-input shape assigned by pre-classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputShape {
    Atomic,
    Composite,
    Ambiguous,
    Invalid,
}

impl InputShape {
    pub fn label(&self) -> &'static str {
        match self {
            InputShape::Atomic => "atomic",
            InputShape::Composite => "composite",
            InputShape::Ambiguous => "ambiguous",
            InputShape::Invalid => "invalid",
        }
    }
}

/// What `route()` decides to do with the whole input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Handle,
    Split,
    Clarify,
    Reject,
}

impl Disposition {
    pub fn label(&self) -> &'static str {
        match self {
            Disposition::Handle => "handle",
            Disposition::Split => "split",
            Disposition::Clarify => "clarify",
            Disposition::Reject => "reject",
        }
    }
}

/// Outcome of one `route()` call: the full result tree plus the flattened
/// diagnostics derived from it.
#[derive(Clone, Debug)]
pub struct RouteOutcome {
    pub result: ExecutionResult,
    /// Pre-order execution path over every visited node.
    pub path: Vec<PathEntry>,
    pub success: bool,
    /// Last successful terminal node's output, falling back to the graph
    /// node's own output.
    pub output: Option<Value>,
    /// First error among failed nodes, in pre-order.
    pub error: Option<ExecutionError>,
}

impl RouteOutcome {
    fn from_result(result: ExecutionResult) -> Self {
        let path = result.execution_path();
        let success = result.success;
        let output = result.last_terminal_output().cloned().or_else(|| result.output.clone());
        let error = result.first_error().cloned();
        Self { result, path, success, output, error }
    }
}

/// Ordered root classifiers over an arena of nodes, plus the remediation
/// registry and default LLM settings shared by every execution.
pub struct IntentGraph {
    arena: NodeArena,
    roots: Vec<NodeId>,
    registry: RemedyRegistry,
    default_llm: Option<LlmConfig>,
    config: EngineConfig,
}

impl Default for IntentGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentGraph {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Registry defaults are re-seeded from the config's retry and routing
    /// settings so configured thresholds reach the built-in strategies.
    pub fn with_config(config: EngineConfig) -> Self {
        let mut registry = RemedyRegistry::with_defaults();
        registry.register(
            ids::RETRY_ON_FAIL,
            Arc::new(RetryOnFail::new(
                config.retry.max_attempts,
                Duration::from_millis(config.retry.base_delay_ms),
            )),
        );
        registry.register(
            ids::KEYWORD_FALLBACK,
            Arc::new(KeywordFallback::new(config.routing.keyword_fallback_threshold)),
        );
        let default_llm = config.llm.clone();
        Self { arena: NodeArena::new(), roots: Vec::new(), registry, default_llm, config }
    }

    pub fn with_registry(mut self, registry: RemedyRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_default_llm(mut self, llm: LlmConfig) -> Self {
        self.default_llm = Some(llm);
        self
    }

    pub fn register_remedy(
        &mut self,
        id: impl Into<String>,
        strategy: Arc<dyn crate::remedy::RemedyStrategy>,
    ) {
        self.registry.register(id, strategy);
    }

    pub fn registry(&self) -> &RemedyRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn default_llm(&self) -> Option<&LlmConfig> {
        self.default_llm.as_ref()
    }

    pub fn roots(&self) -> &[NodeId] {
        self.roots.as_slice()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id)
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        self.arena.node(id)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Root→self name chain for any node, walking parent links.
    pub fn path_of(&self, id: NodeId) -> Vec<String> {
        self.arena.path_of(id)
    }

    /// Flattens the builder tree into the arena, validates the added subtree,
    /// and rolls the arena back on any structural violation.
    pub fn add_root(&mut self, def: NodeDef) -> Result<NodeId, GraphError> {
        if def.kind() != NodeKind::Classifier {
            let kind = def.kind().label();
            return Err(GraphError::RootMustBeClassifier { name: def.name, kind });
        }

        let mark = self.arena.len();
        let root_id = self.flatten(def, None);
        if let Err(error) = self.validate_added(mark) {
            self.arena.truncate(mark);
            return Err(error);
        }
        self.roots.push(root_id);
        Ok(root_id)
    }

    fn flatten(&mut self, def: NodeDef, parent: Option<NodeId>) -> NodeId {
        let NodeDef { name, description, keywords, patterns, remedies, body, children } = def;
        let id = self.arena.push(Node {
            id: Uuid::new_v4(),
            name,
            description,
            keywords,
            patterns,
            remedies,
            body,
            parent,
            children: Vec::new(),
        });
        let child_ids =
            children.into_iter().map(|child| self.flatten(child, Some(id))).collect();
        self.arena.node_mut(id).children = child_ids;
        id
    }

    fn validate_added(&self, mark: usize) -> Result<(), GraphError> {
        let mut names = BTreeSet::new();
        for (_, node) in self.arena.iter() {
            if !names.insert(node.name.as_str()) {
                return Err(GraphError::DuplicateNodeName { name: node.name.clone() });
            }
        }

        for (id, node) in self.arena.iter() {
            if id.0 < mark {
                continue;
            }
            for spec in &node.remedies {
                if let RemedySpec::Id(remedy_id) = spec {
                    if !self.registry.contains(remedy_id) {
                        return Err(GraphError::UnknownRemedy {
                            node: node.name.clone(),
                            id: remedy_id.clone(),
                        });
                    }
                }
            }
        }

        check_splitter_children(&self.arena, mark, self.arena.len())
    }

    /// Name-keyed adjacency over the whole arena, for the validator.
    pub fn adjacency(&self) -> Adjacency {
        self.arena
            .iter()
            .map(|(_, node)| {
                let children = node
                    .children()
                    .iter()
                    .map(|&child| self.arena.node(child).name.clone())
                    .collect();
                (node.name.clone(), children)
            })
            .collect()
    }

    /// Non-raising structural introspection.
    pub fn validate_graph(&self) -> GraphReport {
        let mut counts = std::collections::BTreeMap::new();
        for (_, node) in self.arena.iter() {
            *counts.entry(node.kind().label().to_owned()).or_insert(0usize) += 1;
        }

        let mut reached = BTreeSet::new();
        let mut stack = self.roots.clone();
        while let Some(id) = stack.pop() {
            if reached.insert(id) {
                stack.extend_from_slice(self.arena.node(id).children());
            }
        }
        let orphaned_nodes = self
            .arena
            .iter()
            .filter(|(id, _)| !reached.contains(id))
            .map(|(_, node)| node.name.clone())
            .collect::<Vec<_>>();

        let splitter_rule_holds =
            check_splitter_children(&self.arena, 0, self.arena.len()).is_ok();
        let roots_are_classifiers = self
            .roots
            .iter()
            .all(|&root| self.arena.node(root).kind() == NodeKind::Classifier);

        GraphReport {
            total_nodes: self.arena.len(),
            node_counts_by_type: counts,
            routing_valid: splitter_rule_holds && roots_are_classifiers,
            has_cycles: !detect_cycles(&self.adjacency()).is_empty(),
            orphaned_count: orphaned_nodes.len(),
            orphaned_nodes,
        }
    }

    /// Executes one node directly. `route()` is the usual entry point; this
    /// exists for tests and embedding.
    pub fn execute(&self, id: NodeId, input: &str, context: &ExecutionContext) -> ExecutionResult {
        Executor::new(self, false).execute(id, input, context)
    }

    /// Routes with a fresh, empty context and debug off.
    pub fn route(&self, input: &str) -> RouteOutcome {
        let context = ExecutionContext::new();
        self.route_with(input, &context, false)
    }

    /// Never returns an `Err` and never panics for expected domain failures:
    /// every failure is data on the returned outcome.
    pub fn route_with(
        &self,
        input: &str,
        context: &ExecutionContext,
        debug: bool,
    ) -> RouteOutcome {
        let trimmed = input.trim();

        if self.roots.is_empty() {
            return RouteOutcome::from_result(self.graph_failure(
                input,
                InputShape::Invalid,
                Disposition::Reject,
                error_kind::INVALID_INPUT,
                "graph has no root nodes",
            ));
        }

        let (shape, disposition, selected) = self.preclassify(trimmed);
        debug!(
            event_name = "route.preclassified",
            shape = shape.label(),
            disposition = disposition.label(),
            "assigned input shape and disposition"
        );

        let result = match (disposition, selected) {
            (Disposition::Reject, _) => self.graph_failure(
                input,
                shape,
                disposition,
                error_kind::INVALID_INPUT,
                "input is empty",
            ),
            (Disposition::Clarify, _) => {
                let names = self
                    .roots
                    .iter()
                    .map(|&root| self.arena.node(root).name.clone())
                    .collect::<Vec<_>>();
                let question =
                    format!("Which of these did you mean: {}?", names.join(", "));
                let mut result = self.graph_failure(
                    input,
                    shape,
                    disposition,
                    error_kind::CLARIFICATION_NEEDED,
                    "input matched no root",
                );
                result.output = Some(json!(question));
                result
            }
            (_, Some(root_id)) => {
                let root_result = Executor::new(self, debug).execute(root_id, trimmed, context);
                self.wrap_root(input, shape, disposition, root_id, root_result)
            }
            (_, None) => self.graph_failure(
                input,
                shape,
                disposition,
                error_kind::INVALID_INPUT,
                "no root selected",
            ),
        };

        RouteOutcome::from_result(result)
    }

    fn preclassify(&self, input: &str) -> (InputShape, Disposition, Option<NodeId>) {
        if input.is_empty() {
            return (InputShape::Invalid, Disposition::Reject, None);
        }

        let composite = RuleSplit::default().split(input, false).len() > 1;
        let shape = if composite { InputShape::Composite } else { InputShape::Atomic };
        let disposition = if composite { Disposition::Split } else { Disposition::Handle };

        if self.roots.len() == 1 {
            return (shape, disposition, Some(self.roots[0]));
        }

        match self.root_affinity(input) {
            Some(root) => (shape, disposition, Some(root)),
            None => (InputShape::Ambiguous, Disposition::Clarify, None),
        }
    }

    /// Best root by subtree keyword affinity: a node name appearing in the
    /// input scores 1.0, a declared keyword scores length over input length.
    /// Strict comparison keeps the first-seen root on ties.
    fn root_affinity(&self, input: &str) -> Option<NodeId> {
        let lowered = input.to_lowercase();
        let mut best: Option<(NodeId, f64)> = None;

        for &root in &self.roots {
            let mut score = 0.0f64;
            let mut stack = vec![root];
            while let Some(id) = stack.pop() {
                let node = self.arena.node(id);
                if lowered.contains(&node.name.to_lowercase()) {
                    score = score.max(1.0);
                }
                for keyword in &node.keywords {
                    let keyword = keyword.to_lowercase();
                    if lowered.contains(&keyword) {
                        score = score.max(keyword.len() as f64 / lowered.len().max(1) as f64);
                    }
                }
                stack.extend_from_slice(node.children());
            }
            if score > 0.0 && best.map_or(true, |(_, current)| score > current) {
                best = Some((root, score));
            }
        }

        best.map(|(root, _)| root)
    }

    fn wrap_root(
        &self,
        input: &str,
        shape: InputShape,
        disposition: Disposition,
        root_id: NodeId,
        root_result: ExecutionResult,
    ) -> ExecutionResult {
        let root_name = self.arena.node(root_id).name.clone();
        let mut result = ExecutionResult::success(
            "graph",
            Vec::new(),
            NodeKind::Graph,
            input,
            root_result.output.clone(),
        );
        result.success = root_result.success;
        result.error = root_result.error.clone();
        result
            .with_param("input_shape", json!(shape.label()))
            .with_param("disposition", json!(disposition.label()))
            .with_param("root", json!(root_name))
            .with_child(root_result)
    }

    fn graph_failure(
        &self,
        input: &str,
        shape: InputShape,
        disposition: Disposition,
        error_type: &str,
        message: &str,
    ) -> ExecutionResult {
        let error = ExecutionError::new(error_type, message, "graph", Vec::new())
            .with_input(input)
            .with_params(ParamMap::from([
                ("input_shape".to_owned(), json!(shape.label())),
                ("disposition".to_owned(), json!(disposition.label())),
            ]));
        ExecutionResult::failure("graph", Vec::new(), NodeKind::Graph, input, error)
            .with_param("input_shape", json!(shape.label()))
            .with_param("disposition", json!(disposition.label()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::IntentGraph;
    use crate::classify::KeywordClassify;
    use crate::errors::GraphError;
    use crate::node::{handler_fn, NodeDef, ParamSchema};
    use crate::extract::HeuristicExtractor;
    use crate::split::RuleSplit;

    fn action(name: &str) -> NodeDef {
        NodeDef::action(
            name,
            ParamSchema::new(),
            Arc::new(HeuristicExtractor::new()),
            handler_fn(|_, _| Ok(json!("ok"))),
        )
    }

    fn classifier(name: &str) -> NodeDef {
        NodeDef::classifier(name, Arc::new(KeywordClassify::new()))
    }

    #[test]
    fn non_classifier_root_is_rejected() {
        let mut graph = IntentGraph::new();
        let error = graph.add_root(action("standalone")).expect_err("action root");
        assert!(matches!(error, GraphError::RootMustBeClassifier { .. }));
        assert!(graph.is_empty());
    }

    #[test]
    fn splitter_with_action_child_rolls_back_the_arena() {
        let mut graph = IntentGraph::new();
        graph.add_root(classifier("first")).expect("valid root");
        let before = graph.len();

        let bad = classifier("second").child(
            NodeDef::splitter("multi", Arc::new(RuleSplit::default())).child(action("leaf")),
        );
        let error = graph.add_root(bad).expect_err("splitter child rule");
        match error {
            GraphError::SplitterChildMustBeClassifier { parent, child, kind } => {
                assert_eq!(parent, "multi");
                assert_eq!(child, "leaf");
                assert_eq!(kind, "action");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(graph.len(), before);
        assert_eq!(graph.roots().len(), 1);
    }

    #[test]
    fn path_of_matches_parent_chain() {
        let mut graph = IntentGraph::new();
        let root = graph
            .add_root(classifier("support").child(classifier("billing").child(action("refund"))))
            .expect("valid tree");

        let billing = graph.get(root).expect("root stored").children()[0];
        let refund = graph.get(billing).expect("billing stored").children()[0];

        assert_eq!(graph.path_of(root), vec!["support"]);
        assert_eq!(graph.path_of(refund), vec!["support", "billing", "refund"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut graph = IntentGraph::new();
        let dup = classifier("router").child(action("pay")).child(action("pay"));
        assert!(matches!(
            graph.add_root(dup),
            Err(GraphError::DuplicateNodeName { .. })
        ));
    }

    #[test]
    fn unknown_remedy_id_is_rejected_at_add() {
        let mut graph = IntentGraph::new();
        let def = classifier("router").child(action("pay").remedy("no_such_strategy"));
        match graph.add_root(def) {
            Err(GraphError::UnknownRemedy { node, id }) => {
                assert_eq!(node, "pay");
                assert_eq!(id, "no_such_strategy");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn report_counts_nodes_by_type() {
        let mut graph = IntentGraph::new();
        graph
            .add_root(classifier("router").child(action("pay")).child(action("status")))
            .expect("valid tree");

        let report = graph.validate_graph();
        assert_eq!(report.total_nodes, 3);
        assert_eq!(report.node_counts_by_type.get("classifier"), Some(&1));
        assert_eq!(report.node_counts_by_type.get("action"), Some(&2));
        assert!(report.routing_valid);
        assert!(!report.has_cycles);
        assert_eq!(report.orphaned_count, 0);
    }
}
