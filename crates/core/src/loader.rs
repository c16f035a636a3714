//! JSON graph descriptions. Handlers, strategies, and clients cannot be
//! expressed in data, so descriptions name them symbolically and a
//! caller-supplied [`Bindings`] registry resolves the names.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::classify::{ClassifyStrategy, KeywordClassify, RegexClassify};
use crate::config::EngineConfig;
use crate::errors::LoadError;
use crate::extract::{ArgExtractor, HeuristicExtractor};
use crate::graph::validate::{detect_cycles, Adjacency};
use crate::graph::IntentGraph;
use crate::llm::LlmConfig;
use crate::node::{Handler, NodeDef, ParamKind};
use crate::split::{RuleSplit, SplitStrategy};

/// Top-level serde model of a graph description file.
#[derive(Debug, Deserialize)]
pub struct GraphDescription {
    pub roots: Vec<NodeDescription>,
    #[serde(default)]
    pub default_llm: Option<LlmConfig>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum KindTag {
    Classifier,
    Action,
    Splitter,
    Clarify,
}

/// One node in a description. Which optional fields apply depends on `type`;
/// irrelevant fields are ignored.
#[derive(Debug, Deserialize)]
pub struct NodeDescription {
    pub name: String,
    #[serde(rename = "type")]
    kind: KindTag,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub classifier: Option<String>,
    #[serde(default)]
    pub splitter: Option<String>,
    #[serde(default)]
    pub extractor: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamKind>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub remedies: Vec<String>,
    #[serde(default)]
    pub context_keys: Vec<String>,
    #[serde(default)]
    pub taxonomies: Vec<String>,
    #[serde(default)]
    pub children: Vec<NodeDescription>,
}

/// Name → implementation registry the loader resolves against. Seeded with
/// the built-in classifier, splitter, and extractor kinds; handlers always
/// come from the caller.
pub struct Bindings {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
    classifiers: BTreeMap<String, Arc<dyn ClassifyStrategy>>,
    splitters: BTreeMap<String, Arc<dyn SplitStrategy>>,
    extractors: BTreeMap<String, Arc<dyn ArgExtractor>>,
}

impl Default for Bindings {
    fn default() -> Self {
        let mut classifiers: BTreeMap<String, Arc<dyn ClassifyStrategy>> = BTreeMap::new();
        classifiers.insert("keyword".to_owned(), Arc::new(KeywordClassify::new()));
        classifiers.insert("regex".to_owned(), Arc::new(RegexClassify::new()));

        let mut extractors: BTreeMap<String, Arc<dyn ArgExtractor>> = BTreeMap::new();
        extractors.insert("heuristic".to_owned(), Arc::new(HeuristicExtractor::new()));

        Self { handlers: BTreeMap::new(), classifiers, splitters: BTreeMap::new(), extractors }
    }
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn with_classifier(
        mut self,
        name: impl Into<String>,
        strategy: Arc<dyn ClassifyStrategy>,
    ) -> Self {
        self.classifiers.insert(name.into(), strategy);
        self
    }

    pub fn with_splitter(
        mut self,
        name: impl Into<String>,
        strategy: Arc<dyn SplitStrategy>,
    ) -> Self {
        self.splitters.insert(name.into(), strategy);
        self
    }

    pub fn with_extractor(
        mut self,
        name: impl Into<String>,
        extractor: Arc<dyn ArgExtractor>,
    ) -> Self {
        self.extractors.insert(name.into(), extractor);
        self
    }
}

/// Builds a live graph from JSON text.
pub fn load_str(text: &str, bindings: &Bindings) -> Result<IntentGraph, LoadError> {
    load_with_config(text, bindings, EngineConfig::default())
}

pub fn load_with_config(
    text: &str,
    bindings: &Bindings,
    config: EngineConfig,
) -> Result<IntentGraph, LoadError> {
    let description: GraphDescription = serde_json::from_str(text)?;

    // Cycle-check declared edges before touching the arena.
    let mut adjacency = Adjacency::new();
    for root in &description.roots {
        collect_adjacency(root, &mut adjacency);
    }
    if let Some(cycle) = detect_cycles(&adjacency).into_iter().next() {
        return Err(crate::errors::GraphError::CycleDetected { cycle }.into());
    }

    let mut graph = IntentGraph::with_config(config);
    if let Some(llm) = description.default_llm {
        graph = graph.with_default_llm(llm);
    }
    for root in description.roots {
        let def = build_def(root, bindings)?;
        graph.add_root(def)?;
    }
    Ok(graph)
}

pub fn load_path(path: impl AsRef<Path>, bindings: &Bindings) -> Result<IntentGraph, LoadError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|source| LoadError::Io { path: path.display().to_string(), source })?;
    load_str(&text, bindings)
}

fn collect_adjacency(description: &NodeDescription, adjacency: &mut Adjacency) {
    let children = description.children.iter().map(|child| child.name.clone()).collect();
    adjacency.entry(description.name.clone()).or_insert(children);
    for child in &description.children {
        collect_adjacency(child, adjacency);
    }
}

fn build_def(description: NodeDescription, bindings: &Bindings) -> Result<NodeDef, LoadError> {
    let NodeDescription {
        name,
        kind,
        description: describe,
        classifier,
        splitter,
        extractor,
        handler,
        question,
        params,
        keywords,
        patterns,
        remedies,
        context_keys,
        taxonomies,
        children,
    } = description;

    let mut def = match kind {
        KindTag::Classifier => {
            let strategy_name = classifier.unwrap_or_else(|| "keyword".to_owned());
            let strategy = bindings.classifiers.get(&strategy_name).cloned().ok_or_else(|| {
                LoadError::UnknownClassifier { node: name.clone(), name: strategy_name }
            })?;
            NodeDef::classifier(name, strategy)
        }
        KindTag::Action => {
            let handler_name = handler
                .ok_or(LoadError::MissingField { node: name.clone(), field: "handler" })?;
            let handler = bindings.handlers.get(&handler_name).cloned().ok_or_else(|| {
                LoadError::UnknownHandler { node: name.clone(), name: handler_name }
            })?;
            let extractor_name = extractor.unwrap_or_else(|| "heuristic".to_owned());
            let extractor = bindings.extractors.get(&extractor_name).cloned().ok_or_else(|| {
                LoadError::UnknownExtractor { node: name.clone(), name: extractor_name }
            })?;
            NodeDef::action(name, params, extractor, handler).context_keys(context_keys)
        }
        KindTag::Splitter => {
            let strategy_name = splitter.unwrap_or_else(|| "rule".to_owned());
            // The rule splitter is constructed per node so it can carry the
            // node's declared taxonomies.
            let strategy: Arc<dyn SplitStrategy> = if strategy_name == "rule" {
                Arc::new(RuleSplit::new(taxonomies))
            } else {
                bindings.splitters.get(&strategy_name).cloned().ok_or_else(|| {
                    LoadError::UnknownSplitter { node: name.clone(), name: strategy_name }
                })?
            };
            NodeDef::splitter(name, strategy)
        }
        KindTag::Clarify => {
            let question = question
                .ok_or(LoadError::MissingField { node: name.clone(), field: "question" })?;
            NodeDef::clarify(name, question)
        }
    };

    if let Some(text) = describe {
        def = def.describe(text);
    }
    def = def.keywords(keywords).patterns(patterns).remedies(remedies);
    for child in children {
        def = def.child(build_def(child, bindings)?);
    }
    Ok(def)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{load_str, Bindings};
    use crate::errors::LoadError;
    use crate::node::handler_fn;
    use crate::result::NodeKind;

    fn demo_bindings() -> Bindings {
        Bindings::new().with_handler("echo", handler_fn(|_, _| Ok(json!("echoed"))))
    }

    #[test]
    fn loads_a_classifier_with_action_children() {
        let text = r#"{
            "roots": [{
                "name": "router",
                "type": "classifier",
                "children": [
                    {"name": "greet", "type": "action", "handler": "echo"},
                    {"name": "status", "type": "action", "handler": "echo",
                     "keywords": ["where is"], "remedies": ["keyword_fallback"]}
                ]
            }]
        }"#;

        let graph = load_str(text, &demo_bindings()).expect("loads");
        assert_eq!(graph.roots().len(), 1);
        let report = graph.validate_graph();
        assert_eq!(report.total_nodes, 3);
        assert_eq!(report.node_counts_by_type.get(NodeKind::Action.label()), Some(&2));
    }

    #[test]
    fn unknown_handler_is_a_load_error() {
        let text = r#"{
            "roots": [{
                "name": "router",
                "type": "classifier",
                "children": [{"name": "greet", "type": "action", "handler": "nope"}]
            }]
        }"#;

        match load_str(text, &Bindings::new()) {
            Err(LoadError::UnknownHandler { node, name }) => {
                assert_eq!(node, "greet");
                assert_eq!(name, "nope");
            }
            other => panic!("unexpected: {:?}", other.map(|_| "graph")),
        }
    }

    #[test]
    fn action_without_handler_is_missing_field() {
        let text = r#"{
            "roots": [{
                "name": "router",
                "type": "classifier",
                "children": [{"name": "greet", "type": "action"}]
            }]
        }"#;

        assert!(matches!(
            load_str(text, &Bindings::new()),
            Err(LoadError::MissingField { field: "handler", .. })
        ));
    }

    #[test]
    fn self_referencing_names_are_cycles() {
        let text = r#"{
            "roots": [{
                "name": "router",
                "type": "classifier",
                "children": [{
                    "name": "router",
                    "type": "classifier",
                    "children": []
                }]
            }]
        }"#;

        assert!(matches!(load_str(text, &Bindings::new()), Err(LoadError::Graph(_))));
    }

    #[test]
    fn splitter_child_rule_is_enforced_on_load() {
        let text = r#"{
            "roots": [{
                "name": "router",
                "type": "classifier",
                "children": [{
                    "name": "multi",
                    "type": "splitter",
                    "children": [{"name": "leaf", "type": "action", "handler": "echo"}]
                }]
            }]
        }"#;

        assert!(matches!(load_str(text, &demo_bindings()), Err(LoadError::Graph(_))));
    }
}
