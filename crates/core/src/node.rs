use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::classify::ClassifyStrategy;
use crate::context::ExecutionContext;
use crate::extract::ArgExtractor;
use crate::llm::LlmConfig;
use crate::remedy::RemedySpec;
use crate::result::{NodeKind, ParamMap};
use crate::split::SplitStrategy;

/// Index of a node in the graph arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Declared primitive kind of one action parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Text,
    Integer,
    Float,
    Boolean,
    Sequence,
    Mapping,
}

impl ParamKind {
    pub fn label(&self) -> &'static str {
        match self {
            ParamKind::Text => "text",
            ParamKind::Integer => "integer",
            ParamKind::Float => "float",
            ParamKind::Boolean => "boolean",
            ParamKind::Sequence => "sequence",
            ParamKind::Mapping => "mapping",
        }
    }
}

/// Parameter name → declared kind, fixed per action node.
pub type ParamSchema = BTreeMap<String, ParamKind>;

/// Domain failure raised by a handler. `kind` names the underlying cause and
/// becomes the result's `error_type`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerError {
    pub kind: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into() }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Domain handler invoked by an action node with coerced parameters. The
/// context is passed only when the node declares context usage.
pub trait Handler: Send + Sync {
    fn call(
        &self,
        params: &ParamMap,
        context: Option<&ExecutionContext>,
    ) -> Result<Value, HandlerError>;
}

struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: Fn(&ParamMap, Option<&ExecutionContext>) -> Result<Value, HandlerError> + Send + Sync,
{
    fn call(
        &self,
        params: &ParamMap,
        context: Option<&ExecutionContext>,
    ) -> Result<Value, HandlerError> {
        (self.0)(params, context)
    }
}

/// Adapts a closure into a [`Handler`].
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(&ParamMap, Option<&ExecutionContext>) -> Result<Value, HandlerError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHandler(f))
}

/// Boolean predicate over extracted parameters.
pub type InputValidator = Arc<dyn Fn(&ParamMap) -> bool + Send + Sync>;
/// Boolean predicate over handler output.
pub type OutputValidator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

pub struct ClassifierNode {
    pub strategy: Arc<dyn ClassifyStrategy>,
    pub llm: Option<LlmConfig>,
}

pub struct ActionNode {
    pub schema: ParamSchema,
    pub extractor: Arc<dyn ArgExtractor>,
    pub handler: Arc<dyn Handler>,
    pub input_validator: Option<InputValidator>,
    pub output_validator: Option<OutputValidator>,
    /// Context keys the extractor may read.
    pub context_keys: Vec<String>,
    /// Whether the handler receives the context object.
    pub uses_context: bool,
}

pub struct SplitterNode {
    pub strategy: Arc<dyn SplitStrategy>,
}

pub struct ClarifyNode {
    pub question: String,
}

/// Behavior variant of a node.
pub enum NodeBody {
    Classifier(ClassifierNode),
    Action(ActionNode),
    Splitter(SplitterNode),
    Clarify(ClarifyNode),
}

impl NodeBody {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeBody::Classifier(_) => NodeKind::Classifier,
            NodeBody::Action(_) => NodeKind::Action,
            NodeBody::Splitter(_) => NodeKind::Splitter,
            NodeBody::Clarify(_) => NodeKind::Clarify,
        }
    }
}

/// A node stored in the arena. Parent/children are arena indices; shape is
/// immutable once the owning root has been added to a graph.
pub struct Node {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub patterns: Vec<String>,
    pub remedies: Vec<RemedySpec>,
    pub body: NodeBody,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn kind(&self) -> NodeKind {
        self.body.kind()
    }
}

/// Borrowed summary of a candidate child, handed to classification functions
/// and routing remediation strategies.
#[derive(Clone, Copy, Debug)]
pub struct ChildView<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub keywords: &'a [String],
    pub patterns: &'a [String],
    pub kind: NodeKind,
}

/// Owned builder tree. Construct with the per-variant constructors, chain
/// setters, then hand the root to [`crate::graph::IntentGraph::add_root`].
pub struct NodeDef {
    pub name: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub patterns: Vec<String>,
    pub remedies: Vec<RemedySpec>,
    pub body: NodeBody,
    pub children: Vec<NodeDef>,
}

impl NodeDef {
    fn with_body(name: impl Into<String>, body: NodeBody) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            keywords: Vec::new(),
            patterns: Vec::new(),
            remedies: Vec::new(),
            body,
            children: Vec::new(),
        }
    }

    pub fn classifier(name: impl Into<String>, strategy: Arc<dyn ClassifyStrategy>) -> Self {
        Self::with_body(name, NodeBody::Classifier(ClassifierNode { strategy, llm: None }))
    }

    pub fn action(
        name: impl Into<String>,
        schema: ParamSchema,
        extractor: Arc<dyn ArgExtractor>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self::with_body(
            name,
            NodeBody::Action(ActionNode {
                schema,
                extractor,
                handler,
                input_validator: None,
                output_validator: None,
                context_keys: Vec::new(),
                uses_context: false,
            }),
        )
    }

    pub fn splitter(name: impl Into<String>, strategy: Arc<dyn SplitStrategy>) -> Self {
        Self::with_body(name, NodeBody::Splitter(SplitterNode { strategy }))
    }

    pub fn clarify(name: impl Into<String>, question: impl Into<String>) -> Self {
        Self::with_body(name, NodeBody::Clarify(ClarifyNode { question: question.into() }))
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn remedy(mut self, spec: impl Into<RemedySpec>) -> Self {
        self.remedies.push(spec.into());
        self
    }

    pub fn remedies<I, S>(mut self, specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RemedySpec>,
    {
        self.remedies.extend(specs.into_iter().map(Into::into));
        self
    }

    pub fn child(mut self, child: NodeDef) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = NodeDef>) -> Self {
        self.children.extend(children);
        self
    }

    /// Per-node LLM settings; meaningful on classifier nodes, which otherwise
    /// inherit the graph default.
    pub fn llm(mut self, config: LlmConfig) -> Self {
        if let NodeBody::Classifier(classifier) = &mut self.body {
            classifier.llm = Some(config);
        }
        self
    }

    pub fn context_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let NodeBody::Action(action) = &mut self.body {
            action.context_keys = keys.into_iter().map(Into::into).collect();
        }
        self
    }

    pub fn uses_context(mut self) -> Self {
        if let NodeBody::Action(action) = &mut self.body {
            action.uses_context = true;
        }
        self
    }

    pub fn validate_input(mut self, validator: InputValidator) -> Self {
        if let NodeBody::Action(action) = &mut self.body {
            action.input_validator = Some(validator);
        }
        self
    }

    pub fn validate_output(mut self, validator: OutputValidator) -> Self {
        if let NodeBody::Action(action) = &mut self.body {
            action.output_validator = Some(validator);
        }
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.body.kind()
    }
}
