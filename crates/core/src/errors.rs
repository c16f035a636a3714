use thiserror::Error;

/// Structural violations detected while building or mutating a graph. These
/// are configuration errors and are returned from construction-time APIs;
/// `route()` never produces them.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("root node {name:?} must be a classifier, found {kind}")]
    RootMustBeClassifier { name: String, kind: &'static str },
    #[error("splitter {parent:?} requires classifier children, but child {child:?} is {kind}")]
    SplitterChildMustBeClassifier { parent: String, child: String, kind: &'static str },
    #[error("cycle detected: {}", cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },
    #[error("node {node:?} references unknown remediation strategy {id:?}")]
    UnknownRemedy { node: String, id: String },
    #[error("duplicate node name {name:?}")]
    DuplicateNodeName { name: String },
}

/// Failures turning a JSON graph description into a live graph.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read graph description at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid graph description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("node {node:?} is missing required field {field:?}")]
    MissingField { node: String, field: &'static str },
    #[error("node {node:?} references unknown handler {name:?}")]
    UnknownHandler { node: String, name: String },
    #[error("node {node:?} references unknown classifier kind {name:?}")]
    UnknownClassifier { node: String, name: String },
    #[error("node {node:?} references unknown splitter kind {name:?}")]
    UnknownSplitter { node: String, name: String },
    #[error("node {node:?} references unknown extractor kind {name:?}")]
    UnknownExtractor { node: String, name: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
}
