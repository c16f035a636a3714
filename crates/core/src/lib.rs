//! Intent execution engine: routes free-text input through a tree of
//! classifier, action, splitter, and clarify nodes, with pluggable
//! remediation when any step fails.
//!
//! Expected domain failures never unwind: every node returns an
//! [`ExecutionResult`], and `route()` returns an outcome whose failures are
//! data. Construction-time problems (malformed graphs, unknown strategy ids)
//! are typed errors from the building APIs instead.

pub mod classify;
pub mod config;
pub mod context;
pub mod errors;
mod exec;
pub mod extract;
pub mod graph;
pub mod llm;
pub mod loader;
pub mod node;
pub mod remedy;
pub mod result;
pub mod split;

pub use classify::{ClassifyRequest, ClassifyStrategy, KeywordClassify, LlmClassify, RegexClassify, Routing};
pub use config::{ConfigError, EngineConfig, RetryConfig, RoutingConfig};
pub use context::{ContextView, ExecutionContext};
pub use errors::{GraphError, LoadError};
pub use extract::{ArgExtractor, ExtractFailure, HeuristicExtractor, LlmExtractor};
pub use graph::validate::{detect_cycles, find_unreachable_nodes, GraphReport};
pub use graph::{Disposition, InputShape, IntentGraph, RouteOutcome};
pub use llm::{LlmClient, LlmConfig, LlmError, LlmResponse, ScriptedLlm};
pub use node::{
    handler_fn, ChildView, Handler, HandlerError, InputValidator, Node, NodeDef, NodeId,
    OutputValidator, ParamKind, ParamSchema,
};
pub use loader::{load_path, load_str, load_with_config, Bindings, GraphDescription};
pub use remedy::{
    ids as remedy_ids, ClassifierFallback, ConsensusVote, FailureScope, FallbackToAnotherNode,
    KeywordFallback, ParamTransform, RemedyAttempt, RemedyRegistry, RemedySpec, RemedyStrategy,
    RetryOnFail, RetryWithAlternatePrompt, SelfReflect,
};
pub use result::{error_kind, ExecutionError, ExecutionResult, NodeKind, ParamMap, PathEntry};
pub use split::{Chunk, LlmSplit, RuleSplit, SplitStrategy};
