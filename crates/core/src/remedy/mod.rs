//! Remediation subsystem: named recovery strategies tried in declared order
//! when a node fails. The first strategy returning a replacement result wins;
//! a strategy returning `None` means "not remediated, continue".

mod reflect;
mod retry;
mod routing;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

pub use reflect::{ConsensusVote, SelfReflect};
pub use retry::{FallbackToAnotherNode, ParamTransform, RetryOnFail, RetryWithAlternatePrompt};
pub use routing::{ClassifierFallback, KeywordFallback};

use crate::context::ExecutionContext;
use crate::llm::LlmClient;
use crate::node::{ChildView, Handler};
use crate::result::{ExecutionError, ExecutionResult, NodeKind, ParamMap};

/// Well-known registry ids for the built-in strategies.
pub mod ids {
    pub const RETRY_ON_FAIL: &str = "retry_on_fail";
    pub const FALLBACK_NODE: &str = "fallback_node";
    pub const KEYWORD_FALLBACK: &str = "keyword_fallback";
    pub const CLASSIFIER_FALLBACK: &str = "classifier_fallback";
    pub const SELF_REFLECT: &str = "self_reflect";
    pub const CONSENSUS_VOTE: &str = "consensus_vote";
    pub const ALTERNATE_PROMPT: &str = "alternate_prompt";
}

/// What failed, and the handles a strategy may use to try again.
pub enum FailureScope<'a> {
    /// An action stage failed; the handler and whatever validated parameters
    /// exist so far are available for re-invocation.
    Handler { handler: &'a dyn Handler, params: &'a ParamMap, uses_context: bool },
    /// Classifier routing failed; candidate children and a runner that
    /// executes one of them are available.
    Routing {
        children: &'a [ChildView<'a>],
        run_child: &'a dyn Fn(usize, &str) -> ExecutionResult,
    },
    /// Nothing re-invocable is available.
    Bare,
}

/// One remediation opportunity, handed to each configured strategy in order.
pub struct RemedyAttempt<'a> {
    pub node_name: &'a str,
    pub node_path: &'a [String],
    pub node_kind: NodeKind,
    pub input: &'a str,
    pub context: &'a ExecutionContext,
    pub error: &'a ExecutionError,
    pub scope: FailureScope<'a>,
}

impl RemedyAttempt<'_> {
    /// Success result attributed to the failing node, tagged with the
    /// strategy that produced it.
    pub(crate) fn replacement(
        &self,
        strategy: &str,
        output: serde_json::Value,
    ) -> ExecutionResult {
        ExecutionResult::success(
            self.node_name,
            self.node_path.to_vec(),
            self.node_kind,
            self.input,
            Some(output),
        )
        .with_param("remedy.strategy", serde_json::Value::String(strategy.to_owned()))
    }
}

/// A pluggable recovery action. `apply` returns a replacement result, or
/// `None` to pass the failure to the next configured strategy.
pub trait RemedyStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn apply(&self, attempt: &RemedyAttempt<'_>) -> Option<ExecutionResult>;
}

/// Reference to a strategy on a node: a registry id, or an inline instance.
#[derive(Clone)]
pub enum RemedySpec {
    Id(String),
    Inline(Arc<dyn RemedyStrategy>),
}

impl RemedySpec {
    pub fn label(&self) -> &str {
        match self {
            RemedySpec::Id(id) => id,
            RemedySpec::Inline(strategy) => strategy.name(),
        }
    }
}

impl From<&str> for RemedySpec {
    fn from(id: &str) -> Self {
        RemedySpec::Id(id.to_owned())
    }
}

impl From<String> for RemedySpec {
    fn from(id: String) -> Self {
        RemedySpec::Id(id)
    }
}

impl From<Arc<dyn RemedyStrategy>> for RemedySpec {
    fn from(strategy: Arc<dyn RemedyStrategy>) -> Self {
        RemedySpec::Inline(strategy)
    }
}

/// Explicit id → strategy registry, constructed once per graph and passed by
/// reference through construction. No hidden global state.
#[derive(Clone, Default)]
pub struct RemedyRegistry {
    strategies: BTreeMap<String, Arc<dyn RemedyStrategy>>,
}

impl RemedyRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry seeded with the built-ins that need no injected capability:
    /// retry, keyword fallback, classifier fallback (keyword alternate), and
    /// alternate-prompt with the standard transforms.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(ids::RETRY_ON_FAIL, Arc::new(RetryOnFail::default()));
        registry.register(ids::KEYWORD_FALLBACK, Arc::new(KeywordFallback::default()));
        registry.register(
            ids::CLASSIFIER_FALLBACK,
            Arc::new(ClassifierFallback::new(Arc::new(crate::classify::KeywordClassify::new()))),
        );
        registry.register(ids::ALTERNATE_PROMPT, Arc::new(RetryWithAlternatePrompt::default()));
        registry
    }

    /// Defaults plus the LLM-backed strategies bound to one client.
    pub fn with_llm_defaults(client: Arc<dyn LlmClient>) -> Self {
        let mut registry = Self::with_defaults();
        registry.register(ids::SELF_REFLECT, Arc::new(SelfReflect::new(client.clone())));
        registry.register(ids::CONSENSUS_VOTE, Arc::new(ConsensusVote::new(vec![client])));
        registry
    }

    pub fn register(&mut self, id: impl Into<String>, strategy: Arc<dyn RemedyStrategy>) {
        self.strategies.insert(id.into(), strategy);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn RemedyStrategy>> {
        self.strategies.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.strategies.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }

    /// Resolves a node's ordered strategy list. Unknown ids are rejected at
    /// graph construction; reaching one here only logs and skips it.
    pub(crate) fn resolve(&self, specs: &[RemedySpec]) -> Vec<Arc<dyn RemedyStrategy>> {
        specs
            .iter()
            .filter_map(|spec| match spec {
                RemedySpec::Inline(strategy) => Some(strategy.clone()),
                RemedySpec::Id(id) => {
                    let found = self.get(id);
                    if found.is_none() {
                        warn!(
                            event_name = "remedy.unknown_id",
                            id = id.as_str(),
                            "skipping unregistered remediation strategy"
                        );
                    }
                    found
                }
            })
            .collect()
    }
}
