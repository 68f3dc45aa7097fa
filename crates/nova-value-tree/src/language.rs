use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::error::{ValueNodeError, ValueNodeResult};
use crate::format::{self, FacetBuffers};
use crate::hierarchy::{DbgThread, RuntimeKey};
use crate::node::{NodeInfo, ValueNode};

/// Source language whose rules govern evaluation and formatting of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Language {
    name: String,
    display_name: String,
    type_keywords: BTreeMap<String, String>,
}

impl Language {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            type_keywords: BTreeMap::new(),
        }
    }

    /// Registers a keyword alias for a fully qualified type, e.g. `System.Int32` → `int`.
    pub fn with_type_keyword(
        mut self,
        qualified_name: impl Into<String>,
        keyword: impl Into<String>,
    ) -> Self {
        self.type_keywords
            .insert(qualified_name.into(), keyword.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn type_keyword(&self, qualified_name: &str) -> Option<&str> {
        self.type_keywords.get(qualified_name).map(String::as_str)
    }
}

/// Execution context of a single evaluation, handed to the [`LanguageEvaluator`] on the
/// owning runtime's evaluation worker.
#[derive(Clone, Debug)]
pub struct EvalContext {
    thread: Arc<DbgThread>,
    runtime: RuntimeKey,
    deadline: Instant,
    budget: Duration,
}

impl EvalContext {
    pub(crate) fn new(
        thread: Arc<DbgThread>,
        runtime: RuntimeKey,
        submitted: Instant,
        budget: Duration,
    ) -> Self {
        Self {
            thread,
            runtime,
            deadline: submitted + budget,
            budget,
        }
    }

    pub fn thread(&self) -> &Arc<DbgThread> {
        &self.thread
    }

    pub fn runtime_key(&self) -> RuntimeKey {
        self.runtime
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Remaining time budget for this request.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Long-running evaluators should call this between debuggee round trips.
    pub fn check_deadline(&self) -> ValueNodeResult<()> {
        if Instant::now() >= self.deadline {
            return Err(ValueNodeError::EvaluationTimeout(self.budget));
        }
        Ok(())
    }
}

/// Language-specific evaluation capability.
///
/// Every method runs on the evaluation worker of the node's runtime, with the debuggee
/// verified to be paused. Implementations never need to synchronize among themselves for a
/// single runtime: requests against one runtime are serialized.
pub trait LanguageEvaluator: Send + Sync + 'static {
    fn language(&self) -> &Language;

    /// Number of children of `node`. Only called when the count isn't already known.
    fn children_count(&self, ctx: &EvalContext, node: &ValueNode) -> ValueNodeResult<u64>;

    /// Up to `count` children starting at `start`. `start + count` never exceeds the
    /// node's children count.
    fn children(
        &self,
        ctx: &EvalContext,
        node: &ValueNode,
        start: u64,
        count: usize,
    ) -> ValueNodeResult<Vec<NodeInfo>>;

    /// Writes the requested facets of `node`.
    ///
    /// Only facets present in `facets` were requested; the rest must not be computed.
    fn format(
        &self,
        ctx: &EvalContext,
        node: &ValueNode,
        facets: &mut FacetBuffers,
    ) -> ValueNodeResult<()> {
        let _ = ctx;
        format::format_default(self.language(), node, facets);
        Ok(())
    }
}
