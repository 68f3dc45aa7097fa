//! Value nodes: lazily expandable, formattable presentation wrappers around values.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock, Weak,
};

use crate::error::{ValueNodeError, ValueNodeResult};
use crate::format::FormatRequest;
use crate::hierarchy::{DbgProcess, DbgRuntime, DbgThread};
use crate::language::{EvalContext, Language, LanguageEvaluator};
use crate::manager::{EvaluationManager, Pending, Plan};
use crate::options::{TypeFormatterOptions, ValueFormatterOptions};
use crate::text::SharedWriter;
use crate::value::{NodeKind, RawValue, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a node has children. `Unknown` defers the (possibly expensive) check until the
/// node is expanded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HasChildren {
    Yes,
    No,
    Unknown,
}

impl From<Option<bool>> for HasChildren {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Self::Yes,
            Some(false) => Self::No,
            None => Self::Unknown,
        }
    }
}

impl HasChildren {
    pub fn as_option(self) -> Option<bool> {
        match self {
            Self::Yes => Some(true),
            Self::No => Some(false),
            Self::Unknown => None,
        }
    }
}

/// Presentation hint drawn next to a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageName {
    Local,
    Parameter,
    ReturnValue,
    Exception,
    StowedException,
    ObjectId,
    Field,
    StaticField,
    Property,
    StaticProperty,
    ArrayElement,
    Type,
    Method,
    Error,
    Data,
}

impl ImageName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "Local",
            Self::Parameter => "Parameter",
            Self::ReturnValue => "ReturnValue",
            Self::Exception => "Exception",
            Self::StowedException => "StowedException",
            Self::ObjectId => "ObjectId",
            Self::Field => "Field",
            Self::StaticField => "StaticField",
            Self::Property => "Property",
            Self::StaticProperty => "StaticProperty",
            Self::ArrayElement => "ArrayElement",
            Self::Type => "Type",
            Self::Method => "Method",
            Self::Error => "Error",
            Self::Data => "Data",
        }
    }
}

impl std::fmt::Display for ImageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an evaluator knows about a node it is creating.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub expression: String,
    pub value: Value,
    pub expected_type: Option<String>,
    pub image_name: ImageName,
    pub read_only: bool,
    pub has_children: HasChildren,
    pub children_count: Option<u64>,
}

impl NodeInfo {
    /// Child presence is derived from the value's shape: scalars have none, arrays know
    /// their length, pointers and objects are left for the evaluator to decide.
    pub fn new(name: impl Into<String>, expression: impl Into<String>, value: Value) -> Self {
        let (has_children, children_count) = match value.raw() {
            RawValue::Array { length } => (
                if *length == 0 {
                    HasChildren::No
                } else {
                    HasChildren::Yes
                },
                Some(*length),
            ),
            RawValue::Reference { target: 0 } => (HasChildren::No, None),
            _ => match value.kind() {
                NodeKind::Scalar => (HasChildren::No, None),
                NodeKind::Aggregate | NodeKind::PointerLike => (HasChildren::Unknown, None),
            },
        };
        Self {
            name: name.into(),
            expression: expression.into(),
            value,
            expected_type: None,
            image_name: ImageName::Data,
            read_only: false,
            has_children,
            children_count,
        }
    }

    pub fn with_expected_type(mut self, ty: impl Into<String>) -> Self {
        self.expected_type = Some(ty.into());
        self
    }

    pub fn with_image_name(mut self, image_name: ImageName) -> Self {
        self.image_name = image_name;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_has_children(mut self, has_children: HasChildren) -> Self {
        self.has_children = has_children;
        if has_children == HasChildren::No {
            self.children_count = Some(0);
        }
        self
    }

    pub fn with_children_count(mut self, count: u64) -> Self {
        self.children_count = Some(count);
        self.has_children = if count == 0 {
            HasChildren::No
        } else {
            HasChildren::Yes
        };
        self
    }
}

/// A node in a locals/watch tree.
///
/// Cloning is cheap and yields a handle to the same node. Identity fields never change after
/// construction; only the children count transitions once from unknown to known.
#[derive(Clone)]
pub struct ValueNode {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    id: NodeId,
    manager: EvaluationManager,
    evaluator: Arc<dyn LanguageEvaluator>,
    thread: Weak<DbgThread>,
    name: String,
    expression: String,
    value: Value,
    expected_type: Option<String>,
    image_name: ImageName,
    read_only: bool,
    has_children: HasChildren,
    children_count: OnceLock<u64>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ValueNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueNode")
            .field("id", &self.inner.id)
            .field("language", &self.language().name())
            .field("name", &self.inner.name)
            .field("expression", &self.inner.expression)
            .field("has_children", &self.inner.has_children)
            .field("children_count", &self.inner.children_count.get())
            .finish()
    }
}

impl ValueNode {
    pub(crate) fn new(
        id: NodeId,
        manager: EvaluationManager,
        evaluator: Arc<dyn LanguageEvaluator>,
        thread: Weak<DbgThread>,
        info: NodeInfo,
    ) -> Self {
        let children_count = OnceLock::new();
        match (info.has_children, info.children_count) {
            (HasChildren::No, _) => {
                let _ = children_count.set(0);
            }
            (_, Some(count)) => {
                let _ = children_count.set(count);
            }
            _ => {}
        }
        Self {
            inner: Arc::new(NodeInner {
                id,
                manager,
                evaluator,
                thread,
                name: info.name,
                expression: info.expression,
                value: info.value,
                expected_type: info.expected_type,
                image_name: info.image_name,
                read_only: info.read_only,
                has_children: info.has_children,
                children_count,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn language(&self) -> &Language {
        self.inner.evaluator.language()
    }

    pub fn evaluator(&self) -> &Arc<dyn LanguageEvaluator> {
        &self.inner.evaluator
    }

    pub fn manager(&self) -> &EvaluationManager {
        &self.inner.manager
    }

    /// The owning thread, or `None` once it has been torn down.
    pub fn thread(&self) -> Option<Arc<DbgThread>> {
        self.inner.thread.upgrade()
    }

    pub fn runtime(&self) -> Option<Arc<DbgRuntime>> {
        self.thread()?.runtime()
    }

    pub fn process(&self) -> Option<Arc<DbgProcess>> {
        self.thread()?.process()
    }

    pub fn value(&self) -> &Value {
        &self.inner.value
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Expression used to add this node as a watch or to assign a new value to it.
    pub fn expression(&self) -> &str {
        &self.inner.expression
    }

    /// Declared type of the slot holding the value, when it differs from the value's type.
    pub fn expected_type(&self) -> Option<&str> {
        self.inner.expected_type.as_deref()
    }

    pub fn image_name(&self) -> ImageName {
        self.inner.image_name
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    pub fn has_children(&self) -> HasChildren {
        self.inner.has_children
    }

    pub fn kind(&self) -> NodeKind {
        self.inner.value.kind()
    }

    /// The children count if it is already known, without evaluating anything.
    pub fn cached_children_count(&self) -> Option<u64> {
        self.inner.children_count.get().copied()
    }

    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            tracing::trace!(target: "nova.value_tree", node = %self.inner.id, "value node closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn weak_thread(&self) -> Weak<DbgThread> {
        self.inner.thread.clone()
    }

    /// Children count, evaluating it at most once. Runs on the evaluation worker.
    pub(crate) fn load_children_count(&self, ctx: &EvalContext) -> ValueNodeResult<u64> {
        if let Some(count) = self.cached_children_count() {
            return Ok(count);
        }
        let count = self.inner.evaluator.children_count(ctx, self)?;
        Ok(*self.inner.children_count.get_or_init(|| count))
    }

    fn closed_error(&self) -> ValueNodeError {
        ValueNodeError::unavailable(format!("value node {} is closed", self.inner.id))
    }

    fn children_count_plan(&self) -> Plan<u64> {
        if self.is_closed() {
            return Plan::Ready(Err(self.closed_error()));
        }
        if let Some(count) = self.cached_children_count() {
            return Plan::Ready(Ok(count));
        }
        Plan::evaluate(|ctx, node| node.load_children_count(ctx))
    }

    fn children_plan(&self, index: u64, count: usize) -> ValueNodeResult<Plan<Vec<ValueNode>>> {
        let len = u64::try_from(count)
            .map_err(|_| ValueNodeError::invalid_argument("children count out of range"))?;
        index.checked_add(len).ok_or_else(|| {
            ValueNodeError::invalid_argument(format!(
                "children range {index}+{count} overflows"
            ))
        })?;

        if self.is_closed() {
            return Ok(Plan::Ready(Err(self.closed_error())));
        }
        if count == 0 || self.has_children() == HasChildren::No {
            return Ok(Plan::Ready(Ok(Vec::new())));
        }
        if matches!(self.cached_children_count(), Some(total) if index >= total) {
            return Ok(Plan::Ready(Ok(Vec::new())));
        }
        Ok(Plan::evaluate(move |ctx, node| {
            node.manager().fetch_children(ctx, node, index, count)
        }))
    }

    fn format_plan(&self, request: FormatRequest) -> ValueNodeResult<Plan<()>> {
        request.validate()?;
        if request.is_empty() {
            return Ok(Plan::Ready(Ok(())));
        }
        if self.is_closed() {
            return Ok(Plan::Ready(Err(self.closed_error())));
        }
        Ok(Plan::evaluate(move |ctx, node| {
            let (writers, mut facets) = request.split();
            node.evaluator().format(ctx, node, &mut facets)?;
            writers.flush(facets);
            Ok(())
        }))
    }

    /// Number of children. `0` when [`Self::has_children`] is `No`.
    ///
    /// Blocks until the count has been evaluated; the result is cached after the first
    /// success.
    pub fn children_count(&self) -> ValueNodeResult<u64> {
        self.inner.manager.blocking(self, self.children_count_plan())
    }

    pub fn children_count_with<C>(&self, callback: C)
    where
        C: FnOnce(ValueNodeResult<u64>) + Send + 'static,
    {
        self.inner
            .manager
            .with_callback(self, self.children_count_plan(), callback);
    }

    pub fn children_count_async(&self) -> Pending<u64> {
        self.inner.manager.pending(self, self.children_count_plan())
    }

    /// Creates up to `count` new child nodes starting at `index`, blocking until they exist.
    ///
    /// Fewer nodes are returned when the range runs past the children count, and none when
    /// `index` is past the end. Every call materializes new node instances.
    ///
    /// Like every blocking form, fails with [`ValueNodeError::Reentrancy`] when called from
    /// a completion callback, an evaluation worker or a thread driving a tokio runtime.
    pub fn get_children(&self, index: u64, count: usize) -> ValueNodeResult<Vec<ValueNode>> {
        let plan = self.children_plan(index, count)?;
        self.inner.manager.blocking(self, plan)
    }

    /// Non-blocking [`Self::get_children`]. `callback` runs exactly once, on a context chosen
    /// by the [`EvaluationManager`].
    ///
    /// Malformed requests fail synchronously and the callback is not invoked.
    pub fn get_children_with<C>(&self, index: u64, count: usize, callback: C) -> ValueNodeResult<()>
    where
        C: FnOnce(ValueNodeResult<Vec<ValueNode>>) + Send + 'static,
    {
        let plan = self.children_plan(index, count)?;
        self.inner.manager.with_callback(self, plan, callback);
        Ok(())
    }

    pub fn get_children_async(
        &self,
        index: u64,
        count: usize,
    ) -> ValueNodeResult<Pending<Vec<ValueNode>>> {
        let plan = self.children_plan(index, count)?;
        Ok(self.inner.manager.pending(self, plan))
    }

    /// Formats the requested facets, blocking until all of them have been written.
    pub fn format(&self, request: FormatRequest) -> ValueNodeResult<()> {
        let plan = self.format_plan(request)?;
        self.inner.manager.blocking(self, plan)
    }

    /// Non-blocking [`Self::format`]. Every facet write happens before `callback` runs.
    pub fn format_with<C>(&self, request: FormatRequest, callback: C) -> ValueNodeResult<()>
    where
        C: FnOnce(ValueNodeResult<()>) + Send + 'static,
    {
        let plan = self.format_plan(request)?;
        self.inner.manager.with_callback(self, plan, callback);
        Ok(())
    }

    pub fn format_async(&self, request: FormatRequest) -> ValueNodeResult<Pending<()>> {
        let plan = self.format_plan(request)?;
        Ok(self.inner.manager.pending(self, plan))
    }

    pub fn format_name(&self, output: SharedWriter) -> ValueNodeResult<()> {
        self.format(FormatRequest::new().name(output))
    }

    pub fn format_value(
        &self,
        output: SharedWriter,
        options: ValueFormatterOptions,
    ) -> ValueNodeResult<()> {
        self.format(FormatRequest::new().value(output, options))
    }

    /// Formats the declared ("field") type.
    pub fn format_expected_type(
        &self,
        output: SharedWriter,
        options: TypeFormatterOptions,
    ) -> ValueNodeResult<()> {
        self.format(FormatRequest::new().expected_type(output, options))
    }

    /// Formats the runtime type of the value.
    pub fn format_actual_type(
        &self,
        output: SharedWriter,
        options: TypeFormatterOptions,
    ) -> ValueNodeResult<()> {
        self.format(FormatRequest::new().actual_type(output, options))
    }
}
