use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::error::{ValueNodeError, ValueNodeResult};
use crate::format::{self, FacetBuffers};
use crate::language::{EvalContext, Language, LanguageEvaluator};
use crate::node::{ImageName, NodeInfo, ValueNode};
use crate::value::{RawValue, Value};

/// Number of evaluator calls, by kind.
#[derive(Debug, Default)]
pub struct EvaluationCounters {
    children_count: AtomicUsize,
    children: AtomicUsize,
    format: AtomicUsize,
}

impl EvaluationCounters {
    pub fn children_count_calls(&self) -> usize {
        self.children_count.load(Ordering::SeqCst)
    }

    pub fn children_calls(&self) -> usize {
        self.children.load(Ordering::SeqCst)
    }

    pub fn format_calls(&self) -> usize {
        self.format.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.children_count_calls() + self.children_calls() + self.format_calls()
    }
}

/// Blocks evaluations until opened.
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    cv: Condvar,
}

#[derive(Debug, Default)]
struct GateState {
    open: bool,
    entered: usize,
}

impl Gate {
    pub fn open(&self) {
        self.state.lock().open = true;
        self.cv.notify_all();
    }

    fn pass(&self) {
        let mut state = self.state.lock();
        state.entered += 1;
        self.cv.notify_all();
        while !state.open {
            self.cv.wait(&mut state);
        }
    }

    /// Waits until at least one evaluation is blocked on (or has passed) the gate.
    pub fn wait_entered(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.entered == 0 {
            if self.cv.wait_until(&mut state, deadline).timed_out() {
                return state.entered > 0;
            }
        }
        true
    }
}

/// What one evaluator call looked like, in the order calls were made.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockCall {
    ChildrenCount { expression: String },
    Children { expression: String, start: u64, count: usize },
    Format { expression: String },
}

/// Deterministic, in-memory language evaluator test double.
///
/// Arrays produce `[i]` element children holding `i`, typed after the array's element type
/// (see [`element_value`]). Other nodes return the children registered for their expression
/// with [`MockEvaluator::set_children`].
pub struct MockEvaluator {
    language: Language,
    counters: Arc<EvaluationCounters>,
    children: Mutex<HashMap<String, Vec<NodeInfo>>>,
    reported_counts: Mutex<HashMap<String, u64>>,
    gate: Option<Arc<Gate>>,
    fail_next: Mutex<Option<ValueNodeError>>,
    panic_next: Mutex<bool>,
    calls: Mutex<Vec<MockCall>>,
}

impl Default for MockEvaluator {
    fn default() -> Self {
        Self {
            language: Language::new("mock", "Mock")
                .with_type_keyword("System.Int32", "int")
                .with_type_keyword("System.String", "string"),
            counters: Arc::new(EvaluationCounters::default()),
            children: Mutex::new(HashMap::new()),
            reported_counts: Mutex::new(HashMap::new()),
            gate: None,
            fail_next: Mutex::new(None),
            panic_next: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every evaluation waits on `gate` before doing anything.
    pub fn with_gate(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn counters(&self) -> Arc<EvaluationCounters> {
        Arc::clone(&self.counters)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn set_children(&self, parent_expression: impl Into<String>, children: Vec<NodeInfo>) {
        self.children.lock().insert(parent_expression.into(), children);
    }

    /// Report `count` children for `parent_expression`, regardless of how many exist.
    pub fn set_reported_count(&self, parent_expression: impl Into<String>, count: u64) {
        self.reported_counts
            .lock()
            .insert(parent_expression.into(), count);
    }

    pub fn fail_next(&self, err: ValueNodeError) {
        *self.fail_next.lock() = Some(err);
    }

    pub fn panic_next(&self) {
        *self.panic_next.lock() = true;
    }

    fn enter(&self, call: MockCall) -> ValueNodeResult<()> {
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        self.calls.lock().push(call);
        if std::mem::take(&mut *self.panic_next.lock()) {
            panic!("mock evaluator panic");
        }
        match self.fail_next.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Element `i` of a mock array. Integral element types hold `i` in their own width
/// (saturating), `System.String` holds its decimal text, anything else an `I64`.
pub fn element_value(element_type: &str, i: u64) -> Value {
    let raw = match element_type {
        "System.Byte" => RawValue::U8(u8::try_from(i).unwrap_or(u8::MAX)),
        "System.Int16" => RawValue::I16(i16::try_from(i).unwrap_or(i16::MAX)),
        "System.Int32" => RawValue::I32(i32::try_from(i).unwrap_or(i32::MAX)),
        "System.UInt32" => RawValue::U32(u32::try_from(i).unwrap_or(u32::MAX)),
        "System.UInt64" => RawValue::U64(i),
        "System.String" => RawValue::String(i.to_string()),
        _ => RawValue::I64(i64::try_from(i).unwrap_or(i64::MAX)),
    };
    Value::new(element_type, raw)
}

impl LanguageEvaluator for MockEvaluator {
    fn language(&self) -> &Language {
        &self.language
    }

    fn children_count(&self, _ctx: &EvalContext, node: &ValueNode) -> ValueNodeResult<u64> {
        self.counters.children_count.fetch_add(1, Ordering::SeqCst);
        self.enter(MockCall::ChildrenCount {
            expression: node.expression().to_owned(),
        })?;

        if let Some(count) = self.reported_counts.lock().get(node.expression()) {
            return Ok(*count);
        }
        if let RawValue::Array { length } = node.value().raw() {
            return Ok(*length);
        }
        Ok(self
            .children
            .lock()
            .get(node.expression())
            .map_or(0, |children| children.len() as u64))
    }

    fn children(
        &self,
        _ctx: &EvalContext,
        node: &ValueNode,
        start: u64,
        count: usize,
    ) -> ValueNodeResult<Vec<NodeInfo>> {
        self.counters.children.fetch_add(1, Ordering::SeqCst);
        self.enter(MockCall::Children {
            expression: node.expression().to_owned(),
            start,
            count,
        })?;

        if let RawValue::Array { length } = node.value().raw() {
            let end = (*length).min(start.saturating_add(count as u64));
            let element_type = node
                .value()
                .type_name()
                .strip_suffix("[]")
                .unwrap_or("System.Int32")
                .to_owned();
            return Ok((start..end)
                .map(|i| {
                    NodeInfo::new(
                        format!("[{i}]"),
                        format!("{}[{i}]", node.expression()),
                        element_value(&element_type, i),
                    )
                    .with_image_name(ImageName::ArrayElement)
                })
                .collect());
        }

        let children = self.children.lock();
        let Some(children) = children.get(node.expression()) else {
            return Ok(Vec::new());
        };
        let start = usize::try_from(start).unwrap_or(usize::MAX);
        Ok(children.iter().skip(start).take(count).cloned().collect())
    }

    fn format(
        &self,
        _ctx: &EvalContext,
        node: &ValueNode,
        facets: &mut FacetBuffers,
    ) -> ValueNodeResult<()> {
        self.counters.format.fetch_add(1, Ordering::SeqCst);
        self.enter(MockCall::Format {
            expression: node.expression().to_owned(),
        })?;
        format::format_default(&self.language, node, facets);
        Ok(())
    }
}
