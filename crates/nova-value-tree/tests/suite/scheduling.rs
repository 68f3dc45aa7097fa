use std::sync::{mpsc, Arc};

use nova_value_tree::{
    mock::{Gate, MockCall, MockEvaluator},
    DbgProcess, EvaluationManager, FormatRequest, NodeInfo, RawValue, StringOutput, Value,
    ValueFormatterOptions, ValueNodeError,
};

use crate::harness::{recv, Fixture, TIMEOUT};

#[test]
fn blocking_call_inside_callback_fails_fast() {
    let fx = Fixture::new();
    let array = fx.array("values", 10);

    let (tx, rx) = mpsc::channel();
    let inner = array.clone();
    array
        .get_children_with(0, 1, move |_| {
            let nested_children = inner.get_children(1, 1).map(|c| c.len());
            let nested_format = inner.format_name(StringOutput::new());
            tx.send((nested_children, nested_format)).unwrap();
        })
        .unwrap();

    let (nested_children, nested_format) = recv(&rx);
    assert_eq!(nested_children, Err(ValueNodeError::Reentrancy));
    assert_eq!(nested_format, Err(ValueNodeError::Reentrancy));
}

#[tokio::test]
async fn blocking_call_on_async_runtime_fails_fast() {
    let fx = Fixture::new();
    let array = fx.array("values", 10);

    assert_eq!(
        array.get_children(0, 1).map(|c| c.len()),
        Err(ValueNodeError::Reentrancy)
    );
    assert_eq!(array.children_count(), Err(ValueNodeError::Reentrancy));
    let out = StringOutput::new();
    assert_eq!(array.format_name(out.clone()), Err(ValueNodeError::Reentrancy));
    assert_eq!(out.write_count(), 0);
    assert_eq!(fx.evaluator.counters().total(), 0);

    // The async forms are the way in from here.
    let children = array.get_children_async(0, 1).unwrap().await.unwrap();
    assert_eq!(children.len(), 1);
}

#[test]
fn non_blocking_call_inside_callback_is_allowed() {
    let fx = Fixture::new();
    let array = fx.array("values", 10);

    let (tx, rx) = mpsc::channel();
    let inner = array.clone();
    array
        .get_children_with(0, 1, move |_| {
            inner
                .get_children_with(5, 2, move |result| tx.send(result).unwrap())
                .unwrap();
        })
        .unwrap();

    let nested = recv(&rx).unwrap();
    assert_eq!(nested.len(), 2);
    assert_eq!(nested[0].name(), "[5]");
}

#[test]
fn requests_on_one_node_are_served_in_submission_order() {
    let gate = Arc::new(Gate::default());
    let fx = Fixture::with(
        Default::default(),
        MockEvaluator::new().with_gate(gate.clone()),
    );
    let array = fx.array("values", 100);

    let (tx, rx) = mpsc::channel();
    for start in [40, 0, 80, 20] {
        let tx = tx.clone();
        array
            .get_children_with(start, 5, move |result| tx.send(result.map(|c| c.len())).unwrap())
            .unwrap();
    }
    let value = StringOutput::new();
    let format_tx = tx.clone();
    array
        .format_with(
            FormatRequest::new().value(value.clone(), ValueFormatterOptions::default()),
            move |result| format_tx.send(result.map(|()| 0)).unwrap(),
        )
        .unwrap();
    drop(tx);
    gate.open();

    let results: Vec<_> = (0..5).map(|_| recv(&rx)).collect();
    assert!(results.iter().all(|r| r.is_ok()));

    let order: Vec<_> = fx
        .evaluator
        .calls()
        .into_iter()
        .map(|call| match call {
            MockCall::Children { start, .. } => format!("children@{start}"),
            MockCall::Format { .. } => "format".to_owned(),
            MockCall::ChildrenCount { .. } => "count".to_owned(),
        })
        .collect();
    assert_eq!(
        order,
        vec!["children@40", "children@0", "children@80", "children@20", "format"]
    );
    assert_eq!(value.text(), "{int[100]}");
}

#[test]
fn callback_fires_exactly_once_per_request() {
    let fx = Fixture::new();
    let array = fx.array("values", 10);

    let (tx, rx) = mpsc::channel();
    for start in 0..8 {
        let tx = tx.clone();
        array
            .get_children_with(start, 1, move |result| tx.send((start, result.is_ok())).unwrap())
            .unwrap();
    }
    drop(tx);

    let mut seen: Vec<_> = (0..8).map(|_| recv(&rx)).collect();
    seen.sort();
    assert_eq!(seen, (0..8).map(|i| (i, true)).collect::<Vec<_>>());
    // Every sender has been dropped, so no further completion can arrive.
    assert_eq!(rx.recv_timeout(TIMEOUT), Err(mpsc::RecvTimeoutError::Disconnected));
}

#[test]
fn separate_runtimes_evaluate_concurrently() {
    let manager = EvaluationManager::default();
    let process = DbgProcess::new(1, "app");
    let slow_thread = process.add_runtime(1, "slow").add_thread(1, "main");
    let fast_thread = process.add_runtime(2, "fast").add_thread(2, "main");

    let gate = Arc::new(Gate::default());
    let slow_eval = Arc::new(MockEvaluator::new().with_gate(gate.clone()));
    let fast_eval = Arc::new(MockEvaluator::new());

    let array = |expression: &str| {
        NodeInfo::new(
            expression,
            expression,
            Value::new("System.Int32[]", RawValue::Array { length: 4 }),
        )
    };
    let slow = manager.create_node(&slow_thread, slow_eval, array("slow"));
    let fast = manager.create_node(&fast_thread, fast_eval, array("fast"));

    let (slow_tx, slow_rx) = mpsc::channel();
    slow.get_children_with(0, 4, move |result| slow_tx.send(result.map(|c| c.len())).unwrap())
        .unwrap();
    assert!(gate.wait_entered(TIMEOUT));

    // The slow runtime's worker is stuck, but the other runtime isn't queued behind it.
    assert_eq!(fast.get_children(0, 4).unwrap().len(), 4);
    assert_eq!(manager.active_runtimes().len(), 2);

    gate.open();
    assert_eq!(recv(&slow_rx), Ok(4));
}
