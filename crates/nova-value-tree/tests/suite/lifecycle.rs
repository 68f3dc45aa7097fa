use std::{sync::mpsc, sync::Arc, time::Duration};

use nova_value_tree::{
    mock::{Gate, MockEvaluator},
    EvaluationConfig, FormatRequest, NodeInfo, ProcessState, RawValue, StringOutput, Value,
    ValueFormatterOptions, ValueNodeError,
};

use crate::harness::{recv, Fixture, TIMEOUT};

fn is_unavailable<T: std::fmt::Debug>(result: &Result<T, ValueNodeError>) -> bool {
    matches!(result, Err(ValueNodeError::EvaluationUnavailable(_)))
}

#[test]
fn process_exit_while_queued_reports_unavailable() {
    let gate = Arc::new(Gate::default());
    let fx = Fixture::with(
        EvaluationConfig::default(),
        MockEvaluator::new().with_gate(gate.clone()),
    );
    let array = fx.array("values", 10);
    let object = fx.object("user");

    // The first request occupies the worker inside the evaluator...
    let (first_tx, first_rx) = mpsc::channel();
    array
        .get_children_with(0, 5, move |result| first_tx.send(result).unwrap())
        .unwrap();
    assert!(gate.wait_entered(TIMEOUT));

    // ...while a second one is queued behind it.
    let (second_tx, second_rx) = mpsc::channel();
    object.children_count_with(move |result| second_tx.send(result).unwrap());

    fx.process.exit();
    gate.open();

    // The request already running completes normally.
    assert_eq!(recv(&first_rx).unwrap().len(), 5);

    let second = recv(&second_rx);
    assert!(is_unavailable(&second), "{second:?}");
    assert_eq!(object.cached_children_count(), None);
}

#[test]
fn running_process_is_not_inspectable() {
    let fx = Fixture::new();
    let object = fx.object("user");

    fx.process.resume();
    let err = object.children_count().unwrap_err();
    assert!(err.is_stale());
    assert!(!err.is_recoverable());

    let out = StringOutput::new();
    assert!(is_unavailable(
        &object.format_value(out.clone(), ValueFormatterOptions::default())
    ));
    assert_eq!(out.write_count(), 0);

    fx.process.pause();
    assert_eq!(object.children_count().unwrap(), 0);
}

#[test]
fn nodes_do_not_outlive_their_thread() {
    let fx = Fixture::new();
    let array = fx.array("values", 10);
    assert!(array.thread().is_some());

    let removed = fx.runtime.remove_thread(fx.thread.id());
    assert!(removed.is_some());
    drop(removed);
    drop(fx);

    assert!(array.thread().is_none());
    assert!(array.runtime().is_none());
    assert!(array.process().is_none());
    assert!(is_unavailable(&array.get_children(0, 1)));
}

#[test]
fn closed_thread_is_not_inspectable() {
    let fx = Fixture::new();
    let array = fx.array("values", 10);

    fx.runtime.remove_thread(fx.thread.id());
    assert!(fx.thread.is_closed());
    assert!(is_unavailable(&array.get_children(0, 1)));
}

#[test]
fn exited_process_projections() {
    let fx = Fixture::new();
    let node = fx.int("x", 1);
    assert_eq!(node.process().map(|p| p.state()), Some(ProcessState::Paused));

    fx.process.exit();
    assert_eq!(
        node.process().map(|p| p.state()),
        Some(ProcessState::Terminated)
    );
    assert_eq!(node.runtime().map(|r| r.is_closed()), Some(true));
    assert!(is_unavailable(&node.format_name(StringOutput::new())));
}

#[test]
fn closed_node_rejects_evaluation() {
    let fx = Fixture::new();
    let array = fx.array("values", 10);
    array.close();
    assert!(array.is_closed());

    assert!(is_unavailable(&array.get_children(0, 1)));
    assert!(is_unavailable(&array.children_count()));

    let (tx, rx) = mpsc::channel();
    array
        .format_with(
            FormatRequest::new().name(StringOutput::new()),
            move |result| tx.send(result).unwrap(),
        )
        .unwrap();
    assert!(is_unavailable(&recv(&rx)));
    assert_eq!(fx.evaluator.counters().total(), 0);
}

#[test]
fn released_runtime_abandons_queued_requests() {
    let gate = Arc::new(Gate::default());
    let fx = Fixture::with(
        EvaluationConfig::default(),
        MockEvaluator::new().with_gate(gate.clone()),
    );
    let array = fx.array("values", 10);
    let key = fx.runtime.key().unwrap();

    let (first_tx, first_rx) = mpsc::channel();
    array
        .get_children_with(0, 1, move |result| first_tx.send(result).unwrap())
        .unwrap();
    assert!(gate.wait_entered(TIMEOUT));
    assert_eq!(fx.manager.active_runtimes(), vec![key]);

    let (second_tx, second_rx) = mpsc::channel();
    array
        .get_children_with(1, 1, move |result| second_tx.send(result).unwrap())
        .unwrap();

    assert!(fx.manager.release_runtime(key));
    assert!(!fx.manager.release_runtime(key));
    assert!(fx.manager.active_runtimes().is_empty());
    gate.open();

    assert_eq!(recv(&first_rx).unwrap().len(), 1);
    assert!(is_unavailable(&recv(&second_rx)));

    // A later request gets a fresh worker.
    assert_eq!(array.get_children(2, 1).unwrap().len(), 1);
    assert_eq!(fx.manager.active_runtimes(), vec![key]);
}

#[test]
fn process_exit_releases_runtime_workers() {
    let fx = Fixture::new();
    let array = fx.array("values", 10);
    let key = fx.runtime.key().unwrap();

    assert_eq!(array.get_children(0, 1).unwrap().len(), 1);
    assert_eq!(fx.manager.active_runtimes(), vec![key]);

    fx.process.exit();
    assert!(fx.manager.active_runtimes().is_empty());

    assert!(is_unavailable(&array.get_children(1, 1)));
    assert!(fx.manager.active_runtimes().is_empty());
}

#[test]
fn removed_runtime_releases_its_worker_only() {
    let fx = Fixture::new();
    let other_thread = fx.process.add_runtime(2, "other").add_thread(200, "main");
    let other = fx.manager.create_node(
        &other_thread,
        fx.evaluator.clone(),
        NodeInfo::new("other", "other", Value::new("App.Models.User", RawValue::Object)),
    );
    let array = fx.array("values", 10);

    assert_eq!(array.children_count(), Ok(10));
    assert_eq!(other.children_count(), Ok(0));
    assert_eq!(fx.manager.active_runtimes().len(), 2);

    let removed = fx.process.remove_runtime(2);
    assert!(removed.is_some());
    assert_eq!(fx.manager.active_runtimes(), vec![fx.runtime.key().unwrap()]);
    assert_eq!(array.get_children(0, 2).unwrap().len(), 2);
}

#[test]
fn queued_past_budget_times_out() {
    let gate = Arc::new(Gate::default());
    let fx = Fixture::with(
        EvaluationConfig::default().with_timeout(Duration::from_millis(50)),
        MockEvaluator::new().with_gate(gate.clone()),
    );
    let object = fx.object("user");
    let array = fx.array("values", 10);

    let (first_tx, first_rx) = mpsc::channel();
    object.children_count_with(move |result| first_tx.send(result).unwrap());
    assert!(gate.wait_entered(TIMEOUT));

    let (second_tx, second_rx) = mpsc::channel();
    array
        .get_children_with(0, 1, move |result| second_tx.send(result).unwrap())
        .unwrap();

    std::thread::sleep(Duration::from_millis(200));
    gate.open();

    assert_eq!(recv(&first_rx), Ok(0));
    let second = recv(&second_rx);
    assert!(
        matches!(second, Err(ValueNodeError::EvaluationTimeout(budget)) if budget == Duration::from_millis(50)),
        "{second:?}"
    );
    assert!(second.unwrap_err().is_recoverable());
}

#[test]
fn evaluator_panic_is_reported_and_worker_survives() {
    let fx = Fixture::new();
    let object = fx.object("user");

    fx.evaluator.panic_next();
    let err = object.children_count().unwrap_err();
    assert!(matches!(err, ValueNodeError::EvaluationFailed(_)), "{err:?}");

    assert_eq!(object.children_count().unwrap(), 0);
}
