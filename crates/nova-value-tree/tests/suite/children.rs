use std::sync::mpsc;

use nova_value_tree::{
    mock::{MockCall, MockEvaluator},
    EvaluationConfig, HasChildren, NodeInfo, RawValue, Value, ValueNodeError,
};

use crate::harness::{names, recv, Fixture};

#[test]
fn scalar_nodes_never_have_children() {
    let fx = Fixture::new();
    let node = fx.int("x", 5);
    assert_eq!(node.has_children(), HasChildren::No);

    for count in [0, 1, 10, 1_000] {
        assert!(node.get_children(0, count).unwrap().is_empty());
    }
    assert_eq!(node.children_count().unwrap(), 0);
    assert_eq!(fx.evaluator.counters().total(), 0);
}

#[test]
fn range_running_past_the_end_is_clamped() {
    let fx = Fixture::new();
    let array = fx.array("values", 1000);

    let children = array.get_children(995, 10).unwrap();
    assert_eq!(
        names(&children),
        vec!["[995]", "[996]", "[997]", "[998]", "[999]"]
    );
    assert_eq!(children[0].expression(), "values[995]");
    assert_eq!(children[4].value().raw(), &RawValue::I32(999));
    assert_eq!(children[4].value().type_name(), "System.Int32");
}

#[test]
fn array_elements_carry_their_element_type() {
    let fx = Fixture::new();
    let strings = fx.node(NodeInfo::new(
        "names",
        "names",
        Value::new("System.String[]", RawValue::Array { length: 3 }),
    ));
    let longs = fx.node(NodeInfo::new(
        "ticks",
        "ticks",
        Value::new("System.Int64[]", RawValue::Array { length: 3 }),
    ));

    let element = &strings.get_children(2, 1).unwrap()[0];
    assert_eq!(element.value().raw(), &RawValue::String("2".into()));
    let element = &longs.get_children(2, 1).unwrap()[0];
    assert_eq!(element.value().raw(), &RawValue::I64(2));
    assert_eq!(element.value().type_name(), "System.Int64");
}

#[test]
fn index_past_the_end_returns_nothing() {
    let fx = Fixture::new();
    let array = fx.array("values", 3);

    assert!(array.get_children(3, 5).unwrap().is_empty());
    assert!(array.get_children(u64::MAX - 1, 1).unwrap().is_empty());
    assert_eq!(fx.evaluator.counters().children_calls(), 0);
}

#[test]
fn overflowing_range_is_an_invalid_argument() {
    let fx = Fixture::new();
    let array = fx.array("values", 3);

    let err = array.get_children(u64::MAX, 2).unwrap_err();
    assert!(matches!(err, ValueNodeError::InvalidArgument(_)));

    // The callback form fails synchronously and never invokes the callback.
    let (tx, rx) = mpsc::channel::<()>();
    let err = array
        .get_children_with(u64::MAX, 2, move |_| tx.send(()).unwrap())
        .unwrap_err();
    assert!(matches!(err, ValueNodeError::InvalidArgument(_)));
    assert!(rx.recv().is_err());
}

#[test]
fn blocking_and_callback_forms_agree() {
    let fx = Fixture::new();
    let array = fx.array("values", 50);

    let blocking = array.get_children(10, 20).unwrap();

    let (tx, rx) = mpsc::channel();
    array
        .get_children_with(10, 20, move |result| tx.send(result).unwrap())
        .unwrap();
    let callback = recv(&rx).unwrap();

    assert_eq!(blocking.len(), callback.len());
    assert_eq!(names(&blocking), names(&callback));
    for (a, b) in blocking.iter().zip(&callback) {
        assert_eq!(a.expression(), b.expression());
        assert_eq!(a.value(), b.value());
        // Each call materializes its own nodes.
        assert_ne!(a.id(), b.id());
    }
}

#[test]
fn unknown_children_count_is_evaluated_once() {
    let fx = Fixture::new();
    fx.evaluator.set_children(
        "user",
        vec![
            NodeInfo::new("Name", "user.Name", Value::new("System.String", RawValue::String("ann".into()))),
            NodeInfo::new("Age", "user.Age", Value::new("System.Int32", RawValue::I32(41))),
        ],
    );
    let user = fx.object("user");
    assert_eq!(user.has_children(), HasChildren::Unknown);
    assert_eq!(user.cached_children_count(), None);

    let counters = fx.evaluator.counters();
    assert_eq!(user.children_count().unwrap(), 2);
    assert_eq!(counters.children_count_calls(), 1);

    assert_eq!(user.children_count().unwrap(), 2);
    assert_eq!(counters.children_count_calls(), 1);
    assert_eq!(user.cached_children_count(), Some(2));

    // Expanding reuses the cached count too.
    let children = user.get_children(0, 10).unwrap();
    assert_eq!(names(&children), vec!["Name", "Age"]);
    assert_eq!(counters.children_count_calls(), 1);
    // The tri-state hint itself is an identity field and doesn't change.
    assert_eq!(user.has_children(), HasChildren::Unknown);
}

#[test]
fn failed_count_evaluation_is_not_cached() {
    let fx = Fixture::new();
    fx.evaluator.set_children(
        "user",
        vec![NodeInfo::new("Id", "user.Id", Value::new("System.Int32", RawValue::I32(1)))],
    );
    let user = fx.object("user");

    fx.evaluator
        .fail_next(ValueNodeError::EvaluationFailed("object collected".into()));
    assert!(matches!(
        user.children_count(),
        Err(ValueNodeError::EvaluationFailed(_))
    ));
    assert_eq!(user.cached_children_count(), None);

    assert_eq!(user.children_count().unwrap(), 1);
    assert_eq!(fx.evaluator.counters().children_count_calls(), 2);
}

#[test]
fn large_ranges_are_fetched_in_batches() {
    let fx = Fixture::with(
        EvaluationConfig::default().with_children_batch_size(16),
        MockEvaluator::new(),
    );
    let array = fx.array("big", 3_000_000_000);

    let children = array.get_children(2_999_999_990, 40).unwrap();
    assert_eq!(children.len(), 10);

    let children = array.get_children(100, 40).unwrap();
    assert_eq!(children.len(), 40);
    assert_eq!(children.first().unwrap().name(), "[100]");
    assert_eq!(children.last().unwrap().name(), "[139]");

    let calls: Vec<_> = fx
        .evaluator
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            MockCall::Children { start, count, .. } => Some((start, count)),
            _ => None,
        })
        .collect();
    assert_eq!(
        calls,
        vec![(2_999_999_990, 10), (100, 16), (116, 16), (132, 8)]
    );
}

#[test]
fn evaluator_running_short_returns_what_exists() {
    let fx = Fixture::new();
    fx.evaluator.set_children(
        "list",
        vec![
            NodeInfo::new("a", "list.a", Value::new("System.Int32", RawValue::I32(1))),
            NodeInfo::new("b", "list.b", Value::new("System.Int32", RawValue::I32(2))),
        ],
    );
    fx.evaluator.set_reported_count("list", 5);
    let list = fx.object("list");

    let children = list.get_children(0, 5).unwrap();
    assert_eq!(names(&children), vec!["a", "b"]);
}

#[test]
fn children_share_the_parent_context() {
    let fx = Fixture::new();
    let array = fx.array("values", 2);
    let child = array.get_children(0, 1).unwrap().remove(0);

    assert_eq!(child.thread().map(|t| t.id()), Some(100));
    assert_eq!(child.runtime().map(|r| r.id()), Some(1));
    assert_eq!(child.process().map(|p| p.id()), Some(1));
    assert_eq!(child.language().name(), "mock");
    assert_eq!(child.has_children(), HasChildren::No);
    assert!(!child.is_read_only());
}
