//! Integration tests for operator composition and graph execution
//!
//! These tests verify that combinators, graphs and the scheduler family
//! work together correctly in realistic end-to-end scenarios.

use operon_core::error::CoreError;
use operon_core::execution_graph::ExecutionGraph;
use operon_core::graph::{Graph, OUTPUT};
use operon_core::operator::{Operator, OperatorRef};
use operon_core::ops::{map, opaque, parallel, sequence};
use operon_core::record::{record_from, Record};
use operon_core::scheduler::{self, SchedulerOptions};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn int_map(name: &str, in_key: &str, out_key: &str, f: fn(i64) -> i64) -> OperatorRef {
    Arc::new(
        map(name, move |v: Value| {
            Ok(json!(f(v.as_i64().unwrap_or_default())))
        })
        .on(in_key)
        .into_key(out_key),
    )
}

#[tokio::test]
async fn test_map_composition() {
    let uppercase = map("uppercase", |v: Value| {
        Ok(json!(v.as_str().unwrap_or_default().to_uppercase()))
    })
    .on("text")
    .into_key("UP");

    let out = uppercase
        .call(record_from(vec![("text", json!("hi"))]))
        .await
        .unwrap();

    assert_eq!(out, record_from(vec![("text", json!("hi")), ("UP", json!("HI"))]));
}

#[tokio::test]
async fn test_sequence_merge_accumulates() {
    let pipeline = sequence(vec![
        int_map("inc", "v", "a", |n| n + 1),
        int_map("dbl", "a", "b", |n| n * 2),
    ]);

    let out = pipeline
        .call(record_from(vec![("v", json!(3))]))
        .await
        .unwrap();

    assert_eq!(out["v"], json!(3));
    assert_eq!(out["a"], json!(4));
    assert_eq!(out["b"], json!(8));
}

#[tokio::test]
async fn test_parallel_fan_out_is_concurrent() {
    let slow_branch = |name: &str, out_key: &'static str, f: fn(i64) -> i64| {
        Arc::new(opaque(name.to_string(), move |mut record: Record| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let v = record.get("v").and_then(Value::as_i64).unwrap_or_default();
                record.insert(out_key.to_string(), json!(f(v)));
                Ok(record)
            })
        })) as OperatorRef
    };

    let block = parallel(vec![
        slow_branch("inc", "a", |n| n + 1),
        slow_branch("dbl", "b", |n| n * 2),
    ]);

    let started = Instant::now();
    let out = block
        .call(record_from(vec![("v", json!(5))]))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(out["v"], json!(5));
    assert_eq!(out["a"], json!(6));
    assert_eq!(out["b"], json!(10));
    // Two 100ms branches must overlap: ~100ms total, not ~200ms.
    assert!(elapsed < Duration::from_millis(180), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_graph_execution_with_field_routing() {
    let translate = map("translate", |v: Value| {
        let text = v.as_str().unwrap_or_default();
        let french = match text {
            "Hello, world!" => "Bonjour, monde!",
            other => other,
        };
        Ok(json!(french))
    })
    .on("text")
    .into_key("french_text");

    let uppercase = map("uppercase", |v: Value| {
        Ok(json!(v.as_str().unwrap_or_default().to_uppercase()))
    })
    .on("input")
    .into_key("output");

    let mut graph = Graph::new();
    graph.add_node("T", Arc::new(translate));
    graph.add_node("U", Arc::new(uppercase));
    graph
        .add_edge("T", "U", Some("french_text".to_string()), "input")
        .unwrap();

    let results = scheduler::execute_graph(
        &graph,
        record_from(vec![("text", json!("Hello, world!"))]),
        "auto",
        SchedulerOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(results["U"]["output"], json!("BONJOUR, MONDE!"));
    assert_eq!(results[OUTPUT]["output"], json!("BONJOUR, MONDE!"));
}

fn fan_out_graph() -> ExecutionGraph {
    let mut graph = ExecutionGraph::new();
    graph.insert_operator("root", int_map("root", "v", "r", |n| n * 10));
    graph.insert_operator("left", int_map("left", "r", "l", |n| n + 1));
    graph.insert_operator("right", int_map("right", "r", "rt", |n| n + 2));
    graph.insert_operator("join", int_map("join", "l", "j", |n| n * 2));
    graph.add_edge("root", "left", None, "input").unwrap();
    graph.add_edge("root", "right", None, "input").unwrap();
    graph.add_edge("left", "join", None, "input").unwrap();
    graph.add_edge("right", "join", None, "input").unwrap();
    graph
}

#[tokio::test]
async fn test_all_schedulers_agree_on_deterministic_dags() {
    let inputs = record_from(vec![("v", json!(4))]);
    let mut maps = Vec::new();

    for kind in ["sequential", "topological", "wave"] {
        let graph = fan_out_graph();
        let mut sched = scheduler::create(kind, SchedulerOptions::default()).unwrap();
        let results = sched.execute(&graph, inputs.clone()).await.unwrap();
        maps.push((kind, results));
    }

    let (_, reference) = &maps[0];
    for (kind, results) in &maps[1..] {
        assert_eq!(results, reference, "{} diverged from sequential", kind);
    }
}

#[tokio::test]
async fn test_cycle_fails_before_any_operator_runs() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let counting = opaque("counting", move |record: Record| {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(record)
        })
    });

    let mut graph = ExecutionGraph::new();
    graph.insert_operator("a", Arc::new(counting));
    graph.insert_operator("b", Arc::new(map("b", Ok)));
    graph.add_edge("a", "b", None, "input").unwrap();
    graph.add_edge("b", "a", None, "input").unwrap();

    for kind in ["sequential", "topological", "wave"] {
        let mut sched = scheduler::create(kind, SchedulerOptions::default()).unwrap();
        let err = sched.execute(&graph, Record::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::GraphCycle(_)), "{}", kind);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_partial_results_after_mid_graph_failure() {
    let mut graph = ExecutionGraph::new();
    graph.insert_operator("first", int_map("first", "v", "a", |n| n + 1));
    graph.insert_operator(
        "broken",
        Arc::new(map("broken", |_| {
            Err(CoreError::Validation("downstream is broken".to_string()))
        })),
    );
    graph.insert_operator("after", int_map("after", "a", "b", |n| n * 2));
    graph.add_edge("first", "broken", None, "input").unwrap();
    graph.add_edge("broken", "after", None, "input").unwrap();

    let mut sched = scheduler::create("topological", SchedulerOptions::default()).unwrap();
    let err = sched
        .execute(&graph, record_from(vec![("v", json!(1))]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Child { .. }));

    let partials = sched.partial_results();
    assert_eq!(partials["first"]["a"], json!(2));
    assert!(!partials.contains_key("broken"));
    assert!(!partials.contains_key("after"));
}

#[tokio::test]
async fn test_nested_combinators_end_to_end() {
    let pipeline = sequence(vec![
        int_map("scale", "v", "scaled", |n| n * 100),
        Arc::new(parallel(vec![
            int_map("inc", "scaled", "plus", |n| n + 1),
            int_map("dec", "scaled", "minus", |n| n - 1),
        ])),
        Arc::new(
            map("spread", |v: Value| {
                Ok(json!({"spread": v.as_i64().unwrap_or_default()}))
            })
            .on("plus"),
        ),
    ]);

    let out = pipeline
        .call(record_from(vec![("v", json!(2))]))
        .await
        .unwrap();
    assert_eq!(out["scaled"], json!(200));
    assert_eq!(out["plus"], json!(201));
    assert_eq!(out["minus"], json!(199));
    assert_eq!(out["spread"], json!(201));
}

#[tokio::test]
async fn test_from_sequence_graph_matches_direct_call() {
    let ops: Vec<OperatorRef> = vec![
        int_map("inc", "v", "v", |n| n + 1),
        int_map("dbl", "v", "v", |n| n * 2),
    ];
    let direct = sequence(ops.clone());
    let graph = Graph::from_sequence(ops);

    let inputs = record_from(vec![("v", json!(7))]);
    let direct_out = direct.call(inputs.clone()).await.unwrap();
    let graph_out = scheduler::execute_graph_output(
        &graph,
        inputs,
        "sequential",
        SchedulerOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(direct_out["v"], graph_out["v"]);
    assert_eq!(graph_out["v"], json!(16));
}
