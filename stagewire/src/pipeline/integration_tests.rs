//! End-to-end tests for pipeline composition and execution.

use super::{compose, Pipeline, Unit};
use crate::config::PipelineConfig;
use crate::core::Failed;
use crate::errors::FlowError;
use crate::events::CollectingEventSink;
use crate::stages::Stage;
use crate::testing::{
    assert_run_failed_at, assert_run_ok, assert_run_suppressed, assert_run_timed_out, ConcurrencyProbe, FailingStage,
    RecordingStage, SlowStage,
};
use futures::future::join_all;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Polls `check` until it holds, failing the test after two seconds.
async fn eventually(check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn double() -> Stage<i32> {
    Stage::map("double", |n: i32| n * 2)
}

fn increment() -> Stage<i32> {
    Stage::map("increment", |n: i32| n + 1)
}

// Sequential composition

#[tokio::test]
async fn test_sequential_composition() {
    let pipeline = compose(vec![double(), increment()]);
    assert_eq!(pipeline.run(5).await.unwrap(), 11);
}

#[tokio::test]
async fn test_void_stage_passes_input_on() {
    let seen = RecordingStage::new();
    let pipeline = compose(vec![seen.stage("observe"), double()]);

    assert_eq!(pipeline.run(4).await.unwrap(), 8);
    assert_eq!(seen.inputs(), vec![4]);
}

#[tokio::test]
async fn test_empty_composition_is_pass_through() {
    let pipeline: Pipeline<i32> = compose(Unit::empty());
    assert_eq!(pipeline.run(42).await.unwrap(), 42);
}

#[tokio::test]
async fn test_nested_pipelines_and_lists_flatten() {
    let inner = compose(vec![double(), double()]);
    let pipeline = compose(Unit::List(vec![
        increment().into(),
        Unit::from(&inner),
        Unit::List(vec![increment().into()]),
    ]));

    // ((1 + 1) * 4) + 1
    assert_eq!(pipeline.run(1).await.unwrap(), 9);
}

#[tokio::test]
async fn test_step_fires_in_chain_order_through_nested_pipelines() {
    let inner = compose(vec![
        Stage::map("b", |s: String| s + "b"),
        Stage::map("c", |s: String| s + "c"),
    ]);
    let pipeline = compose(vec![
        Unit::from(Stage::map("a", |s: String| s + "a")),
        Unit::from(inner),
        Unit::from(Stage::map("d", |s: String| s + "d")),
    ]);

    let steps = Arc::new(Mutex::new(Vec::new()));
    let steps_clone = steps.clone();
    pipeline
        .step()
        .subscribe(move |c| steps_clone.lock().push(c.stage.to_string()));

    assert_eq!(pipeline.run(String::new()).await.unwrap(), "abcd");
    assert_eq!(*steps.lock(), vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_extension_leaves_receiver_untouched() {
    let base = compose(double());
    let extended = base.then(increment());

    assert_eq!(extended.run(5).await.unwrap(), 11);
    assert_eq!(base.run(5).await.unwrap(), 10);
}

// Forks

#[tokio::test]
async fn test_fork_is_isolated_from_result() {
    let failing = FailingStage::new("side failure");
    let slow = SlowStage::with_delay_ms(200);
    let pipeline = compose(double())
        .fork(failing.stage("side"))
        .fork(slow.stage("slow-side"))
        .then(increment());

    let failures = Arc::new(AtomicUsize::new(0));
    let failures_clone = failures.clone();
    pipeline.fail().subscribe(move |_| {
        failures_clone.fetch_add(1, Ordering::SeqCst);
    });

    let start = Instant::now();
    assert_eq!(pipeline.run(5).await.unwrap(), 11);
    assert!(start.elapsed() < Duration::from_millis(200));

    eventually(|| failures.load(Ordering::SeqCst) == 1).await;
    assert_eq!(failing.call_count(), 1);
}

#[tokio::test]
async fn test_fork_filter_and_fork_each() {
    let evens = RecordingStage::new();
    let left = RecordingStage::new();
    let right = RecordingStage::new();
    let pipeline = compose(increment())
        .fork_filter(|n| n % 2 == 0, evens.stage("evens"))
        .fork_each(vec![left.stage("left"), right.stage("right")]);

    for n in 0..4 {
        pipeline.run(n).await.unwrap();
    }

    eventually(|| left.call_count() == 4 && right.call_count() == 4).await;
    eventually(|| evens.call_count() == 2).await;
    let mut inputs = evens.inputs();
    inputs.sort_unstable();
    assert_eq!(inputs, vec![2, 4]);
}

// Filters and branches

#[tokio::test]
async fn test_filter_gates_handler() {
    let handler = RecordingStage::new();
    let pipeline = compose(double()).filter(|n| *n > 10, vec![handler.stage("big"), increment()]);

    assert_eq!(pipeline.run(3).await.unwrap(), 6);
    assert_eq!(handler.call_count(), 0);

    assert_eq!(pipeline.run(8).await.unwrap(), 17);
    assert_eq!(handler.inputs(), vec![16]);
}

#[tokio::test]
async fn test_branch_is_exclusive() {
    let matched = RecordingStage::new();
    let mismatched = RecordingStage::new();
    let pipeline = compose(Unit::<i32>::empty())
        .branch(
            |n: &i32| n % 2 == 0,
            vec![matched.stage("even"), double()],
            vec![mismatched.stage("odd"), increment()],
        )
        .then(increment());

    let mut results = Vec::new();
    for n in 1..=6 {
        results.push(pipeline.run(n).await.unwrap());
    }

    assert_eq!(results, vec![3, 5, 5, 9, 7, 13]);
    assert_eq!(matched.inputs(), vec![2, 4, 6]);
    assert_eq!(mismatched.inputs(), vec![1, 3, 5]);
}

#[tokio::test]
async fn test_split_routes_without_extending() {
    let matched = RecordingStage::new();
    let mismatched = RecordingStage::new();
    let pipeline = compose(double()).split(|n| *n > 5, matched.stage("big"), mismatched.stage("small"));

    assert_eq!(pipeline.run(1).await.unwrap(), 2);
    assert_eq!(pipeline.run(5).await.unwrap(), 10);

    eventually(|| matched.call_count() + mismatched.call_count() == 2).await;
    assert_eq!(matched.inputs(), vec![10]);
    assert_eq!(mismatched.inputs(), vec![2]);
}

// Interception

#[tokio::test]
async fn test_intercept_sees_every_step() {
    let seen = RecordingStage::new();
    let pipeline = compose(vec![double(), increment()]).intercept(seen.stage("audit"));

    assert_eq!(pipeline.run(5).await.unwrap(), 11);

    eventually(|| seen.call_count() == 2).await;
    let mut inputs = seen.inputs();
    inputs.sort_unstable();
    assert_eq!(inputs, vec![10, 11]);
}

#[tokio::test]
async fn test_when_and_on_are_gated() {
    let even_steps = RecordingStage::new();
    let positive_inputs = RecordingStage::new();
    let pipeline = compose(vec![increment(), double()])
        .when(|n| n % 2 == 0, even_steps.stage("even-steps"))
        .on(|n| *n > 0, positive_inputs.stage("positive"));

    pipeline.run(2).await.unwrap();
    pipeline.run(-3).await.unwrap();

    eventually(|| positive_inputs.call_count() == 1).await;
    // 2 -> 3 -> 6 and -3 -> -2 -> -4
    eventually(|| even_steps.call_count() == 3).await;
    assert_eq!(positive_inputs.inputs(), vec![2]);

    let mut evens = even_steps.inputs();
    evens.sort_unstable();
    assert_eq!(evens, vec![-4, -2, 6]);
}

// Failure routing

#[tokio::test]
async fn test_catch_receives_each_failure_once() {
    let after = RecordingStage::new();
    let caught: RecordingStage<Failed<i32>> = RecordingStage::new();
    let pipeline = compose(vec![
        double(),
        Stage::from_sync("reject", |n: i32| -> anyhow::Result<Option<i32>> {
            anyhow::bail!("rejected {n}")
        }),
        after.stage("after"),
    ])
    .catch(caught.stage("handler"));

    let result = pipeline.run(2).await;
    assert_run_failed_at(&result, "reject");

    eventually(|| caught.call_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let failures = caught.inputs();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].input, 4);
    assert_eq!(failures[0].error.to_string(), "rejected 4");
    assert_eq!(after.call_count(), 0);
}

#[tokio::test]
async fn test_panicking_stage_fails_the_run() {
    let pipeline = compose(vec![
        increment(),
        Stage::from_sync("explode", |_: i32| -> Option<i32> { panic!("boom") }),
    ]);

    let err = pipeline.run(1).await.unwrap_err();
    assert!(matches!(err, FlowError::Panicked { ref stage, ref message } if stage == "explode" && message == "boom"));
}

#[tokio::test]
async fn test_failure_in_nested_pipeline_reaches_caller() {
    let inner = compose(vec![increment(), FailingStage::new("inner broke").stage("inner")]);
    let pipeline = compose(vec![Unit::from(double()), Unit::from(&inner)]);

    let err = pipeline.run(1).await.unwrap_err();
    assert_eq!(err.to_string(), "Stage 'inner' failed: inner broke");
}

// Termination and deadlines

#[tokio::test]
async fn test_terminated_pipeline_suppresses_runs() {
    let pipeline = compose(vec![double(), increment()]);
    let derived = pipeline.then(increment());

    pipeline.terminate();
    assert!(derived.is_terminated());
    assert_run_suppressed(&derived.run(1).await);

    derived.resume();
    assert_run_ok(&pipeline.run(1).await, &3);
}

#[tokio::test]
async fn test_termination_mid_run_settles_as_suppressed() {
    let downstream = RecordingStage::new();
    let pipeline = compose(vec![SlowStage::with_delay_ms(50).stage("slow"), downstream.stage("downstream")]);

    let (result, ()) = tokio::join!(pipeline.run(1), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        pipeline.terminate();
    });

    assert_run_suppressed(&result);
    assert_eq!(downstream.call_count(), 0);
}

#[tokio::test]
async fn test_deadline_exceeded() {
    let pipeline = compose(SlowStage::with_delay_ms(200).stage::<i32>("slow"));
    assert_run_timed_out(&pipeline.run_with_deadline(1, Duration::from_millis(20)).await);

    let configured = pipeline.with_config(PipelineConfig::new("bounded").with_deadline(Duration::from_millis(20)));
    let err = configured.run(1).await.unwrap_err();
    assert!(matches!(err, FlowError::DeadlineExceeded { ref pipeline, .. } if pipeline == "bounded"));
}

// Concurrency control

#[tokio::test]
async fn test_queue_bounds_concurrency() {
    let probe = ConcurrencyProbe::new(Duration::from_millis(30));
    let pipeline = compose(double()).queue(2, probe.stage("worker")).unwrap().then(increment());

    let results = join_all((1..=5).map(|n| pipeline.run(n))).await;

    let values: Vec<i32> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(values, vec![3, 5, 7, 9, 11]);
    assert_eq!(probe.max_concurrent(), 2);
    assert_eq!(probe.completed(), 5);
}

#[tokio::test]
async fn test_queue_admits_in_arrival_order() {
    let worker = RecordingStage::new();
    let pipeline = compose(Unit::<i32>::empty()).queue(1, worker.stage("worker")).unwrap();

    join_all((0..4).map(|n| pipeline.run(n))).await;

    assert_eq!(worker.inputs(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_queue_releases_slots_on_failure() {
    let pipeline = compose(Unit::<i32>::empty())
        .queue(
            1,
            Stage::from_sync("odd-only", |n: i32| {
                if n % 2 == 0 {
                    Err(anyhow::anyhow!("even"))
                } else {
                    Ok(Some(n))
                }
            }),
        )
        .unwrap();

    let results = join_all((1..=4).map(|n| pipeline.run(n))).await;
    let failed = results.iter().filter(|r| r.is_err()).count();
    assert_eq!(failed, 2);
}

#[tokio::test]
async fn test_throttle_spaces_admissions() {
    let interval = Duration::from_millis(30);
    let worker = RecordingStage::new();
    let pipeline = compose(Unit::<i32>::empty()).throttle(interval, worker.stage("worker"));

    let results = join_all((0..3).map(|n| pipeline.run(n))).await;
    assert!(results.iter().all(Result::is_ok));

    let stamps = worker.timestamps();
    assert_eq!(stamps.len(), 3);
    for pair in stamps.windows(2) {
        assert!(pair[1] - pair[0] >= interval);
    }
}

#[tokio::test]
async fn test_termination_suppresses_queued_runs() {
    let downstream = RecordingStage::new();
    let pipeline = compose(Unit::<i32>::empty())
        .queue(1, SlowStage::with_delay_ms(50).stage("slow"))
        .unwrap()
        .then(downstream.stage("downstream"));

    let (results, ()) = tokio::join!(join_all((0..3).map(|n| pipeline.run(n))), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        pipeline.terminate();
    });

    for result in &results {
        assert_run_suppressed(result);
    }
    assert_eq!(downstream.call_count(), 0);
}

#[tokio::test]
async fn test_termination_suppresses_throttled_runs() {
    let downstream = RecordingStage::new();
    let pipeline = compose(Unit::<i32>::empty())
        .throttle(Duration::from_millis(20), SlowStage::with_delay_ms(50).stage("slow"))
        .then(downstream.stage("downstream"));

    let (results, ()) = tokio::join!(join_all((0..3).map(|n| pipeline.run(n))), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        pipeline.terminate();
    });

    for result in &results {
        assert_run_suppressed(result);
    }
    assert_eq!(downstream.call_count(), 0);
}

// Loops and type changes

#[tokio::test]
async fn test_repeat_while_iterates_until_predicate_fails() {
    let body = RecordingStage::new();
    let pipeline = compose(Unit::<i32>::empty()).repeat_while(|n| *n < 100, vec![body.stage("body"), double()], increment());

    assert_eq!(pipeline.run(1).await.unwrap(), 129);
    assert_eq!(body.inputs(), vec![1, 2, 4, 8, 16, 32, 64]);

    assert_eq!(pipeline.run(500).await.unwrap(), 501);
}

#[tokio::test]
async fn test_pass_changes_value_type() {
    let words = compose(Stage::map("trim", |s: String| s.trim().to_string()));
    let counted = words
        .pass(|s: String| s.split_whitespace().count(), Stage::map("double", |n: usize| n * 2))
        .then(Stage::map("increment", |n: usize| n + 1));

    assert_eq!(counted.run("  one two three ".to_string()).await.unwrap(), 7);

    let failing = compose(Unit::<String>::empty()).pass(|s: String| s.len(), FailingStage::new("too long").stage("limit"));
    assert_run_failed_at(&failing.run("abc".to_string()).await, "limit");
}

// Panicking predicates and adapters

const SETTLE_WITHIN: Duration = Duration::from_secs(1);

#[tokio::test]
async fn test_panicking_filter_predicate_fails_the_run() {
    let caught = Arc::new(Mutex::new(Vec::new()));
    let caught_clone = caught.clone();
    let pipeline = compose(double())
        .filter(|n: &i32| if *n > 4 { panic!("too big") } else { true }, increment())
        .catch(Stage::inspect("collect", move |failed: &Failed<i32>| {
            caught_clone.lock().push(failed.input);
        }));

    assert_run_ok(&pipeline.run_with_deadline(1, SETTLE_WITHIN).await, &3);

    let result = pipeline.run_with_deadline(5, SETTLE_WITHIN).await;
    assert_run_failed_at(&result, "double");
    assert!(matches!(result, Err(FlowError::Panicked { ref message, .. }) if message == "too big"));
    eventually(|| caught.lock().len() == 1).await;
    assert_eq!(*caught.lock(), vec![10]);
}

#[tokio::test]
async fn test_panicking_branch_predicate_fails_the_run() {
    let pipeline = compose(double()).branch(
        |_: &i32| -> bool { panic!("undecided") },
        increment(),
        Stage::map("negate", |n: i32| -n),
    );

    assert_run_failed_at(&pipeline.run_with_deadline(2, SETTLE_WITHIN).await, "double");
}

#[tokio::test]
async fn test_panicking_loop_predicate_fails_the_run() {
    let pipeline = compose(Unit::<i32>::empty()).repeat_while(
        |n: &i32| if *n > 8 { panic!("loop guard") } else { true },
        double(),
        increment(),
    );

    assert_run_failed_at(&pipeline.run_with_deadline(1, SETTLE_WITHIN).await, "while");
}

#[tokio::test]
async fn test_panicking_adapter_fails_the_run() {
    let after = RecordingStage::new();
    let pipeline = compose(double()).pass(
        |n: i32| -> String {
            assert!(n < 10, "cannot adapt {n}");
            n.to_string()
        },
        after.stage("after"),
    );

    assert_run_ok(&pipeline.run_with_deadline(2, SETTLE_WITHIN).await, &"4".to_string());
    assert_run_failed_at(&pipeline.run_with_deadline(7, SETTLE_WITHIN).await, "double");
    assert_eq!(after.inputs(), vec!["4".to_string()]);
}

#[tokio::test]
async fn test_catch_scope_excludes_side_pipelines_and_earlier_types() {
    let side = FailingStage::new("side broke");
    let caught = Arc::new(AtomicUsize::new(0));
    let caught_clone = caught.clone();
    let watched = compose(double())
        .intercept(side.stage("audit"))
        .catch(Stage::inspect("collect", move |_: &Failed<i32>| {
            caught_clone.fetch_add(1, Ordering::SeqCst);
        }));

    assert_run_ok(&watched.run(2).await, &4);
    eventually(|| side.call_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(caught.load(Ordering::SeqCst), 0);

    let adapted_caught = Arc::new(AtomicUsize::new(0));
    let adapted_clone = adapted_caught.clone();
    let adapted = compose(FailingStage::new("early").stage::<i32>("early"))
        .pass(|n: i32| n.to_string(), Unit::<String>::empty())
        .catch(Stage::inspect("collect", move |_: &Failed<String>| {
            adapted_clone.fetch_add(1, Ordering::SeqCst);
        }));

    assert_run_failed_at(&adapted.run(1).await, "early");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(adapted_caught.load(Ordering::SeqCst), 0);
}

// Routing layer shape: unconditional decoration, then a guarded handler.

#[derive(Debug, Clone, PartialEq)]
struct Request {
    method: &'static str,
    path: &'static str,
    response: Option<String>,
}

impl Request {
    fn new(method: &'static str, path: &'static str) -> Self {
        Self {
            method,
            path,
            response: None,
        }
    }
}

#[tokio::test]
async fn test_routing_with_fork_and_filter() {
    let access_log = RecordingStage::new();
    let router = compose(Unit::<Request>::empty())
        .fork(access_log.stage("access-log"))
        .filter(
            |req: &Request| req.method == "GET" && req.path == "/users",
            Stage::map("list-users", |req: Request| Request {
                response: Some("alice,bob".to_string()),
                ..req
            }),
        );

    let handled = router.run(Request::new("GET", "/users")).await.unwrap();
    assert_eq!(handled.response.as_deref(), Some("alice,bob"));

    let unmatched = router.run(Request::new("POST", "/users")).await.unwrap();
    assert_eq!(unmatched, Request::new("POST", "/users"));

    eventually(|| access_log.call_count() == 2).await;
}

// Events

#[tokio::test]
async fn test_run_events_are_emitted() {
    let sink = Arc::new(CollectingEventSink::new());
    let pipeline = compose(vec![double(), FailingStage::new("nope").stage("maybe")])
        .named("events")
        .with_event_sink(sink.clone());

    pipeline.run(1).await.unwrap_err();
    pipeline.terminate();
    pipeline.run(1).await.unwrap_err();

    assert_eq!(
        sink.kinds(),
        vec![
            "pipeline.run.started",
            "pipeline.run.failed",
            "pipeline.run.started",
            "pipeline.run.suppressed",
        ]
    );
    assert!(sink.events().iter().all(|e| e.pipeline == "events"));
}

#[tokio::test]
async fn test_events_can_be_disabled() {
    let sink = Arc::new(CollectingEventSink::new());
    let pipeline = compose(double())
        .with_config(PipelineConfig::new("quiet").with_events(false))
        .with_event_sink(sink.clone());

    pipeline.run(1).await.unwrap();
    assert!(sink.is_empty());
}
