//! Integration tests for the service thread worker loop.
//!
//! These tests observe task executions through channels rather than fixed
//! sleeps wherever possible; the few raw sleeps only create a window for the
//! worker to settle into a wait, never to synchronize on results.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use upkeep::logging::init_test_logging;
use upkeep::{
    Clock, ManualClock, RunState, ServiceTask, ServiceThread, ServiceThreadConfig, TaskContext,
};

fn start_default() -> ServiceThread {
    init_test_logging();
    ServiceThread::start(ServiceThreadConfig::default()).expect("spawn service thread")
}

// =========================================================================
// Basic execution
// =========================================================================

#[test]
fn zero_delay_runs_immediately() {
    // Assumption called out by the contract: a zero (or already elapsed)
    // delay means "due now", not an error.
    let thread = start_default();
    let (tx, rx) = unbounded();
    let task = ServiceTask::new("immediate", move |_: &mut TaskContext<'_>| {
        tx.send(()).unwrap();
    });
    thread.register_task(&task, Duration::ZERO);

    rx.recv_timeout(Duration::from_secs(2))
        .expect("task should run promptly");
    thread.stop().unwrap();
}

#[test]
fn lifecycle_reaches_running() {
    let thread = start_default();
    let deadline = Instant::now() + Duration::from_secs(2);
    while thread.state() != RunState::Running {
        assert!(Instant::now() < deadline, "worker never reached Running");
        std::thread::sleep(Duration::from_millis(5));
    }
    thread.stop().unwrap();
}

// =========================================================================
// Ordering
// =========================================================================

#[test]
fn equal_deadlines_execute_in_registration_order() {
    let thread = start_default();
    let (tx, rx) = unbounded();

    let tx_a = tx.clone();
    let a = ServiceTask::new("a", move |_: &mut TaskContext<'_>| {
        tx_a.send("a").unwrap();
    });
    let tx_b = tx;
    let b = ServiceTask::new("b", move |_: &mut TaskContext<'_>| {
        tx_b.send("b").unwrap();
    });

    thread.register_task(&a, Duration::from_millis(80));
    thread.register_task(&b, Duration::from_millis(80));

    let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!((first, second), ("a", "b"));
    thread.stop().unwrap();
}

#[test]
fn nearer_task_runs_first_then_reschedules() {
    // The worked scenario: A at 100ms, B at 50ms. B runs first; B's first
    // execution reschedules it 200ms out, so A runs next, then B again.
    let thread = start_default();
    let (tx, rx) = unbounded();

    let tx_a = tx.clone();
    let a = ServiceTask::new("a", move |_: &mut TaskContext<'_>| {
        tx_a.send("a").unwrap();
    });

    let tx_b = tx;
    let mut b_runs = 0_u32;
    let b = ServiceTask::new("b", move |ctx: &mut TaskContext<'_>| {
        b_runs += 1;
        if b_runs == 1 {
            tx_b.send("b1").unwrap();
            ctx.schedule(Duration::from_millis(200));
        } else {
            tx_b.send("b2").unwrap();
        }
    });

    thread.register_task(&a, Duration::from_millis(100));
    thread.register_task(&b, Duration::from_millis(50));

    let mut order = Vec::new();
    for _ in 0..3 {
        order.push(rx.recv_timeout(Duration::from_secs(2)).unwrap());
    }
    assert_eq!(order, vec!["b1", "a", "b2"]);
    thread.stop().unwrap();
}

// =========================================================================
// Wakeups
// =========================================================================

#[test]
fn nearer_deadline_interrupts_a_stale_sleep() {
    let thread = start_default();
    let (tx, rx) = unbounded();

    // Park the worker on a far deadline.
    let far = ServiceTask::new("far", |_: &mut TaskContext<'_>| {});
    thread.register_task(&far, Duration::from_secs(30));
    std::thread::sleep(Duration::from_millis(50));

    // A nearer task must not be delayed by the sleep computed before it
    // existed.
    let near = ServiceTask::new("near", move |_: &mut TaskContext<'_>| {
        tx.send(()).unwrap();
    });
    thread.register_task(&near, Duration::from_millis(10));

    rx.recv_timeout(Duration::from_secs(2))
        .expect("nearer task should preempt the stale sleep");
    thread.stop().unwrap();
}

#[test]
fn stop_interrupts_a_long_sleep() {
    let thread = start_default();
    let far = ServiceTask::new("far", |_: &mut TaskContext<'_>| {});
    thread.register_task(&far, Duration::from_secs(60));
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    thread.stop().unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "stop should not wait out the remaining sleep interval"
    );
}

// =========================================================================
// Recurrence
// =========================================================================

#[test]
fn task_reschedules_itself_until_done() {
    let thread = start_default();
    let (tx, rx) = unbounded();

    let mut runs = 0_u32;
    let task = ServiceTask::new("recurring", move |ctx: &mut TaskContext<'_>| {
        runs += 1;
        tx.send(runs).unwrap();
        if runs < 3 {
            ctx.schedule(Duration::from_millis(10));
        }
    });
    thread.register_task(&task, Duration::ZERO);

    for expected in 1..=3 {
        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got, expected);
    }
    // The task stopped rescheduling itself: it stays registered but dormant.
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    thread.stop().unwrap();
}

// =========================================================================
// Registration contract
// =========================================================================

#[test]
#[should_panic(expected = "already registered")]
fn double_registration_is_fatal() {
    let thread = start_default();
    let task = ServiceTask::new("twice", |_: &mut TaskContext<'_>| {});
    thread.register_task(&task, Duration::from_secs(10));
    thread.register_task(&task, Duration::from_secs(10));
}

#[test]
#[should_panic(expected = "already registered")]
fn registration_with_a_second_thread_is_fatal() {
    let first = start_default();
    let second = start_default();
    let task = ServiceTask::new("shared", |_: &mut TaskContext<'_>| {});
    first.register_task(&task, Duration::from_secs(10));
    second.register_task(&task, Duration::from_secs(10));
}

// =========================================================================
// Clock control
// =========================================================================

#[test]
fn manual_clock_controls_when_tasks_become_due() {
    init_test_logging();
    let clock = Arc::new(ManualClock::new(0));
    let config = ServiceThreadConfig {
        name: "manual".to_string(),
        // Short wait cap so the worker re-reads the manual clock often.
        max_wait: Duration::from_millis(10),
    };
    let thread =
        ServiceThread::start_with_clock(config, Arc::clone(&clock) as Arc<dyn Clock>).unwrap();

    let (tx, rx) = unbounded();
    let task = ServiceTask::new("gated", move |_: &mut TaskContext<'_>| {
        tx.send(()).unwrap();
    });
    thread.register_task(&task, Duration::from_millis(500));

    // Clock frozen: the task never becomes due.
    assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());

    clock.advance(500);
    rx.recv_timeout(Duration::from_secs(2))
        .expect("task should run once the clock passes its due time");
    thread.stop().unwrap();
}

// =========================================================================
// Diagnostics
// =========================================================================

#[test]
fn virtual_time_accumulates_execution_time() {
    let thread = start_default();
    let (tx, rx) = unbounded();
    let task = ServiceTask::new("busy", move |_: &mut TaskContext<'_>| {
        std::thread::sleep(Duration::from_millis(25));
        tx.send(()).unwrap();
    });
    thread.register_task(&task, Duration::ZERO);
    rx.recv_timeout(Duration::from_secs(2)).unwrap();

    // The counter is updated after execute returns; poll briefly.
    let deadline = Instant::now() + Duration::from_secs(2);
    while thread.virtual_time() < Duration::from_millis(20) {
        assert!(Instant::now() < deadline, "virtual time should accumulate");
        std::thread::sleep(Duration::from_millis(5));
    }
    thread.stop().unwrap();
}

#[test]
fn stats_reflect_executions() {
    let thread = start_default();
    let (tx, rx) = unbounded();
    let task = ServiceTask::new("once", move |_: &mut TaskContext<'_>| {
        tx.send(()).unwrap();
    });
    thread.register_task(&task, Duration::ZERO);
    rx.recv_timeout(Duration::from_secs(2)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while thread.stats().tasks_executed < 1 {
        assert!(Instant::now() < deadline, "stats should record the execution");
        std::thread::sleep(Duration::from_millis(5));
    }

    let stats = thread.stats();
    assert_eq!(stats.name, "upkeep");
    assert_eq!(stats.state, RunState::Running);
    assert_eq!(stats.queued_tasks, 0);
    let json = serde_json::to_string(&stats).unwrap();
    assert!(json.contains("\"tasks_executed\":1"));
    thread.stop().unwrap();
}
