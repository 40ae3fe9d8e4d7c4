use strand::{JoinSet, Runtime, RuntimeBuilder, Task, yield_now};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn test_builder_creation() {
    let rt = RuntimeBuilder::new()
        .event_capacity(16)
        .mailbox_capacity(32)
        .completion_workers(2)
        .max_park(Duration::from_millis(20))
        .build()
        .expect("build runtime");

    drop(rt);
}

#[test]
fn test_immediate_result() {
    let rt = Runtime::new().expect("runtime");
    let value = 42;

    let result = rt.block_on(async { value });

    assert_eq!(result, 42, "Future should return correct value");
}

#[test]
fn test_multiple_instances() {
    let rt1 = Runtime::new().expect("runtime");
    let rt2 = Runtime::new().expect("runtime");

    assert_eq!(rt1.block_on(async { 10 }), 10);
    assert_eq!(rt2.block_on(async { 20 }), 20);
}

#[test]
fn test_spawned_tasks_run_before_return() {
    let rt = Runtime::new().expect("runtime");
    let counter = Arc::new(Mutex::new(0));

    let c1 = counter.clone();
    let c2 = counter.clone();
    let c3 = counter.clone();

    rt.block_on(async move {
        Task::spawn(async move {
            *c1.lock().unwrap() += 1;
        });

        Task::spawn(async move {
            *c2.lock().unwrap() += 10;
        });

        Task::spawn(async move {
            *c3.lock().unwrap() += 100;
        });
    });

    assert_eq!(
        *counter.lock().unwrap(),
        111,
        "All spawned tasks should execute"
    );
}

#[test]
fn test_join_handle_returns_output() {
    let rt = Runtime::new().expect("runtime");

    let result = rt.block_on(async {
        let handle = Task::spawn(async {
            yield_now().await;
            40 + 2
        });

        handle.await
    });

    assert_eq!(result, 42);
}

#[test]
fn test_runtime_spawn_before_block_on() {
    let rt = Runtime::new().expect("runtime");
    let handle = rt.spawn(async { "early" });

    assert_eq!(rt.block_on(handle), "early");
}

#[test]
fn test_join_set_preserves_order() {
    let rt = Runtime::new().expect("runtime");

    let outputs = rt.block_on(async {
        let mut joins = JoinSet::new();

        for i in 0..5 {
            joins.push(Task::spawn(async move {
                for _ in 0..(5 - i) {
                    yield_now().await;
                }
                i
            }));
        }

        assert_eq!(joins.len(), 5);
        joins.await_all().await
    });

    assert_eq!(outputs, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_nested_spawn() {
    let rt = Runtime::new().expect("runtime");
    let values = Arc::new(Mutex::new(Vec::new()));
    let v = values.clone();

    rt.block_on(async move {
        let inner = v.clone();
        let outer = Task::spawn(async move {
            inner.lock().unwrap().push("outer");

            let deeper = inner.clone();
            Task::spawn(async move {
                deeper.lock().unwrap().push("inner");
            })
            .await;
        });

        outer.await;
        v.lock().unwrap().push("main");
    });

    assert_eq!(*values.lock().unwrap(), vec!["outer", "inner", "main"]);
}

#[test]
#[should_panic]
fn test_spawn_outside_runtime_panics() {
    let _ = Task::spawn(async {});
}
