use countdown::timer::{JsonFileStore, MemoryStore, RecordingSink, SnapshotStore};
use countdown::{TimerConfig, TimerService};
use std::sync::Arc;
use std::time::{Duration, Instant};

const IDENTITY: &str = "recovery-test";

fn config(tick_ms: u64) -> TimerConfig {
    let mut config = TimerConfig::default();
    config.timing.tick_interval_ms = tick_ms;
    config.timing.finish_linger_ms = 10;
    config.persistence.identity = IDENTITY.to_owned();
    config
}

async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[tokio::test]
async fn saved_timer_resumes_counting_with_remaining_as_total() {
    let store = Arc::new(MemoryStore::new());
    store.insert_raw(IDENTITY, serde_json::json!({"9": ["hi", 5, 1, false]}));
    let sink = Arc::new(RecordingSink::new());
    let service = TimerService::new(&config(20), sink.clone(), store.clone());

    let report = service.recover().await;
    assert_eq!(report.restored.len(), 1);
    assert_eq!(report.skipped, 0);

    let id = report.restored[0];
    let view = service.get(id).expect("restored timer is active");
    assert_eq!(view.total, 5);
    assert_eq!(view.text, "hi");
    assert_eq!(view.scope, 1);
    assert!(!view.paused);
    assert_eq!(sink.opened().len(), 1);

    assert!(eventually(|| service.get(id).is_err()).await);
    let shown: Vec<u64> = sink.frames_for(id).iter().map(|f| f.remaining).collect();
    assert_eq!(shown, vec![5, 4, 3, 2, 1, 0]);
}

#[tokio::test]
async fn broken_entries_are_skipped_individually() {
    let store = Arc::new(MemoryStore::new());
    store.insert_raw(
        IDENTITY,
        serde_json::json!({
            "1": ["good", 600, 3, true],
            "2": "garbage",
            "3": ["expired", 0, 3, false],
            "4": ["wrong", "shape"],
        }),
    );
    let sink = Arc::new(RecordingSink::new());
    let service = TimerService::new(&config(1000), sink.clone(), store.clone());

    let report = service.recover().await;
    assert_eq!(report.restored.len(), 1);

    let id = report.restored[0];
    let view = service.get(id).expect("restored");
    assert!(view.paused);
    assert_eq!(view.remaining, 600);

    // A paused timer is shown right away with its reset control.
    let frames = sink.frames_for(id);
    assert_eq!(frames.len(), 1);
    assert!(frames[0].paused);
    assert!(frames[0].reset_label.is_some());

    // The snapshot is rewritten under the new id only.
    let saved = store.load(IDENTITY).expect("load").expect("record");
    let saved = saved.as_object().expect("object");
    assert_eq!(saved.len(), 1);
    assert_eq!(
        saved.get(&id.to_string()),
        Some(&serde_json::json!(["good", 600, 3, true]))
    );

    service.stop_all(None).await;
}

#[tokio::test]
async fn recovery_respects_scope_capacity() {
    let store = Arc::new(MemoryStore::new());
    let record: serde_json::Map<String, serde_json::Value> = (1..=6)
        .map(|n| (n.to_string(), serde_json::json!([format!("t{n}"), 600, 1, true])))
        .collect();
    store.insert_raw(IDENTITY, serde_json::Value::Object(record));

    let service = TimerService::new(&config(1000), Arc::new(RecordingSink::new()), store);
    let report = service.recover().await;

    assert_eq!(report.restored.len(), 5);
    assert_eq!(report.skipped, 1);
    assert_eq!(service.list(Some(1)).len(), 5);

    service.stop_all(None).await;
}

#[tokio::test]
async fn failing_display_skips_the_timer() {
    let store = Arc::new(MemoryStore::new());
    store.insert_raw(IDENTITY, serde_json::json!({"1": ["x", 60, 1, false]}));
    let sink = Arc::new(RecordingSink::new());
    sink.fail_opens(true);

    let service = TimerService::new(&config(1000), sink, store.clone());
    let report = service.recover().await;

    assert!(report.restored.is_empty());
    assert_eq!(report.skipped, 1);
    assert!(service.list(None).is_empty());
    assert_eq!(
        store.load(IDENTITY).expect("load"),
        Some(serde_json::json!({}))
    );
}

#[tokio::test]
async fn missing_record_recovers_nothing() {
    let store = Arc::new(MemoryStore::new());
    let service = TimerService::new(&config(1000), Arc::new(RecordingSink::new()), store);
    let report = service.recover().await;
    assert!(report.restored.is_empty());
    assert_eq!(report.skipped, 0);
}

#[tokio::test]
async fn corrupt_state_file_starts_empty() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("timers.json");
    std::fs::write(&path, "{ not json").expect("write");

    let store = Arc::new(JsonFileStore::new(&path));
    let service = TimerService::new(&config(1000), Arc::new(RecordingSink::new()), store.clone());
    let report = service.recover().await;
    assert!(report.restored.is_empty());

    // The next write replaces the broken file.
    let id = service.create(1, "1h", "fresh").await.expect("create");
    let saved = store.load(IDENTITY).expect("readable again").expect("record");
    assert!(saved.get(id.to_string()).is_some());

    service.stop_all(None).await;
}

#[test]
fn paused_timer_survives_a_process_restart() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("state").join("timers.json");

    let before = {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async {
            let store = Arc::new(JsonFileStore::new(&path));
            let service = TimerService::new(&config(1000), Arc::new(RecordingSink::new()), store);
            let id = service
                .create_from_command(42, "2h 30m Proof the dough")
                .await
                .expect("create");
            assert!(service.toggle(id).await.expect("pause"));
            service.get(id).expect("active")
        })
        // Dropping the runtime kills every timer task, like a crash.
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let store = Arc::new(JsonFileStore::new(&path));
        let sink = Arc::new(RecordingSink::new());
        let service = TimerService::new(&config(1000), sink.clone(), store);

        let report = service.recover().await;
        assert_eq!(report.restored.len(), 1);

        let after = service.get(report.restored[0]).expect("restored");
        assert_eq!(after.text, "Proof the dough");
        assert_eq!(after.scope, 42);
        assert!(after.paused);
        assert_eq!(after.remaining, before.remaining);
        assert_eq!(after.total, before.remaining);

        // The new process got its own display for the timer.
        assert_eq!(sink.opened().len(), 1);

        service.stop_all(None).await;
    });
}
