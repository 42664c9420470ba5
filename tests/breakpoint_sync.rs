//! The breakpoint engine against the scripted fake adapter: source-level
//! sync, adapter-id preservation, range-matched toggling, verification
//! retries, smart placement, and hit detection.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use common::{adjust_new_to_next_line, wait_until, AdapterBehavior, FakeAdapter};
use dap_client::breakpoints::BreakpointOptions;
use dap_client::runtime::Runtime;
use dap_client::session::{Session, SessionOptions};
use dap_client::source::{Location, SourceId};

fn loop_js() -> Value {
    json!({ "name": "loop.js", "path": "/tmp/loop.js" })
}

fn loop_js_id() -> SourceId {
    SourceId::file("/tmp/loop.js")
}

async fn start_runtime(behavior: AdapterBehavior) -> (FakeAdapter, Arc<Runtime>, Arc<Session>) {
    let announces_sources = !behavior.loaded_sources.is_empty();
    let adapter = FakeAdapter::spawn(behavior).await;
    let runtime = Runtime::new();
    let session = runtime
        .start(
            adapter.config(),
            SessionOptions::new("fake", json!({ "request": "launch" })),
        )
        .await
        .unwrap();
    if announces_sources {
        // The loadedSource events trail the launch response; breakpoints
        // only sync into sessions that have the source.
        let session = Arc::clone(&session);
        assert!(
            wait_until(Duration::from_secs(5), move || {
                session.source(&loop_js_id()).is_some()
            })
            .await,
            "expected loop.js to be registered"
        );
    }
    (adapter, runtime, session)
}

#[tokio::test]
async fn toggle_removes_a_breakpoint_at_its_adjusted_position() {
    // Place at 3:0; the adapter verifies it at 4:2. Clicking anywhere in
    // the requested-to-actual span must toggle it off.
    let (_adapter, runtime, _session) = start_runtime(AdapterBehavior {
        loaded_sources: vec![loop_js()],
        on_set_breakpoints: adjust_new_to_next_line(),
        ..Default::default()
    })
    .await;
    let manager = runtime.breakpoints();

    manager
        .add_breakpoint(Location::in_file("/tmp/loop.js", 3, 0), BreakpointOptions::default())
        .await;
    {
        let manager = Arc::clone(manager);
        assert!(
            wait_until(Duration::from_secs(5), move || {
                manager.bindings_for_source(&loop_js_id()).len() == 1
            })
            .await,
            "expected the breakpoint to bind"
        );
    }
    let binding = manager.bindings_for_source(&loop_js_id()).remove(0);
    assert!(binding.verified());
    assert_eq!(
        (binding.actual_line(), binding.actual_column()),
        (4, 2)
    );

    let created = manager
        .toggle_breakpoint(Location::in_file("/tmp/loop.js", 3, 5))
        .await;
    assert!(created.is_none(), "toggle must remove, not create");
    assert_eq!(manager.breakpoint_count(), 0);
    assert!(manager.bindings_for_source(&loop_js_id()).is_empty());

    runtime.shutdown().await;
}

#[tokio::test]
async fn toggling_twice_leaves_the_collection_unchanged() {
    let (_adapter, runtime, _session) = start_runtime(AdapterBehavior {
        loaded_sources: vec![loop_js()],
        ..Default::default()
    })
    .await;
    let manager = runtime.breakpoints();

    let location = Location::in_file("/tmp/loop.js", 3, 0);
    let created = manager.toggle_breakpoint(location.clone()).await;
    assert!(created.is_some());
    let removed = manager.toggle_breakpoint(location).await;
    assert!(removed.is_none());
    assert_eq!(manager.breakpoint_count(), 0);

    runtime.shutdown().await;
}

#[tokio::test]
async fn resync_carries_the_adapter_id_and_adjusted_position() {
    let (adapter, runtime, _session) = start_runtime(AdapterBehavior {
        loaded_sources: vec![loop_js()],
        on_set_breakpoints: adjust_new_to_next_line(),
        ..Default::default()
    })
    .await;
    let manager = runtime.breakpoints();

    manager
        .add_breakpoint(Location::in_file("/tmp/loop.js", 3, 0), BreakpointOptions::default())
        .await;
    {
        let manager = Arc::clone(manager);
        assert!(
            wait_until(Duration::from_secs(5), move || {
                !manager.bindings_for_source(&loop_js_id()).is_empty()
            })
            .await
        );
    }
    let binding = manager.bindings_for_source(&loop_js_id()).remove(0);
    assert_eq!(binding.adapter_id(), Some(7));

    // A second breakpoint in the same source forces a fresh sync of the
    // whole set.
    manager
        .add_breakpoint(Location::in_file("/tmp/loop.js", 9, 0), BreakpointOptions::default())
        .await;
    {
        let adapter = adapter.clone();
        assert!(
            wait_until(Duration::from_secs(5), move || {
                adapter.requests_for("setBreakpoints").len() >= 2
            })
            .await,
            "expected a second setBreakpoints round-trip"
        );
    }

    let requests = adapter.requests_for("setBreakpoints");
    let second = &requests[1].1["breakpoints"];
    let entries = second.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    // The bound breakpoint re-announces the adapter's id and position, not
    // the user's original request.
    assert_eq!(entries[0]["id"].as_i64(), Some(7));
    assert_eq!(entries[0]["line"].as_i64(), Some(4));
    assert_eq!(entries[0]["column"].as_i64(), Some(2));
    // The new breakpoint goes out with its requested line and no id.
    assert_eq!(entries[1]["line"].as_i64(), Some(9));
    assert!(entries[1].get("id").is_none());

    runtime.shutdown().await;
}

#[tokio::test]
async fn unverified_breakpoints_bind_on_a_later_sync() {
    // The first sync reports the breakpoint unverified; every later sync
    // verifies it.
    let calls = Mutex::new(0usize);
    let behavior = AdapterBehavior {
        loaded_sources: vec![loop_js()],
        on_set_breakpoints: Box::new(move |args| {
            let mut calls = calls.lock();
            *calls += 1;
            let first = *calls == 1;
            let entries = args["breakpoints"].as_array().cloned().unwrap_or_default();
            let breakpoints: Vec<Value> = entries
                .iter()
                .enumerate()
                .map(|(index, entry)| {
                    if first {
                        json!({ "verified": false, "message": "source not mapped yet" })
                    } else {
                        json!({
                            "id": index as i64 + 1,
                            "verified": true,
                            "line": entry["line"],
                        })
                    }
                })
                .collect();
            json!({ "breakpoints": breakpoints })
        }),
        ..Default::default()
    };
    let (adapter, runtime, _session) = start_runtime(behavior).await;
    let manager = runtime.breakpoints();

    let breakpoint = manager
        .add_breakpoint(Location::in_file("/tmp/loop.js", 3, 0), BreakpointOptions::default())
        .await;
    {
        let adapter = adapter.clone();
        assert!(
            wait_until(Duration::from_secs(5), move || {
                !adapter.requests_for("setBreakpoints").is_empty()
            })
            .await
        );
    }
    assert!(
        manager.bindings_for_source(&loop_js_id()).is_empty(),
        "an unverified response must not create a binding"
    );

    manager.set_condition(&breakpoint, Some("i > 10".to_string()));
    {
        let manager = Arc::clone(manager);
        assert!(
            wait_until(Duration::from_secs(5), move || {
                manager.bindings_for_source(&loop_js_id()).len() == 1
            })
            .await,
            "expected the second sync to bind"
        );
    }

    let requests = adapter.requests_for("setBreakpoints");
    let last = requests.last().unwrap();
    assert_eq!(
        last.1["breakpoints"][0]["condition"].as_str(),
        Some("i > 10")
    );

    runtime.shutdown().await;
}

#[tokio::test]
async fn breakpoint_hits_resolve_to_their_binding() {
    let (_adapter, runtime, _session) = start_runtime(AdapterBehavior {
        loaded_sources: vec![loop_js()],
        stop_on_breakpoint_after_sync: true,
        ..Default::default()
    })
    .await;
    let manager = runtime.breakpoints();

    let hits: Arc<Mutex<Vec<(String, i64, i64)>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let hits = Arc::clone(&hits);
        manager.on_binding_hit(move |binding, location| {
            hits.lock().push((
                binding.breakpoint().id().to_string(),
                location.line,
                location.column,
            ));
        });
    }

    let breakpoint = manager
        .add_breakpoint(Location::in_file("/tmp/loop.js", 3, 0), BreakpointOptions::default())
        .await;
    {
        let hits = Arc::clone(&hits);
        assert!(
            wait_until(Duration::from_secs(5), move || !hits.lock().is_empty()).await,
            "expected a binding hit"
        );
    }
    let recorded = hits.lock().clone();
    assert_eq!(recorded[0].0, breakpoint.id());
    assert_eq!((recorded[0].1, recorded[0].2), (3, 0));

    runtime.shutdown().await;
}

#[tokio::test]
async fn smart_placement_snaps_to_valid_columns() {
    let (_adapter, runtime, _session) = start_runtime(AdapterBehavior {
        loaded_sources: vec![loop_js()],
        capabilities: json!({
            "supportsConfigurationDoneRequest": true,
            "supportsTerminateRequest": true,
            "supportsBreakpointLocationsRequest": true,
        }),
        breakpoint_columns: Some(vec![4, 8]),
        ..Default::default()
    })
    .await;
    let manager = runtime.breakpoints();

    // No valid column at 6: snap to the earliest valid position.
    let snapped = manager
        .add_breakpoint(Location::in_file("/tmp/loop.js", 3, 6), BreakpointOptions::default())
        .await;
    assert_eq!(snapped.location().column, 4);

    // 8 is valid: keep the exact match.
    let exact = manager
        .add_breakpoint(Location::in_file("/tmp/loop.js", 3, 8), BreakpointOptions::default())
        .await;
    assert_eq!(exact.location().column, 8);

    // Adding the same spot again returns the existing breakpoint.
    let duplicate = manager
        .add_breakpoint(Location::in_file("/tmp/loop.js", 3, 8), BreakpointOptions::default())
        .await;
    assert_eq!(duplicate.id(), exact.id());
    assert_eq!(manager.breakpoint_count(), 2);

    runtime.shutdown().await;
}
