//! Session startup, the `startDebugging` tree, and termination order,
//! driven end-to-end against the scripted fake adapter.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{wait_until, AdapterBehavior, FakeAdapter};
use dap_client::hookable::HookOptions;
use dap_client::runtime::Runtime;
use dap_client::session::{SessionOptions, SessionState};

#[tokio::test]
async fn startup_completes_when_initialized_arrives_before_launch_response() {
    let adapter = FakeAdapter::spawn(AdapterBehavior {
        initialized_after_launch: false,
        ..Default::default()
    })
    .await;
    let runtime = Runtime::new();

    let session = runtime
        .start(
            adapter.config(),
            SessionOptions::new("fake", json!({ "request": "launch" })),
        )
        .await
        .unwrap();

    assert!(session.is_ready());
    assert_eq!(adapter.requests_for("initialize").len(), 1);
    assert_eq!(adapter.requests_for("configurationDone").len(), 1);
    runtime.shutdown().await;
}

#[tokio::test]
async fn startup_completes_when_initialized_arrives_after_launch_response() {
    let adapter = FakeAdapter::spawn(AdapterBehavior {
        initialized_after_launch: true,
        ..Default::default()
    })
    .await;
    let runtime = Runtime::new();

    let session = runtime
        .start(
            adapter.config(),
            SessionOptions::new("fake", json!({ "request": "launch" })),
        )
        .await
        .unwrap();

    assert!(session.is_ready());
    assert_eq!(adapter.requests_for("configurationDone").len(), 1);
    runtime.shutdown().await;
}

#[tokio::test]
async fn start_debugging_chain_stops_at_the_depth_limit() {
    // Each session's launch asks the adapter to request one more nested
    // child, six levels deep in total.
    let adapter = FakeAdapter::spawn(AdapterBehavior::default()).await;
    let runtime = Runtime::new();

    let root = runtime
        .start(
            adapter.config(),
            SessionOptions::new("fake", json!({ "request": "launch", "nested": 6 })),
        )
        .await
        .unwrap();

    let replies = Arc::clone(&adapter.reverse_replies);
    assert!(
        wait_until(Duration::from_secs(5), || replies.lock().len() == 6).await,
        "expected six startDebugging round-trips, saw {}",
        replies.lock().len()
    );

    let replies = replies.lock().clone();
    for (index, (success, _)) in replies.iter().take(5).enumerate() {
        assert!(*success, "startDebugging #{index} should have succeeded");
    }
    let (success, message) = &replies[5];
    assert!(!success, "the sixth startDebugging must be refused");
    assert_eq!(message.as_deref(), Some("Maximum session depth exceeded"));

    // The chain below the root is exactly five sessions deep.
    let mut depth = 0;
    let mut cursor = root.clone();
    while let Some(child) = cursor.children().first().cloned() {
        depth += 1;
        cursor = child;
    }
    assert_eq!(depth, 5);
    assert_eq!(cursor.depth(), 5);

    runtime.shutdown().await;
}

#[tokio::test]
async fn detaching_a_mid_session_reparents_its_children() {
    // root → mid → leaf, built through two nested startDebugging rounds.
    let adapter = FakeAdapter::spawn(AdapterBehavior::default()).await;
    let runtime = Runtime::new();

    let root = runtime
        .start(
            adapter.config(),
            SessionOptions::new("fake", json!({ "request": "launch", "nested": 2 })),
        )
        .await
        .unwrap();

    {
        let root = root.clone();
        assert!(
            wait_until(Duration::from_secs(5), move || {
                root.children()
                    .first()
                    .map(|mid| !mid.children().is_empty())
                    .unwrap_or(false)
            })
            .await,
            "expected a two-level child chain"
        );
    }
    let mid = root.children()[0].clone();
    let leaf = mid.children()[0].clone();

    mid.detach();

    assert!(mid.parent().is_none());
    assert!(mid.children().is_empty());
    assert_ne!(mid.state(), SessionState::Terminated);
    assert!(runtime.sessions().get(mid.id()).is_none());

    // The leaf now hangs off its grandparent and stays registered.
    assert_eq!(leaf.parent().map(|parent| parent.id()), Some(root.id()));
    let root_children: Vec<i64> = root.children().iter().map(|child| child.id()).collect();
    assert_eq!(root_children, vec![leaf.id()]);
    assert!(runtime.sessions().get(leaf.id()).is_some());

    // A detached session winds down on its own.
    mid.terminate().await.unwrap();
    runtime.shutdown().await;
}

#[tokio::test]
async fn detaching_a_root_promotes_its_children_to_roots() {
    let adapter = FakeAdapter::spawn(AdapterBehavior::default()).await;
    let runtime = Runtime::new();

    let root = runtime
        .start(
            adapter.config(),
            SessionOptions::new("fake", json!({ "request": "launch", "spawn": 1 })),
        )
        .await
        .unwrap();

    {
        let root = root.clone();
        assert!(
            wait_until(Duration::from_secs(5), move || root.children().len() == 1).await,
            "expected one child session"
        );
    }
    let child = root.children()[0].clone();

    root.detach();

    assert!(runtime.sessions().get(root.id()).is_none());
    assert!(child.parent().is_none());
    let roots: Vec<i64> = runtime
        .sessions()
        .roots()
        .iter()
        .map(|session| session.id())
        .collect();
    assert_eq!(roots, vec![child.id()]);

    root.terminate().await.unwrap();
    runtime.shutdown().await;
}

#[tokio::test]
async fn terminate_cascades_children_first() {
    let adapter = FakeAdapter::spawn(AdapterBehavior::default()).await;
    let runtime = Runtime::new();

    let root = runtime
        .start(
            adapter.config(),
            SessionOptions::new("fake", json!({ "request": "launch", "spawn": 2 })),
        )
        .await
        .unwrap();

    {
        let root = root.clone();
        assert!(
            wait_until(Duration::from_secs(5), move || root.children().len() == 2).await,
            "expected two child sessions"
        );
    }

    // A listener whose cleanup must run exactly once through teardown.
    let cleanups = Arc::new(AtomicUsize::new(0));
    {
        let cleanups = Arc::clone(&cleanups);
        root.events().on(
            "output",
            move |_| {
                let cleanups = Arc::clone(&cleanups);
                Some(Box::new(move || {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                }) as dap_client::hookable::Cleanup)
            },
            HookOptions::default(),
        );
    }
    // Give the listener a cleanup to run.
    root.events().emit(
        "output",
        &dap_client::events::EventBody::Unknown {
            event: "output".to_string(),
            body: None,
        },
    );

    root.terminate().await.unwrap();

    assert_eq!(root.state(), SessionState::Terminated);
    assert!(root.children().is_empty());
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);

    // Children (connections 1 and 2) were asked to wind down before the
    // root (connection 0).
    let root_terminate = adapter.position_of(0, "terminate").unwrap();
    let root_disconnect = adapter.position_of(0, "disconnect").unwrap();
    for connection in [1, 2] {
        let child_terminate = adapter.position_of(connection, "terminate").unwrap();
        let child_disconnect = adapter.position_of(connection, "disconnect").unwrap();
        assert!(child_terminate < root_terminate);
        assert!(child_disconnect < root_disconnect);
        assert!(child_terminate < child_disconnect);
    }

    runtime.shutdown().await;
}
