#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use intentmesh_core::MeshError;
use intentmesh_session::LocalState;
use intentmesh_sync::{
    Invitation, JoinOrchestrator, JoinOrigin, JoinState, LinkContext, LoopbackMesh, LoopbackNode,
    NodeFaults, OpenOptions, ReplicatedStore, StoreSession,
};

const BASE: &str = "https://app.example/";

fn orchestrator(node: &LoopbackNode, state: Arc<LocalState>) -> JoinOrchestrator {
    JoinOrchestrator::new(
        Arc::new(node.clone()),
        Arc::new(node.clone()),
        state,
        "intentions",
    )
}

/// A store hosted by `host`, as another participant would have created it.
async fn hosted_store(host: &LoopbackNode) -> Arc<dyn StoreSession> {
    host.open("intentions", OpenOptions::create_open_write())
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_fresh_device_creates_store() {
    let mesh = LoopbackMesh::new();
    let state = Arc::new(LocalState::in_memory());
    let orch = orchestrator(&mesh.node("me"), Arc::clone(&state));

    let outcome = orch.join(None).await.unwrap();
    assert_eq!(outcome.origin, JoinOrigin::CreatedNew);
    assert!(outcome.is_new_session());
    assert_eq!(state.remembered_address().await, Some(outcome.address.clone()));
    assert_eq!(orch.state(), JoinState::Opened);
    assert_eq!(orch.current_session().unwrap().address, outcome.address);
}

#[tokio::test(start_paused = true)]
async fn test_two_fresh_sessions_get_distinct_stores() {
    let mesh = LoopbackMesh::new();
    let a = orchestrator(&mesh.node("a"), Arc::new(LocalState::in_memory()));
    let b = orchestrator(&mesh.node("b"), Arc::new(LocalState::in_memory()));

    let (ra, rb) = tokio::join!(a.join(None), b.join(None));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_eq!(ra.origin, JoinOrigin::CreatedNew);
    assert_eq!(rb.origin, JoinOrigin::CreatedNew);
    assert_ne!(ra.address, rb.address);
}

#[tokio::test(start_paused = true)]
async fn test_remembered_address_is_reopened() {
    let mesh = LoopbackMesh::new();
    let node = mesh.node("me");
    let state = Arc::new(LocalState::in_memory());

    let first = orchestrator(&node, Arc::clone(&state)).join(None).await.unwrap();
    let second = orchestrator(&node, Arc::clone(&state)).join(None).await.unwrap();

    assert_eq!(second.origin, JoinOrigin::Remembered);
    assert!(!second.is_new_session());
    assert_eq!(second.address, first.address);
    assert_eq!(mesh.store_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dead_remembered_address_is_forgotten() {
    let mesh = LoopbackMesh::new();
    let state = Arc::new(LocalState::in_memory());
    state
        .remember_address("/loopback/store/intentions/gone-0")
        .await
        .unwrap();
    let orch = orchestrator(&mesh.node("me"), Arc::clone(&state));

    let started = tokio::time::Instant::now();
    let outcome = orch.join(None).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(outcome.origin, JoinOrigin::CreatedNew);
    assert_ne!(outcome.address, "/loopback/store/intentions/gone-0");
    assert_eq!(state.remembered_address().await, Some(outcome.address));
}

#[tokio::test(start_paused = true)]
async fn test_invitation_takes_priority_and_overwrites_remembered() {
    let mesh = LoopbackMesh::new();
    let host = mesh.node("host");
    let shared = hosted_store(&host).await;

    let guest = mesh.node("guest");
    let state = Arc::new(LocalState::in_memory());
    let own = orchestrator(&guest, Arc::clone(&state)).join(None).await.unwrap();
    assert_eq!(own.origin, JoinOrigin::CreatedNew);

    let link = LinkContext::new(
        Invitation::new(shared.address(), vec![host.listen_address()])
            .to_link(BASE)
            .unwrap(),
    );
    let outcome = orchestrator(&guest, Arc::clone(&state))
        .join(Some(&link))
        .await
        .unwrap();

    assert_eq!(outcome.origin, JoinOrigin::Invitation);
    assert!(outcome.direct_peer_connected);
    assert_eq!(outcome.address, shared.address());
    assert_eq!(state.remembered_address().await, Some(shared.address()));
    assert!(link.invitation().is_none());
    assert_eq!(link.current(), BASE);
}

#[tokio::test(start_paused = true)]
async fn test_invitation_via_ambient_discovery() {
    let mesh = LoopbackMesh::new();
    mesh.set_ambient_discovery(true);
    let host = mesh.node("host");
    let shared = hosted_store(&host).await;

    let link = LinkContext::new(Invitation::new(shared.address(), vec![]).to_link(BASE).unwrap());
    let outcome = orchestrator(&mesh.node("guest"), Arc::new(LocalState::in_memory()))
        .join(Some(&link))
        .await
        .unwrap();

    assert_eq!(outcome.origin, JoinOrigin::Invitation);
    assert!(!outcome.direct_peer_connected);
}

#[tokio::test(start_paused = true)]
async fn test_failed_invitation_does_not_fall_back() {
    let mesh = LoopbackMesh::new();
    let host = mesh.node("host");
    let shared = hosted_store(&host).await;
    host.set_online(false);

    let guest = mesh.node("guest");
    let state = Arc::new(LocalState::in_memory());
    let own = orchestrator(&guest, Arc::clone(&state)).join(None).await.unwrap();

    let link = LinkContext::new(
        Invitation::new(shared.address(), vec![host.listen_address()])
            .to_link(BASE)
            .unwrap(),
    );
    let orch = orchestrator(&guest, Arc::clone(&state));
    let started = tokio::time::Instant::now();
    let err = orch.join(Some(&link)).await.unwrap_err();

    assert!(matches!(err, MeshError::DiscoveryTimeout(_)), "got {err}");
    assert!(started.elapsed() >= Duration::from_secs(90));
    assert_eq!(orch.state(), JoinState::Failed);
    assert!(orch.current_session().is_none());
    // The remembered store was neither opened nor forgotten.
    assert_eq!(state.remembered_address().await, Some(own.address));
    assert!(link.invitation().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_connected_peer_but_open_fails_is_peer_unreachable() {
    let mesh = LoopbackMesh::new();
    let host = mesh.node("host");
    let shared = hosted_store(&host).await;

    let guest = mesh.node("guest");
    guest.set_faults(NodeFaults {
        stall_open: true,
        ..NodeFaults::default()
    });
    let link = LinkContext::new(
        Invitation::new(shared.address(), vec![host.listen_address(), "/loopback/p2p/nobody".into()])
            .to_link(BASE)
            .unwrap(),
    );
    let orch = orchestrator(&guest, Arc::new(LocalState::in_memory()));
    let started = tokio::time::Instant::now();
    let err = orch.join(Some(&link)).await.unwrap_err();

    assert!(matches!(err, MeshError::PeerUnreachable(_)), "got {err}");
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(31));
    assert!(elapsed < Duration::from_secs(90));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_join_is_rejected() {
    let mesh = LoopbackMesh::new();
    let node = mesh.node("me");
    node.set_faults(NodeFaults {
        open_delay: Some(Duration::from_secs(5)),
        ..NodeFaults::default()
    });
    let orch = Arc::new(orchestrator(&node, Arc::new(LocalState::in_memory())));

    let first = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.join(None).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = orch.join(None).await;
    assert!(matches!(second, Err(MeshError::JoinInProgress)));

    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.origin, JoinOrigin::CreatedNew);

    // Once settled, joining again is allowed.
    let again = orch.join(None).await.unwrap();
    assert_eq!(again.origin, JoinOrigin::Remembered);
}

#[tokio::test(start_paused = true)]
async fn test_create_deadline_failure_is_surfaced() {
    let mesh = LoopbackMesh::new();
    let node = mesh.node("me");
    node.set_faults(NodeFaults {
        stall_open: true,
        ..NodeFaults::default()
    });
    let state = Arc::new(LocalState::in_memory());
    let err = orchestrator(&node, Arc::clone(&state))
        .join(None)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(state.remembered_address().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_state_channel_reports_progress() {
    let mesh = LoopbackMesh::new();
    let orch = orchestrator(&mesh.node("me"), Arc::new(LocalState::in_memory()));
    let rx = orch.subscribe_state();
    assert_eq!(*rx.borrow(), JoinState::Idle);

    orch.join(None).await.unwrap();
    assert_eq!(*rx.borrow(), JoinState::Opened);
}
