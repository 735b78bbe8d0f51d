#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use intentmesh_core::*;

// ---------------------------------------------------------------------------
// 1. Intention serialization roundtrip keeps optional fields
// ---------------------------------------------------------------------------

#[test]
fn intention_serialization_keeps_geo_and_embedding() {
    let mut it = NewIntention::new("I need help moving furniture", "did:key:alice")
        .with_description("Saturday morning, third floor, no elevator")
        .with_geo(GeoPoint::new(52.52, 13.405))
        .with_category("help")
        .into_intention(generate_id(), Utc::now())
        .unwrap();
    it.set_embedding(vec![0.5; EMBEDDING_DIM], Utc::now()).unwrap();

    let json = serde_json::to_string(&it).unwrap();
    let back: Intention = serde_json::from_str(&json).unwrap();

    assert_eq!(back, it);
    assert_eq!(back.geo, Some(GeoPoint::new(52.52, 13.405)));
    assert_eq!(back.embedding.as_ref().map(Vec::len), Some(EMBEDDING_DIM));
}

// ---------------------------------------------------------------------------
// 2. Records written by older peers without optional fields still parse
// ---------------------------------------------------------------------------

#[test]
fn minimal_record_from_peer_parses_with_defaults() {
    let json = serde_json::json!({
        "id": "lx2-abc",
        "title": "Lend me a drill",
        "createdBy": "did:key:bob",
        "createdAt": "2024-05-01T10:00:00Z",
        "updatedAt": "2024-05-01T10:00:00Z"
    });
    let it: Intention = serde_json::from_value(json).unwrap();
    assert_eq!(it.status, IntentionStatus::Active);
    assert!(it.embedding.is_none());
    assert!(it.tags.is_empty());
    assert!(it.validate().is_ok());
}

// ---------------------------------------------------------------------------
// 3. Error display carries context
// ---------------------------------------------------------------------------

#[test]
fn error_messages_are_context_specific() {
    let peer = MeshError::PeerUnreachable("store /orbit/abc".into());
    let discovery = MeshError::DiscoveryTimeout("store /orbit/abc".into());
    assert!(peer.to_string().starts_with("Peer unreachable"));
    assert!(discovery.to_string().starts_with("Discovery timed out"));
    assert!(MeshError::Timeout("open".into()).is_timeout());
    assert!(!MeshError::Store("refused".into()).is_timeout());
}

#[test]
fn embedding_text_joins_title_and_description() {
    assert_eq!(embedding_text("Title", ""), "Title");
    assert_eq!(embedding_text("Title", "more"), "Title more");
}

#[tokio::test]
async fn accept_all_verifier_passes_everything() {
    let it = NewIntention::new("anything", "me")
        .into_intention("id".into(), Utc::now())
        .unwrap();
    assert!(AcceptAll.verify(&it).await);
}
