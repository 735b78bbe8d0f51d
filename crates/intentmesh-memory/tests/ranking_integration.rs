#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the ranking engine: corpus search, geo blending,
//! thresholds, truncation and exclusion of unusable items.

use std::sync::Arc;

use chrono::Utc;
use intentmesh_core::{generate_id, GeoPoint, Intention, NewIntention};
use intentmesh_memory::{EmbeddingProvider, LocalEmbedding, RankOptions, Ranker};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn make(embedder: &dyn EmbeddingProvider, title: &str, geo: Option<GeoPoint>) -> Intention {
    let mut draft = NewIntention::new(title, "did:key:test");
    if let Some(g) = geo {
        draft = draft.with_geo(g);
    }
    let mut it = draft.into_intention(generate_id(), Utc::now()).unwrap();
    let v = embedder
        .embed_intention(&it.title, &it.description)
        .await
        .unwrap();
    it.set_embedding(v, Utc::now()).unwrap();
    it
}

const UNRELATED: [&str; 9] = [
    "Sourdough starter to share",
    "Looking for a chess partner",
    "Spanish conversation exchange",
    "Lost cat near the station",
    "Free guitar lessons for kids",
    "Community garden volunteers wanted",
    "Selling a used road bike",
    "Book club on Thursday evenings",
    "Piano tuning recommendations",
];

fn ranker() -> (Ranker, Arc<dyn EmbeddingProvider>) {
    let embedder = Arc::new(LocalEmbedding::default()) as Arc<dyn EmbeddingProvider>;
    (Ranker::new(Arc::clone(&embedder)), embedder)
}

// ---------------------------------------------------------------------------
// 1. Matching intention outranks a corpus of unrelated ones
// ---------------------------------------------------------------------------

#[tokio::test]
async fn help_moving_ranks_matching_intention_first() {
    let (ranker, embedder) = ranker();
    let target = make(embedder.as_ref(), "I need help moving furniture", None).await;
    let mut corpus = vec![target.clone()];
    for title in UNRELATED {
        corpus.push(make(embedder.as_ref(), title, None).await);
    }

    let opts = RankOptions {
        min_score: 0.1,
        max_results: 50,
        ..RankOptions::default()
    };
    let results = ranker.rank("help moving", &corpus, &opts).await.unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].intention.id, target.id);
    for r in &results[1..] {
        assert!(r.combined_score < results[0].combined_score);
    }
    for pair in results.windows(2) {
        assert!(pair[0].combined_score >= pair[1].combined_score);
    }
}

// ---------------------------------------------------------------------------
// 2. Geo context blends proximity into the combined score
// ---------------------------------------------------------------------------

#[tokio::test]
async fn nearby_intention_beats_distant_twin() {
    let (ranker, embedder) = ranker();
    let here = GeoPoint::new(40.4168, -3.7038);
    let near = make(embedder.as_ref(), "Need a ladder", Some(GeoPoint::new(40.42, -3.70))).await;
    let far = make(embedder.as_ref(), "Need a ladder", Some(GeoPoint::new(41.39, 2.17))).await;

    let opts = RankOptions::default().with_location(here);
    let results = ranker
        .rank("ladder", &[far.clone(), near.clone()], &opts)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].intention.id, near.id);
    assert!(results[0].geo_score > 0.9);
    assert_eq!(results[1].geo_score, 0.0);
    let expected = results[0].semantic_score * 0.7 + results[0].geo_score * 0.3;
    assert!((results[0].combined_score - expected.clamp(0.0, 1.0)).abs() < 1e-9);
}

#[tokio::test]
async fn without_caller_location_score_is_pure_semantic() {
    let (ranker, embedder) = ranker();
    let item = make(embedder.as_ref(), "Need a ladder", Some(GeoPoint::new(1.0, 1.0))).await;
    let results = ranker
        .rank("ladder", &[item], &RankOptions::default())
        .await
        .unwrap();
    assert_eq!(results[0].geo_score, 0.0);
    assert!((results[0].combined_score - results[0].semantic_score.clamp(0.0, 1.0)).abs() < 1e-12);
}

// ---------------------------------------------------------------------------
// 3. Items lacking an embedding are excluded, not fatal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn items_without_embedding_are_skipped() {
    let (ranker, embedder) = ranker();
    let good = make(embedder.as_ref(), "Borrow a drill", None).await;
    let mut bare = make(embedder.as_ref(), "Borrow a drill too", None).await;
    bare.embedding = None;
    let mut wrong_dim = make(embedder.as_ref(), "Borrow a drill again", None).await;
    wrong_dim.embedding = Some(vec![1.0; 3]);

    let results = ranker
        .rank("drill", &[bare, good.clone(), wrong_dim], &RankOptions::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].intention.id, good.id);
}

// ---------------------------------------------------------------------------
// 4. Threshold and truncation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn min_score_and_max_results_apply() {
    let (ranker, embedder) = ranker();
    let mut corpus = Vec::new();
    for i in 0..10 {
        corpus.push(make(embedder.as_ref(), &format!("bike repair help {i}"), None).await);
    }
    for title in UNRELATED {
        corpus.push(make(embedder.as_ref(), title, None).await);
    }

    let opts = RankOptions {
        max_results: 3,
        ..RankOptions::default()
    };
    let results = ranker.rank("bike repair", &corpus, &opts).await.unwrap();
    assert_eq!(results.len(), 3);

    let strict = RankOptions {
        min_score: 1.01,
        ..RankOptions::default()
    };
    assert!(ranker.rank("bike repair", &corpus, &strict).await.unwrap().is_empty());
}

#[tokio::test]
async fn display_scale_tracks_combined_score() {
    let (ranker, embedder) = ranker();
    let corpus = vec![make(embedder.as_ref(), "help moving boxes", None).await];
    let results = ranker
        .rank("help moving boxes", &corpus, &RankOptions::default())
        .await
        .unwrap();
    let r = &results[0];
    assert!((r.display.scale - (0.5 + r.combined_score * 0.5)).abs() < 1e-12);
    assert!(r.display.scale > 0.99);
}

#[tokio::test]
async fn empty_query_is_an_error() {
    let (ranker, _) = ranker();
    assert!(ranker.rank("", &[], &RankOptions::default()).await.is_err());
}
