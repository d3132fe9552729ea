//! Index build, search, and persistence behavior.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::CivicRagError;
use crate::index::VectorIndex;
use crate::models::Document;
use crate::tests::document;
use crate::tests::StubEmbedder;

fn corpus() -> Vec<Document> {
    vec![
        document(
            "loud music from the corner bar",
            "Noise - Street/Sidewalk",
            "BROOKLYN",
        ),
        document(
            "fire hydrant leaking onto the sidewalk",
            "Water System",
            "QUEENS",
        ),
        document(
            "rats spotted behind the restaurant",
            "Rodent",
            "MANHATTAN",
        ),
    ]
}

#[tokio::test]
async fn test_exact_content_search_scores_near_one() {
    let index = VectorIndex::new(Arc::new(StubEmbedder::new(64)));
    index.build(corpus()).await.unwrap();

    let hits = index
        .search("fire hydrant leaking onto the sidewalk", 1, 0.0, None)
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(
        hits[0].document.content,
        "fire hydrant leaking onto the sidewalk"
    );
    assert!(hits[0].score >= 0.99);
}

#[tokio::test]
async fn test_search_caps_results_at_k() {
    let index = VectorIndex::new(Arc::new(StubEmbedder::new(64)));
    index.build(corpus()).await.unwrap();

    let hits = index.search("anything at all", 2, 0.0, None).await.unwrap();
    assert!(hits.len() <= 2);
}

#[tokio::test]
async fn test_threshold_drops_unrelated_documents() {
    let index = VectorIndex::new(Arc::new(StubEmbedder::new(64)));
    index.build(corpus()).await.unwrap();

    // Disjoint vocabulary sits at 0.5 after normalization, well below 0.9.
    let hits = index
        .search("zoning variance paperwork", 5, 0.9, None)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_filters_restrict_results() {
    let index = VectorIndex::new(Arc::new(StubEmbedder::new(64)));
    index.build(corpus()).await.unwrap();

    let filters = HashMap::from([("borough".to_string(), serde_json::json!("QUEENS"))]);
    let hits = index.search("complaint", 5, 0.0, Some(&filters)).await.unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document.metadata_str("borough"), Some("QUEENS"));

    let absent = HashMap::from([("missing_key".to_string(), serde_json::json!("x"))]);
    let none = index.search("complaint", 5, 0.0, Some(&absent)).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_empty_index_returns_no_results() {
    let index = VectorIndex::new(Arc::new(StubEmbedder::new(64)));
    let hits = index.search("anything", 5, 0.0, None).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_add_documents_appends() {
    let index = VectorIndex::new(Arc::new(StubEmbedder::new(64)));
    index.build(corpus()).await.unwrap();
    assert_eq!(index.len().await, 3);

    index
        .add_documents(vec![document(
            "pothole swallowing tires on atlantic avenue",
            "Street Condition",
            "BROOKLYN",
        )])
        .await
        .unwrap();
    assert_eq!(index.len().await, 4);
}

#[tokio::test]
async fn test_build_rejects_empty_input() {
    let index = VectorIndex::new(Arc::new(StubEmbedder::new(64)));
    let result = index.build(Vec::new()).await;
    assert!(matches!(result, Err(CivicRagError::InvalidInput(_))));
}

#[tokio::test]
async fn test_save_load_round_trip_gives_identical_results() {
    let dir = tempfile::tempdir().unwrap();
    let index = VectorIndex::new(Arc::new(StubEmbedder::new(64)));
    index.build(corpus()).await.unwrap();

    let before = index
        .search("loud music complaints", 3, 0.0, None)
        .await
        .unwrap();
    index.save(dir.path()).await.unwrap();

    let reloaded = VectorIndex::load(dir.path(), Arc::new(StubEmbedder::new(64)))
        .await
        .unwrap();
    let after = reloaded
        .search("loud music complaints", 3, 0.0, None)
        .await
        .unwrap();

    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(after.iter()) {
        assert_eq!(b.document.content, a.document.content);
        assert!((b.score - a.score).abs() < 1e-6);
    }

    let manifest = reloaded.manifest().await;
    assert_eq!(manifest.document_count, 3);
    assert_eq!(manifest.embedding_dimension, 64);
}

#[tokio::test]
async fn test_load_rejects_dimension_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let index = VectorIndex::new(Arc::new(StubEmbedder::new(8)));
    index.build(corpus()).await.unwrap();
    index.save(dir.path()).await.unwrap();

    let result = VectorIndex::load(dir.path(), Arc::new(StubEmbedder::new(16))).await;
    assert!(matches!(result, Err(CivicRagError::VersionMismatch(_))));
}

#[tokio::test]
async fn test_delete_clears_files_and_memory() {
    let dir = tempfile::tempdir().unwrap();
    let index = VectorIndex::new(Arc::new(StubEmbedder::new(8)));
    assert!(!index.delete(dir.path()).await.unwrap());

    index.build(corpus()).await.unwrap();
    index.save(dir.path()).await.unwrap();

    assert!(index.delete(dir.path()).await.unwrap());
    assert!(index.is_empty().await);
    assert!(!index.delete(dir.path()).await.unwrap());
}

#[tokio::test]
async fn test_from_precomputed_validates_and_searches() {
    let embedder = Arc::new(StubEmbedder::new(4));

    let mismatched = VectorIndex::from_precomputed(
        embedder.clone(),
        corpus(),
        vec![vec![1.0, 0.0, 0.0, 0.0]],
    );
    assert!(matches!(mismatched, Err(CivicRagError::InvalidInput(_))));

    let wrong_dim = VectorIndex::from_precomputed(
        embedder.clone(),
        vec![document("a", "Rodent", "BRONX")],
        vec![vec![1.0, 0.0]],
    );
    assert!(matches!(
        wrong_dim,
        Err(CivicRagError::EmbeddingDimensionMismatch { .. })
    ));

    let index = VectorIndex::from_precomputed(
        embedder,
        vec![
            document("first", "Rodent", "BRONX"),
            document("second", "Rodent", "BRONX"),
        ],
        vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]],
    )
    .unwrap();

    let hits = index
        .search_by_vector(&[1.0, 0.0, 0.0, 0.0], 1, 0.0, None)
        .await
        .unwrap();
    assert_eq!(hits[0].document.content, "first");
}
