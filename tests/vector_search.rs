mod common;

use common::memory_engine;
use loam_db::bson::Value;
use loam_db::{BsonAutoId, ErrorKind, VectorDistanceMetric, document};

#[tokio::test]
async fn cosine_top_k_and_distance_filter() {
    let engine = memory_engine().await;

    engine
        .with_transaction(async |tx| {
            tx.insert_one("vecs", document! { "_id" => 1, "embedding" => vec![1.0f32, 0.0] }, BsonAutoId::ObjectId)
                .await?;
            tx.insert_one("vecs", document! { "_id" => 2, "embedding" => vec![0.0f32, 1.0] }, BsonAutoId::ObjectId)
                .await?;
            tx.insert_one("vecs", document! { "_id" => 3, "embedding" => vec![1.0f32, 1.0] }, BsonAutoId::ObjectId)
                .await?;
            tx.ensure_vector_index("vecs", "by_embedding", "$.embedding", 2, VectorDistanceMetric::Cosine)
                .await?;
            Ok(())
        })
        .await
        .unwrap();

    let mut tx = engine.begin(true).await.unwrap();

    let top = tx
        .top_k_near("vecs", "by_embedding", &[1.0, 0.0], 1)
        .await
        .unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].0.get("_id").as_i32(), Some(1));
    assert!(top[0].1.abs() < 1e-9);

    // cosine distance to (1,1) is ~0.293, just above the cutoff
    let near = tx
        .where_near("vecs", "by_embedding", &[1.0, 0.0], 0.28)
        .await
        .unwrap();
    assert_eq!(near.len(), 1);
    assert_eq!(near[0].get("_id").as_i32(), Some(1));

    // widen the radius and the diagonal joins, nearest first
    let near = tx
        .where_near("vecs", "by_embedding", &[1.0, 0.0], 0.30)
        .await
        .unwrap();
    assert_eq!(near.len(), 2);
    assert_eq!(near[0].get("_id").as_i32(), Some(1));
    assert_eq!(near[1].get("_id").as_i32(), Some(3));

    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn euclidean_ordering_over_many_points() {
    let engine = memory_engine().await;

    engine
        .with_transaction(async |tx| {
            tx.ensure_vector_index("grid", "near", "$.point", 2, VectorDistanceMetric::Euclidean)
                .await?;
            for i in 0..40 {
                let x = (i % 8) as f32;
                let y = (i / 8) as f32;
                tx.insert_one("grid", document! { "_id" => i, "point" => vec![x, y] }, BsonAutoId::ObjectId)
                    .await?;
            }
            Ok(())
        })
        .await
        .unwrap();

    let mut tx = engine.begin(true).await.unwrap();
    let top = tx.top_k_near("grid", "near", &[3.2, 2.1], 4).await.unwrap();
    assert_eq!(top.len(), 4);

    // distances come back sorted and are true nearest neighbors
    for pair in top.windows(2) {
        assert!(pair[0].1 <= pair[1].1);
    }
    assert_eq!(top[0].0.get("_id").as_i32(), Some(19)); // (3,2)
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn dimension_mismatch_is_rejected() {
    let engine = memory_engine().await;

    let mut tx = engine.begin(false).await.unwrap();
    tx.ensure_vector_index("vecs", "idx", "$.v", 3, VectorDistanceMetric::Cosine)
        .await
        .unwrap();

    let err = tx
        .insert_one("vecs", document! { "_id" => 1, "v" => vec![1.0f32, 2.0] }, BsonAutoId::ObjectId)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidVectorDimensions);
    assert_eq!(err.code(), 131);

    // documents without the field (or with a non-vector value) just skip
    // the index
    tx.insert_one("vecs", document! { "_id" => 2, "v" => "not a vector" }, BsonAutoId::ObjectId)
        .await
        .unwrap();
    tx.insert_one("vecs", document! { "_id" => 3, "v" => vec![1.0f32, 2.0, 3.0] }, BsonAutoId::ObjectId)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = engine.begin(true).await.unwrap();
    let err = tx
        .top_k_near("vecs", "idx", &[1.0], 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidVectorDimensions);

    let top = tx.top_k_near("vecs", "idx", &[1.0, 2.0, 3.0], 5).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].0.get("_id").as_i32(), Some(3));
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn vector_nodes_follow_document_lifecycle() {
    let engine = memory_engine().await;

    engine
        .with_transaction(async |tx| {
            tx.ensure_vector_index("v", "idx", "$.e", 2, VectorDistanceMetric::Euclidean)
                .await?;
            tx.insert_one("v", document! { "_id" => 1, "e" => vec![0.0f32, 0.0] }, BsonAutoId::ObjectId)
                .await?;
            tx.insert_one("v", document! { "_id" => 2, "e" => vec![5.0f32, 5.0] }, BsonAutoId::ObjectId)
                .await?;
            Ok(())
        })
        .await
        .unwrap();

    // delete removes the node from search results
    engine
        .with_transaction(async |tx| {
            assert!(tx.delete("v", &Value::Int32(1)).await?);
            Ok(())
        })
        .await
        .unwrap();

    let mut tx = engine.begin(true).await.unwrap();
    let top = tx.top_k_near("v", "idx", &[0.0, 0.0], 10).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].0.get("_id").as_i32(), Some(2));
    tx.rollback().await.unwrap();

    // update re-indexes the new embedding
    engine
        .with_transaction(async |tx| {
            assert!(
                tx.update("v", document! { "_id" => 2, "e" => vec![-1.0f32, 0.0] })
                    .await?
            );
            Ok(())
        })
        .await
        .unwrap();

    let mut tx = engine.begin(true).await.unwrap();
    let top = tx.top_k_near("v", "idx", &[-1.0, 0.0], 1).await.unwrap();
    assert!(top[0].1.abs() < 1e-9);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn drop_vector_index() {
    let engine = memory_engine().await;

    engine
        .with_transaction(async |tx| {
            tx.ensure_vector_index("v", "idx", "$.e", 2, VectorDistanceMetric::Cosine)
                .await?;
            tx.insert_one("v", document! { "_id" => 1, "e" => vec![1.0f32, 0.0] }, BsonAutoId::ObjectId)
                .await?;
            assert!(tx.drop_index("v", "idx").await?);
            Ok(())
        })
        .await
        .unwrap();

    let mut tx = engine.begin(true).await.unwrap();
    let err = tx
        .top_k_near("v", "idx", &[1.0, 0.0], 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexNotFound);
    tx.rollback().await.unwrap();
}
