mod common;

use common::memory_engine;
use loam_db::bson::{Binary, DateTime, Decimal128, Guid, ObjectId, Value};
use loam_db::{BsonAutoId, ErrorKind, Query, array, document};

#[tokio::test]
async fn insert_then_find_by_id_roundtrips_bytes() {
    let engine = memory_engine().await;

    let doc = document! {
        "_id" => 1,
        "name" => "John",
        "scores" => array![10, 20.5, "high"],
        "address" => document! { "city" => "Porto", "zip" => Value::Null },
        "blob" => Binary::new(vec![0, 1, 2, 254, 255]),
        "oid" => ObjectId::new(),
        "guid" => Guid::new(),
        "when" => DateTime::now().truncate_to_milliseconds(),
        "price" => Decimal128::from_parts(123450, 2, false),
        "flag" => true,
        "big" => 900_000_000_000i64,
        "embedding" => vec![0.25f32, -1.5, 3.0],
    };
    let original_bytes = doc.to_vec().unwrap();

    let mut tx = engine.begin(false).await.unwrap();
    let id = tx
        .insert_one("col1", doc.clone(), BsonAutoId::ObjectId)
        .await
        .unwrap();
    assert_eq!(id, Value::Int32(1));
    tx.commit().await.unwrap();

    let mut tx = engine.begin(true).await.unwrap();
    let found = tx
        .find_by_id("col1", &Value::Int32(1))
        .await
        .unwrap()
        .expect("document must exist");
    assert_eq!(found, doc);
    assert_eq!(found.to_vec().unwrap(), original_bytes);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn missing_id_gets_generated() {
    let engine = memory_engine().await;

    let mut tx = engine.begin(false).await.unwrap();
    let oid = tx
        .insert_one("col", document! { "a" => 1 }, BsonAutoId::ObjectId)
        .await
        .unwrap();
    assert!(matches!(oid, Value::ObjectId(_)));

    // numeric sequence starts after the existing maximum
    let first = tx
        .insert_one("nums", document! { "_id" => 10, "x" => 1 }, BsonAutoId::Int32)
        .await
        .unwrap();
    assert_eq!(first, Value::Int32(10));
    let second = tx
        .insert_one("nums", document! { "x" => 2 }, BsonAutoId::Int32)
        .await
        .unwrap();
    assert_eq!(second, Value::Int32(11));
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn update_and_upsert() {
    let engine = memory_engine().await;

    engine
        .with_transaction(async |tx| {
            tx.insert_one("col", document! { "_id" => 1, "v" => "a" }, BsonAutoId::ObjectId)
                .await?;

            assert!(tx.update("col", document! { "_id" => 1, "v" => "b" }).await?);
            assert!(!tx.update("col", document! { "_id" => 99, "v" => "x" }).await?);

            // upsert: existing id updates, fresh id inserts
            assert!(!tx
                .upsert("col", document! { "_id" => 1, "v" => "c" }, BsonAutoId::ObjectId)
                .await?);
            assert!(tx
                .upsert("col", document! { "_id" => 2, "v" => "d" }, BsonAutoId::ObjectId)
                .await?);

            Ok(())
        })
        .await
        .unwrap();

    let mut tx = engine.begin(true).await.unwrap();
    let doc = tx.find_by_id("col", &Value::Int32(1)).await.unwrap().unwrap();
    assert_eq!(doc.get("v").as_str(), Some("c"));
    assert_eq!(tx.count("col", Query::All).await.unwrap(), 2);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn update_grows_and_shrinks_documents() {
    let engine = memory_engine().await;

    // grow a document across several pages, then shrink it back
    engine
        .with_transaction(async |tx| {
            tx.insert_one("col", document! { "_id" => 1, "v" => "tiny" }, BsonAutoId::ObjectId)
                .await?;
            let big = "x".repeat(40_000);
            assert!(tx.update("col", document! { "_id" => 1, "v" => big }).await?);
            assert!(tx.update("col", document! { "_id" => 1, "v" => "small" }).await?);
            Ok(())
        })
        .await
        .unwrap();

    let mut tx = engine.begin(true).await.unwrap();
    let doc = tx.find_by_id("col", &Value::Int32(1)).await.unwrap().unwrap();
    assert_eq!(doc.get("v").as_str(), Some("small"));
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn unique_index_rejects_duplicates_and_transaction_stays_usable() {
    let engine = memory_engine().await;

    let mut tx = engine.begin(false).await.unwrap();
    tx.ensure_index("users", "email", "$.email", true).await.unwrap();
    tx.insert_one(
        "users",
        document! { "_id" => 1, "email" => "a@x.io" },
        BsonAutoId::ObjectId,
    )
    .await
    .unwrap();

    // same key under the default (case-insensitive) collation
    let err = tx
        .insert_one(
            "users",
            document! { "_id" => 2, "email" => "A@X.IO" },
            BsonAutoId::ObjectId,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexDuplicateKey);
    assert_eq!(err.code(), 110);

    // the failed operation left nothing behind; the transaction continues
    tx.insert_one(
        "users",
        document! { "_id" => 2, "email" => "b@x.io" },
        BsonAutoId::ObjectId,
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let mut tx = engine.begin(true).await.unwrap();
    assert_eq!(tx.count("users", Query::All).await.unwrap(), 2);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn duplicate_id_is_rejected() {
    let engine = memory_engine().await;

    let mut tx = engine.begin(false).await.unwrap();
    tx.insert_one("col", document! { "_id" => 7 }, BsonAutoId::ObjectId)
        .await
        .unwrap();
    let err = tx
        .insert_one("col", document! { "_id" => 7 }, BsonAutoId::ObjectId)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexDuplicateKey);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn queries_use_index_and_ranges() {
    let engine = memory_engine().await;

    engine
        .with_transaction(async |tx| {
            tx.ensure_index("people", "age", "$.age", false).await?;
            for (i, (name, age)) in [
                ("ana", 20),
                ("bob", 30),
                ("carl", 30),
                ("dana", 41),
                ("eve", 50),
            ]
            .iter()
            .enumerate()
            {
                tx.insert_one(
                    "people",
                    document! { "_id" => i as i32, "name" => *name, "age" => *age },
                    BsonAutoId::ObjectId,
                )
                .await?;
            }
            Ok(())
        })
        .await
        .unwrap();

    let mut tx = engine.begin(true).await.unwrap();

    let thirty = tx
        .find_vec("people", Query::Eq("age".into(), Value::Int32(30)), 0, usize::MAX)
        .await
        .unwrap();
    assert_eq!(thirty.len(), 2);
    for doc in &thirty {
        assert_eq!(doc.get("age").as_i32(), Some(30));
    }

    let range = tx
        .find_vec(
            "people",
            Query::Between("age".into(), Value::Int32(25), Value::Int32(45)),
            0,
            usize::MAX,
        )
        .await
        .unwrap();
    assert_eq!(range.len(), 3);

    // unindexed field falls back to a scan
    let by_name = tx
        .find_vec("people", Query::Eq("name".into(), "DANA".into()), 0, usize::MAX)
        .await
        .unwrap();
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].get("age").as_i32(), Some(41));

    // skip/limit windows over primary-key order
    let window = tx.find_vec("people", Query::All, 1, 2).await.unwrap();
    assert_eq!(window.len(), 2);
    assert_eq!(window[0].get("_id").as_i32(), Some(1));

    assert_eq!(
        tx.min("people", "age").await.unwrap(),
        Some(Value::Int32(20))
    );
    assert_eq!(
        tx.max("people", "age").await.unwrap(),
        Some(Value::Int32(50))
    );

    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn multikey_array_index() {
    let engine = memory_engine().await;

    engine
        .with_transaction(async |tx| {
            tx.ensure_index("posts", "tags", "$.tags", false).await?;
            tx.insert_one(
                "posts",
                document! { "_id" => 1, "tags" => array!["rust", "db"] },
                BsonAutoId::ObjectId,
            )
            .await?;
            tx.insert_one(
                "posts",
                document! { "_id" => 2, "tags" => array!["db"] },
                BsonAutoId::ObjectId,
            )
            .await?;
            Ok(())
        })
        .await
        .unwrap();

    let mut tx = engine.begin(true).await.unwrap();
    let tagged = tx
        .find_vec("posts", Query::Eq("tags".into(), "db".into()), 0, usize::MAX)
        .await
        .unwrap();
    assert_eq!(tagged.len(), 2);
    let rust_only = tx
        .find_vec("posts", Query::Eq("tags".into(), "rust".into()), 0, usize::MAX)
        .await
        .unwrap();
    assert_eq!(rust_only.len(), 1);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn delete_and_delete_many() {
    let engine = memory_engine().await;

    engine
        .with_transaction(async |tx| {
            for i in 0..10 {
                tx.insert_one("col", document! { "_id" => i, "even" => i % 2 == 0 }, BsonAutoId::ObjectId)
                    .await?;
            }

            assert!(tx.delete("col", &Value::Int32(3)).await?);
            assert!(!tx.delete("col", &Value::Int32(3)).await?);

            let deleted = tx
                .delete_many("col", Query::Eq("even".into(), Value::Boolean(true)))
                .await?;
            assert_eq!(deleted, 5);
            Ok(())
        })
        .await
        .unwrap();

    let mut tx = engine.begin(true).await.unwrap();
    assert_eq!(tx.count("col", Query::All).await.unwrap(), 4);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn drop_collection_and_index_management() {
    let engine = memory_engine().await;

    engine
        .with_transaction(async |tx| {
            tx.insert_one("a", document! { "x" => 1 }, BsonAutoId::ObjectId).await?;
            tx.insert_one("b", document! { "x" => 1 }, BsonAutoId::ObjectId).await?;

            // same definition is idempotent; conflicting one errors
            assert!(tx.ensure_index("a", "by_x", "$.x", false).await?);
            assert!(!tx.ensure_index("a", "by_x", "$.x", false).await?);
            assert_eq!(
                tx.ensure_index("a", "by_x", "$.y", false).await.unwrap_err().kind(),
                ErrorKind::IndexAlreadyExists
            );

            assert!(tx.drop_index("a", "by_x").await?);
            assert!(!tx.drop_index("a", "by_x").await?);

            assert!(tx.drop_collection("b").await?);
            assert!(!tx.drop_collection("b").await?);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(engine.get_collection_names().unwrap(), vec!["a".to_string()]);
}

#[tokio::test]
async fn deep_documents_are_rejected_cleanly() {
    let engine = memory_engine().await;

    let mut doc = document! { "leaf" => 1 };
    for _ in 0..25 {
        doc = document! { "inner" => doc };
    }

    let mut tx = engine.begin(false).await.unwrap();
    let err = tx
        .insert_one("col", doc, BsonAutoId::ObjectId)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DocumentMaxDepthReached);

    // still usable afterwards
    tx.insert_one("col", document! { "ok" => true }, BsonAutoId::ObjectId)
        .await
        .unwrap();
    tx.commit().await.unwrap();
}
