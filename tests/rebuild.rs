mod common;

use common::init_logs;
use loam_db::bson::Value;
use loam_db::engine::RebuildOptions;
use loam_db::{BsonAutoId, OpenOptions, Query, document};

const PAGE_SIZE: usize = 8192;

#[tokio::test]
async fn rebuild_keeps_documents_and_indexes() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let filename = dir.path().join("app.db").to_str().unwrap().to_string();

    let engine = OpenOptions::new(&filename).open().await.unwrap();
    engine
        .with_transaction(async |tx| {
            tx.ensure_index("col", "by_v", "$.v", false).await?;
            for i in 0..100 {
                tx.insert_one(
                    "col",
                    document! { "_id" => i, "v" => format!("value-{i}") },
                    BsonAutoId::ObjectId,
                )
                .await?;
            }
            Ok(())
        })
        .await
        .unwrap();

    let delta = engine.rebuild(RebuildOptions::default()).await.unwrap();
    let _ = delta; // compaction depends on prior layout

    // backup sits beside the original
    assert!(dir.path().join("app-backup.db").exists());

    // documents and the secondary index both survived
    let mut tx = engine.begin(true).await.unwrap();
    assert_eq!(tx.count("col", Query::All).await.unwrap(), 100);
    let hit = tx
        .find_vec("col", Query::Eq("v".into(), "value-42".into()), 0, usize::MAX)
        .await
        .unwrap();
    assert_eq!(hit.len(), 1);
    assert_eq!(hit[0].get("_id").as_i32(), Some(42));
    let indexes = tx.get_indexes("col").await.unwrap();
    assert!(indexes.iter().any(|(name, _, _)| name == "by_v"));
    tx.rollback().await.unwrap();

    engine.close().await.unwrap();
}

#[tokio::test]
async fn rebuild_is_idempotent_and_reclaims_space() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let filename = dir.path().join("compact.db").to_str().unwrap().to_string();

    let engine = OpenOptions::new(&filename).open().await.unwrap();
    engine
        .with_transaction(async |tx| {
            let payload = "x".repeat(4000);
            for i in 0..500 {
                tx.insert_one(
                    "col",
                    document! { "_id" => i, "p" => payload.clone() },
                    BsonAutoId::ObjectId,
                )
                .await?;
            }
            Ok(())
        })
        .await
        .unwrap();
    engine
        .with_transaction(async |tx| {
            tx.delete_many(
                "col",
                Query::Between("_id".into(), Value::Int32(0), Value::Int32(449)),
            )
            .await?;
            Ok(())
        })
        .await
        .unwrap();

    let first_delta = engine.rebuild(RebuildOptions::default()).await.unwrap();
    assert!(first_delta > 0, "dropping 90% of rows must shrink the file");

    let docs_after_first = {
        let mut tx = engine.begin(true).await.unwrap();
        let docs = tx.find_vec("col", Query::All, 0, usize::MAX).await.unwrap();
        tx.rollback().await.unwrap();
        docs
    };

    // a second rebuild changes nothing observable
    engine.rebuild(RebuildOptions::default()).await.unwrap();
    let docs_after_second = {
        let mut tx = engine.begin(true).await.unwrap();
        let docs = tx.find_vec("col", Query::All, 0, usize::MAX).await.unwrap();
        tx.rollback().await.unwrap();
        docs
    };

    assert_eq!(docs_after_first, docs_after_second);
    assert_eq!(docs_after_first.len(), 50);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn forged_corruption_triggers_auto_rebuild() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("victim.db");
    let filename = path.to_str().unwrap().to_string();

    {
        let engine = OpenOptions::new(&filename).open().await.unwrap();
        engine
            .with_transaction(async |tx| {
                tx.insert_one(
                    "col1",
                    document! { "_id" => 1, "name" => "Alpha" },
                    BsonAutoId::ObjectId,
                )
                .await?;
                // a second collection, dropped again, leaves pages on the
                // free-empty chain
                for i in 0..20 {
                    tx.insert_one("scratch", document! { "_id" => i }, BsonAutoId::ObjectId)
                        .await?;
                }
                Ok(())
            })
            .await
            .unwrap();
        engine
            .with_transaction(async |tx| {
                tx.drop_collection("scratch").await?;
                Ok(())
            })
            .await
            .unwrap();
        engine.close().await.unwrap();
    }

    // forge corruption: every Empty page type byte becomes Data
    {
        let mut bytes = std::fs::read(&path).unwrap();
        let pages = bytes.len() / PAGE_SIZE;
        let mut forged = 0;
        for page in 1..pages {
            let type_offset = page * PAGE_SIZE + 4;
            if bytes[type_offset] == 0 {
                bytes[type_offset] = 4;
                forged += 1;
            }
        }
        assert!(forged > 0, "the scenario needs free pages to corrupt");
        std::fs::write(&path, &bytes).unwrap();
    }

    // without auto-rebuild the damage surfaces on first allocation from
    // the free chain and poisons the engine
    {
        let engine = OpenOptions::new(&filename).open().await.unwrap();
        let mut tx = engine.begin(false).await.unwrap();
        let err = tx
            .insert_one(
                "col1",
                document! { "_id" => 50, "pad" => "x".repeat(7000) },
                BsonAutoId::ObjectId,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), loam_db::ErrorKind::InvalidDatafileState);
        assert_eq!(err.code(), 140);

        // the engine is now closed with an error
        let err = tx
            .insert_one("col1", document! { "_id" => 51 }, BsonAutoId::ObjectId)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), loam_db::ErrorKind::EngineClosed);
    }

    // the invalid-state flag now fails plain opens outright
    let err = OpenOptions::new(&filename).open().await.unwrap_err();
    assert_eq!(err.kind(), loam_db::ErrorKind::InvalidDatafileState);

    // with auto-rebuild the file is recovered in place
    let engine = OpenOptions::new(&filename)
        .auto_rebuild(true)
        .open()
        .await
        .unwrap();

    assert!(dir.path().join("victim-backup.db").exists());

    let mut tx = engine.begin(false).await.unwrap();
    let doc = tx.find_by_id("col1", &Value::Int32(1)).await.unwrap().unwrap();
    assert_eq!(doc.get("name").as_str(), Some("Alpha"));

    // bulk insert works on the rebuilt file
    for i in 100..200 {
        tx.insert_one("col1", document! { "_id" => i }, BsonAutoId::ObjectId)
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();

    let mut tx = engine.begin(true).await.unwrap();
    assert_eq!(tx.count("col1", Query::All).await.unwrap(), 101);
    tx.rollback().await.unwrap();
    engine.close().await.unwrap();
}

#[tokio::test]
async fn rebuild_can_switch_collation() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let filename = dir.path().join("coll.db").to_str().unwrap().to_string();

    let engine = OpenOptions::new(&filename).open().await.unwrap();
    engine
        .with_transaction(async |tx| {
            tx.insert_one("col", document! { "_id" => "Abc" }, BsonAutoId::ObjectId)
                .await?;
            Ok(())
        })
        .await
        .unwrap();

    engine
        .rebuild(RebuildOptions {
            collation: Some(loam_db::Collation::binary()),
        })
        .await
        .unwrap();

    assert_eq!(
        engine.pragma("COLLATION").unwrap(),
        loam_db::Pragma::Collation(loam_db::Collation::binary())
    );

    // binary collation is now case sensitive
    let mut tx = engine.begin(true).await.unwrap();
    assert!(
        tx.find_by_id("col", &Value::String("ABC".into()))
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        tx.find_by_id("col", &Value::String("Abc".into()))
            .await
            .unwrap()
            .is_some()
    );
    tx.rollback().await.unwrap();
    engine.close().await.unwrap();
}
