mod common;

use common::init_logs;
use loam_db::bson::Value;
use loam_db::{BsonAutoId, ErrorKind, OpenOptions, Query, document};

#[tokio::test]
async fn on_disk_files_survive_reopen() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    let filename = path.to_str().unwrap().to_string();

    {
        let engine = OpenOptions::new(&filename).open().await.unwrap();
        engine
            .with_transaction(async |tx| {
                tx.insert_one(
                    "col",
                    document! { "_id" => 1, "v" => "durable" },
                    BsonAutoId::ObjectId,
                )
                .await?;
                Ok(())
            })
            .await
            .unwrap();
        engine.close().await.unwrap();
    }

    // the two-file layout: data plus -log sibling
    assert!(path.exists());
    assert!(dir.path().join("app-log.db").exists());

    let engine = OpenOptions::new(&filename).open().await.unwrap();
    let mut tx = engine.begin(true).await.unwrap();
    let doc = tx.find_by_id("col", &Value::Int32(1)).await.unwrap().unwrap();
    assert_eq!(doc.get("v").as_str(), Some("durable"));
    tx.rollback().await.unwrap();
    engine.close().await.unwrap();
}

#[tokio::test]
async fn torn_data_tail_is_truncated() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("torn.db");
    let filename = path.to_str().unwrap().to_string();

    {
        let engine = OpenOptions::new(&filename).open().await.unwrap();
        engine
            .with_transaction(async |tx| {
                tx.insert_one("col", document! { "_id" => 1 }, BsonAutoId::ObjectId)
                    .await?;
                Ok(())
            })
            .await
            .unwrap();
        engine.close().await.unwrap();
    }

    // simulate a torn final write: a partial page dangling off the end
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.extend_from_slice(&[0xAB; 100]);
    std::fs::write(&path, &bytes).unwrap();

    let engine = OpenOptions::new(&filename).open().await.unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len() % 8192, 0);

    let mut tx = engine.begin(true).await.unwrap();
    assert_eq!(tx.count("col", Query::All).await.unwrap(), 1);
    tx.rollback().await.unwrap();
    engine.close().await.unwrap();
}

#[tokio::test]
async fn garbage_header_is_rejected() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.db");
    std::fs::write(&path, vec![0xCC; 16384]).unwrap();

    let err = OpenOptions::new(path.to_str().unwrap())
        .open()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidDatabase);
}

#[tokio::test]
async fn collation_must_match_existing_file() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coll.db");
    let filename = path.to_str().unwrap().to_string();

    {
        let engine = OpenOptions::new(&filename).open().await.unwrap();
        engine.close().await.unwrap();
    }

    let err = OpenOptions::new(&filename)
        .collation(loam_db::Collation::binary())
        .open()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CollationNotMatch);
}

#[tokio::test]
async fn read_only_engines_refuse_writes() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ro.db");
    let filename = path.to_str().unwrap().to_string();

    {
        let engine = OpenOptions::new(&filename).open().await.unwrap();
        engine
            .with_transaction(async |tx| {
                tx.insert_one("col", document! { "_id" => 1 }, BsonAutoId::ObjectId)
                    .await?;
                Ok(())
            })
            .await
            .unwrap();
        engine.close().await.unwrap();
    }

    let engine = OpenOptions::new(&filename)
        .read_only(true)
        .open()
        .await
        .unwrap();

    assert!(engine.begin(false).await.is_err());

    let mut tx = engine.begin(true).await.unwrap();
    assert_eq!(tx.count("col", Query::All).await.unwrap(), 1);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn password_is_unsupported() {
    init_logs();
    let options: OpenOptions = "filename=:memory:; password=secret".parse().unwrap();
    let err = options.open().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}
