mod common;

use common::{shared_engine, shared_file, shared_settings};
use loam_db::bson::Value;
use loam_db::engine::Engine;
use loam_db::{BsonAutoId, ErrorKind, Pragma, Query, document};

const PAGE_SIZE: u64 = 8192;

#[tokio::test]
async fn committed_writes_are_visible_and_rolled_back_ones_are_not() {
    let data = shared_file();
    let log = shared_file();
    let engine = shared_engine(&data, &log).await;

    let mut tx = engine.begin(false).await.unwrap();
    tx.insert_one("col", document! { "_id" => 1 }, BsonAutoId::ObjectId)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = engine.begin(false).await.unwrap();
    tx.insert_one("col", document! { "_id" => 2 }, BsonAutoId::ObjectId)
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    let mut tx = engine.begin(true).await.unwrap();
    assert_eq!(tx.count("col", Query::All).await.unwrap(), 1);
    assert!(tx.find_by_id("col", &Value::Int32(2)).await.unwrap().is_none());
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn checkpoint_truncates_log_and_keeps_data_aligned() {
    let data = shared_file();
    let log = shared_file();
    let engine = shared_engine(&data, &log).await;

    engine
        .with_transaction(async |tx| {
            for i in 0..50 {
                tx.insert_one("col", document! { "_id" => i, "p" => "x".repeat(100) }, BsonAutoId::ObjectId)
                    .await?;
            }
            Ok(())
        })
        .await
        .unwrap();

    assert!(log.lock().unwrap().len() > 0, "commits land in the log first");

    let flushed = engine.checkpoint().await.unwrap();
    assert!(flushed > 0);
    assert_eq!(log.lock().unwrap().len(), 0, "checkpoint empties the log");
    assert_eq!(
        data.lock().unwrap().len() as u64 % PAGE_SIZE,
        0,
        "data file stays page aligned"
    );

    // everything survived the move into the data file
    let mut tx = engine.begin(true).await.unwrap();
    assert_eq!(tx.count("col", Query::All).await.unwrap(), 50);
    tx.rollback().await.unwrap();

    // a second checkpoint has nothing to do
    assert_eq!(engine.checkpoint().await.unwrap(), 0);
}

#[tokio::test]
async fn reopen_recovers_committed_state_from_log() {
    let data = shared_file();
    let log = shared_file();

    {
        let engine = shared_engine(&data, &log).await;
        engine
            .with_transaction(async |tx| {
                tx.insert_one("col", document! { "_id" => 1, "v" => "kept" }, BsonAutoId::ObjectId)
                    .await?;
                Ok(())
            })
            .await
            .unwrap();
        // no close(): the log still holds the commit
        assert!(log.lock().unwrap().len() > 0);
    }

    let engine = Engine::open(shared_settings(&data, &log, false)).await.unwrap();
    let mut tx = engine.begin(true).await.unwrap();
    let doc = tx.find_by_id("col", &Value::Int32(1)).await.unwrap().unwrap();
    assert_eq!(doc.get("v").as_str(), Some("kept"));
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn unconfirmed_log_tail_is_discarded_on_reopen() {
    let data = shared_file();
    let log = shared_file();

    {
        let engine = shared_engine(&data, &log).await;
        engine
            .with_transaction(async |tx| {
                tx.insert_one("col", document! { "_id" => 1 }, BsonAutoId::ObjectId)
                    .await?;
                Ok(())
            })
            .await
            .unwrap();
    }

    let confirmed_len = log.lock().unwrap().len();

    // forge a torn commit: a page image stamped with a fresh transaction
    // id but never confirmed
    {
        let mut log_bytes = log.lock().unwrap();
        let mut fake = vec![0u8; PAGE_SIZE as usize];
        fake[0..4].copy_from_slice(&99u32.to_le_bytes()); // page id
        fake[4] = 4; // data page
        fake[25..29].copy_from_slice(&1000u32.to_le_bytes()); // transaction id
        fake[29] = 0; // not confirmed
        log_bytes.extend_from_slice(&fake);
    }

    let engine = Engine::open(shared_settings(&data, &log, false)).await.unwrap();
    assert_eq!(
        log.lock().unwrap().len(),
        confirmed_len,
        "the unconfirmed tail is truncated away"
    );

    let mut tx = engine.begin(true).await.unwrap();
    assert_eq!(tx.count("col", Query::All).await.unwrap(), 1);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn log_growth_is_bounded_by_batches() {
    let data = shared_file();
    let log = shared_file();
    let engine = shared_engine(&data, &log).await;

    // effectively disable the automatic checkpoint
    engine
        .set_pragma(Pragma::CheckpointSize(u32::MAX))
        .await
        .unwrap();

    engine
        .with_transaction(async |tx| {
            for i in 0..2000 {
                tx.insert_one("col", document! { "_id" => i, "n" => "v" }, BsonAutoId::ObjectId)
                    .await?;
            }
            Ok(())
        })
        .await
        .unwrap();

    engine
        .with_transaction(async |tx| {
            let deleted = tx.delete_many("col", Query::All).await?;
            assert_eq!(deleted, 2000);
            Ok(())
        })
        .await
        .unwrap();

    assert!(
        log.lock().unwrap().len() <= 5 * 1024 * 1024,
        "log stayed under 5 MiB ({} bytes)",
        log.lock().unwrap().len()
    );

    let mut tx = engine.begin(true).await.unwrap();
    assert_eq!(tx.count("col", Query::All).await.unwrap(), 0);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn transaction_limit_is_enforced() {
    let data = shared_file();
    let log = shared_file();
    let engine = shared_engine(&data, &log).await;

    let mut parked = Vec::new();
    for _ in 0..100 {
        parked.push(engine.begin(true).await.unwrap());
    }

    let err = engine.begin(true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionLimitReached);

    for mut tx in parked {
        tx.rollback().await.unwrap();
    }
    assert!(engine.begin(true).await.is_ok());
}

#[tokio::test]
async fn safepoint_spill_stays_private_until_commit() {
    let data = shared_file();
    let log = shared_file();
    let engine = shared_engine(&data, &log).await;

    // drain the shared budget pool so the writer cannot extend its share
    // and must spill at its initial budget
    let mut parked = Vec::new();
    for _ in 0..99 {
        parked.push(engine.begin(true).await.unwrap());
    }

    let mut writer = engine.begin(false).await.unwrap();
    let payload = "x".repeat(6000); // one data page per document
    for i in 0..1100 {
        writer
            .insert_one(
                "big",
                document! { "_id" => i, "payload" => payload.clone() },
                BsonAutoId::ObjectId,
            )
            .await
            .unwrap();
    }

    // provisional spilled pages exist in the log but no reader sees them
    assert!(log.lock().unwrap().len() > 0, "safepoint spilled to the log");
    {
        let mut reader = engine.begin(true).await.unwrap();
        assert_eq!(reader.count("big", Query::All).await.unwrap(), 0);
        reader.rollback().await.unwrap();
    }

    // the writer itself reads through its own spill
    assert_eq!(writer.count("big", Query::All).await.unwrap(), 1100);

    writer.commit().await.unwrap();

    let mut reader = engine.begin(true).await.unwrap();
    assert_eq!(reader.count("big", Query::All).await.unwrap(), 1100);
    reader.rollback().await.unwrap();

    for mut tx in parked {
        tx.rollback().await.unwrap();
    }

    // checkpoint must only move confirmed state
    engine.checkpoint().await.unwrap();
    let mut reader = engine.begin(true).await.unwrap();
    assert_eq!(reader.count("big", Query::All).await.unwrap(), 1100);
    reader.rollback().await.unwrap();
}

#[tokio::test]
async fn user_version_pragma_persists() {
    let data = shared_file();
    let log = shared_file();

    {
        let engine = shared_engine(&data, &log).await;
        engine.set_pragma(Pragma::UserVersion(9)).await.unwrap();
        engine.close().await.unwrap();
    }

    let engine = Engine::open(shared_settings(&data, &log, false)).await.unwrap();
    assert_eq!(
        engine.pragma("USER_VERSION").unwrap(),
        Pragma::UserVersion(9)
    );
}
