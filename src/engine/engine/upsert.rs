use super::Transaction;
use super::insert::BsonAutoId;
use crate::{Result, bson};

impl Transaction {
    /// Update when a document with the same `_id` exists, insert
    /// otherwise. Returns `true` when it inserted.
    pub async fn upsert(
        &mut self,
        collection: &str,
        doc: bson::Document,
        auto_id: BsonAutoId,
    ) -> Result<bool> {
        let has_id = doc.try_get("_id").is_some_and(|id| !id.is_null());

        if has_id && self.update(collection, doc.clone()).await? {
            return Ok(false);
        }

        self.insert_one(collection, doc, auto_id).await?;
        Ok(true)
    }
}
