use super::Transaction;
use super::insert::collect_index_metas;
use crate::engine::collection_index::IndexType;
use crate::engine::index_service::IndexService;
use crate::engine::vector_index_service::VectorIndexService;
use crate::utils::{CaseInsensitiveString, Order};
use crate::{Result, bson};
use std::collections::HashSet;

impl Transaction {
    /// Collection names visible to this transaction.
    pub fn get_collection_names(&self) -> Vec<String> {
        let mut names = self.inner().header.borrow().collection_names();
        names.sort();
        names
    }

    /// Drops a collection with everything it owns; `false` when absent.
    pub async fn drop_collection(&mut self, collection: &str) -> Result<bool> {
        let result = self.drop_collection_inner(collection).await;
        self.observed(result).await
    }

    async fn drop_collection_inner(&mut self, collection: &str) -> Result<bool> {
        if !self.write_snapshot(collection, false).await? {
            return Ok(false);
        }

        log::debug!("dropping collection `{collection}`");

        let collation = self.collation();
        let max_item_count = self.max_item_count();

        // discover every page the collection owns: data chains and index
        // nodes are all reachable from the documents and the catalogs
        let mut pages = HashSet::<u32>::new();

        let (metas, pk_nodes) = {
            let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
            let metas = collect_index_metas(snapshot);
            let mut indexer = IndexService::new(snapshot, collation, max_item_count);
            let pk_nodes = indexer.find_all("_id", Order::Ascending).await?;
            (metas, pk_nodes)
        };

        for pk_node in &pk_nodes {
            // the node chain spans every ordered index
            {
                let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
                let mut indexer = IndexService::new(snapshot, collation, max_item_count);
                let mut current = pk_node.position();
                let mut counter = 0u32;
                loop {
                    if counter > max_item_count {
                        return Err(crate::Error::invalid_datafile_state(
                            "loop detected walking document node chain",
                        ));
                    }
                    counter += 1;

                    pages.insert(current.page_id());
                    let node = indexer.get_node(current).await?;
                    if node.next_node().is_empty() {
                        break;
                    }
                    current = node.next_node();
                }
            }

            // the data chain
            {
                let max = max_item_count;
                let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
                let mut current = pk_node.data_block();
                let mut counter = 0u32;
                while !current.is_empty() {
                    if counter > max {
                        return Err(crate::Error::invalid_datafile_state(
                            "loop detected walking data chain",
                        ));
                    }
                    counter += 1;

                    pages.insert(current.page_id());
                    let page = snapshot.get_data_page(current.page_id()).await?;
                    current = page.get_data_block(current.index()).next_block();
                }
            }
        }

        for meta in &metas {
            let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
            match meta.index_type {
                IndexType::Ordered => {
                    // sentinel nodes may live on otherwise empty pages
                    let index = snapshot
                        .collection_page()
                        .unwrap()
                        .get_collection_index(&meta.name)
                        .unwrap();
                    pages.insert(index.head().page_id());
                    pages.insert(index.tail().page_id());
                }
                IndexType::Vector => {
                    let mut vectors = VectorIndexService::new(snapshot, max_item_count);
                    for address in vectors.node_pages(&meta.name).await? {
                        pages.insert(address);
                    }
                }
            }
        }

        {
            let snapshot = self.service_mut()?.get_snapshot(collection).unwrap();
            for page_id in pages {
                snapshot.delete_full_page(page_id).await?;
            }
            snapshot.delete_collection_page();

            let name = collection.to_string();
            snapshot
                .trans_pages()
                .borrow_mut()
                .on_commit(move |header| header.delete_collection(&name));
        }

        self.inner()
            .sequences
            .borrow_mut()
            .remove(&CaseInsensitiveString::new(collection));

        Ok(true)
    }

    /// Renames a collection (directory-only change).
    pub async fn rename_collection(&mut self, collection: &str, new_name: &str) -> Result<bool> {
        use crate::utils::StrExtension;

        if !new_name.is_word() || new_name.starts_with('$') {
            return Err(crate::Error::invalid_collection_name(new_name));
        }
        if self.inner().header.borrow().get_collection_page_id(new_name) != u32::MAX {
            return Err(crate::Error::already_exists_collection_name(new_name));
        }
        if !self.write_snapshot(collection, false).await? {
            return Ok(false);
        }

        let service = self.service_mut()?;
        let snapshot = service.get_snapshot(collection).unwrap();
        let old_name = collection.to_string();
        let new_name = new_name.to_string();
        snapshot
            .trans_pages()
            .borrow_mut()
            .on_commit(move |header| header.rename_collection(&old_name, &new_name));

        Ok(true)
    }

    /// True when a document with this id exists.
    pub async fn exists(&mut self, collection: &str, id: &bson::Value) -> Result<bool> {
        Ok(self.find_by_id(collection, id).await?.is_some())
    }
}
