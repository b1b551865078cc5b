use crate::engine::collection_index::{IndexType, VectorDistanceMetric};
use crate::engine::engine::{BsonAutoId, EngineInner, Transaction};
use crate::engine::engine_pragmas::EnginePragmas;
use crate::engine::pages::{BasePage, CollectionPage, DataPage, HeaderPage, PageType};
use crate::engine::{DynDiskService, Engine, FileOrigin, PageAddress, StreamFactory};
use crate::utils::Collation;
use crate::{Error, Result, bson};
use std::rc::Rc;

/// Options for [`Engine::rebuild`].
#[derive(Debug, Default, Clone)]
pub struct RebuildOptions {
    /// Collation of the rebuilt file (keeps the old one when `None`).
    pub collation: Option<Collation>,
}

struct DumpedIndex {
    name: String,
    expression: String,
    unique: bool,
    kind: DumpedIndexKind,
}

enum DumpedIndexKind {
    Ordered,
    Vector { dims: u16, metric: VectorDistanceMetric },
}

struct DumpedCollection {
    name: String,
    indexes: Vec<DumpedIndex>,
    documents: Vec<bson::Document>,
}

struct DumpedDatabase {
    collections: Vec<DumpedCollection>,
    pragmas: Option<EnginePragmas>,
    /// One document per recovered error, destined for `_rebuild_errors`.
    errors: Vec<bson::Document>,
}

fn error_entry(collection: &str, page_id: u32, category: &str, message: &str) -> bson::Document {
    document! {
        "collection" => collection,
        "pageID" => page_id as i64,
        "category" => category,
        "message" => message,
    }
}

/// Streams every readable document and index definition out of the DATA
/// file, tolerating malformed pages. Structural damage (bad page images,
/// broken chains) and serialization damage (unparsable documents) are
/// categorized separately.
async fn dump_datafile(disk: &DynDiskService, header: &HeaderPage) -> DumpedDatabase {
    let mut dump = DumpedDatabase {
        collections: Vec::new(),
        pragmas: Some(header.pragmas().clone()),
        errors: Vec::new(),
    };

    let last_page_id =
        (disk.get_file_length(FileOrigin::Data) / crate::engine::PAGE_SIZE as u64) as u32;

    for name in header.collection_names() {
        let page_id = header.get_collection_page_id(&name);
        let collection_page = match disk
            .read_writable_page(BasePage::get_page_position(page_id), FileOrigin::Data)
            .await
            .map_err(|err| err.to_string())
            .and_then(|buffer| CollectionPage::load(buffer).map_err(|err| err.to_string()))
        {
            Ok(page) => page,
            Err(message) => {
                dump.errors
                    .push(error_entry(&name, page_id, "structural", &message));
                continue;
            }
        };

        let mut indexes = Vec::new();
        for index in collection_page.get_collection_indexes() {
            if index.name() == "_id" {
                continue;
            }
            indexes.push(DumpedIndex {
                name: index.name().to_string(),
                expression: index.expression().to_string(),
                unique: index.unique(),
                kind: match index.index_type() {
                    IndexType::Ordered => DumpedIndexKind::Ordered,
                    IndexType::Vector => DumpedIndexKind::Vector {
                        dims: index.dims(),
                        metric: index.metric(),
                    },
                },
            });
        }

        dump.collections.push(DumpedCollection {
            name,
            indexes,
            documents: Vec::new(),
        });
    }

    // walk every data page; documents start at non-extend blocks
    for page_id in 1..last_page_id {
        let buffer = match disk
            .read_writable_page(BasePage::get_page_position(page_id), FileOrigin::Data)
            .await
        {
            Ok(buffer) => buffer,
            Err(err) => {
                dump.errors
                    .push(error_entry("", page_id, "structural", &err.to_string()));
                continue;
            }
        };

        if buffer.read_u8(BasePage::P_PAGE_TYPE) != PageType::Data as u8 {
            disk.cache().discard_page(buffer);
            continue;
        }

        let page = match DataPage::load(buffer) {
            Ok(page) => page,
            Err(err) => {
                dump.errors
                    .push(error_entry("", page_id, "structural", &err.to_string()));
                continue;
            }
        };

        let col_id = page.col_id();
        let starts: Vec<PageAddress> = page.get_blocks().collect();
        drop(page);

        let Some(collection_index) = dump
            .collections
            .iter()
            .position(|c| header.get_collection_page_id(&c.name) == col_id)
        else {
            continue;
        };

        for start in starts {
            match read_chain(disk, start, last_page_id).await {
                Ok(bytes) => match bson::Document::from_bytes(&bytes) {
                    Ok(doc) => dump.collections[collection_index].documents.push(doc),
                    Err(err) => {
                        let name = dump.collections[collection_index].name.clone();
                        dump.errors.push(error_entry(
                            &name,
                            page_id,
                            "serialization",
                            &err.to_string(),
                        ));
                    }
                },
                Err(err) => {
                    let name = dump.collections[collection_index].name.clone();
                    dump.errors
                        .push(error_entry(&name, page_id, "structural", &err.to_string()));
                }
            }
        }
    }

    dump
}

/// Reassembles one document chain with bounds and loop protection.
async fn read_chain(
    disk: &DynDiskService,
    start: PageAddress,
    last_page_id: u32,
) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut current = start;
    let mut hops = 0u32;

    while !current.is_empty() {
        if hops > last_page_id.saturating_mul(255) {
            return Err(Error::invalid_datafile_state("data chain loops"));
        }
        hops += 1;

        if current.page_id() >= last_page_id {
            return Err(Error::invalid_datafile_state("data chain leaves the file"));
        }

        let buffer = disk
            .read_writable_page(BasePage::get_page_position(current.page_id()), FileOrigin::Data)
            .await?;
        let page = DataPage::load(buffer)?;
        if !page.is_used(current.index()) {
            return Err(Error::invalid_datafile_state("data chain hits a free slot"));
        }

        let block = page.get_data_block(current.index());
        bytes.extend_from_slice(block.buffer().as_bytes());
        current = block.next_block();
    }

    Ok(bytes)
}

/// Re-creates collections, indexes and documents inside a fresh engine.
async fn restore_into(inner: &Rc<EngineInner>, dump: DumpedDatabase) -> Result<()> {
    for collection in &dump.collections {
        let service = inner.monitor.create_transaction(false).await?;
        let mut transaction = Transaction::new(inner.clone(), service);

        // even an empty collection must come back
        transaction.write_snapshot(&collection.name, true).await?;

        for index in &collection.indexes {
            match index.kind {
                DumpedIndexKind::Ordered => {
                    transaction
                        .ensure_index(
                            &collection.name,
                            &index.name,
                            &index.expression,
                            index.unique,
                        )
                        .await?;
                }
                DumpedIndexKind::Vector { dims, metric } => {
                    transaction
                        .ensure_vector_index(
                            &collection.name,
                            &index.name,
                            &index.expression,
                            dims,
                            metric,
                        )
                        .await?;
                }
            }
        }

        for doc in &collection.documents {
            transaction
                .insert_one(&collection.name, doc.clone(), BsonAutoId::ObjectId)
                .await?;
        }

        transaction.commit().await?;
    }

    if !dump.errors.is_empty() {
        log::warn!("rebuild recovered with {} errors", dump.errors.len());
        let service = inner.monitor.create_transaction(false).await?;
        let mut transaction = Transaction::new(inner.clone(), service);
        for error in &dump.errors {
            transaction
                .insert_one("_rebuild_errors", error.clone(), BsonAutoId::ObjectId)
                .await?;
        }
        transaction.commit().await?;
    }

    // carry scalar pragmas over (collation was fixed at bootstrap)
    if let Some(pragmas) = dump.pragmas {
        let collation = inner.header.borrow().pragmas().collation;
        let mut restored = pragmas;
        restored.collation = collation;
        *inner.header.borrow_mut().pragmas_mut() = restored;

        let service = inner.monitor.create_transaction(false).await?;
        let mut transaction = Transaction::new(inner.clone(), service);
        transaction.service_mut()?.touch_header();
        transaction.commit().await?;
    }

    Ok(())
}

/// Rebuild driven from a live engine (explicit `rebuild()` call). The
/// caller already checkpointed, so the DATA file is authoritative.
pub(crate) async fn rebuild_database(
    inner: Rc<EngineInner>,
    options: RebuildOptions,
) -> Result<(Rc<EngineInner>, i64)> {
    let inner = Rc::try_unwrap(inner)
        .map_err(|_| Error::invalid_transaction_state("transactions open during rebuild"))?;

    let EngineInner {
        locker,
        disk,
        wal_index,
        header,
        monitor,
        read_only,
        ..
    } = inner;
    drop(monitor);
    drop(locker);
    drop(wal_index);

    let disk = Rc::try_unwrap(disk)
        .unwrap_or_else(|_| unreachable!("monitor held the only other reference"));

    let old_size = disk.get_file_length(FileOrigin::Data) as i64;
    let old_collation = header.borrow().pragmas().collation;

    let dump = dump_datafile(&disk, &header.borrow()).await;

    let (data_factory, log_factory) = disk.into_factories();
    data_factory.rename_with_suffix("-backup").await?;
    let _ = log_factory.delete().await;

    let collation = options.collation.unwrap_or(old_collation);
    let new_inner = Engine::build_inner(
        data_factory,
        log_factory,
        Some(collation),
        0,
        read_only,
        false,
    )
    .await
    .map_err(|(err, _, _)| err)?;

    restore_into(&new_inner, dump).await?;

    // leave the fresh file fully checkpointed
    new_inner.wal_index.checkpoint(&new_inner.disk).await?;

    let new_size = new_inner.disk.get_file_length(FileOrigin::Data) as i64;
    log::info!("rebuild complete ({old_size} -> {new_size} bytes)");

    Ok((new_inner, old_size - new_size))
}

/// Rebuild at open time (auto-rebuild of a damaged file).
pub(crate) async fn rebuild_from_factories(
    data_factory: Box<dyn StreamFactory>,
    log_factory: Box<dyn StreamFactory>,
    options: RebuildOptions,
    read_only: bool,
) -> Result<Rc<EngineInner>> {
    // salvage pass over the damaged file
    let (disk, _) =
        match crate::engine::disk::DiskService::new(data_factory, log_factory, None, 0).await {
            Ok(opened) => opened,
            Err((err, _, _)) => return Err(err),
        };

    let mut dump = DumpedDatabase {
        collections: Vec::new(),
        pragmas: None,
        errors: Vec::new(),
    };
    let mut collation = options.collation;

    match disk.read_writable_page(0, FileOrigin::Data).await {
        Ok(buffer) => match HeaderPage::load(buffer) {
            Ok(header) => {
                collation = collation.or(Some(header.pragmas().collation));
                dump = dump_datafile(&disk, &header).await;
            }
            Err(err) => {
                dump.errors
                    .push(error_entry("", 0, "structural", &err.to_string()));
            }
        },
        Err(err) => {
            dump.errors
                .push(error_entry("", 0, "structural", &err.to_string()));
        }
    }

    let (data_factory, log_factory) = disk.into_factories();
    data_factory.rename_with_suffix("-backup").await?;
    let _ = log_factory.delete().await;

    let new_inner = Engine::build_inner(
        data_factory,
        log_factory,
        collation,
        0,
        read_only,
        false,
    )
    .await
    .map_err(|(err, _, _)| err)?;

    restore_into(&new_inner, dump).await?;
    new_inner.wal_index.checkpoint(&new_inner.disk).await?;

    Ok(new_inner)
}
