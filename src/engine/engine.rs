mod collection;
mod delete;
mod index;
mod insert;
mod query;
mod update;
mod upsert;
mod vector;

pub use insert::BsonAutoId;
pub use query::Query;

use crate::engine::disk::DiskService;
use crate::engine::lock_service::LockService;
use crate::engine::pages::HeaderPage;
use crate::engine::rebuild::{self, RebuildOptions};
use crate::engine::transaction_monitor::TransactionMonitor;
use crate::engine::transaction_service::TransactionService;
use crate::engine::wal_index_service::WalIndexService;
use crate::engine::{FileOrigin, PAGE_SIZE, StreamFactory};
use crate::utils::{CaseInsensitiveString, Collation, Shared};
use crate::{Error, Result};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::pin::Pin;
use std::rc::Rc;

/// Everything needed to open an engine over a pair of streams.
pub struct EngineSettings {
    pub data_factory: Box<dyn StreamFactory>,
    pub log_factory: Box<dyn StreamFactory>,
    /// Collation for a new database; must match for an existing one.
    pub collation: Option<Collation>,
    pub initial_size: u64,
    pub read_only: bool,
    /// Validate the file on open and rebuild it when damaged.
    pub auto_rebuild: bool,
}

impl StreamFactory for Box<dyn StreamFactory> {
    fn get_stream(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn crate::engine::FileStream>>> + '_>> {
        (**self).get_stream()
    }

    fn exists(&self) -> Pin<Box<dyn Future<Output = bool> + '_>> {
        (**self).exists()
    }

    fn len(&self) -> Pin<Box<dyn Future<Output = Result<u64>> + '_>> {
        (**self).len()
    }

    fn delete(&self) -> Pin<Box<dyn Future<Output = Result<()>> + '_>> {
        (**self).delete()
    }

    fn rename_with_suffix(
        &self,
        suffix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + '_>> {
        (**self).rename_with_suffix(suffix)
    }
}

pub(crate) type DynDiskService = DiskService<Box<dyn StreamFactory>>;
pub(crate) type DynTransactionService = TransactionService<Box<dyn StreamFactory>>;

pub(crate) struct EngineInner {
    pub locker: Rc<LockService>,
    pub disk: Rc<DynDiskService>,
    pub wal_index: Rc<WalIndexService>,
    pub header: Shared<HeaderPage>,
    pub monitor: TransactionMonitor<Box<dyn StreamFactory>>,
    pub sequences: RefCell<HashMap<CaseInsensitiveString, i64>>,
    pub read_only: bool,
    pub closed: Cell<bool>,
}

/// The database engine: one per database file pair.
///
/// All operations happen inside a [`Transaction`]; `begin` starts one,
/// `with_transaction` wraps begin/commit/rollback around a closure.
pub struct Engine {
    inner: RefCell<Option<Rc<EngineInner>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish()
    }
}

impl Engine {
    pub async fn open(settings: EngineSettings) -> Result<Engine> {
        let mut settings = settings;
        let inner = match Self::open_inner(&mut settings).await {
            Ok(inner) => inner,
            Err(err)
                if settings.auto_rebuild
                    && matches!(
                        err.kind(),
                        crate::ErrorKind::InvalidDatabase | crate::ErrorKind::InvalidDatafileState
                    ) =>
            {
                log::warn!("open failed ({err}); rebuilding damaged database");
                Self::rebuild_and_open(settings, RebuildOptions::default()).await?
            }
            Err(err) => return Err(err),
        };

        Ok(Engine {
            inner: RefCell::new(Some(inner)),
        })
    }

    async fn open_inner(settings: &mut EngineSettings) -> Result<Rc<EngineInner>> {
        let data_factory = std::mem::replace(
            &mut settings.data_factory,
            Box::new(crate::MemoryStreamFactory::new()),
        );
        let log_factory = std::mem::replace(
            &mut settings.log_factory,
            Box::new(crate::MemoryStreamFactory::new()),
        );

        let open = Self::build_inner(
            data_factory,
            log_factory,
            settings.collation,
            settings.initial_size,
            settings.read_only,
            settings.auto_rebuild,
        )
        .await;

        match open {
            Ok(inner) => Ok(inner),
            Err((err, data_factory, log_factory)) => {
                // hand the factories back so auto-rebuild can reuse them
                settings.data_factory = data_factory;
                settings.log_factory = log_factory;
                Err(err)
            }
        }
    }

    pub(crate) async fn build_inner(
        data_factory: Box<dyn StreamFactory>,
        log_factory: Box<dyn StreamFactory>,
        collation: Option<Collation>,
        initial_size: u64,
        read_only: bool,
        validate: bool,
    ) -> std::result::Result<Rc<EngineInner>, (Error, Box<dyn StreamFactory>, Box<dyn StreamFactory>)>
    {
        let (disk, _is_new) =
            match DiskService::new(data_factory, log_factory, collation, initial_size).await {
                Ok(disk) => disk,
                Err((err, data_factory, log_factory)) => {
                    return Err((err, data_factory, log_factory));
                }
            };

        match Self::assemble(disk, collation, read_only, validate).await {
            Ok(inner) => Ok(inner),
            Err((err, disk)) => {
                let (data_factory, log_factory) = disk.into_factories();
                Err((err, data_factory, log_factory))
            }
        }
    }

    async fn assemble(
        disk: DynDiskService,
        collation: Option<Collation>,
        read_only: bool,
        validate: bool,
    ) -> std::result::Result<Rc<EngineInner>, (Error, DynDiskService)> {
        // the header page is owned by the engine, not the cache
        let header_buffer = match disk.read_writable_page(0, FileOrigin::Data).await {
            Ok(buffer) => buffer,
            Err(err) => return Err((err, disk)),
        };
        let mut header = match HeaderPage::load(header_buffer) {
            Ok(header) => header,
            Err(err) => return Err((err, disk)),
        };

        if let Some(collation) = collation {
            if header.pragmas().collation != collation {
                return Err((Error::collation_not_match(), disk));
            }
        }

        let wal_index = WalIndexService::new();

        if disk.get_file_length(FileOrigin::Log) > 0 {
            if let Err(err) = wal_index.restore_index(&mut header, &disk).await {
                return Err((err, disk));
            }
        }

        if validate || header.invalid_datafile_state() {
            if let Err(err) = Self::validate_datafile(&disk, &header).await {
                return Err((err, disk));
            }
        }

        let locker = Rc::new(LockService::new(header.pragmas().timeout));
        let header = Shared::new(header);
        let disk = Rc::new(disk);
        let wal_index = Rc::new(wal_index);

        let monitor = TransactionMonitor::new(
            header.clone(),
            locker.clone(),
            disk.clone(),
            wal_index.clone(),
        );

        log::info!("engine opened (read_only: {read_only})");

        Ok(Rc::new(EngineInner {
            locker,
            disk,
            wal_index,
            header,
            monitor,
            sequences: RefCell::new(HashMap::new()),
            read_only,
            closed: Cell::new(false),
        }))
    }

    /// Cheap structural check: the free-empty chain must only hold empty
    /// pages and every cataloged collection page must parse.
    async fn validate_datafile(disk: &DynDiskService, header: &HeaderPage) -> Result<()> {
        use crate::engine::{BasePage, PageType};

        let mut current = header.free_empty_page_list();
        let mut counter = 0u32;

        while current != u32::MAX {
            if counter > header.last_page_id() {
                return Err(Error::invalid_datafile_state("free chain loops"));
            }
            counter += 1;

            let buffer = disk
                .read_page(BasePage::get_page_position(current), FileOrigin::Data)
                .await?;
            let page_type: PageType = buffer
                .read_u8(BasePage::P_PAGE_TYPE)
                .try_into()
                .map_err(|_| Error::invalid_datafile_state("unknown page type in free chain"))?;
            if page_type != PageType::Empty {
                return Err(Error::invalid_datafile_state(format!(
                    "page {current} on the free chain has type {page_type:?}"
                )));
            }
            current = buffer.read_u32(BasePage::P_NEXT_PAGE_ID);
        }

        for name in header.collection_names() {
            let page_id = header.get_collection_page_id(&name);
            let buffer = disk
                .read_writable_page(BasePage::get_page_position(page_id), FileOrigin::Data)
                .await?;
            if let Err(err) = crate::engine::CollectionPage::load(buffer) {
                return Err(Error::invalid_datafile_state(format!(
                    "collection {name}: {err}"
                )));
            }
        }

        Ok(())
    }

    pub(crate) fn inner(&self) -> Result<Rc<EngineInner>> {
        let inner = self.inner.borrow();
        let inner = inner.as_ref().ok_or_else(Error::engine_closed)?;
        if inner.closed.get() {
            return Err(Error::engine_closed());
        }
        Ok(inner.clone())
    }

    /// Starts a transaction. `query_only` transactions can never write and
    /// skip the LOG entirely.
    pub async fn begin(&self, query_only: bool) -> Result<Transaction> {
        let inner = self.inner()?;
        if inner.read_only && !query_only {
            return Err(Error::unsupported("write transaction on read-only engine"));
        }

        let service = inner.monitor.create_transaction(query_only).await?;
        Ok(Transaction {
            inner,
            service: Some(service),
        })
    }

    /// Runs `f` in a write transaction: commit on success (with an
    /// auto-checkpoint when the LOG passed `CHECKPOINT_SIZE`), rollback on
    /// error.
    pub async fn with_transaction<R>(
        &self,
        f: impl AsyncFnOnce(&mut Transaction) -> Result<R>,
    ) -> Result<R> {
        let mut transaction = self.begin(false).await?;

        match f(&mut transaction).await {
            Ok(result) => {
                transaction.commit().await?;
                Ok(result)
            }
            Err(err) => {
                // the original error wins over rollback problems
                let _ = transaction.rollback().await;
                Err(err)
            }
        }
    }

    pub fn get_collection_names(&self) -> Result<Vec<String>> {
        let inner = self.inner()?;
        let mut names = inner.header.borrow().collection_names();
        names.sort();
        Ok(names)
    }

    pub fn pragma(&self, name: &str) -> Result<crate::engine::Pragma> {
        let inner = self.inner()?;
        let result = inner.header.borrow().pragmas().get(name);
        result
    }

    /// Applies a pragma change and persists it with the next commit (an
    /// immediate empty write transaction).
    pub async fn set_pragma(&self, pragma: crate::engine::Pragma) -> Result<()> {
        let inner = self.inner()?;
        if inner.read_only {
            return Err(Error::unsupported("pragma change on read-only engine"));
        }

        if let crate::engine::Pragma::Timeout(timeout) = pragma {
            inner.locker.set_timeout(timeout);
        }

        inner.header.borrow_mut().pragmas_mut().set(pragma)?;

        // persist through a header-only transaction
        let service = inner.monitor.create_transaction(false).await?;
        let mut transaction = Transaction {
            inner: inner.clone(),
            service: Some(service),
        };
        transaction.service_mut()?.touch_header();
        transaction.commit().await
    }

    /// Copies confirmed LOG pages into the DATA file and truncates the
    /// LOG. Returns the page count moved.
    pub async fn checkpoint(&self) -> Result<usize> {
        let inner = self.inner()?;
        let _scope = inner.locker.enter_exclusive().await?;
        let result = inner.wal_index.checkpoint(&inner.disk).await;
        inner.observe(result).await
    }

    /// Rebuilds the database into a fresh file, keeping the original as
    /// `-backup`. Returns the byte-size delta (old minus new).
    pub async fn rebuild(&self, options: RebuildOptions) -> Result<i64> {
        let inner = self.inner.borrow_mut().take().ok_or_else(Error::engine_closed)?;

        // wait out every reader/writer, then dissolve the service graph
        {
            let _scope = match inner.locker.enter_exclusive().await {
                Ok(scope) => scope,
                Err(err) => {
                    *self.inner.borrow_mut() = Some(inner);
                    return Err(err);
                }
            };
            let checkpoint = inner.wal_index.checkpoint(&inner.disk).await;
            if let Err(err) = checkpoint {
                *self.inner.borrow_mut() = Some(inner);
                return Err(err);
            }
        }

        let result = rebuild::rebuild_database(inner, options).await;
        match result {
            Ok((new_inner, delta)) => {
                *self.inner.borrow_mut() = Some(new_inner);
                Ok(delta)
            }
            Err(err) => Err(err),
        }
    }

    async fn rebuild_and_open(
        settings: EngineSettings,
        options: RebuildOptions,
    ) -> Result<Rc<EngineInner>> {
        rebuild::rebuild_from_factories(
            settings.data_factory,
            settings.log_factory,
            options,
            settings.read_only,
        )
        .await
    }

    /// Checkpoints and shuts down.
    pub async fn close(&self) -> Result<()> {
        let inner = match self.inner.borrow_mut().take() {
            Some(inner) => inner,
            None => return Ok(()),
        };

        if !inner.read_only && !inner.closed.get() {
            let _scope = inner.locker.enter_exclusive().await?;
            inner.wal_index.checkpoint(&inner.disk).await?;
        }

        log::info!("engine closed");
        Ok(())
    }

    #[doc(hidden)]
    pub fn pages_in_use(&self) -> usize {
        self.inner
            .borrow()
            .as_ref()
            .map(|inner| inner.disk.cache().pages_in_use())
            .unwrap_or(0)
    }
}

impl EngineInner {
    /// Fatal errors poison the engine: every later call fails fast and the
    /// header is flagged so the next open can auto-rebuild.
    pub(crate) async fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.kind().is_fatal() && !self.closed.get() {
                log::error!("fatal engine error: {err}");
                self.closed.set(true);

                let mut header = self.header.borrow_mut();
                header.set_invalid_datafile_state(true);
                let buffer = self.disk.new_page();
                if let Ok(mut buffer) = buffer {
                    header.copy_buffer_into(&mut buffer);
                    buffer.set_position_origin(0, FileOrigin::Data);
                    let _ = self.disk.write_data_disk(vec![buffer]).await;
                }
            }
        }
        result
    }

    pub(crate) async fn try_auto_checkpoint(&self) -> Result<()> {
        let checkpoint = self.header.borrow().pragmas().checkpoint;
        if checkpoint == 0 {
            return Ok(());
        }

        if self.disk.get_file_length(FileOrigin::Log)
            > checkpoint as u64 * PAGE_SIZE as u64
        {
            // busy engines skip the automatic checkpoint; a later commit
            // (or an explicit call) will get it
            let _scope = match self.locker.enter_exclusive().await {
                Ok(scope) => scope,
                Err(err) if err.kind() == crate::ErrorKind::LockTimeout => return Ok(()),
                Err(err) => return Err(err),
            };
            let result = self.wal_index.checkpoint(&self.disk).await.map(|_| ());
            return self.observe(result).await;
        }

        Ok(())
    }
}

/// One open transaction. Obtained from [`Engine::begin`]; must end with
/// [`commit`](Transaction::commit) or [`rollback`](Transaction::rollback)
/// (dropping without either behaves like rollback for durability, but
/// skips free-page reclamation until the next rebuild).
pub struct Transaction {
    inner: Rc<EngineInner>,
    service: Option<DynTransactionService>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").finish()
    }
}

impl Transaction {
    pub(crate) fn new(inner: Rc<EngineInner>, service: DynTransactionService) -> Self {
        Transaction {
            inner,
            service: Some(service),
        }
    }

    pub(crate) fn inner(&self) -> &Rc<EngineInner> {
        &self.inner
    }

    pub(crate) fn service_mut(&mut self) -> Result<&mut DynTransactionService> {
        if self.inner.closed.get() {
            return Err(Error::engine_closed());
        }
        self.service
            .as_mut()
            .ok_or_else(|| Error::invalid_transaction_state("transaction already closed"))
    }

    /// Routes an operation result through the engine's fatal-error
    /// detection (integrity and I/O failures poison the engine).
    pub(crate) async fn observed<T>(&self, result: Result<T>) -> Result<T> {
        let inner = self.inner.clone();
        inner.observe(result).await
    }

    pub(crate) fn collation(&self) -> Collation {
        self.inner.header.borrow().pragmas().collation
    }

    pub(crate) fn max_item_count(&self) -> u32 {
        self.inner.disk.max_items_count()
    }

    pub async fn commit(&mut self) -> Result<()> {
        let service = self
            .service
            .take()
            .ok_or_else(|| Error::invalid_transaction_state("transaction already closed"))?;

        let result = service.commit().await;
        let result = self.inner.observe(result).await;
        result?;

        self.inner.try_auto_checkpoint().await
    }

    pub async fn rollback(&mut self) -> Result<()> {
        let service = self
            .service
            .take()
            .ok_or_else(|| Error::invalid_transaction_state("transaction already closed"))?;

        let result = service.rollback().await;
        self.inner.observe(result).await
    }
}
