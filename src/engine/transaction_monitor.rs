use crate::engine::disk::DiskService;
use crate::engine::lock_service::LockService;
use crate::engine::pages::HeaderPage;
use crate::engine::transaction_service::TransactionService;
use crate::engine::wal_index_service::WalIndexService;
use crate::engine::{MAX_OPEN_TRANSACTIONS, MAX_TRANSACTION_SIZE, StreamFactory};
use crate::utils::Shared;
use crate::{Error, Result};
use std::rc::Rc;

/// Budget pool shared by all open transactions.
pub(crate) struct TransactionMonitorShared {
    pub free_pages: u32,
    pub initial_size: u32,
    pub open_transactions: usize,
}

/// Caps concurrent transactions and partitions the global page budget
/// among them. Transactions give their budget share back on drop.
pub(crate) struct TransactionMonitor<SF: StreamFactory> {
    header: Shared<HeaderPage>,
    locker: Rc<LockService>,
    disk: Rc<DiskService<SF>>,
    wal_index: Rc<WalIndexService>,
    shared: Shared<TransactionMonitorShared>,
}

impl<SF: StreamFactory> TransactionMonitor<SF> {
    pub fn new(
        header: Shared<HeaderPage>,
        locker: Rc<LockService>,
        disk: Rc<DiskService<SF>>,
        wal_index: Rc<WalIndexService>,
    ) -> Self {
        Self {
            header,
            locker,
            disk,
            wal_index,
            shared: Shared::new(TransactionMonitorShared {
                free_pages: MAX_TRANSACTION_SIZE,
                initial_size: MAX_TRANSACTION_SIZE / MAX_OPEN_TRANSACTIONS as u32,
                open_transactions: 0,
            }),
        }
    }

    pub fn open_transactions(&self) -> usize {
        self.shared.borrow().open_transactions
    }

    pub async fn create_transaction(&self, query_only: bool) -> Result<TransactionService<SF>> {
        let initial_size = {
            let mut shared = self.shared.borrow_mut();

            if shared.open_transactions >= MAX_OPEN_TRANSACTIONS {
                return Err(Error::transaction_limit());
            }

            // take a full share when available, whatever is left otherwise
            // (a zero budget just means safepoints on every page)
            let size = shared.initial_size.min(shared.free_pages);
            shared.free_pages -= size;
            shared.open_transactions += 1;
            size
        };

        let transaction = TransactionService::new(
            self.header.clone(),
            self.locker.clone(),
            self.disk.clone(),
            self.wal_index.clone(),
            self.shared.clone(),
            initial_size,
            query_only,
        )
        .await;

        match transaction {
            Ok(transaction) => Ok(transaction),
            Err(err) => {
                // the db gate was never taken; put the share back
                let mut shared = self.shared.borrow_mut();
                shared.free_pages += initial_size;
                shared.open_transactions -= 1;
                Err(err)
            }
        }
    }
}
