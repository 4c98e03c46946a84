use std::sync::Arc;

use shared::error::{AppError, AppResult};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::Config;
use crate::ledger::{BlockStore, LedgerService, MemoryBlockStore, RedbBlockStore, VerifyScheduler};
use crate::records::{RecordService, RecordStore};

/// 服务器状态 - 持有所有服务的共享引用
///
/// Cloning is cheap: every field is an `Arc`.
#[derive(Clone)]
pub struct LedgerState {
    pub config: Config,
    pub store: Arc<dyn BlockStore>,
    pub records: Arc<RecordStore>,
    pub ledger: Arc<LedgerService>,
    pub record_service: RecordService,
}

impl LedgerState {
    /// 初始化服务器状态
    ///
    /// Creates the work directory if needed and opens the ledger database.
    pub fn initialize(config: &Config) -> AppResult<Self> {
        std::fs::create_dir_all(&config.work_dir).map_err(|e| {
            AppError::config(format!("Cannot create work dir {}: {e}", config.work_dir))
        })?;

        let db_path = config.ledger_db_path();
        let store = RedbBlockStore::open(&db_path)?;
        tracing::info!(path = %db_path.display(), "Ledger database opened");

        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// State over a volatile in-memory ledger
    pub fn in_memory(config: &Config) -> Self {
        Self::with_store(config, Arc::new(MemoryBlockStore::new()))
    }

    pub fn with_store(config: &Config, store: Arc<dyn BlockStore>) -> Self {
        let records = Arc::new(RecordStore::new());
        let ledger = Arc::new(
            LedgerService::new(store.clone(), records.clone())
                .with_max_retries(config.append_max_retries)
                .with_skew_tolerance(config.clock_skew_tolerance_ms),
        );
        let record_service = RecordService::new(records.clone(), ledger.clone());

        Self {
            config: config.clone(),
            store,
            records,
            ledger,
            record_service,
        }
    }

    /// 启动后台任务 (定期全链验证)
    pub fn start_background_tasks(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler =
            VerifyScheduler::new(self.ledger.clone(), self.config.verify_interval(), shutdown);
        tokio::spawn(scheduler.run())
    }
}
