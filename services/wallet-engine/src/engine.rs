//! Wiring of the ledger store, mutator, token engine and orchestrators.
//!
//! # Example
//!
//! ```no_run
//! use wallet_engine::{Config, WalletEngine};
//!
//! #[tokio::main]
//! async fn main() -> wallet_engine::Result<()> {
//!     let config = Config::default();
//!     let engine = WalletEngine::open(&config).await?;
//!
//!     let leaders = engine.reporting().leaderboard(10).await?;
//!     println!("{} students ranked", leaders.len());
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

use crate::audit::{AuditDispatcher, AuditSink, SqlAuditSink, TracingAuditSink};
use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::{AuditSinkKind, Config, ReportingConfig};
use crate::database::LedgerStore;
use crate::errors::Result;
use crate::mutator::BalanceMutator;
use crate::payment_tokens::PaymentTokenEngine;
use crate::reporting::ReportingService;
use crate::services::{
    AdjustmentService, ExternalSyncService, MarketplaceService, MissionService, TransferService,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct WalletEngine {
    store: Arc<LedgerStore>,
    mutator: Arc<BalanceMutator>,
    tokens: Arc<PaymentTokenEngine>,
    catalog: Catalog,
    missions: MissionService,
    marketplace: MarketplaceService,
    external: ExternalSyncService,
    transfers: TransferService,
    adjustments: AdjustmentService,
    reporting: ReportingService,
    audit_worker: Option<JoinHandle<()>>,
}

impl WalletEngine {
    /// Connect to the configured database and start the audit worker.
    pub async fn open(config: &Config) -> Result<Self> {
        let store = Arc::new(LedgerStore::connect(&config.database).await?);

        let (audit, audit_worker) = if config.audit.enabled {
            let sink: Arc<dyn AuditSink> = match config.audit.sink {
                AuditSinkKind::Database => Arc::new(SqlAuditSink::new(store.pool().clone())),
                AuditSinkKind::Log => Arc::new(TracingAuditSink),
            };
            let (dispatcher, worker) = AuditDispatcher::spawn(sink, config.audit.channel_capacity);
            (dispatcher, Some(worker))
        } else {
            (AuditDispatcher::disabled(), None)
        };

        let mut engine = Self::assemble(
            store,
            Arc::new(SystemClock),
            audit,
            config.reporting.clone(),
        );
        engine.audit_worker = audit_worker;

        info!("Wallet engine ready");
        Ok(engine)
    }

    /// Build an engine from already constructed parts.
    pub fn assemble(
        store: Arc<LedgerStore>,
        clock: Arc<dyn Clock>,
        audit: AuditDispatcher,
        reporting: ReportingConfig,
    ) -> Self {
        let mutator = Arc::new(BalanceMutator::new(store.clone(), clock.clone()));
        let tokens = Arc::new(PaymentTokenEngine::new(
            store.clone(),
            mutator.clone(),
            clock.clone(),
            audit.clone(),
        ));

        Self {
            catalog: Catalog::new(store.clone(), clock.clone()),
            missions: MissionService::new(
                store.clone(),
                mutator.clone(),
                clock.clone(),
                audit.clone(),
            ),
            marketplace: MarketplaceService::new(
                store.clone(),
                mutator.clone(),
                tokens.clone(),
                clock.clone(),
            ),
            external: ExternalSyncService::new(
                store.clone(),
                mutator.clone(),
                clock.clone(),
                audit.clone(),
            ),
            transfers: TransferService::new(store.clone(), mutator.clone(), clock.clone()),
            adjustments: AdjustmentService::new(store.clone(), mutator.clone(), clock.clone(), audit),
            reporting: ReportingService::new(store.clone(), clock, reporting),
            store,
            mutator,
            tokens,
            audit_worker: None,
        }
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn mutator(&self) -> &Arc<BalanceMutator> {
        &self.mutator
    }

    pub fn tokens(&self) -> &Arc<PaymentTokenEngine> {
        &self.tokens
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn missions(&self) -> &MissionService {
        &self.missions
    }

    pub fn marketplace(&self) -> &MarketplaceService {
        &self.marketplace
    }

    pub fn external(&self) -> &ExternalSyncService {
        &self.external
    }

    pub fn transfers(&self) -> &TransferService {
        &self.transfers
    }

    pub fn adjustments(&self) -> &AdjustmentService {
        &self.adjustments
    }

    pub fn reporting(&self) -> &ReportingService {
        &self.reporting
    }

    /// Drop every audit sender and wait for queued records to be written.
    pub async fn shutdown(self) {
        let WalletEngine {
            store,
            mutator,
            tokens,
            catalog,
            missions,
            marketplace,
            external,
            transfers,
            adjustments,
            reporting,
            audit_worker,
        } = self;
        drop((
            mutator,
            tokens,
            catalog,
            missions,
            marketplace,
            external,
            transfers,
            adjustments,
            reporting,
        ));

        if let Some(worker) = audit_worker {
            if let Err(e) = worker.await {
                warn!("Audit worker ended abnormally: {}", e);
            }
        }
        store.pool().close().await;
    }
}
