use crate::audit::AuditDispatcher;
use crate::clock::Clock;
use crate::database::LedgerStore;
use crate::errors::{Result, WalletEngineError};
use crate::models::{
    ensure_positive, ActivityRecord, Actor, AuditAction, EntryStatus, EntryType, ExternalPointLog,
    ExternalSource, Posting, RecordStatus, SyncRequest, UserRole,
};
use crate::mutator::BalanceMutator;
use std::sync::Arc;
use tracing::{info, warn};

/// Credits points earned in partner systems, once per external transaction.
pub struct ExternalSyncService {
    store: Arc<LedgerStore>,
    mutator: Arc<BalanceMutator>,
    clock: Arc<dyn Clock>,
    audit: AuditDispatcher,
}

impl ExternalSyncService {
    pub fn new(
        store: Arc<LedgerStore>,
        mutator: Arc<BalanceMutator>,
        clock: Arc<dyn Clock>,
        audit: AuditDispatcher,
    ) -> Self {
        Self {
            store,
            mutator,
            clock,
            audit,
        }
    }

    pub async fn register_source(
        &self,
        actor: &Actor,
        name: &str,
        endpoint: &str,
    ) -> Result<ExternalSource> {
        actor.require_role(&[UserRole::Admin], "register external sources")?;
        if name.trim().is_empty() {
            return Err(WalletEngineError::Validation(
                "source name is required".to_string(),
            ));
        }

        let source = sqlx::query_as::<_, ExternalSource>(
            r#"
            INSERT INTO external_sources (name, endpoint, status, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(name.trim())
        .bind(endpoint)
        .bind(RecordStatus::Active)
        .bind(self.clock.now())
        .fetch_one(self.store.pool())
        .await
        .map_err(|e| {
            WalletEngineError::on_unique_violation(e, || {
                WalletEngineError::DuplicateOperation(format!("source {} already exists", name))
            })
        })?;

        info!("Registered external source {} ({})", source.name, source.id);
        Ok(source)
    }

    pub async fn set_source_status(
        &self,
        actor: &Actor,
        source_id: i64,
        status: RecordStatus,
    ) -> Result<()> {
        actor.require_role(&[UserRole::Admin], "manage external sources")?;

        let result = sqlx::query("UPDATE external_sources SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(source_id)
            .execute(self.store.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(WalletEngineError::not_found("external source", source_id));
        }
        Ok(())
    }

    pub async fn list_sources(&self) -> Result<Vec<ExternalSource>> {
        let sources =
            sqlx::query_as::<_, ExternalSource>("SELECT * FROM external_sources ORDER BY id ASC")
                .fetch_all(self.store.pool())
                .await?;

        Ok(sources)
    }

    /// Credits the caller's wallet for one external transaction.
    pub async fn sync_points(&self, actor: &Actor, request: SyncRequest) -> Result<ExternalPointLog> {
        ensure_positive(request.amount, "synced amount")?;
        let external_id = request.external_transaction_id.trim();
        if external_id.is_empty() {
            return Err(WalletEngineError::Validation(
                "external transaction id is required".to_string(),
            ));
        }

        let source = sqlx::query_as::<_, ExternalSource>("SELECT * FROM external_sources WHERE id = $1")
            .bind(request.source_id)
            .fetch_optional(self.store.pool())
            .await?
            .ok_or_else(|| WalletEngineError::not_found("external source", request.source_id))?;
        if source.status != RecordStatus::Active {
            return Err(WalletEngineError::InvalidState(format!(
                "external source {} is inactive",
                source.name
            )));
        }

        let already_synced: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM external_point_logs WHERE external_transaction_id = $1",
        )
        .bind(external_id)
        .fetch_optional(self.store.pool())
        .await?;
        if already_synced.is_some() {
            return Err(duplicate(external_id));
        }

        let wallet = self
            .store
            .wallet_for_user(actor.user_id)
            .await?
            .ok_or_else(|| WalletEngineError::not_found("wallet for user", actor.user_id))?;

        let metadata = request
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = self.clock.now();

        let mut uow = self.store.begin().await?;
        let log = sqlx::query_as::<_, ExternalPointLog>(
            r#"
            INSERT INTO external_point_logs (wallet_id, source_id, external_transaction_id, amount, metadata, status, synced_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(wallet.id)
        .bind(source.id)
        .bind(external_id)
        .bind(request.amount)
        .bind(metadata)
        .bind(EntryStatus::Success)
        .bind(now)
        .fetch_one(uow.conn())
        .await
        .map_err(|e| WalletEngineError::on_unique_violation(e, || duplicate(external_id)))?;

        let posting = Posting::new(
            EntryType::External,
            format!("External sync from {}: {}", source.name, external_id),
        )
        .with_reference(log.id);
        self.mutator
            .credit(&mut uow, wallet.id, request.amount, posting)
            .await?;
        self.store.touch_last_sync(&mut uow, wallet.id, now).await?;
        uow.commit().await?;

        self.audit.record(ActivityRecord {
            actor_id: actor.user_id,
            action: AuditAction::ExternalSync,
            entity: "WALLET".to_string(),
            entity_id: wallet.id,
            detail: format!(
                "Synced {} points from {} ({})",
                request.amount, source.name, external_id
            ),
            created_at: now,
        });
        info!(
            "Synced {} points from {} into wallet {}",
            request.amount, source.name, wallet.id
        );
        Ok(log)
    }
}

fn duplicate(external_id: &str) -> WalletEngineError {
    let err = WalletEngineError::DuplicateOperation(format!(
        "external transaction {} already synced",
        external_id
    ));
    warn!("Sync rejected: {}", err);
    err
}
