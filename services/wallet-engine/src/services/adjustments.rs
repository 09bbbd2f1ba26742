use crate::audit::AuditDispatcher;
use crate::clock::Clock;
use crate::database::LedgerStore;
use crate::errors::{Result, WalletEngineError};
use crate::models::{
    ActivityRecord, Actor, AdjustmentRequest, AuditAction, Direction, EntryType, LedgerEntry,
    Originator, Posting, ResetWalletRequest, UserRole,
};
use crate::mutator::BalanceMutator;
use std::sync::Arc;
use tracing::info;

/// Manual corrections made by administrators.
pub struct AdjustmentService {
    store: Arc<LedgerStore>,
    mutator: Arc<BalanceMutator>,
    clock: Arc<dyn Clock>,
    audit: AuditDispatcher,
}

impl AdjustmentService {
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

    pub async fn adjust(&self, actor: &Actor, request: AdjustmentRequest) -> Result<LedgerEntry> {
        actor.require_role(&[UserRole::Admin], "adjust points")?;
        if request.description.trim().is_empty() {
            return Err(WalletEngineError::Validation(
                "adjustment needs a description".to_string(),
            ));
        }

        let posting =
            Posting::new(EntryType::Adjustment, request.description.clone()).by(Originator::Admin);

        let mut uow = self.store.begin().await?;
        let entry = match request.direction {
            Direction::Credit => {
                self.mutator
                    .credit(&mut uow, request.wallet_id, request.amount, posting)
                    .await?
            }
            Direction::Debit => {
                self.mutator
                    .debit(&mut uow, request.wallet_id, request.amount, posting)
                    .await?
            }
        };
        uow.commit().await?;

        self.audit.record(ActivityRecord {
            actor_id: actor.user_id,
            action: AuditAction::AdjustPoints,
            entity: "WALLET".to_string(),
            entity_id: request.wallet_id,
            detail: format!(
                "Adjusted {} points ({}): {}",
                request.amount, request.direction, request.description
            ),
            created_at: self.clock.now(),
        });
        info!(
            "Admin {} adjusted wallet {}: {} {}",
            actor.user_id, request.wallet_id, request.direction, request.amount
        );
        Ok(entry)
    }

    /// Sets an exact balance. Returns the compensating entry, if any.
    pub async fn reset(
        &self,
        actor: &Actor,
        request: ResetWalletRequest,
    ) -> Result<Option<LedgerEntry>> {
        actor.require_role(&[UserRole::Admin], "reset wallets")?;

        let posting = Posting::new(
            EntryType::Adjustment,
            format!("Wallet reset: {}", request.reason),
        )
        .by(Originator::Admin);

        let mut uow = self.store.begin().await?;
        let entry = self
            .mutator
            .reset(&mut uow, request.wallet_id, request.new_balance, posting)
            .await?;
        uow.commit().await?;

        self.audit.record(ActivityRecord {
            actor_id: actor.user_id,
            action: AuditAction::ResetWallet,
            entity: "WALLET".to_string(),
            entity_id: request.wallet_id,
            detail: format!(
                "Reset balance to {}: {}",
                request.new_balance, request.reason
            ),
            created_at: self.clock.now(),
        });
        info!(
            "Admin {} reset wallet {} to {}",
            actor.user_id, request.wallet_id, request.new_balance
        );
        Ok(entry)
    }
}
