use crate::clock::Clock;
use crate::database::LedgerStore;
use crate::errors::{Result, WalletEngineError};
use crate::models::{
    ensure_positive, Actor, EntryStatus, LedgerEntry, Transfer, TransferRequest, WalletId,
};
use crate::mutator::BalanceMutator;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct TransferReceipt {
    pub transfer: Transfer,
    pub debit: LedgerEntry,
    pub credit: LedgerEntry,
}

pub struct TransferService {
    store: Arc<LedgerStore>,
    mutator: Arc<BalanceMutator>,
    clock: Arc<dyn Clock>,
}

impl TransferService {
    pub fn new(store: Arc<LedgerStore>, mutator: Arc<BalanceMutator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            mutator,
            clock,
        }
    }

    /// Moves points from the caller's wallet to another wallet.
    pub async fn send(&self, actor: &Actor, request: TransferRequest) -> Result<TransferReceipt> {
        ensure_positive(request.amount, "transfer amount")?;

        let sender = self
            .store
            .wallet_for_user(actor.user_id)
            .await?
            .ok_or_else(|| WalletEngineError::not_found("wallet for user", actor.user_id))?;
        if sender.id == request.receiver_wallet_id {
            return Err(WalletEngineError::Validation(
                "cannot transfer to your own wallet".to_string(),
            ));
        }
        if self
            .store
            .get_wallet(request.receiver_wallet_id)
            .await?
            .is_none()
        {
            return Err(WalletEngineError::not_found(
                "wallet",
                request.receiver_wallet_id,
            ));
        }

        let mut uow = self.store.begin().await?;
        let transfer = sqlx::query_as::<_, Transfer>(
            r#"
            INSERT INTO transfers (sender_wallet_id, receiver_wallet_id, amount, description, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(sender.id)
        .bind(request.receiver_wallet_id)
        .bind(request.amount)
        .bind(&request.description)
        .bind(EntryStatus::Success)
        .bind(self.clock.now())
        .fetch_one(uow.conn())
        .await?;

        let (debit, credit) = self
            .mutator
            .transfer(
                &mut uow,
                sender.id,
                request.receiver_wallet_id,
                request.amount,
                &request.description,
                Some(transfer.id),
            )
            .await?;
        uow.commit().await?;

        info!(
            "Transfer {}: {} points from wallet {} to wallet {}",
            transfer.id, transfer.amount, sender.id, transfer.receiver_wallet_id
        );
        Ok(TransferReceipt {
            transfer,
            debit,
            credit,
        })
    }

    /// Transfers sent or received by a wallet, newest first.
    pub async fn history(&self, wallet_id: WalletId) -> Result<Vec<Transfer>> {
        let transfers = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT * FROM transfers
            WHERE sender_wallet_id = $1 OR receiver_wallet_id = $1
            ORDER BY id DESC
            "#,
        )
        .bind(wallet_id)
        .fetch_all(self.store.pool())
        .await?;

        Ok(transfers)
    }
}
