//! Short-lived, single-use QR payment tokens.
//!
//! A token moves `active -> consumed` or `active -> expired` and never leaves
//! a terminal state. Consumption claims the token with one conditional update
//! before any balance is touched, so two concurrent consumers cannot both win.

use crate::audit::AuditDispatcher;
use crate::clock::Clock;
use crate::database::{LedgerStore, UnitOfWork};
use crate::errors::{Result, WalletEngineError};
use crate::metrics::PAYMENT_TOKENS_TOTAL;
use crate::mutator::BalanceMutator;
use crate::models::{
    ensure_positive, ActivityRecord, AuditAction, EntryType, LedgerEntry, PaymentToken, Posting,
    TokenPurpose, TokenStatus, UserId, WalletId,
};
use chrono::Duration;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use sqlx::{Executor, Sqlite};
use std::sync::Arc;
use tracing::{info, warn};

/// Lifetime of a freshly issued token.
pub const PAYMENT_TOKEN_TTL_MINUTES: i64 = 10;

const TOKEN_BYTES: usize = 16;

/// Optional checks applied while settling a token inside a larger operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenExpectation {
    pub payer_wallet_id: Option<WalletId>,
    pub amount: Option<i64>,
}

/// Outcome of a successful consumption.
#[derive(Debug, Clone, Serialize)]
pub struct TokenSettlement {
    pub token: PaymentToken,
    pub payer_entry: LedgerEntry,
    pub consumer_entry: LedgerEntry,
}

pub struct PaymentTokenEngine {
    store: Arc<LedgerStore>,
    mutator: Arc<BalanceMutator>,
    clock: Arc<dyn Clock>,
    audit: AuditDispatcher,
}

impl PaymentTokenEngine {
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

    /// Issues a token after checking the payer can currently cover `amount`.
    /// Funds are not held; consumption re-checks the balance.
    pub async fn issue(
        &self,
        payer_wallet_id: WalletId,
        amount: i64,
        merchant: &str,
        purpose: TokenPurpose,
    ) -> Result<PaymentToken> {
        ensure_positive(amount, "token amount")?;
        if merchant.trim().is_empty() {
            return Err(WalletEngineError::Validation(
                "merchant label is required".to_string(),
            ));
        }

        let wallet = self
            .store
            .get_wallet(payer_wallet_id)
            .await?
            .ok_or_else(|| WalletEngineError::not_found("wallet", payer_wallet_id))?;
        if wallet.balance < amount {
            return Err(WalletEngineError::InsufficientBalance {
                wallet_id: payer_wallet_id,
                required: amount,
                available: wallet.balance,
            });
        }

        let now = self.clock.now();
        let token = sqlx::query_as::<_, PaymentToken>(
            r#"
            INSERT INTO payment_tokens (token, wallet_id, amount, merchant, purpose, status, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(generate_token())
        .bind(payer_wallet_id)
        .bind(amount)
        .bind(merchant)
        .bind(purpose)
        .bind(TokenStatus::Active)
        .bind(now + Duration::minutes(PAYMENT_TOKEN_TTL_MINUTES))
        .bind(now)
        .fetch_one(self.store.pool())
        .await?;

        PAYMENT_TOKENS_TOTAL.with_label_values(&["issued"]).inc();
        info!(
            "Issued {} token for wallet {}: {} points to {}",
            purpose, payer_wallet_id, amount, merchant
        );
        Ok(token)
    }

    /// Consumes a token in its own unit of work and credits `consumer_wallet_id`.
    pub async fn consume(
        &self,
        token: &str,
        consumer_wallet_id: WalletId,
    ) -> Result<TokenSettlement> {
        let mut uow = self.store.begin().await?;

        match self
            .consume_in(&mut uow, token, consumer_wallet_id, TokenExpectation::default())
            .await
        {
            Ok(settlement) => {
                uow.commit().await?;
                self.audit_consumption(&settlement).await;
                info!(
                    "Token {} settled: {} points from wallet {} to wallet {}",
                    settlement.token.id,
                    settlement.token.amount,
                    settlement.token.wallet_id,
                    consumer_wallet_id
                );
                Ok(settlement)
            }
            Err(WalletEngineError::Expired(message)) => {
                // Keep the active -> expired transition even though the payment failed.
                uow.commit().await?;
                Err(WalletEngineError::Expired(message))
            }
            Err(e) => {
                uow.rollback().await?;
                warn!("Token consumption rejected: {}", e);
                Err(e)
            }
        }
    }

    /// Settles a token inside the caller's unit of work.
    pub async fn consume_in(
        &self,
        uow: &mut UnitOfWork,
        token: &str,
        consumer_wallet_id: WalletId,
        expect: TokenExpectation,
    ) -> Result<TokenSettlement> {
        let now = self.clock.now();

        let claimed = sqlx::query_as::<_, PaymentToken>(
            r#"
            UPDATE payment_tokens
            SET status = $1, consumed_by = $2, consumed_at = $3
            WHERE token = $4 AND status = $5 AND expires_at >= $3
            RETURNING *
            "#,
        )
        .bind(TokenStatus::Consumed)
        .bind(consumer_wallet_id)
        .bind(now)
        .bind(token)
        .bind(TokenStatus::Active)
        .fetch_optional(uow.conn())
        .await?;

        let claimed = match claimed {
            Some(claimed) => claimed,
            None => return Err(self.explain_unclaimable(uow, token).await?),
        };

        if claimed.wallet_id == consumer_wallet_id {
            return Err(WalletEngineError::Validation(
                "a wallet cannot consume its own payment token".to_string(),
            ));
        }
        if let Some(payer) = expect.payer_wallet_id {
            if claimed.wallet_id != payer {
                return Err(WalletEngineError::Validation(
                    "payment token does not belong to this buyer".to_string(),
                ));
            }
        }
        if let Some(amount) = expect.amount {
            if claimed.amount != amount {
                return Err(WalletEngineError::Validation(format!(
                    "payment token amount {} does not match total {}",
                    claimed.amount, amount
                )));
            }
        }

        let (payer_posting, consumer_posting) = match claimed.purpose {
            TokenPurpose::Purchase => (
                Posting::new(
                    EntryType::Marketplace,
                    format!("QR payment to {}", claimed.merchant),
                ),
                Posting::new(
                    EntryType::MarketplaceSale,
                    format!("Sale via QR: {}", claimed.merchant),
                ),
            ),
            TokenPurpose::Transfer => (
                Posting::new(
                    EntryType::TransferOut,
                    format!("QR transfer to {}", claimed.merchant),
                ),
                Posting::new(
                    EntryType::TransferIn,
                    format!("QR transfer from wallet #{}", claimed.wallet_id),
                ),
            ),
        };

        let payer_entry = self
            .mutator
            .debit(
                uow,
                claimed.wallet_id,
                claimed.amount,
                payer_posting.with_reference(claimed.id),
            )
            .await?;
        let consumer_entry = self
            .mutator
            .credit(
                uow,
                consumer_wallet_id,
                claimed.amount,
                consumer_posting.with_reference(claimed.id),
            )
            .await?;

        PAYMENT_TOKENS_TOTAL.with_label_values(&["consumed"]).inc();
        Ok(TokenSettlement {
            token: claimed,
            payer_entry,
            consumer_entry,
        })
    }

    /// True if the token could be consumed right now. Lazily expires an
    /// overdue token; never touches balances.
    pub async fn is_live(&self, token: &str) -> Result<bool> {
        let Some(found) = self.get_token(token).await? else {
            return Ok(false);
        };

        if found.status != TokenStatus::Active {
            return Ok(false);
        }

        if self.clock.now() > found.expires_at {
            if mark_expired(self.store.pool(), found.id).await? > 0 {
                PAYMENT_TOKENS_TOTAL.with_label_values(&["expired"]).inc();
            }
            return Ok(false);
        }

        Ok(true)
    }

    /// Expires every overdue active token. Returns how many were transitioned.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE payment_tokens SET status = $1 WHERE status = $2 AND expires_at < $3",
        )
        .bind(TokenStatus::Expired)
        .bind(TokenStatus::Active)
        .bind(self.clock.now())
        .execute(self.store.pool())
        .await?;

        let swept = result.rows_affected();
        if swept > 0 {
            PAYMENT_TOKENS_TOTAL
                .with_label_values(&["expired"])
                .inc_by(swept);
        }
        Ok(swept)
    }

    pub async fn get_token(&self, token: &str) -> Result<Option<PaymentToken>> {
        let found = sqlx::query_as::<_, PaymentToken>("SELECT * FROM payment_tokens WHERE token = $1")
            .bind(token)
            .fetch_optional(self.store.pool())
            .await?;

        Ok(found)
    }

    /// Works out why the claim matched nothing. An overdue token that is still
    /// marked active is transitioned to `expired` on the way out.
    async fn explain_unclaimable(
        &self,
        uow: &mut UnitOfWork,
        token: &str,
    ) -> Result<WalletEngineError> {
        let found = sqlx::query_as::<_, PaymentToken>("SELECT * FROM payment_tokens WHERE token = $1")
            .bind(token)
            .fetch_optional(uow.conn())
            .await?;

        let err = match found {
            None => WalletEngineError::not_found("payment token", token),
            Some(found) => match found.status {
                TokenStatus::Active => {
                    if mark_expired(uow.conn(), found.id).await? > 0 {
                        PAYMENT_TOKENS_TOTAL.with_label_values(&["expired"]).inc();
                    }
                    WalletEngineError::Expired(format!("payment token {} has expired", found.id))
                }
                TokenStatus::Expired => WalletEngineError::InvalidState(format!(
                    "payment token {} is no longer active",
                    found.id
                )),
                TokenStatus::Consumed => WalletEngineError::InvalidState(format!(
                    "payment token {} has already been used",
                    found.id
                )),
            },
        };
        Ok(err)
    }

    async fn audit_consumption(&self, settlement: &TokenSettlement) {
        let actor_id = match self.owner_of(settlement.consumer_entry.wallet_id).await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => return,
            Err(e) => {
                warn!("Could not resolve token consumer for audit: {}", e);
                return;
            }
        };

        self.audit.record(ActivityRecord {
            actor_id,
            action: AuditAction::ConsumeToken,
            entity: "PAYMENT_TOKEN".to_string(),
            entity_id: settlement.token.id,
            detail: format!(
                "Consumed {} points from wallet {}",
                settlement.token.amount, settlement.token.wallet_id
            ),
            created_at: self.clock.now(),
        });
    }

    async fn owner_of(&self, wallet_id: WalletId) -> Result<Option<UserId>> {
        Ok(self.store.get_wallet(wallet_id).await?.map(|w| w.user_id))
    }
}

async fn mark_expired<'e, E>(executor: E, token_id: i64) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE payment_tokens SET status = $1 WHERE id = $2 AND status = $3")
        .bind(TokenStatus::Expired)
        .bind(token_id)
        .bind(TokenStatus::Active)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
