//! The only code path allowed to change a wallet balance.
//!
//! Every call runs inside the caller's [`UnitOfWork`] and writes exactly one
//! ledger entry per balance it touches. A failed call writes nothing, and the
//! caller drops the unit of work to discard anything done before it.

use crate::clock::Clock;
use crate::database::{LedgerStore, UnitOfWork};
use crate::errors::{Result, WalletEngineError};
use crate::metrics::{LEDGER_ENTRIES_TOTAL, MUTATIONS_REJECTED_TOTAL, POINTS_MOVED_TOTAL};
use crate::models::{ensure_positive, Direction, EntryType, LedgerEntry, Posting, WalletId};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct BalanceMutator {
    store: Arc<LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl BalanceMutator {
    pub fn new(store: Arc<LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn credit(
        &self,
        uow: &mut UnitOfWork,
        wallet_id: WalletId,
        amount: i64,
        posting: Posting,
    ) -> Result<LedgerEntry> {
        ensure_positive(amount, "credit amount")?;

        let balance = match self.store.add_delta(uow, wallet_id, amount, self.clock.now()).await? {
            Some(balance) => balance,
            None => {
                let err = match self.store.get_wallet_in(uow, wallet_id).await? {
                    Some(_) => WalletEngineError::Validation("credit would overflow balance".into()),
                    None => WalletEngineError::not_found("wallet", wallet_id),
                };
                return Err(reject(err));
            }
        };

        let entry = self.record(uow, wallet_id, amount, Direction::Credit, posting).await?;
        debug!(
            "Credited {} to wallet {} ({}), balance now {}",
            amount, wallet_id, entry.entry_type, balance
        );
        Ok(entry)
    }

    pub async fn debit(
        &self,
        uow: &mut UnitOfWork,
        wallet_id: WalletId,
        amount: i64,
        posting: Posting,
    ) -> Result<LedgerEntry> {
        ensure_positive(amount, "debit amount")?;

        let balance = match self.store.add_delta(uow, wallet_id, -amount, self.clock.now()).await? {
            Some(balance) => balance,
            None => {
                let err = match self.store.get_wallet_in(uow, wallet_id).await? {
                    Some(wallet) => WalletEngineError::InsufficientBalance {
                        wallet_id,
                        required: amount,
                        available: wallet.balance,
                    },
                    None => WalletEngineError::not_found("wallet", wallet_id),
                };
                return Err(reject(err));
            }
        };

        let entry = self.record(uow, wallet_id, amount, Direction::Debit, posting).await?;
        debug!(
            "Debited {} from wallet {} ({}), balance now {}",
            amount, wallet_id, entry.entry_type, balance
        );
        Ok(entry)
    }

    /// Debits `from` and credits `to` as a peer transfer. The debit runs first
    /// so an underfunded sender never produces a credit.
    pub async fn transfer(
        &self,
        uow: &mut UnitOfWork,
        from: WalletId,
        to: WalletId,
        amount: i64,
        description: &str,
        reference_id: Option<i64>,
    ) -> Result<(LedgerEntry, LedgerEntry)> {
        let mut outgoing = Posting::new(
            EntryType::TransferOut,
            format!("Transfer to wallet #{}: {}", to, description),
        );
        let mut incoming = Posting::new(
            EntryType::TransferIn,
            format!("Transfer from wallet #{}: {}", from, description),
        );
        if let Some(reference_id) = reference_id {
            outgoing = outgoing.with_reference(reference_id);
            incoming = incoming.with_reference(reference_id);
        }

        let debit = self.debit(uow, from, amount, outgoing).await?;
        let credit = self.credit(uow, to, amount, incoming).await?;
        Ok((debit, credit))
    }

    /// Sets an exact balance and records the difference as one compensating
    /// adjustment. Returns `None` when the balance was already `new_balance`.
    pub async fn reset(
        &self,
        uow: &mut UnitOfWork,
        wallet_id: WalletId,
        new_balance: i64,
        posting: Posting,
    ) -> Result<Option<LedgerEntry>> {
        if new_balance < 0 {
            return Err(reject(WalletEngineError::Validation(format!(
                "balance cannot be negative, got {}",
                new_balance
            ))));
        }

        self.store.lock_wallet(uow, wallet_id, self.clock.now()).await?;
        let old_balance = self.store.get_balance(uow, wallet_id).await?;
        if old_balance == new_balance {
            return Ok(None);
        }

        self.store.set_balance(uow, wallet_id, new_balance, self.clock.now()).await?;

        let direction = if new_balance > old_balance {
            Direction::Credit
        } else {
            Direction::Debit
        };
        let amount = (new_balance - old_balance).abs();
        let entry = self.record(uow, wallet_id, amount, direction, posting).await?;

        debug!(
            "Reset wallet {} from {} to {}",
            wallet_id, old_balance, new_balance
        );
        Ok(Some(entry))
    }

    async fn record(
        &self,
        uow: &mut UnitOfWork,
        wallet_id: WalletId,
        amount: i64,
        direction: Direction,
        posting: Posting,
    ) -> Result<LedgerEntry> {
        let new_entry = posting.into_entry(wallet_id, amount, direction, self.clock.now());
        let entry = self.store.append_entry(uow, &new_entry).await?;

        LEDGER_ENTRIES_TOTAL
            .with_label_values(&[direction.as_str(), entry.entry_type.as_str()])
            .inc();
        POINTS_MOVED_TOTAL
            .with_label_values(&[direction.as_str()])
            .inc_by(amount as u64);
        Ok(entry)
    }
}

fn reject(err: WalletEngineError) -> WalletEngineError {
    warn!("Balance mutation rejected: {}", err);
    MUTATIONS_REJECTED_TOTAL
        .with_label_values(&[err.error_type()])
        .inc();
    err
}
